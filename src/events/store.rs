//! Chat event storage (SQLite).

use crate::db::{from_millis, to_millis};
use crate::error::{MemoryError, Result};
use crate::events::types::{ChatEvent, EventType};

use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row as _, SqlitePool};

/// Events at or above this importance survive retention.
const RETAIN_IMPORTANCE: f32 = 0.7;

/// Tags shorter than this are too generic to count as a reference.
const MIN_TAG_CHARS: usize = 4;

const EVENT_COLUMNS: &str = "id, chat_id, event_type, timestamp, participants, title, \
     description, importance, tags, related_message_ids, is_recurring, mention_count";

/// Event store for persistence.
#[derive(Debug)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the event table.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_events (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                participants TEXT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                importance REAL NOT NULL,
                tags TEXT,
                related_message_ids TEXT,
                is_recurring INTEGER NOT NULL DEFAULT 0,
                mention_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create chat_events table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_chat_time ON chat_events(chat_id, timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn save(&self, event: &ChatEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_events
                (id, chat_id, event_type, timestamp, participants, title, description,
                 importance, tags, related_message_ids, is_recurring, mention_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.chat_id)
        .bind(event.event_type.as_str())
        .bind(to_millis(event.timestamp))
        .bind(encode_list(&event.participants))
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.importance)
        .bind(encode_list(&event.tags))
        .bind(encode_list(&event.related_message_ids))
        .bind(event.is_recurring)
        .bind(event.mention_count)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save event {}", event.id))?;
        Ok(())
    }

    /// Newest events first.
    pub async fn recent(&self, chat_id: &str, limit: i64) -> Result<Vec<ChatEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM chat_events WHERE chat_id = ? \
             ORDER BY timestamp DESC LIMIT ?"
        ))
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load events for {chat_id}"))?;

        Ok(rows.iter().filter_map(row_to_event).collect())
    }

    /// Events whose title, description or tags mention any keyword, most
    /// important first. Falls back to the newest events when nothing matches.
    pub async fn relevant(
        &self,
        chat_id: &str,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<ChatEvent>> {
        let events = self.recent(chat_id, 200).await?;
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut matched: Vec<ChatEvent> = events
            .iter()
            .filter(|event| {
                let haystack = format!(
                    "{} {} {}",
                    event.title.to_lowercase(),
                    event.description.to_lowercase(),
                    event.tags.join(" ")
                );
                keywords.iter().any(|k| haystack.contains(k.as_str()))
            })
            .cloned()
            .collect();

        if matched.is_empty() {
            return Ok(events.into_iter().take(limit).collect());
        }
        matched.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        matched.truncate(limit);
        Ok(matched)
    }

    /// Count a later reference to existing events: every event with a tag
    /// found in `content` gets its mention count bumped. Returns how many
    /// events were touched.
    pub async fn record_mentions(&self, chat_id: &str, content: &str) -> Result<u64> {
        let lowered = content.to_lowercase();
        let events = self.recent(chat_id, 200).await?;

        let mut touched = 0;
        for event in events {
            let referenced = event
                .tags
                .iter()
                .any(|tag| tag.chars().count() >= MIN_TAG_CHARS && lowered.contains(tag.as_str()));
            if !referenced {
                continue;
            }
            sqlx::query("UPDATE chat_events SET mention_count = mention_count + 1 WHERE id = ?")
                .bind(&event.id)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to bump mentions for event {}", event.id))?;
            touched += 1;
        }
        Ok(touched)
    }

    /// Delete old events that were never important or referenced.
    pub async fn sweep_retention(&self, now: DateTime<Utc>, memory_days: i64) -> Result<u64> {
        let cutoff = now - Duration::days(memory_days);
        let result = sqlx::query(
            "DELETE FROM chat_events \
             WHERE timestamp < ? AND importance < ? AND mention_count = 0",
        )
        .bind(to_millis(cutoff))
        .bind(RETAIN_IMPORTANCE)
        .execute(&self.pool)
        .await
        .context("failed to delete expired events")?;
        Ok(result.rows_affected())
    }
}

fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

/// Rows with an unknown event type are skipped with a warning.
fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Option<ChatEvent> {
    let id: String = row.try_get("id").unwrap_or_default();
    let raw_type: String = row.try_get("event_type").unwrap_or_default();
    let Some(event_type) = EventType::parse(&raw_type) else {
        let error = MemoryError::InvalidColumn {
            column: "event_type",
            value: raw_type,
        };
        tracing::warn!(%error, event_id = %id, "skipping stored event");
        return None;
    };

    Some(ChatEvent {
        id,
        chat_id: row.try_get("chat_id").unwrap_or_default(),
        event_type,
        timestamp: from_millis(row.try_get("timestamp").unwrap_or_default()),
        participants: decode_list(row.try_get("participants").ok()),
        title: row.try_get("title").unwrap_or_default(),
        description: row.try_get("description").unwrap_or_default(),
        importance: row.try_get("importance").unwrap_or_default(),
        tags: decode_list(row.try_get("tags").ok()),
        related_message_ids: decode_list(row.try_get("related_message_ids").ok()),
        is_recurring: row.try_get("is_recurring").unwrap_or_default(),
        mention_count: row.try_get("mention_count").unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_store() -> EventStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = EventStore::new(pool);
        store.initialize().await.expect("schema should be created");
        store
    }

    fn event(kind: EventType, title: &str, importance: f32, at: DateTime<Utc>) -> ChatEvent {
        let mut event = ChatEvent::new("chat", kind, at);
        event.title = title.to_string();
        event.importance = importance;
        event.tags = vec!["рожден".to_string()];
        event.participants = vec!["vera".to_string()];
        event
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn events_round_trip() {
        let store = setup_store().await;
        let saved = event(EventType::Celebration, "Праздник: др Веры", 0.8, now());
        store.save(&saved).await.unwrap();

        let loaded = store.recent("chat", 10).await.unwrap();
        assert_eq!(loaded, vec![saved]);
    }

    #[tokio::test]
    async fn later_references_bump_mention_count() {
        let store = setup_store().await;
        store
            .save(&event(EventType::Celebration, "Праздник", 0.5, now()))
            .await
            .unwrap();

        assert_eq!(store.record_mentions("chat", "а помните тот день рождения?").await.unwrap(), 1);
        assert_eq!(store.record_mentions("chat", "ничего общего").await.unwrap(), 0);
        assert_eq!(store.recent("chat", 1).await.unwrap()[0].mention_count, 1);
    }

    #[tokio::test]
    async fn retention_keeps_important_or_referenced_events() {
        let store = setup_store().await;
        let old = now() - Duration::days(60);
        let forgotten = event(EventType::FunnyMoment, "Смешной момент", 0.5, old);
        let important = event(EventType::Milestone, "Достижение", 0.9, old);
        let mut referenced = event(EventType::Decision, "Решение", 0.5, old);
        referenced.mention_count = 2;
        let fresh = event(EventType::TopicShift, "Смена темы", 0.5, now());
        for e in [&forgotten, &important, &referenced, &fresh] {
            store.save(e).await.unwrap();
        }

        assert_eq!(store.sweep_retention(now(), 30).await.unwrap(), 1);
        let remaining: Vec<EventType> = store
            .recent("chat", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(!remaining.contains(&EventType::FunnyMoment));
    }

    #[tokio::test]
    async fn relevant_prefers_keyword_matches() {
        let store = setup_store().await;
        store
            .save(&event(EventType::Celebration, "Праздник: день рождения", 0.6, now()))
            .await
            .unwrap();
        let mut trip = event(EventType::SharedExperience, "Поход в горы", 0.5, now() + Duration::hours(1));
        trip.tags = vec!["вместе".to_string()];
        store.save(&trip).await.unwrap();

        let hits = store.relevant("chat", &["горы".to_string()], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Поход в горы");

        let fallback = store.relevant("chat", &["космос".to_string()], 5).await.unwrap();
        assert_eq!(fallback.len(), 2);
    }

    #[tokio::test]
    async fn unknown_types_are_skipped() {
        let store = setup_store().await;
        store
            .save(&event(EventType::Tradition, "Традиция", 0.5, now()))
            .await
            .unwrap();
        sqlx::query("UPDATE chat_events SET event_type = 'picnic'")
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(store.recent("chat", 10).await.unwrap().is_empty());
    }
}
