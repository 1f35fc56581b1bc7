//! Episodic memory storage (SQLite).

use crate::db::{from_millis, to_millis};
use crate::emotion::{Emotion, EmotionalProfile, GroupEmotionalState};
use crate::error::{MemoryError, Result};
use crate::memory::types::{
    ChatMessage, ChatTopic, RelationshipKind, RetentionReport, TopicStatus, UserRelationship,
};

use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row as _, SqlitePool};
use std::sync::Arc;

/// Messages at or above this importance survive retention.
pub const RETAIN_IMPORTANCE: f32 = 0.7;

/// Common topics remembered per relationship.
const COMMON_TOPICS: usize = 5;

const MESSAGE_COLUMNS: &str = "id, chat_id, source_id, author, content, timestamp, \
     from_agent, importance, emotion, emotion_intensity, topics, mentions";

/// Message log, relationships, topics and derived emotional state.
#[derive(Debug)]
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the memory tables if they don't exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                author TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                from_agent INTEGER NOT NULL DEFAULT 0,
                importance REAL NOT NULL DEFAULT 0.3,
                emotion TEXT,
                emotion_intensity REAL NOT NULL DEFAULT 0,
                topics TEXT,
                mentions TEXT,
                UNIQUE(chat_id, source_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create chat_messages table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_relationships (
                chat_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                first_interaction INTEGER NOT NULL,
                last_interaction INTEGER NOT NULL,
                interaction_days INTEGER NOT NULL DEFAULT 1,
                common_topics TEXT,
                notes TEXT,
                mood TEXT,
                PRIMARY KEY (chat_id, user_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create user_relationships table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_topics (
                chat_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                first_mentioned INTEGER NOT NULL,
                last_mentioned INTEGER NOT NULL,
                mention_count INTEGER NOT NULL DEFAULT 1,
                related_users TEXT,
                importance REAL NOT NULL DEFAULT 0.1,
                status TEXT NOT NULL DEFAULT 'active',
                PRIMARY KEY (chat_id, topic)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create chat_topics table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS emotional_profiles (
                chat_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (chat_id, user_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create emotional_profiles table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_emotional_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                computed_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create group_emotional_states table")?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_messages_chat_time ON chat_messages(chat_id, timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_messages_author ON chat_messages(chat_id, author, timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_topics_recent ON chat_topics(chat_id, last_mentioned)",
            "CREATE INDEX IF NOT EXISTS idx_group_states_chat ON group_emotional_states(chat_id, computed_at)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    // -- messages ---------------------------------------------------------

    /// Insert a message unless one with the same `(chat_id, source_id)` exists.
    /// Returns whether a row was written.
    pub async fn save_message(&self, message: &ChatMessage) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO chat_messages
                (id, chat_id, source_id, author, content, timestamp, from_agent,
                 importance, emotion, emotion_intensity, topics, mentions)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(&message.source_id)
        .bind(&message.author)
        .bind(&message.content)
        .bind(to_millis(message.timestamp))
        .bind(message.from_agent)
        .bind(message.importance)
        .bind(message.emotion.map(Emotion::as_str))
        .bind(message.emotion_intensity)
        .bind(encode_list(&message.topics))
        .bind(encode_list(&message.mentions))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save message {}", message.source_id))?;

        Ok(result.rows_affected() > 0)
    }

    /// The newest `limit` messages, oldest first.
    pub async fn recent_messages(&self, chat_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
             WHERE chat_id = ? ORDER BY timestamp DESC, rowid DESC LIMIT ?"
        ))
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load recent messages for {chat_id}"))?;

        let mut messages: Vec<ChatMessage> = rows.iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    /// The newest `limit` messages by one author, oldest first.
    pub async fn author_messages(
        &self,
        chat_id: &str,
        author: &str,
        limit: i64,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
             WHERE chat_id = ? AND author = ? ORDER BY timestamp DESC, rowid DESC LIMIT ?"
        ))
        .bind(chat_id)
        .bind(author)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load messages by {author} in {chat_id}"))?;

        let mut messages: Vec<ChatMessage> = rows.iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    /// One page of messages at or after `since`, newest first.
    pub async fn messages_since(
        &self,
        chat_id: &str,
        since: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
             WHERE chat_id = ? AND timestamp >= ? ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(chat_id)
        .bind(to_millis(since))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load messages since {since} for {chat_id}"))?;

        Ok(rows.iter().map(row_to_message).collect())
    }

    /// Timestamps of all messages (agent ones included) at or after `since`.
    pub async fn message_times_since(
        &self,
        chat_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, bool)>> {
        let rows = sqlx::query(
            "SELECT timestamp, from_agent FROM chat_messages \
             WHERE chat_id = ? AND timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(chat_id)
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load message times for {chat_id}"))?;

        Ok(rows
            .iter()
            .map(|row| {
                let timestamp: i64 = row.try_get("timestamp").unwrap_or_default();
                let from_agent: bool = row.try_get("from_agent").unwrap_or_default();
                (from_millis(timestamp), from_agent)
            })
            .collect())
    }

    /// The agent's most recent message in a chat.
    pub async fn last_agent_message(&self, chat_id: &str) -> Result<Option<ChatMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
             WHERE chat_id = ? AND from_agent = 1 ORDER BY timestamp DESC, rowid DESC LIMIT 1"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load last agent message for {chat_id}"))?;

        Ok(row.as_ref().map(row_to_message))
    }

    /// Non-agent messages strictly after `after`.
    pub async fn count_user_messages_after(
        &self,
        chat_id: &str,
        after: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_messages \
             WHERE chat_id = ? AND from_agent = 0 AND timestamp > ?",
        )
        .bind(chat_id)
        .bind(to_millis(after))
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to count messages for {chat_id}"))?;
        Ok(count)
    }

    /// Time of the latest non-agent message strictly before `before`.
    pub async fn last_user_message_before(
        &self,
        chat_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(timestamp) FROM chat_messages \
             WHERE chat_id = ? AND from_agent = 0 AND timestamp < ?",
        )
        .bind(chat_id)
        .bind(to_millis(before))
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to load last user message for {chat_id}"))?;
        Ok(latest.map(from_millis))
    }

    // -- relationships ----------------------------------------------------

    /// Record that `user_name` spoke at `at`.
    ///
    /// The day counter goes up by one only when `at` falls on a later UTC
    /// calendar day than the last recorded interaction; older timestamps
    /// never move `last_interaction` backwards.
    pub async fn record_interaction(
        &self,
        chat_id: &str,
        user_name: &str,
        at: DateTime<Utc>,
        topics: &[String],
        mood: Option<Emotion>,
    ) -> Result<UserRelationship> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .context("failed to open relationship transaction")?;

        let existing = sqlx::query(
            "SELECT chat_id, user_name, kind, first_interaction, last_interaction, \
             interaction_days, common_topics, notes, mood \
             FROM user_relationships WHERE chat_id = ? AND user_name = ?",
        )
        .bind(chat_id)
        .bind(user_name)
        .fetch_optional(&mut *transaction)
        .await
        .with_context(|| format!("failed to load relationship {chat_id}/{user_name}"))?;

        let relationship = match existing.as_ref().map(row_to_relationship) {
            None => UserRelationship {
                chat_id: chat_id.to_string(),
                user_name: user_name.to_string(),
                kind: RelationshipKind::from_day_count(1),
                first_interaction: at,
                last_interaction: at,
                interaction_days: 1,
                common_topics: merge_topics(&[], topics),
                notes: None,
                mood,
            },
            Some(mut relationship) => {
                if at.date_naive() > relationship.last_interaction.date_naive() {
                    relationship.interaction_days += 1;
                }
                relationship.last_interaction = relationship.last_interaction.max(at);
                relationship.first_interaction = relationship.first_interaction.min(at);
                relationship.kind = RelationshipKind::from_day_count(relationship.interaction_days);
                relationship.common_topics = merge_topics(&relationship.common_topics, topics);
                if mood.is_some() {
                    relationship.mood = mood;
                }
                relationship
            }
        };

        sqlx::query(
            r#"
            INSERT INTO user_relationships
                (chat_id, user_name, kind, first_interaction, last_interaction,
                 interaction_days, common_topics, notes, mood)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id, user_name) DO UPDATE SET
                kind = excluded.kind,
                first_interaction = excluded.first_interaction,
                last_interaction = excluded.last_interaction,
                interaction_days = excluded.interaction_days,
                common_topics = excluded.common_topics,
                notes = excluded.notes,
                mood = excluded.mood
            "#,
        )
        .bind(&relationship.chat_id)
        .bind(&relationship.user_name)
        .bind(relationship.kind.as_str())
        .bind(to_millis(relationship.first_interaction))
        .bind(to_millis(relationship.last_interaction))
        .bind(relationship.interaction_days)
        .bind(encode_list(&relationship.common_topics))
        .bind(&relationship.notes)
        .bind(relationship.mood.map(Emotion::as_str))
        .execute(&mut *transaction)
        .await
        .with_context(|| format!("failed to save relationship {chat_id}/{user_name}"))?;

        transaction
            .commit()
            .await
            .context("failed to commit relationship update")?;

        Ok(relationship)
    }

    pub async fn get_relationship(
        &self,
        chat_id: &str,
        user_name: &str,
    ) -> Result<Option<UserRelationship>> {
        let row = sqlx::query(
            "SELECT chat_id, user_name, kind, first_interaction, last_interaction, \
             interaction_days, common_topics, notes, mood \
             FROM user_relationships WHERE chat_id = ? AND user_name = ?",
        )
        .bind(chat_id)
        .bind(user_name)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load relationship {chat_id}/{user_name}"))?;

        Ok(row.as_ref().map(row_to_relationship))
    }

    // -- topics -----------------------------------------------------------

    /// Create a topic or count another mention of it. Importance grows by a
    /// fixed step per mention and never exceeds 1.0. Archived topics come back
    /// as active.
    pub async fn upsert_topic(
        &self,
        chat_id: &str,
        topic: &str,
        user_name: &str,
        at: DateTime<Utc>,
    ) -> Result<ChatTopic> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .context("failed to open topic transaction")?;

        let existing = sqlx::query(
            "SELECT chat_id, topic, first_mentioned, last_mentioned, mention_count, \
             related_users, importance, status FROM chat_topics WHERE chat_id = ? AND topic = ?",
        )
        .bind(chat_id)
        .bind(topic)
        .fetch_optional(&mut *transaction)
        .await
        .with_context(|| format!("failed to load topic {topic} in {chat_id}"))?;

        let updated = match existing.as_ref().map(row_to_topic) {
            None => ChatTopic {
                chat_id: chat_id.to_string(),
                topic: topic.to_string(),
                first_mentioned: at,
                last_mentioned: at,
                mention_count: 1,
                related_users: vec![user_name.to_string()],
                importance: ChatTopic::initial_importance(),
                status: TopicStatus::Active,
            },
            Some(mut current) => {
                current.mention_count += 1;
                current.importance = (current.importance + ChatTopic::importance_step()).min(1.0);
                current.last_mentioned = current.last_mentioned.max(at);
                if !current.related_users.iter().any(|u| u == user_name) {
                    current.related_users.push(user_name.to_string());
                }
                if current.status == TopicStatus::Archived {
                    current.status = TopicStatus::Active;
                }
                current
            }
        };

        sqlx::query(
            r#"
            INSERT INTO chat_topics
                (chat_id, topic, first_mentioned, last_mentioned, mention_count,
                 related_users, importance, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id, topic) DO UPDATE SET
                last_mentioned = excluded.last_mentioned,
                mention_count = excluded.mention_count,
                related_users = excluded.related_users,
                importance = excluded.importance,
                status = excluded.status
            "#,
        )
        .bind(&updated.chat_id)
        .bind(&updated.topic)
        .bind(to_millis(updated.first_mentioned))
        .bind(to_millis(updated.last_mentioned))
        .bind(updated.mention_count)
        .bind(encode_list(&updated.related_users))
        .bind(updated.importance)
        .bind(updated.status.as_str())
        .execute(&mut *transaction)
        .await
        .with_context(|| format!("failed to save topic {topic} in {chat_id}"))?;

        transaction
            .commit()
            .await
            .context("failed to commit topic update")?;

        Ok(updated)
    }

    /// Non-archived topics, most recently mentioned first.
    pub async fn active_topics(&self, chat_id: &str, limit: i64) -> Result<Vec<ChatTopic>> {
        let rows = sqlx::query(
            "SELECT chat_id, topic, first_mentioned, last_mentioned, mention_count, \
             related_users, importance, status FROM chat_topics \
             WHERE chat_id = ? AND status != 'archived' \
             ORDER BY last_mentioned DESC, importance DESC LIMIT ?",
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load topics for {chat_id}"))?;

        Ok(rows.iter().map(row_to_topic).collect())
    }

    // -- derived emotional state -----------------------------------------

    /// Replace a user's stored profile.
    pub async fn save_profile(&self, chat_id: &str, profile: &EmotionalProfile) -> Result<()> {
        let payload = serde_json::to_string(profile).context("failed to encode profile")?;
        sqlx::query(
            r#"
            INSERT INTO emotional_profiles (chat_id, user_name, payload, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chat_id, user_name) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chat_id)
        .bind(&profile.user_name)
        .bind(payload)
        .bind(to_millis(profile.built_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save profile {chat_id}/{}", profile.user_name))?;
        Ok(())
    }

    /// Load a stored profile. A payload that fails to decode or validate is
    /// logged and treated as absent.
    pub async fn load_profile(
        &self,
        chat_id: &str,
        user_name: &str,
    ) -> Result<Option<EmotionalProfile>> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM emotional_profiles WHERE chat_id = ? AND user_name = ?",
        )
        .bind(chat_id)
        .bind(user_name)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load profile {chat_id}/{user_name}"))?;

        Ok(payload.and_then(|payload| decode_profile(user_name, &payload)))
    }

    /// All valid profiles stored for a chat.
    pub async fn load_profiles(&self, chat_id: &str) -> Result<Vec<EmotionalProfile>> {
        let rows = sqlx::query(
            "SELECT user_name, payload FROM emotional_profiles WHERE chat_id = ? ORDER BY user_name",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load profiles for {chat_id}"))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let user_name: String = row.try_get("user_name").unwrap_or_default();
                let payload: String = row.try_get("payload").unwrap_or_default();
                decode_profile(&user_name, &payload)
            })
            .collect())
    }

    /// Append a group snapshot. Snapshots are never overwritten.
    pub async fn append_group_state(&self, chat_id: &str, state: &GroupEmotionalState) -> Result<()> {
        let payload = serde_json::to_string(state).context("failed to encode group state")?;
        sqlx::query(
            "INSERT INTO group_emotional_states (chat_id, computed_at, payload) VALUES (?, ?, ?)",
        )
        .bind(chat_id)
        .bind(to_millis(state.computed_at))
        .bind(payload)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to append group state for {chat_id}"))?;
        Ok(())
    }

    /// The newest group snapshot, if one decodes.
    pub async fn latest_group_state(&self, chat_id: &str) -> Result<Option<GroupEmotionalState>> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM group_emotional_states WHERE chat_id = ? \
             ORDER BY computed_at DESC, id DESC LIMIT 1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load group state for {chat_id}"))?;

        Ok(payload.and_then(|payload| {
            match serde_json::from_str::<GroupEmotionalState>(&payload) {
                Ok(state) => Some(state),
                Err(error) => {
                    let error = MemoryError::MalformedPayload {
                        kind: "group_emotional_state",
                        key: chat_id.to_string(),
                        reason: error.to_string(),
                    };
                    tracing::warn!(%error, "ignoring stored group state");
                    None
                }
            }
        }))
    }

    pub async fn group_state_count(&self, chat_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM group_emotional_states WHERE chat_id = ?")
                .bind(chat_id)
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("failed to count group states for {chat_id}"))?;
        Ok(count)
    }

    // -- retention --------------------------------------------------------

    /// Delete old low-importance messages and archive stale topics.
    pub async fn sweep_retention(
        &self,
        now: DateTime<Utc>,
        memory_days: i64,
    ) -> Result<RetentionReport> {
        let message_cutoff = now - Duration::days(memory_days);
        let topic_cutoff = now - Duration::hours(memory_days * 12);

        let deleted = sqlx::query(
            "DELETE FROM chat_messages WHERE timestamp < ? AND importance < ?",
        )
        .bind(to_millis(message_cutoff))
        .bind(RETAIN_IMPORTANCE)
        .execute(&self.pool)
        .await
        .context("failed to delete expired messages")?;

        let archived = sqlx::query(
            "UPDATE chat_topics SET status = 'archived' \
             WHERE last_mentioned < ? AND status != 'archived'",
        )
        .bind(to_millis(topic_cutoff))
        .execute(&self.pool)
        .await
        .context("failed to archive stale topics")?;

        Ok(RetentionReport {
            messages_deleted: deleted.rows_affected(),
            topics_archived: archived.rows_affected(),
            events_deleted: 0,
        })
    }
}

fn decode_profile(user_name: &str, payload: &str) -> Option<EmotionalProfile> {
    let decoded = serde_json::from_str::<EmotionalProfile>(payload)
        .map_err(|error| MemoryError::MalformedPayload {
            kind: "emotional_profile",
            key: user_name.to_string(),
            reason: error.to_string(),
        })
        .and_then(|profile| profile.validate().map(|()| profile));

    match decoded {
        Ok(profile) => Some(profile),
        Err(error) => {
            tracing::warn!(%error, user = %user_name, "ignoring stored profile");
            None
        }
    }
}

/// Newest topics first, deduplicated, capped.
fn merge_topics(existing: &[String], new: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(COMMON_TOPICS);
    for topic in new.iter().chain(existing.iter()) {
        if merged.len() >= COMMON_TOPICS {
            break;
        }
        if !merged.contains(topic) {
            merged.push(topic.clone());
        }
    }
    merged
}

fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> ChatMessage {
    let emotion: Option<String> = row.try_get("emotion").ok().flatten();
    let timestamp: i64 = row.try_get("timestamp").unwrap_or_default();

    ChatMessage {
        id: row.try_get("id").unwrap_or_default(),
        chat_id: row.try_get("chat_id").unwrap_or_default(),
        source_id: row.try_get("source_id").unwrap_or_default(),
        author: row.try_get("author").unwrap_or_default(),
        content: row.try_get("content").unwrap_or_default(),
        timestamp: from_millis(timestamp),
        from_agent: row.try_get("from_agent").unwrap_or_default(),
        importance: row
            .try_get("importance")
            .unwrap_or(ChatMessage::default_importance()),
        emotion: emotion.as_deref().and_then(Emotion::parse),
        emotion_intensity: row.try_get("emotion_intensity").unwrap_or_default(),
        topics: decode_list(row.try_get("topics").ok()),
        mentions: decode_list(row.try_get("mentions").ok()),
    }
}

fn row_to_relationship(row: &sqlx::sqlite::SqliteRow) -> UserRelationship {
    let days: i64 = row.try_get("interaction_days").unwrap_or(1);
    let kind: String = row.try_get("kind").unwrap_or_default();
    let mood: Option<String> = row.try_get("mood").ok().flatten();

    UserRelationship {
        chat_id: row.try_get("chat_id").unwrap_or_default(),
        user_name: row.try_get("user_name").unwrap_or_default(),
        kind: RelationshipKind::parse(&kind).unwrap_or(RelationshipKind::from_day_count(days)),
        first_interaction: from_millis(row.try_get("first_interaction").unwrap_or_default()),
        last_interaction: from_millis(row.try_get("last_interaction").unwrap_or_default()),
        interaction_days: days,
        common_topics: decode_list(row.try_get("common_topics").ok()),
        notes: row.try_get("notes").ok().flatten(),
        mood: mood.as_deref().and_then(Emotion::parse),
    }
}

fn row_to_topic(row: &sqlx::sqlite::SqliteRow) -> ChatTopic {
    let status: String = row.try_get("status").unwrap_or_default();

    ChatTopic {
        chat_id: row.try_get("chat_id").unwrap_or_default(),
        topic: row.try_get("topic").unwrap_or_default(),
        first_mentioned: from_millis(row.try_get("first_mentioned").unwrap_or_default()),
        last_mentioned: from_millis(row.try_get("last_mentioned").unwrap_or_default()),
        mention_count: row.try_get("mention_count").unwrap_or(1),
        related_users: decode_list(row.try_get("related_users").ok()),
        importance: row
            .try_get("importance")
            .unwrap_or(ChatTopic::initial_importance()),
        status: TopicStatus::parse(&status).unwrap_or(TopicStatus::Active),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::{EmotionScorer, Lexicon, ScoredMessage};
    use chrono::TimeZone as _;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_store() -> Arc<MemoryStore> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = MemoryStore::new(pool);
        store.initialize().await.expect("schema should be created");
        store
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn save_message_ignores_duplicates() {
        let store = setup_store().await;
        let message = ChatMessage::new("chat", "m1", "alex", "привет", at(1, 10));
        assert!(store.save_message(&message).await.unwrap());

        let duplicate = ChatMessage::new("chat", "m1", "alex", "другой текст", at(1, 11));
        assert!(!store.save_message(&duplicate).await.unwrap());

        let stored = store.recent_messages("chat", 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "привет");
    }

    #[tokio::test]
    async fn recent_messages_are_chronological_and_round_trip() {
        let store = setup_store().await;
        for (i, hour) in [12, 10, 11].iter().enumerate() {
            let message = ChatMessage::new("chat", format!("m{i}"), "alex", format!("msg {hour}"), at(1, *hour))
                .with_emotion(Some(Emotion::Joy), 0.6)
                .with_topics(vec!["отпуск".into()])
                .with_mentions(vec!["муся".into()]);
            store.save_message(&message).await.unwrap();
        }

        let recent = store.recent_messages("chat", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "msg 11");
        assert_eq!(recent[1].content, "msg 12");
        assert_eq!(recent[1].emotion, Some(Emotion::Joy));
        assert_eq!(recent[1].topics, vec!["отпуск".to_string()]);
        assert_eq!(recent[1].mentions, vec!["муся".to_string()]);
        assert_eq!(recent[1].timestamp, at(1, 12));
    }

    #[tokio::test]
    async fn day_counter_counts_distinct_days() {
        let store = setup_store().await;
        for hour in [9, 12, 18] {
            store
                .record_interaction("chat", "alex", at(1, hour), &[], None)
                .await
                .unwrap();
        }
        let relationship = store
            .record_interaction("chat", "alex", at(2, 8), &["кино".into()], Some(Emotion::Joy))
            .await
            .unwrap();
        assert_eq!(relationship.interaction_days, 2);
        assert_eq!(relationship.kind, RelationshipKind::Newcomer);
        assert_eq!(relationship.common_topics, vec!["кино".to_string()]);

        // A late delivery from day 1 changes neither the counter nor the clock.
        let relationship = store
            .record_interaction("chat", "alex", at(1, 23), &[], None)
            .await
            .unwrap();
        assert_eq!(relationship.interaction_days, 2);
        assert_eq!(relationship.last_interaction, at(2, 8));
        assert_eq!(relationship.mood, Some(Emotion::Joy));

        let loaded = store.get_relationship("chat", "alex").await.unwrap().unwrap();
        assert_eq!(loaded, relationship);
    }

    #[tokio::test]
    async fn topic_importance_is_capped() {
        let store = setup_store().await;
        let mut topic = None;
        for i in 0..25 {
            let user = if i % 2 == 0 { "alex" } else { "vera" };
            topic = Some(store.upsert_topic("chat", "футбол", user, at(1, 10)).await.unwrap());
        }
        let topic = topic.unwrap();
        assert_eq!(topic.mention_count, 25);
        assert!(topic.importance <= 1.0);
        assert_eq!(topic.related_users, vec!["alex".to_string(), "vera".to_string()]);

        let active = store.active_topics("chat", 10).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].importance <= 1.0);
    }

    #[tokio::test]
    async fn retention_deletes_old_unimportant_and_archives_stale_topics() {
        let store = setup_store().await;
        let now = at(30, 12);
        let old = now - Duration::days(40);

        let trivial = ChatMessage::new("chat", "old-1", "alex", "ок", old);
        let important = ChatMessage::new("chat", "old-2", "alex", "я женюсь!", old).with_importance(0.9);
        let fresh = ChatMessage::new("chat", "new-1", "alex", "ок", now);
        for message in [&trivial, &important, &fresh] {
            store.save_message(message).await.unwrap();
        }
        store.upsert_topic("chat", "свадьба", "alex", now - Duration::days(20)).await.unwrap();
        store.upsert_topic("chat", "кино", "alex", now - Duration::days(2)).await.unwrap();

        let report = store.sweep_retention(now, 30).await.unwrap();
        assert_eq!(report.messages_deleted, 1);
        assert_eq!(report.topics_archived, 1);

        let remaining: Vec<String> = store
            .recent_messages("chat", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.source_id)
            .collect();
        assert_eq!(remaining, vec!["old-2".to_string(), "new-1".to_string()]);

        let topics = store.active_topics("chat", 10).await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].topic, "кино");

        // Mentioning an archived topic revives it.
        let revived = store.upsert_topic("chat", "свадьба", "vera", now).await.unwrap();
        assert_eq!(revived.status, TopicStatus::Active);
    }

    #[tokio::test]
    async fn profiles_round_trip_and_bad_payloads_read_as_absent() {
        let store = setup_store().await;
        let scorer = EmotionScorer::new(Lexicon::builtin().unwrap());
        let history: Vec<ScoredMessage> = (0..6)
            .map(|i| ScoredMessage::score(&scorer, "alex", "хаха лол", at(1, 10 + i)))
            .collect();
        let profile = EmotionalProfile::build("alex", &history, None, at(2, 0)).unwrap();

        store.save_profile("chat", &profile).await.unwrap();
        assert_eq!(store.load_profile("chat", "alex").await.unwrap(), Some(profile));

        sqlx::query("UPDATE emotional_profiles SET payload = '{\"nope\": 1}'")
            .execute(store.pool())
            .await
            .unwrap();
        assert_eq!(store.load_profile("chat", "alex").await.unwrap(), None);
        assert!(store.load_profiles("chat").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_states_append_as_time_series() {
        let store = setup_store().await;
        let scorer = EmotionScorer::new(Lexicon::builtin().unwrap());
        let window: Vec<ScoredMessage> = (0..5)
            .map(|i| ScoredMessage::score(&scorer, "alex", "привет", at(1, 10 + i)))
            .collect();
        let first = GroupEmotionalState::aggregate(&window, &[], None, at(1, 16)).unwrap();
        let second = GroupEmotionalState::aggregate(&window, &[], None, at(1, 17)).unwrap();

        store.append_group_state("chat", &first).await.unwrap();
        store.append_group_state("chat", &second).await.unwrap();

        assert_eq!(store.group_state_count("chat").await.unwrap(), 2);
        let latest = store.latest_group_state("chat").await.unwrap().unwrap();
        assert_eq!(latest.computed_at, at(1, 17));
    }

    #[tokio::test]
    async fn agent_reply_bookkeeping_queries() {
        let store = setup_store().await;
        store
            .save_message(&ChatMessage::new("chat", "1", "alex", "а", at(1, 10)))
            .await
            .unwrap();
        store
            .save_message(&ChatMessage::new("chat", "2", "Муся", "б", at(1, 11)).from_agent())
            .await
            .unwrap();
        for (id, hour) in [("3", 12), ("4", 13)] {
            store
                .save_message(&ChatMessage::new("chat", id, "vera", "в", at(1, hour)))
                .await
                .unwrap();
        }

        let last = store.last_agent_message("chat").await.unwrap().unwrap();
        assert_eq!(last.source_id, "2");
        assert_eq!(store.count_user_messages_after("chat", last.timestamp).await.unwrap(), 2);
        assert_eq!(
            store.last_user_message_before("chat", at(1, 13)).await.unwrap(),
            Some(at(1, 12))
        );
        assert_eq!(store.last_user_message_before("chat", at(1, 10)).await.unwrap(), None);
    }
}
