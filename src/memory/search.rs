//! Relevance ranking: case-insensitive keyword match blended with recency and
//! importance.
//!
//! SQLite's `LIKE` only folds ASCII case, and chat text is mostly Cyrillic, so
//! the lookback range is paged through and matched in Rust. Only qualifying
//! messages are kept between pages.

use crate::error::Result;
use crate::memory::MemoryStore;
use crate::memory::types::{ChatMessage, RelevantMessage};

use chrono::{DateTime, Duration, Utc};

/// Importance boost a keyword match gets for ranking purposes only.
const MATCH_BOOST: f32 = 0.3;

/// Unmatched messages at or above this importance still qualify.
const STANDALONE_IMPORTANCE: f32 = 0.8;

/// Recency half-life scale, in days.
const RECENCY_DAYS: f32 = 7.0;

/// Relevance query parameters.
#[derive(Debug, Clone)]
pub struct RelevanceQuery {
    pub keywords: Vec<String>,
    pub limit: usize,
    /// How far back to look.
    pub lookback: Duration,
    /// Rows fetched per page while scanning the lookback range.
    pub page_size: i64,
}

impl RelevanceQuery {
    pub fn new(keywords: Vec<String>, limit: usize, memory_days: i64) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            limit,
            lookback: Duration::days(memory_days),
            page_size: 500,
        }
    }
}

/// Rank stored messages against a keyword query.
pub async fn relevant_messages(
    store: &MemoryStore,
    chat_id: &str,
    query: &RelevanceQuery,
    exclude_source_ids: &[String],
    now: DateTime<Utc>,
) -> Result<Vec<RelevantMessage>> {
    let since = now - query.lookback;
    let page_size = query.page_size.max(1);
    let mut candidates: Vec<ChatMessage> = Vec::new();
    let mut offset = 0;
    loop {
        let page = store.messages_since(chat_id, since, page_size, offset).await?;
        let fetched = page.len() as i64;
        candidates.extend(page.into_iter().filter(|m| {
            !exclude_source_ids.contains(&m.source_id) && keyword_hits(m, &query.keywords).is_some()
        }));
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }
    Ok(rank(candidates, &query.keywords, query.limit, now))
}

/// Keyword hits for a message that qualifies for ranking, `None` otherwise.
fn keyword_hits(message: &ChatMessage, keywords: &[String]) -> Option<usize> {
    let content = message.content.to_lowercase();
    let hits = keywords.iter().filter(|k| content.contains(k.as_str())).count();
    (hits > 0 || message.importance >= STANDALONE_IMPORTANCE).then_some(hits)
}

/// Score and order candidates. Ties keep the newer message first.
pub fn rank(
    candidates: Vec<ChatMessage>,
    keywords: &[String],
    limit: usize,
    now: DateTime<Utc>,
) -> Vec<RelevantMessage> {
    let mut ranked: Vec<RelevantMessage> = candidates
        .into_iter()
        .filter_map(|message| {
            let hits = keyword_hits(&message, keywords)?;
            let matched = hits > 0;

            let boosted = message.importance + if matched { MATCH_BOOST } else { 0.0 };
            let age_days = (now - message.timestamp).num_seconds().max(0) as f32 / 86_400.0;
            let recency = (-age_days / RECENCY_DAYS).exp();
            let coverage = if keywords.is_empty() {
                0.0
            } else {
                hits as f32 / keywords.len() as f32
            };

            let score = 0.5 * boosted + 0.3 * recency + 0.2 * coverage;
            Some(RelevantMessage {
                message,
                score,
                matched,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.message.timestamp.cmp(&a.message.timestamp))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;
    use sqlx::sqlite::SqlitePoolOptions;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 20, 12, 0, 0).unwrap()
    }

    fn message(id: &str, content: &str, days_ago: i64, importance: f32) -> ChatMessage {
        ChatMessage::new("chat", id, "alex", content, now() - Duration::days(days_ago))
            .with_importance(importance)
    }

    #[test]
    fn matching_is_case_insensitive_for_cyrillic() {
        let ranked = rank(
            vec![message("1", "Мы поедем в ОТПУСК летом", 1, 0.3)],
            &["отпуск".to_string()],
            5,
            now(),
        );
        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].matched);
    }

    #[test]
    fn unmatched_messages_need_high_importance() {
        let ranked = rank(
            vec![
                message("1", "просто болтовня", 1, 0.3),
                message("2", "я переезжаю в Берлин", 3, 0.9),
            ],
            &["футбол".to_string()],
            5,
            now(),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].message.source_id, "2");
        assert!(!ranked[0].matched);
    }

    #[test]
    fn recent_matches_outrank_old_ones() {
        let ranked = rank(
            vec![
                message("old", "футбол вчера был", 20, 0.3),
                message("new", "футбол сегодня", 0, 0.3),
            ],
            &["футбол".to_string()],
            5,
            now(),
        );
        assert_eq!(ranked[0].message.source_id, "new");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn match_boost_beats_plain_importance() {
        let ranked = rank(
            vec![
                message("important", "у меня новости", 1, 0.8),
                message("match", "кто смотрел футбол?", 1, 0.6),
            ],
            &["футбол".to_string()],
            5,
            now(),
        );
        assert_eq!(ranked[0].message.source_id, "match");
    }

    #[tokio::test]
    async fn store_query_respects_lookback_and_exclusions() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = MemoryStore::new(pool);
        store.initialize().await.unwrap();

        for m in [
            message("a", "футбол в субботу", 2, 0.3),
            message("b", "футбол был давно", 60, 0.3),
            message("c", "идем на футбол?", 0, 0.3),
        ] {
            store.save_message(&m).await.unwrap();
        }

        let query = RelevanceQuery::new(vec!["Футбол".into()], 10, 30);
        let results = relevant_messages(&store, "chat", &query, &["c".to_string()], now())
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.message.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn old_matches_survive_a_busy_chat() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        let store = MemoryStore::new(pool);
        store.initialize().await.unwrap();

        store
            .save_message(&message("trip", "летом едем на рыбалку", 20, 0.3))
            .await
            .unwrap();
        for i in 0..620 {
            let chatter = ChatMessage::new(
                "chat",
                format!("chatter-{i}"),
                "vera",
                "ну да, согласна",
                now() - Duration::minutes(i),
            )
            .with_importance(0.2);
            store.save_message(&chatter).await.unwrap();
        }

        let query = RelevanceQuery::new(vec!["рыбалк".into()], 5, 30);
        let results = relevant_messages(&store, "chat", &query, &[], now()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message.source_id, "trip");
    }
}
