//! Memory context assembly for one reply.
//!
//! Every piece is optional. A failed read is logged and left empty so the
//! reply can still go out with whatever was gathered.

use crate::AgentDeps;
use crate::cache::fingerprint;
use crate::emotion::{EmotionalProfile, GroupEmotionalState};
use crate::events::ChatEvent;
use crate::memory::{
    ChatMessage, ChatTopic, RelevanceQuery, RelevantMessage, UserRelationship, read_with_retry,
    relevant_messages,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

const KEYWORD_LIMIT: usize = 5;
const TOPIC_LIMIT: i64 = 5;
const EVENT_LIMIT: usize = 3;

/// What the agent remembers that bears on the current message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryContext {
    /// Short-term window, oldest first, without the current message.
    pub recent: Vec<ChatMessage>,
    pub relevant: Vec<RelevantMessage>,
    pub topics: Vec<ChatTopic>,
    pub relationship: Option<UserRelationship>,
    pub profile: Option<EmotionalProfile>,
    pub group: Option<GroupEmotionalState>,
    pub events: Vec<ChatEvent>,
    pub keywords: Vec<String>,
}

impl MemoryContext {
    /// Short hash of what the context contains, for response cache keys.
    pub fn fingerprint(&self) -> String {
        let ids = self.recent.iter().map(|m| m.source_id.as_str());
        let topics = self.topics.iter().map(|t| t.topic.as_str());
        let events = self.events.iter().map(|e| e.id.as_str());
        fingerprint(ids.chain(topics).chain(events))
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
            && self.relevant.is_empty()
            && self.topics.is_empty()
            && self.relationship.is_none()
            && self.profile.is_none()
            && self.events.is_empty()
    }
}

/// The chat's newest `limit` messages, served from the recent cache.
pub async fn recent_window(
    deps: &AgentDeps,
    chat_id: &str,
    limit: usize,
) -> crate::error::Result<Arc<Vec<ChatMessage>>> {
    let key = format!("{chat_id}:{limit}");
    deps.caches
        .recent
        .get_or_compute(&key, None, || async {
            let messages = read_with_retry("recent messages", || {
                deps.store.recent_messages(chat_id, limit as i64)
            })
            .await?;
            Ok(Arc::new(messages))
        })
        .await
}

/// Gather context for `message`. `group` is passed in because the channel
/// already rate-limits and computes it for adaptation.
pub async fn assemble(
    deps: &AgentDeps,
    message: &ChatMessage,
    group: Option<GroupEmotionalState>,
    now: DateTime<Utc>,
) -> Arc<MemoryContext> {
    let key = format!(
        "{}:{}:{}",
        message.chat_id,
        message.author,
        fingerprint([message.source_id.as_str(), message.content.as_str()])
    );
    if let Some(cached) = deps.caches.context.get(&key) {
        return cached;
    }

    let context = Arc::new(gather(deps, message, group, now).await);
    deps.caches.context.set(key, context.clone(), None);
    context
}

async fn gather(
    deps: &AgentDeps,
    message: &ChatMessage,
    group: Option<GroupEmotionalState>,
    now: DateTime<Utc>,
) -> MemoryContext {
    let chat_id = message.chat_id.as_str();
    let memory = deps.config.memory;
    let mut context = MemoryContext {
        group,
        keywords: deps.topics.keywords(&message.content, KEYWORD_LIMIT),
        ..MemoryContext::default()
    };

    match recent_window(deps, chat_id, memory.short_term_window + 1).await {
        Ok(window) => {
            context.recent = window
                .iter()
                .filter(|m| m.source_id != message.source_id)
                .cloned()
                .collect();
            let excess = context.recent.len().saturating_sub(memory.short_term_window);
            if excess > 0 {
                context.recent = context.recent.split_off(excess);
            }
        }
        Err(error) => tracing::warn!(%error, chat_id, "recent window unavailable"),
    }

    if !context.keywords.is_empty() {
        let query = RelevanceQuery::new(context.keywords.clone(), memory.relevance_limit, memory.memory_days);
        let mut exclude: Vec<String> = context.recent.iter().map(|m| m.source_id.clone()).collect();
        exclude.push(message.source_id.clone());
        let ranked = read_with_retry("relevant messages", || {
            relevant_messages(&deps.store, chat_id, &query, &exclude, now)
        })
        .await;
        match ranked {
            Ok(relevant) => context.relevant = relevant,
            Err(error) => tracing::warn!(%error, chat_id, "relevance query failed"),
        }
    }

    match read_with_retry("active topics", || deps.store.active_topics(chat_id, TOPIC_LIMIT)).await {
        Ok(topics) => context.topics = topics,
        Err(error) => tracing::warn!(%error, chat_id, "topics unavailable"),
    }

    match read_with_retry("relationship", || {
        deps.store.get_relationship(chat_id, &message.author)
    })
    .await
    {
        Ok(relationship) => context.relationship = relationship,
        Err(error) => tracing::warn!(%error, chat_id, "relationship unavailable"),
    }

    match read_with_retry("profile", || deps.store.load_profile(chat_id, &message.author)).await {
        Ok(profile) => context.profile = profile,
        Err(error) => tracing::warn!(%error, chat_id, "profile unavailable"),
    }

    match read_with_retry("events", || {
        deps.events.relevant(chat_id, &context.keywords, EVENT_LIMIT)
    })
    .await
    {
        Ok(events) => context.events = events,
        Err(error) => tracing::warn!(%error, chat_id, "events unavailable"),
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::deps;
    use chrono::{Duration, TimeZone as _};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[tokio::test]
    async fn empty_chat_gives_empty_context() {
        let deps = deps().await;
        let message = ChatMessage::new("chat", "1", "alex", "Привет, как дела?", at(0));
        let context = assemble(&deps, &message, None, at(0)).await;
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn gathers_window_topics_and_relationship() {
        let deps = deps().await;
        for i in 0..3 {
            let m = ChatMessage::new("chat", format!("m{i}"), "vera", format!("поход в горы {i}"), at(i));
            deps.store.save_message(&m).await.unwrap();
        }
        deps.store
            .record_interaction("chat", "alex", at(3), &["горы".to_string()], None)
            .await
            .unwrap();
        deps.store.upsert_topic("chat", "горы", "vera", at(2)).await.unwrap();

        let current = ChatMessage::new("chat", "m9", "alex", "кто идет в горы?", at(9));
        deps.store.save_message(&current).await.unwrap();

        let context = assemble(&deps, &current, None, at(9)).await;
        assert_eq!(context.recent.len(), 3);
        assert!(context.recent.iter().all(|m| m.source_id != "m9"));
        assert_eq!(context.topics[0].topic, "горы");
        assert_eq!(context.relationship.as_ref().unwrap().interaction_days, 1);
        assert!(context.keywords.contains(&"горы".to_string()));
        assert!(context.profile.is_none());
    }

    #[tokio::test]
    async fn recent_window_is_cached_until_invalidated() {
        let deps = deps().await;
        deps.store
            .save_message(&ChatMessage::new("chat", "1", "alex", "раз", at(0)))
            .await
            .unwrap();
        assert_eq!(recent_window(&deps, "chat", 5).await.unwrap().len(), 1);

        deps.store
            .save_message(&ChatMessage::new("chat", "2", "alex", "два", at(1)))
            .await
            .unwrap();
        assert_eq!(recent_window(&deps, "chat", 5).await.unwrap().len(), 1);

        deps.caches.invalidate_chat("chat");
        assert_eq!(recent_window(&deps, "chat", 5).await.unwrap().len(), 2);
    }

    #[test]
    fn fingerprint_tracks_contents() {
        let empty = MemoryContext::default();
        let mut with_message = MemoryContext::default();
        with_message
            .recent
            .push(ChatMessage::new("chat", "1", "alex", "раз", at(0)));
        assert_ne!(empty.fingerprint(), with_message.fingerprint());
        assert_eq!(with_message.fingerprint(), with_message.clone().fingerprint());
    }
}
