//! Moodbot: a persona-driven group chat agent with episodic memory and
//! emotional adaptation.

pub mod activity;
pub mod adaptation;
pub mod agent;
pub mod cache;
pub mod config;
pub mod db;
pub mod emotion;
pub mod error;
pub mod events;
pub mod llm;
pub mod memory;
pub mod messaging;
pub mod prompts;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Chat identifier type.
pub type ChatId = Arc<str>;

/// A message delivered by a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport-assigned message id, unique within the chat.
    pub id: String,
    pub chat_id: ChatId,
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Shared dependency bundle for chat workers and background tasks.
#[derive(Clone)]
pub struct AgentDeps {
    pub config: Arc<config::Config>,
    pub store: Arc<memory::MemoryStore>,
    pub events: Arc<events::EventStore>,
    pub caches: Arc<cache::CacheRegistry>,
    pub activity: Arc<activity::ActivityTracker>,
    pub scorer: Arc<emotion::EmotionScorer>,
    pub detector: Arc<events::EventDetector>,
    pub topics: Arc<memory::TopicExtractor>,
    pub fallback: Arc<agent::fallback::FallbackReplies>,
    pub prompts: Arc<prompts::PromptEngine>,
    pub policy: Arc<agent::decision::DecisionPolicy>,
    /// Absent when no generation endpoint is configured.
    pub generator: Option<Arc<dyn llm::Generator>>,
}

impl AgentDeps {
    /// Build everything from config over an initialized pool.
    pub fn new(
        config: config::Config,
        pool: SqlitePool,
        generator: Option<Arc<dyn llm::Generator>>,
    ) -> Result<Self> {
        let lexicon = emotion::Lexicon::builtin()?;
        let topics = memory::TopicExtractor::default().with_stopwords(lexicon.stopwords());
        let store = memory::MemoryStore::new(pool.clone());
        let activity = activity::ActivityTracker::new(
            store.clone(),
            config.schedule.offset(),
            Duration::from_secs(config.maintenance.activity_recompute_secs),
        );
        let policy = agent::decision::DecisionPolicy::new(
            config.persona.clone(),
            config.schedule.clone(),
            config.behavior,
        );

        Ok(Self {
            caches: Arc::new(cache::CacheRegistry::new(&config.cache)),
            events: Arc::new(events::EventStore::new(pool)),
            activity: Arc::new(activity),
            scorer: Arc::new(emotion::EmotionScorer::new(lexicon)),
            detector: Arc::new(events::EventDetector::new(events::EventTemplates::builtin()?)),
            topics: Arc::new(topics),
            fallback: Arc::new(agent::fallback::FallbackReplies::builtin()?),
            prompts: Arc::new(prompts::PromptEngine::new(config.persona.name.clone())?),
            policy: Arc::new(policy),
            store,
            generator,
            config: Arc::new(config),
        })
    }

    /// Deadline for one generation call.
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.config.behavior.generation_timeout_secs)
    }
}
