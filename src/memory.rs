//! Episodic memory: message log, relationships, topics, relevance queries and
//! retention.

pub mod search;
pub mod store;
pub mod topics;
pub mod types;

pub use search::{RelevanceQuery, relevant_messages};
pub use store::MemoryStore;
pub use topics::{TopicExtractor, extract_mentions};
pub use types::{
    ChatMessage, ChatTopic, RelationshipKind, RelevantMessage, RetentionReport, TopicStatus,
    UserRelationship,
};

use crate::error::Result;
use std::future::Future;

/// Run a store read, retrying once if the first attempt fails transiently.
pub async fn read_with_retry<T, F, Fut>(what: &str, mut read: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match read().await {
        Ok(value) => Ok(value),
        Err(error) if error.is_transient() => {
            tracing::warn!(%error, read = what, "store read failed, retrying once");
            read().await
        }
        Err(error) => Err(error),
    }
}
