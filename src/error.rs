//! Top-level error types for Moodbot.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether a retry of the same read could plausibly succeed.
    ///
    /// Store queries attach context with `anyhow`, so wrapped errors are
    /// classified by the `sqlx` or IO error somewhere in their chain.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Sqlx(error) => sqlx_is_transient(error),
            Error::Generation(GenerationError::Timeout { .. }) => true,
            Error::Io(_) => true,
            Error::Other(error)
            | Error::Db(DbError::Other(error))
            | Error::Memory(MemoryError::Other(error)) => error.chain().any(|cause| {
                cause.downcast_ref::<sqlx::Error>().is_some_and(sqlx_is_transient)
                    || cause.is::<std::io::Error>()
            }),
            _ => false,
        }
    }
}

fn sqlx_is_transient(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Database(_)
    )
}

/// Configuration loading errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Database connection and operation errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to SQLite: {0}")]
    SqliteConnect(sqlx::Error),

    #[error("schema initialization failed: {0}")]
    Schema(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Memory storage and retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("malformed {kind} payload for {key}: {reason}")]
    MalformedPayload {
        kind: &'static str,
        key: String,
        reason: String,
    },

    #[error("invalid stored value in {column}: {value}")]
    InvalidColumn { column: &'static str, value: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Text generation collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("unexpected generation response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Orchestration errors (chat workers, router).
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("chat {chat_id} worker is gone")]
    ChannelClosed { chat_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
