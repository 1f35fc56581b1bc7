//! SQLite connection setup and schema bootstrap.

use crate::error::{DbError, Result};
use crate::events::EventStore;
use crate::memory::MemoryStore;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr as _;
use std::time::Duration;

/// Database handles.
pub struct Db {
    pub sqlite: SqlitePool,
}

impl Db {
    /// Open (creating if needed) `moodbot.db` under `data_dir` and create every
    /// table the engine uses.
    pub async fn connect(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("moodbot.db");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(DbError::SqliteConnect)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let sqlite = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(DbError::SqliteConnect)?;

        let db = Self { sqlite };
        db.initialize().await?;
        Ok(db)
    }

    /// Wrap an existing pool (in-memory pools in tests) and create the schema.
    pub async fn from_pool(sqlite: SqlitePool) -> Result<Self> {
        let db = Self { sqlite };
        db.initialize().await?;
        Ok(db)
    }

    async fn initialize(&self) -> Result<()> {
        MemoryStore::new(self.sqlite.clone())
            .initialize()
            .await
            .map_err(|error| DbError::Schema(error.to_string()))?;
        EventStore::new(self.sqlite.clone())
            .initialize()
            .await
            .map_err(|error| DbError::Schema(error.to_string()))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.sqlite.close().await;
    }
}

/// Timestamps are stored as epoch milliseconds.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
