//! Shared fixtures for unit tests.

use crate::AgentDeps;
use crate::config::Config;
use crate::db::Db;

use sqlx::sqlite::SqlitePoolOptions;

/// Dependencies over a fresh in-memory database with default config.
pub async fn deps() -> AgentDeps {
    deps_with(Config::default()).await
}

pub async fn deps_with(mut config: Config) -> AgentDeps {
    config.behavior.simulate_typing = false;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let db = Db::from_pool(pool).await.unwrap();
    AgentDeps::new(config, db.sqlite, None).unwrap()
}
