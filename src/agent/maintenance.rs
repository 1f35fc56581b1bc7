//! Background upkeep: cache sweeps, retention and activity recompute.
//!
//! Each job is its own task on a fixed interval. All of them stop when the
//! shutdown flag flips; a tick already in progress runs to completion.

use crate::AgentDeps;
use crate::memory::RetentionReport;

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Start every maintenance task.
pub fn spawn_all(deps: &AgentDeps, shutdown_rx: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let cache = deps.config.cache;
    let maintenance = deps.config.maintenance;

    let sweep_deps = deps.clone();
    let retention_deps = deps.clone();
    let activity_deps = deps.clone();

    vec![
        spawn_periodic(
            "cache_sweep",
            Duration::from_secs(cache.sweep_interval_secs),
            shutdown_rx.clone(),
            move || {
                let deps = sweep_deps.clone();
                async move {
                    sweep_caches(&deps);
                }
            },
        ),
        spawn_periodic(
            "retention",
            Duration::from_secs(maintenance.retention_interval_secs),
            shutdown_rx.clone(),
            move || {
                let deps = retention_deps.clone();
                async move {
                    run_retention(&deps, Utc::now()).await;
                }
            },
        ),
        spawn_periodic(
            "activity_recompute",
            Duration::from_secs(maintenance.activity_recompute_secs),
            shutdown_rx.clone(),
            move || {
                let deps = activity_deps.clone();
                async move {
                    let refreshed = deps.activity.recompute_all(Utc::now()).await;
                    tracing::debug!(refreshed, "activity patterns recomputed");
                }
            },
        ),
    ]
}

fn spawn_periodic<F, Fut>(
    task: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::debug!(task, period_secs = period.as_secs(), "maintenance task started");

        while !*shutdown_rx.borrow() {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => tick().await,
            }
        }

        tracing::debug!(task, "maintenance task stopped");
    })
}

/// Drop expired cache entries regardless of access.
pub fn sweep_caches(deps: &AgentDeps) -> u64 {
    let removed = deps.caches.sweep_all();
    if removed > 0 {
        tracing::debug!(removed, "swept expired cache entries");
    }
    removed
}

/// Delete old low-importance messages and events and archive stale topics.
/// Context caches are cleared when anything changed.
pub async fn run_retention(deps: &AgentDeps, now: DateTime<Utc>) -> RetentionReport {
    let days = deps.config.memory.memory_days;

    let mut report = match deps.store.sweep_retention(now, days).await {
        Ok(report) => report,
        Err(error) => {
            tracing::error!(%error, "message retention sweep failed");
            RetentionReport::default()
        }
    };
    match deps.events.sweep_retention(now, days).await {
        Ok(deleted) => report.events_deleted = deleted,
        Err(error) => tracing::error!(%error, "event retention sweep failed"),
    }

    if report != RetentionReport::default() {
        deps.caches.context.clear();
        deps.caches.recent.clear();
    }
    tracing::info!(
        messages_deleted = report.messages_deleted,
        topics_archived = report.topics_archived,
        events_deleted = report.events_deleted,
        "retention sweep finished"
    );
    report
}
