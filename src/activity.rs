//! Chat rhythm: hourly and weekly histograms plus a short-term trend.
//!
//! Patterns are derived from stored message times, never persisted, and
//! cached per chat until they are older than the recompute interval.

use crate::error::Result;
use crate::memory::{MemoryStore, read_with_retry};

use chrono::{DateTime, Datelike as _, Duration, FixedOffset, Timelike as _, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Below this many messages in the hourly window the pattern says nothing.
pub const MIN_ESTABLISHED_MESSAGES: u32 = 20;

const HOURLY_WINDOW_DAYS: i64 = 7;
const WEEKLY_WINDOW_DAYS: i64 = 28;
const RECENT_DAYS: i64 = 3;
const PREVIOUS_DAYS: i64 = 4;

/// Direction of recent message volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    /// Compare messages per day over the trailing three days against the four
    /// days before them.
    pub fn from_rates(recent_per_day: f64, previous_per_day: f64) -> Self {
        if recent_per_day > previous_per_day * 1.2 {
            Trend::Increasing
        } else if recent_per_day < previous_per_day * 0.8 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
        }
    }
}

/// Histogram model of a chat's rhythm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityPattern {
    pub hourly: [u32; 24],
    pub weekly: [u32; 7],
    pub trend: Trend,
    pub computed_at: DateTime<Utc>,
}

/// How the rhythm should bend response behavior right now.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActivityModifiers {
    pub response_multiplier: f64,
    pub delay_multiplier: f64,
    pub is_active_time: bool,
    /// Minutes since the last human message before the current one.
    pub inactivity_minutes: Option<i64>,
    /// Whether the histograms hold enough data to be trusted.
    pub established: bool,
    pub trend: Trend,
}

impl ActivityModifiers {
    /// No opinion: used when the pattern has too little data.
    pub fn neutral(inactivity_minutes: Option<i64>) -> Self {
        Self {
            response_multiplier: 1.0,
            delay_multiplier: 1.0,
            is_active_time: true,
            inactivity_minutes,
            established: false,
            trend: Trend::Stable,
        }
    }
}

impl ActivityPattern {
    /// Build from human message times. Hours and weekdays are taken in the
    /// chat's local offset.
    pub fn compute(times: &[DateTime<Utc>], offset: FixedOffset, now: DateTime<Utc>) -> Self {
        let hourly_since = now - Duration::days(HOURLY_WINDOW_DAYS);
        let weekly_since = now - Duration::days(WEEKLY_WINDOW_DAYS);
        let recent_since = now - Duration::days(RECENT_DAYS);
        let previous_since = recent_since - Duration::days(PREVIOUS_DAYS);

        let mut hourly = [0u32; 24];
        let mut weekly = [0u32; 7];
        let (mut recent, mut previous) = (0u32, 0u32);

        for &at in times.iter().filter(|at| **at <= now) {
            let local = at.with_timezone(&offset);
            if at > hourly_since {
                hourly[local.hour() as usize] += 1;
            }
            if at > weekly_since {
                weekly[local.weekday().num_days_from_monday() as usize] += 1;
            }
            if at > recent_since {
                recent += 1;
            } else if at > previous_since {
                previous += 1;
            }
        }

        let trend = Trend::from_rates(
            f64::from(recent) / RECENT_DAYS as f64,
            f64::from(previous) / PREVIOUS_DAYS as f64,
        );

        Self {
            hourly,
            weekly,
            trend,
            computed_at: now,
        }
    }

    pub fn sample_size(&self) -> u32 {
        self.hourly.iter().sum()
    }

    pub fn is_established(&self) -> bool {
        self.sample_size() >= MIN_ESTABLISHED_MESSAGES
    }

    /// Normalized activity for the local hour and weekday of `now`, in `[0, 1]`.
    pub fn combined_activity(&self, now: DateTime<Utc>, offset: FixedOffset) -> f64 {
        let local = now.with_timezone(&offset);
        let hour = normalized(&self.hourly, local.hour() as usize);
        let day = normalized(&self.weekly, local.weekday().num_days_from_monday() as usize);
        0.7 * hour + 0.3 * day
    }

    pub fn modifiers(
        &self,
        now: DateTime<Utc>,
        offset: FixedOffset,
        last_user_message: Option<DateTime<Utc>>,
    ) -> ActivityModifiers {
        let inactivity_minutes = last_user_message.map(|at| (now - at).num_minutes().max(0));
        if !self.is_established() {
            return ActivityModifiers::neutral(inactivity_minutes);
        }

        let combined = self.combined_activity(now, offset);
        let mut response = (0.5 + 1.5 * combined).clamp(0.1, 3.0);
        let mut delay = (2.0 - combined).clamp(0.5, 2.0);
        match self.trend {
            Trend::Increasing => {
                response *= 1.2;
                delay *= 0.8;
            }
            Trend::Decreasing => {
                response *= 0.8;
                delay *= 1.2;
            }
            Trend::Stable => {}
        }

        ActivityModifiers {
            response_multiplier: response.clamp(0.1, 3.0),
            delay_multiplier: delay.clamp(0.5, 2.0),
            is_active_time: combined > 0.3,
            inactivity_minutes,
            established: true,
            trend: self.trend,
        }
    }
}

fn normalized(buckets: &[u32], index: usize) -> f64 {
    let max = buckets.iter().copied().max().unwrap_or(0);
    if max == 0 {
        0.0
    } else {
        f64::from(buckets[index]) / f64::from(max)
    }
}

/// Per-chat pattern cache over the message store.
pub struct ActivityTracker {
    store: Arc<MemoryStore>,
    offset: FixedOffset,
    max_age: Duration,
    patterns: RwLock<HashMap<String, ActivityPattern>>,
}

impl ActivityTracker {
    pub fn new(store: Arc<MemoryStore>, offset: FixedOffset, max_age: std::time::Duration) -> Self {
        Self {
            store,
            offset,
            max_age: Duration::from_std(max_age).unwrap_or_else(|_| Duration::minutes(15)),
            patterns: RwLock::new(HashMap::new()),
        }
    }

    /// Cached pattern, recomputed when missing or stale.
    pub async fn pattern(&self, chat_id: &str, now: DateTime<Utc>) -> Result<ActivityPattern> {
        if let Some(pattern) = self.patterns.read().await.get(chat_id)
            && now - pattern.computed_at < self.max_age
        {
            return Ok(pattern.clone());
        }
        self.recompute(chat_id, now).await
    }

    /// Rebuild one chat's pattern from the store.
    pub async fn recompute(&self, chat_id: &str, now: DateTime<Utc>) -> Result<ActivityPattern> {
        let since = now - Duration::days(WEEKLY_WINDOW_DAYS);
        let times = read_with_retry("activity times", || {
            self.store.message_times_since(chat_id, since)
        })
        .await?;
        let human: Vec<DateTime<Utc>> = times
            .into_iter()
            .filter(|(_, from_agent)| !from_agent)
            .map(|(at, _)| at)
            .collect();

        let pattern = ActivityPattern::compute(&human, self.offset, now);
        tracing::debug!(
            chat_id,
            samples = pattern.sample_size(),
            trend = pattern.trend.as_str(),
            "activity pattern recomputed"
        );
        self.patterns
            .write()
            .await
            .insert(chat_id.to_string(), pattern.clone());
        Ok(pattern)
    }

    /// Drop a chat's cached pattern; the next lookup rebuilds it.
    pub async fn forget(&self, chat_id: &str) {
        self.patterns.write().await.remove(chat_id);
    }

    /// Recompute every chat seen so far. Failures are logged per chat.
    pub async fn recompute_all(&self, now: DateTime<Utc>) -> usize {
        let chats: Vec<String> = self.patterns.read().await.keys().cloned().collect();
        let mut refreshed = 0;
        for chat_id in chats {
            match self.recompute(&chat_id, now).await {
                Ok(_) => refreshed += 1,
                Err(error) => tracing::warn!(%error, chat_id, "activity recompute failed"),
            }
        }
        refreshed
    }

    /// Modifiers for a message arriving at `now`. Inactivity is measured from
    /// human messages before `now`.
    pub async fn modifiers(&self, chat_id: &str, now: DateTime<Utc>) -> Result<ActivityModifiers> {
        let pattern = self.pattern(chat_id, now).await?;
        let last = read_with_retry("last user message", || {
            self.store.last_user_message_before(chat_id, now)
        })
        .await?;
        Ok(pattern.modifiers(now, self.offset, last))
    }
}
