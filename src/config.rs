//! Configuration loading and validation.
//!
//! Everything is scalar and read once at startup. A config file is optional;
//! every field has a default, and a handful of environment variables override
//! the file. Invalid values refuse to start the process.

use crate::error::{ConfigError, Result};
use chrono::{DateTime, Datelike as _, FixedOffset, Offset as _, Timelike as _, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Moodbot configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory path (SQLite database lives here).
    pub data_dir: PathBuf,

    /// Who the agent is and what it answers to.
    pub persona: PersonaConfig,

    /// When the agent prefers to talk.
    pub schedule: ScheduleConfig,

    /// How chatty the agent is.
    pub behavior: BehaviorConfig,

    /// Episodic memory windows and retention.
    pub memory: MemoryConfig,

    /// Adaptive cache sizing.
    pub cache: CacheConfig,

    /// External text generation endpoint.
    pub generation: GenerationConfig,

    /// Background maintenance intervals.
    pub maintenance: MaintenanceConfig,
}

/// Persona identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// The agent's own author name. Messages from this author are never answered.
    pub name: String,

    /// Names the agent answers to directly (case-insensitive).
    pub aliases: Vec<String>,

    /// Phrases that call the agent a bot. Matching messages are ignored.
    pub bot_denylist: Vec<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Муся".into(),
            aliases: vec!["муся".into(), "мусь".into(), "musya".into()],
            bot_denylist: vec![
                "ты бот".into(),
                "это бот".into(),
                "тупой бот".into(),
                "you are a bot".into(),
                "you're a bot".into(),
            ],
        }
    }
}

/// Active-time schedule. Hours are local to `utc_offset_hours`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// `(start, end)` hour window; wraps midnight when start > end.
    pub active_hours: Option<(u8, u8)>,

    /// Active weekdays, 0 = Monday .. 6 = Sunday. Empty means every day.
    pub active_days: Vec<u8>,

    /// Offset applied to UTC timestamps to get the chat's local time.
    pub utc_offset_hours: i32,

    /// Probability multiplier applied outside the schedule.
    pub off_schedule_dampening: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            active_hours: Some((9, 23)),
            active_days: Vec::new(),
            utc_offset_hours: 3,
            off_schedule_dampening: 0.3,
        }
    }
}

/// Response behavior knobs.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Base probability of chiming in, in (0, 1].
    pub activity_level: f64,

    /// Reply spacing at activity level 0.5; scales inversely with the level.
    pub min_reply_interval_secs: u64,

    /// Intervening messages that lift the reply spacing requirement.
    pub min_messages_between: usize,

    /// Timeout for a single generation call.
    pub generation_timeout_secs: u64,

    /// Pause before sending, scaled by reply length.
    pub simulate_typing: bool,

    /// Seed for the response draws. Unset means OS entropy.
    pub seed: Option<u64>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            activity_level: 0.3,
            min_reply_interval_secs: 60,
            min_messages_between: 3,
            generation_timeout_secs: 30,
            simulate_typing: true,
            seed: None,
        }
    }
}

/// Episodic memory configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Retention window in days.
    pub memory_days: i64,

    /// Recent messages included verbatim in context.
    pub short_term_window: usize,

    /// Relevance-ranked history entries included in context.
    pub relevance_limit: usize,

    /// Messages scanned when rebuilding a user's profile.
    pub profile_history_limit: usize,

    /// Messages aggregated into a group emotional state.
    pub group_window: usize,

    /// Minimum minutes between group state recomputations per chat.
    pub group_state_interval_mins: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_days: 30,
            short_term_window: 20,
            relevance_limit: 8,
            profile_history_limit: 100,
            group_window: 50,
            group_state_interval_mins: 10,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub default_ttl_secs: u64,
    pub response_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl_secs: 600,
            response_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

/// Generation endpoint configuration. Without an endpoint the agent only
/// uses its static fallback patterns.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "gpt-4o-mini".into(),
            max_tokens: 300,
        }
    }
}

/// Background maintenance intervals.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub retention_interval_secs: u64,
    pub activity_recompute_secs: u64,
    /// A chat worker with an empty inbox for this long stops; the next
    /// message for the chat starts a fresh one.
    pub worker_idle_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            retention_interval_secs: 6 * 3600,
            activity_recompute_secs: 15 * 60,
            worker_idle_secs: 30 * 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            persona: PersonaConfig::default(),
            schedule: ScheduleConfig::default(),
            behavior: BehaviorConfig::default(),
            memory: MemoryConfig::default(),
            cache: CacheConfig::default(),
            generation: GenerationConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Config {
    /// Default data directory (`<platform data dir>/moodbot`).
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("moodbot"))
            .unwrap_or_else(|| PathBuf::from("./data"))
    }

    /// Load configuration from defaults and environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(error),
        })?;
        let mut config = Self::from_toml(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Does not validate.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|error| ConfigError::Parse(error.to_string()).into())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("MOODBOT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("MOODBOT_ACTIVITY_LEVEL") {
            self.behavior.activity_level = level.parse().map_err(|_| {
                ConfigError::Invalid(format!("MOODBOT_ACTIVITY_LEVEL is not a number: {level}"))
            })?;
        }
        if let Ok(url) = std::env::var("MOODBOT_GENERATION_URL") {
            self.generation.endpoint = Some(url);
        }
        if let Ok(key) = std::env::var("MOODBOT_GENERATION_KEY") {
            self.generation.api_key = Some(key);
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(ConfigError::Invalid(message).into());

        if self.persona.name.trim().is_empty() {
            return invalid("persona.name must not be empty".into());
        }
        let level = self.behavior.activity_level;
        if !(level > 0.0 && level <= 1.0) {
            return invalid(format!("behavior.activity_level must be in (0, 1], got {level}"));
        }
        let dampening = self.schedule.off_schedule_dampening;
        if !(0.0..=1.0).contains(&dampening) {
            return invalid(format!(
                "schedule.off_schedule_dampening must be in [0, 1], got {dampening}"
            ));
        }
        if let Some((start, end)) = self.schedule.active_hours
            && (start > 23 || end > 23)
        {
            return invalid(format!("schedule.active_hours out of range: ({start}, {end})"));
        }
        if let Some(day) = self.schedule.active_days.iter().find(|day| **day > 6) {
            return invalid(format!("schedule.active_days contains {day}; expected 0..=6"));
        }
        if !(-12..=14).contains(&self.schedule.utc_offset_hours) {
            return invalid(format!(
                "schedule.utc_offset_hours out of range: {}",
                self.schedule.utc_offset_hours
            ));
        }
        if self.memory.memory_days < 1 {
            return invalid("memory.memory_days must be at least 1".into());
        }
        if self.memory.short_term_window == 0 || self.memory.group_window == 0 {
            return invalid("memory windows must be non-zero".into());
        }
        if self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be non-zero".into());
        }
        if self.cache.sweep_interval_secs == 0
            || self.maintenance.retention_interval_secs == 0
            || self.maintenance.activity_recompute_secs == 0
            || self.maintenance.worker_idle_secs == 0
        {
            return invalid("maintenance intervals must be non-zero".into());
        }
        if self.behavior.generation_timeout_secs == 0 {
            return invalid("behavior.generation_timeout_secs must be non-zero".into());
        }
        Ok(())
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("moodbot.db")
    }
}

impl ScheduleConfig {
    /// The chat's local offset.
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Whether `now` falls inside the configured hours and days.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset());
        let hour = local.hour() as u8;
        let weekday = local.weekday().num_days_from_monday() as u8;

        let hour_ok = match self.active_hours {
            Some((start, end)) => hour_in_active_window(hour, start, end),
            None => true,
        };
        let day_ok = self.active_days.is_empty() || self.active_days.contains(&weekday);
        hour_ok && day_ok
    }
}

/// Whether `hour` lies in `[start, end)`, wrapping past midnight. An equal
/// start and end means always active.
pub fn hour_in_active_window(hour: u8, start: u8, end: u8) -> bool {
    if start == end {
        return true;
    }
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}
