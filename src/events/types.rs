//! Chat event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of notable moments the detector recognizes, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Celebration,
    Conflict,
    Departure,
    FunnyMoment,
    Decision,
    Revelation,
    Milestone,
    TopicShift,
    SharedExperience,
    Tradition,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::Celebration,
        EventType::Conflict,
        EventType::Departure,
        EventType::FunnyMoment,
        EventType::Decision,
        EventType::Revelation,
        EventType::Milestone,
        EventType::TopicShift,
        EventType::SharedExperience,
        EventType::Tradition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Celebration => "celebration",
            EventType::Conflict => "conflict",
            EventType::Departure => "departure",
            EventType::FunnyMoment => "funny_moment",
            EventType::Decision => "decision",
            EventType::Revelation => "revelation",
            EventType::Milestone => "milestone",
            EventType::TopicShift => "topic_shift",
            EventType::SharedExperience => "shared_experience",
            EventType::Tradition => "tradition",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        EventType::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Only celebrations and traditions repeat.
    pub fn is_recurring(self) -> bool {
        matches!(self, EventType::Celebration | EventType::Tradition)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected moment worth remembering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub id: String,
    pub chat_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub participants: Vec<String>,
    pub title: String,
    pub description: String,
    pub importance: f32,
    pub tags: Vec<String>,
    pub related_message_ids: Vec<String>,
    pub is_recurring: bool,
    pub mention_count: i64,
}

impl ChatEvent {
    pub fn new(chat_id: impl Into<String>, event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            event_type,
            timestamp,
            participants: Vec::new(),
            title: String::new(),
            description: String::new(),
            importance: 0.0,
            tags: Vec::new(),
            related_message_ids: Vec::new(),
            is_recurring: event_type.is_recurring(),
            mention_count: 0,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "[{}] {} ({})",
            self.timestamp.format("%Y-%m-%d"),
            self.title,
            self.participants.join(", ")
        )
    }
}
