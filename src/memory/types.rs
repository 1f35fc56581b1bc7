//! Episodic memory records.

use crate::emotion::Emotion;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One stored chat message, inbound or sent by the agent. Immutable once saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    /// Transport-assigned id; unique per chat.
    pub source_id: String,
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub from_agent: bool,
    pub importance: f32,
    pub emotion: Option<Emotion>,
    pub emotion_intensity: f32,
    pub topics: Vec<String>,
    pub mentions: Vec<String>,
}

impl ChatMessage {
    /// A new message with default importance and no derived metadata.
    pub fn new(
        chat_id: impl Into<String>,
        source_id: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            source_id: source_id.into(),
            author: author.into(),
            content: content.into(),
            timestamp,
            from_agent: false,
            importance: Self::default_importance(),
            emotion: None,
            emotion_intensity: 0.0,
            topics: Vec::new(),
            mentions: Vec::new(),
        }
    }

    pub const fn default_importance() -> f32 {
        0.3
    }

    /// Mark as written by the agent.
    pub fn from_agent(mut self) -> Self {
        self.from_agent = true;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_emotion(mut self, emotion: Option<Emotion>, intensity: f32) -> Self {
        self.emotion = emotion;
        self.emotion_intensity = intensity.clamp(0.0, 1.0);
        self
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_mentions(mut self, mentions: Vec<String>) -> Self {
        self.mentions = mentions;
        self
    }
}

/// How well the agent knows a user, by days of interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Newcomer,
    Acquaintance,
    Regular,
    Friend,
}

impl RelationshipKind {
    pub fn from_day_count(days: i64) -> Self {
        match days {
            ..=2 => RelationshipKind::Newcomer,
            3..=9 => RelationshipKind::Acquaintance,
            10..=29 => RelationshipKind::Regular,
            _ => RelationshipKind::Friend,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelationshipKind::Newcomer => "newcomer",
            RelationshipKind::Acquaintance => "acquaintance",
            RelationshipKind::Regular => "regular",
            RelationshipKind::Friend => "friend",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "newcomer" => Some(RelationshipKind::Newcomer),
            "acquaintance" => Some(RelationshipKind::Acquaintance),
            "regular" => Some(RelationshipKind::Regular),
            "friend" => Some(RelationshipKind::Friend),
            _ => None,
        }
    }
}

/// What the agent remembers about one user in one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRelationship {
    pub chat_id: String,
    pub user_name: String,
    pub kind: RelationshipKind,
    pub first_interaction: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
    /// Distinct UTC calendar days with at least one message.
    pub interaction_days: i64,
    pub common_topics: Vec<String>,
    pub notes: Option<String>,
    pub mood: Option<Emotion>,
}

impl UserRelationship {
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} is a {} ({} day(s) of chatting)",
            self.user_name,
            self.kind.as_str(),
            self.interaction_days
        );
        if !self.common_topics.is_empty() {
            line.push_str(&format!(", usually talks about {}", self.common_topics.join(", ")));
        }
        if let Some(notes) = &self.notes {
            line.push_str(&format!(". {notes}"));
        }
        line
    }
}

/// Lifecycle of a chat topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    Active,
    Resolved,
    Ongoing,
    Archived,
}

impl TopicStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TopicStatus::Active => "active",
            TopicStatus::Resolved => "resolved",
            TopicStatus::Ongoing => "ongoing",
            TopicStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(TopicStatus::Active),
            "resolved" => Some(TopicStatus::Resolved),
            "ongoing" => Some(TopicStatus::Ongoing),
            "archived" => Some(TopicStatus::Archived),
            _ => None,
        }
    }
}

/// A recurring subject of conversation in a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTopic {
    pub chat_id: String,
    pub topic: String,
    pub first_mentioned: DateTime<Utc>,
    pub last_mentioned: DateTime<Utc>,
    pub mention_count: i64,
    pub related_users: Vec<String>,
    pub importance: f32,
    pub status: TopicStatus,
}

impl ChatTopic {
    /// Importance of a topic mentioned once.
    pub const fn initial_importance() -> f32 {
        0.1
    }

    /// Importance gained per repeat mention.
    pub const fn importance_step() -> f32 {
        0.1
    }
}

/// A stored message ranked against a relevance query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevantMessage {
    pub message: ChatMessage,
    pub score: f32,
    pub matched: bool,
}

/// Counts from one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub messages_deleted: u64,
    pub topics_archived: u64,
    pub events_deleted: u64,
}
