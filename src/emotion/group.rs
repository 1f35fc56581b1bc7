//! Group-level mood, dynamics and conflict tracking over a recent window.

use crate::emotion::profile::{EmotionalProfile, SocialRole};
use crate::emotion::{Emotion, EmotionReading, EmotionScorer, emotion_label};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Group state is not computed from fewer messages than this.
pub const MIN_GROUP_MESSAGES: usize = 5;

/// Most messages a single aggregation looks at.
pub const MAX_GROUP_WINDOW: usize = 50;

/// Hostility above this marks a message as part of a conflict.
const HOSTILITY_THRESHOLD: f32 = 0.3;

/// Trailing messages that must be free of hostility to resolve a conflict.
const RESOLUTION_WINDOW: usize = 10;

/// A message with its reading, as input to profile and group aggregation.
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub reading: EmotionReading,
    pub topics: Vec<String>,
}

impl ScoredMessage {
    pub fn score(
        scorer: &EmotionScorer,
        author: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            author: author.to_string(),
            content: content.to_string(),
            timestamp,
            reading: scorer.score(content),
            topics: Vec::new(),
        }
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    fn is_hostile(&self) -> bool {
        self.reading.scores.get(Emotion::Hostile) > HOSTILITY_THRESHOLD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Active,
    Resolved,
}

/// A run of mutual hostility between two participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Sorted pair, so (a, b) and (b, a) are the same conflict.
    pub participants: (String, String),
    pub status: ConflictStatus,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub topics: Vec<String>,
}

impl Conflict {
    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    pub fn involves(&self, author: &str) -> bool {
        self.participants.0 == author || self.participants.1 == author
    }

    pub fn is_active(&self) -> bool {
        self.status == ConflictStatus::Active
    }
}

/// Snapshot of the group's mood and dynamics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEmotionalState {
    pub dominant_mood: Option<Emotion>,
    pub intensity: f32,
    pub stability: f32,
    pub harmony: f32,
    pub tension: f32,
    pub energy: f32,
    pub engagement: f32,
    pub emotional_topics: Vec<String>,
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub participant_roles: Vec<(String, SocialRole)>,
    pub message_count: usize,
    pub computed_at: DateTime<Utc>,
}

impl GroupEmotionalState {
    /// Aggregate the trailing window of a chat.
    ///
    /// `messages` must be chronological. Only the last [`MAX_GROUP_WINDOW`] are
    /// used. Active conflicts from `previous` carry over until the trailing
    /// window shows no hostility from either participant.
    pub fn aggregate(
        messages: &[ScoredMessage],
        profiles: &[EmotionalProfile],
        previous: Option<&GroupEmotionalState>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if messages.len() < MIN_GROUP_MESSAGES {
            return None;
        }
        let window = &messages[messages.len().saturating_sub(MAX_GROUP_WINDOW)..];

        let intensity = mean(window, |m| m.reading.intensity);
        let hostile = mean(window, |m| m.reading.scores.get(Emotion::Hostile));
        let warm = mean(window, |m| {
            m.reading.scores.get(Emotion::Friendly) + m.reading.scores.get(Emotion::Supportive)
        });
        let stress = mean(window, |m| m.reading.scores.get(Emotion::Stress));

        let (dominant_mood, distinct) = dominant_mood(window);
        let stability = (1.0 - 0.2 * (distinct.saturating_sub(1)) as f32).max(0.0);

        Some(Self {
            dominant_mood,
            intensity,
            stability,
            harmony: (warm - hostile).clamp(0.0, 1.0),
            tension: (hostile + stress).min(1.0),
            energy: intensity,
            engagement: engagement(window),
            emotional_topics: emotional_topics(window),
            conflicts: detect_conflicts(window, previous),
            participant_roles: participant_roles(window, profiles),
            message_count: window.len(),
            computed_at: now,
        })
    }

    pub fn active_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| c.is_active())
    }

    pub fn has_active_conflicts(&self) -> bool {
        self.active_conflicts().next().is_some()
    }

    /// Topics attached to active conflicts, deduplicated.
    pub fn conflict_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for topic in self.active_conflicts().flat_map(|c| c.topics.iter()) {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        topics
    }

    pub fn summary(&self) -> String {
        format!(
            "mood {}, harmony {:.1}, tension {:.1}, energy {:.1}, {} active conflict(s)",
            emotion_label(self.dominant_mood),
            self.harmony,
            self.tension,
            self.energy,
            self.active_conflicts().count(),
        )
    }
}

fn mean(window: &[ScoredMessage], f: impl Fn(&ScoredMessage) -> f32) -> f32 {
    window.iter().map(f).sum::<f32>() / window.len() as f32
}

/// Most frequent per-message dominant (neutral counts as a mood) plus the
/// number of distinct moods seen.
fn dominant_mood(window: &[ScoredMessage]) -> (Option<Emotion>, usize) {
    let mut counts: Vec<(Option<Emotion>, usize)> = Vec::new();
    for message in window {
        match counts.iter_mut().find(|(mood, _)| *mood == message.reading.dominant) {
            Some((_, count)) => *count += 1,
            None => counts.push((message.reading.dominant, 1)),
        }
    }
    let distinct = counts.len();
    // First seen wins ties.
    let mut best: Option<(Option<Emotion>, usize)> = None;
    for (mood, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((mood, count));
        }
    }
    (best.and_then(|(mood, _)| mood), distinct)
}

fn engagement(window: &[ScoredMessage]) -> f32 {
    let mut authors: Vec<&str> = window.iter().map(|m| m.author.as_str()).collect();
    authors.sort_unstable();
    authors.dedup();

    let average_length = window
        .iter()
        .map(|m| m.content.chars().count())
        .sum::<usize>() as f32
        / window.len() as f32;

    let breadth = (authors.len() as f32 / 5.0).min(1.0);
    let depth = (average_length / 100.0).min(1.0);
    (breadth * 0.6 + depth * 0.4).clamp(0.0, 1.0)
}

fn emotional_topics(window: &[ScoredMessage]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for message in window.iter().filter(|m| m.reading.intensity > 0.5) {
        for topic in &message.topics {
            let entry = counts.entry(topic.as_str()).or_insert(0);
            if *entry == 0 {
                order.push(topic.as_str());
            }
            *entry += 1;
        }
    }
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.into_iter().take(5).map(str::to_string).collect()
}

fn detect_conflicts(
    window: &[ScoredMessage],
    previous: Option<&GroupEmotionalState>,
) -> Vec<Conflict> {
    let mut conflicts: Vec<Conflict> = previous
        .map(|state| state.active_conflicts().cloned().collect())
        .unwrap_or_default();
    let mut touched = vec![false; conflicts.len()];

    for pair in window.windows(2) {
        let (first, second) = (&pair[0], &pair[1]);
        if first.author == second.author || !first.is_hostile() || !second.is_hostile() {
            continue;
        }
        let key = Conflict::key(&first.author, &second.author);
        let mut topics: Vec<String> = first.topics.clone();
        for topic in &second.topics {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }

        match conflicts.iter().position(|c| c.participants == key) {
            Some(index) => {
                let conflict = &mut conflicts[index];
                conflict.last_seen_at = conflict.last_seen_at.max(second.timestamp);
                for topic in topics {
                    if !conflict.topics.contains(&topic) {
                        conflict.topics.push(topic);
                    }
                }
                touched[index] = true;
            }
            None => {
                conflicts.push(Conflict {
                    participants: key,
                    status: ConflictStatus::Active,
                    started_at: first.timestamp,
                    last_seen_at: second.timestamp,
                    topics,
                });
                touched.push(true);
            }
        }
    }

    let tail = &window[window.len().saturating_sub(RESOLUTION_WINDOW)..];
    for (conflict, touched) in conflicts.iter_mut().zip(touched) {
        let still_hostile = tail
            .iter()
            .any(|m| conflict.involves(&m.author) && m.is_hostile());
        if !touched && !still_hostile {
            conflict.status = ConflictStatus::Resolved;
        }
    }
    conflicts
}

fn participant_roles(
    window: &[ScoredMessage],
    profiles: &[EmotionalProfile],
) -> Vec<(String, SocialRole)> {
    let mut roles: Vec<(String, SocialRole)> = profiles
        .iter()
        .filter(|p| window.iter().any(|m| m.author == p.user_name))
        .map(|p| (p.user_name.clone(), p.social_role))
        .collect();
    roles.sort_by(|a, b| a.0.cmp(&b.0));
    roles
}
