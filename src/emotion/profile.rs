//! Per-user emotional profile built from that user's scored history.

use crate::emotion::group::ScoredMessage;
use crate::emotion::{Emotion, emotion_label};
use crate::error::MemoryError;
use crate::memory::RelationshipKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profiles are not built from fewer messages than this.
pub const MIN_PROFILE_MESSAGES: usize = 5;

/// Cap on the `recent_moods` ring.
pub const RECENT_MOODS: usize = 10;

/// Arousal above this counts as the "excitable" half of the temperament grid.
const AROUSAL_SPLIT: f32 = 0.3;

/// Valence/arousal quadrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperament {
    /// Positive and excitable.
    Sanguine,
    /// Negative and excitable.
    Choleric,
    /// Negative and calm.
    Melancholic,
    /// Positive and calm.
    Phlegmatic,
}

impl Temperament {
    pub fn from_quadrant(valence: f32, arousal: f32) -> Self {
        match (arousal > AROUSAL_SPLIT, valence >= 0.0) {
            (true, true) => Temperament::Sanguine,
            (true, false) => Temperament::Choleric,
            (false, false) => Temperament::Melancholic,
            (false, true) => Temperament::Phlegmatic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Temperament::Sanguine => "sanguine",
            Temperament::Choleric => "choleric",
            Temperament::Melancholic => "melancholic",
            Temperament::Phlegmatic => "phlegmatic",
        }
    }
}

/// How a user tends to behave in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialRole {
    Entertainer,
    Supporter,
    Challenger,
    Leader,
    Mediator,
    Observer,
}

impl SocialRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SocialRole::Entertainer => "entertainer",
            SocialRole::Supporter => "supporter",
            SocialRole::Challenger => "challenger",
            SocialRole::Leader => "leader",
            SocialRole::Mediator => "mediator",
            SocialRole::Observer => "observer",
        }
    }
}

/// One entry of the recent mood ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodSample {
    pub emotion: Option<Emotion>,
    pub intensity: f32,
    pub at: DateTime<Utc>,
}

/// Aggregate temperament and role summary for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalProfile {
    pub user_name: String,
    pub temperament: Temperament,
    pub expressiveness: f32,
    pub stability: f32,
    pub typical_emotions: Vec<Emotion>,
    pub social_role: SocialRole,
    pub recent_moods: Vec<MoodSample>,
    pub average_valence: f32,
    pub average_arousal: f32,
    pub message_count: usize,
    #[serde(default)]
    pub relationship: Option<RelationshipKind>,
    pub built_at: DateTime<Utc>,
}

impl EmotionalProfile {
    /// Rebuild a profile from one user's chronological history.
    ///
    /// Returns `None` below [`MIN_PROFILE_MESSAGES`]. The same history always
    /// yields the same profile (apart from `built_at`, which is `now`).
    pub fn build(
        user_name: &str,
        history: &[ScoredMessage],
        relationship: Option<RelationshipKind>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if history.len() < MIN_PROFILE_MESSAGES {
            return None;
        }
        let count = history.len() as f32;

        let valences: Vec<f32> = history.iter().map(|m| m.reading.valence).collect();
        let average_valence = valences.iter().sum::<f32>() / count;
        let average_arousal = history.iter().map(|m| m.reading.arousal).sum::<f32>() / count;
        let average_intensity = history.iter().map(|m| m.reading.intensity).sum::<f32>() / count;

        let variance = valences
            .iter()
            .map(|v| (v - average_valence).powi(2))
            .sum::<f32>()
            / count;

        let recent_moods = history
            .iter()
            .rev()
            .take(RECENT_MOODS)
            .rev()
            .map(|m| MoodSample {
                emotion: m.reading.dominant,
                intensity: m.reading.intensity,
                at: m.timestamp,
            })
            .collect();

        Some(Self {
            user_name: user_name.to_string(),
            temperament: Temperament::from_quadrant(average_valence, average_arousal),
            expressiveness: (average_intensity * 1.2).clamp(0.0, 1.0),
            stability: (1.0 - variance).clamp(0.0, 1.0),
            typical_emotions: typical_emotions(history),
            social_role: social_role(history),
            recent_moods,
            average_valence,
            average_arousal,
            message_count: history.len(),
            relationship,
            built_at: now,
        })
    }

    /// The most recent non-neutral mood, if any.
    pub fn current_mood(&self) -> Option<Emotion> {
        self.recent_moods.iter().rev().find_map(|sample| sample.emotion)
    }

    /// One-line description for prompt context.
    pub fn summary(&self) -> String {
        let typical: Vec<&str> = self.typical_emotions.iter().map(|e| e.as_str()).collect();
        format!(
            "{}: {} temperament, {} role, expressiveness {:.1}, stability {:.1}, usually {}, lately {}",
            self.user_name,
            self.temperament.as_str(),
            self.social_role.as_str(),
            self.expressiveness,
            self.stability,
            if typical.is_empty() { "calm".to_string() } else { typical.join("/") },
            emotion_label(self.current_mood()),
        )
    }

    /// Check ranges on a profile loaded from storage.
    pub fn validate(&self) -> std::result::Result<(), MemoryError> {
        let in_unit = |value: f32| (0.0..=1.0).contains(&value);
        let reason = if self.message_count < MIN_PROFILE_MESSAGES {
            Some(format!("message_count {} below minimum", self.message_count))
        } else if !in_unit(self.expressiveness) || !in_unit(self.stability) {
            Some("expressiveness/stability out of range".to_string())
        } else if self.recent_moods.len() > RECENT_MOODS {
            Some(format!("{} recent moods", self.recent_moods.len()))
        } else if self.typical_emotions.len() > 3 {
            Some(format!("{} typical emotions", self.typical_emotions.len()))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(MemoryError::MalformedPayload {
                kind: "emotional_profile",
                key: self.user_name.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Top three non-neutral dominants by frequency. Ties resolve by dimension
/// order so the result is stable.
fn typical_emotions(history: &[ScoredMessage]) -> Vec<Emotion> {
    let mut counts = [0usize; crate::emotion::DIMENSIONS];
    for message in history {
        if let Some(emotion) = message.reading.dominant {
            counts[emotion.index()] += 1;
        }
    }

    let mut ranked: Vec<Emotion> = Emotion::ALL
        .into_iter()
        .filter(|emotion| counts[emotion.index()] > 0)
        .collect();
    ranked.sort_by(|a, b| counts[b.index()].cmp(&counts[a.index()]));
    ranked.truncate(3);
    ranked
}

fn social_role(history: &[ScoredMessage]) -> SocialRole {
    let count = history.len() as f32;
    let average = |emotion: Emotion| {
        history
            .iter()
            .map(|m| m.reading.scores.get(emotion))
            .sum::<f32>()
            / count
    };
    let average_length = history
        .iter()
        .map(|m| m.content.chars().count())
        .sum::<usize>() as f32
        / count;

    if average(Emotion::Playful) > 0.4 {
        SocialRole::Entertainer
    } else if average(Emotion::Supportive) > 0.4 {
        SocialRole::Supporter
    } else if average(Emotion::Hostile) > 0.3 {
        SocialRole::Challenger
    } else if average_length > 100.0 {
        SocialRole::Leader
    } else if history.len() < 10 {
        SocialRole::Observer
    } else {
        SocialRole::Mediator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::{EmotionScorer, Lexicon};
    use chrono::{Duration, TimeZone as _};

    fn history(scorer: &EmotionScorer, texts: &[&str]) -> Vec<ScoredMessage> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                ScoredMessage::score(scorer, "alex", text, start + Duration::minutes(i as i64))
            })
            .collect()
    }

    fn scorer() -> EmotionScorer {
        EmotionScorer::new(Lexicon::builtin().unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn requires_five_messages() {
        let scorer = scorer();
        let short = history(&scorer, &["привет", "как дела", "ок", "ага"]);
        assert!(EmotionalProfile::build("alex", &short, None, now()).is_none());

        let enough = history(&scorer, &["привет", "как дела", "ок", "ага", "пока"]);
        assert!(EmotionalProfile::build("alex", &enough, None, now()).is_some());
    }

    #[test]
    fn playful_user_is_an_entertainer() {
        let scorer = scorer();
        let texts = ["хахаха лол", "ахахах ржу", "лол 😂", "хаха прикол", "ржу 🤣🤣"];
        let profile =
            EmotionalProfile::build("alex", &history(&scorer, &texts), None, now()).unwrap();
        assert_eq!(profile.social_role, SocialRole::Entertainer);
        assert_eq!(profile.typical_emotions.first(), Some(&Emotion::Playful));
        assert_eq!(profile.temperament, Temperament::Sanguine);
    }

    #[test]
    fn quiet_neutral_user_is_an_observer_then_mediator() {
        let scorer = scorer();
        let five = history(&scorer, &["ок"; 5]);
        let profile = EmotionalProfile::build("alex", &five, None, now()).unwrap();
        assert_eq!(profile.social_role, SocialRole::Observer);
        assert!(profile.typical_emotions.is_empty());
        assert_eq!(profile.stability, 1.0);

        let twelve = history(&scorer, &["ок"; 12]);
        let profile = EmotionalProfile::build("alex", &twelve, None, now()).unwrap();
        assert_eq!(profile.social_role, SocialRole::Mediator);
        assert_eq!(profile.temperament, Temperament::Phlegmatic);
    }

    #[test]
    fn recent_moods_are_capped_and_rebuild_is_deterministic() {
        let scorer = scorer();
        let texts: Vec<&str> = std::iter::repeat_n("спасибо, ты лучший", 25).collect();
        let messages = history(&scorer, &texts);
        let first = EmotionalProfile::build("alex", &messages, None, now()).unwrap();
        let second = EmotionalProfile::build("alex", &messages, None, now()).unwrap();
        assert_eq!(first.recent_moods.len(), RECENT_MOODS);
        assert_eq!(first, second);
        assert!(first.validate().is_ok());
    }

    #[test]
    fn hostile_user_is_a_challenger() {
        let scorer = scorer();
        let texts = ["ты идиот", "заткнись", "отвали, урод", "тупой бред", "дурак"];
        let profile = EmotionalProfile::build(
            "alex",
            &history(&scorer, &texts),
            Some(RelationshipKind::Regular),
            now(),
        )
        .unwrap();
        assert_eq!(profile.social_role, SocialRole::Challenger);
        assert_eq!(profile.temperament, Temperament::Choleric);
        assert_eq!(profile.relationship, Some(RelationshipKind::Regular));
    }

    #[test]
    fn validate_rejects_out_of_range_payloads() {
        let scorer = scorer();
        let mut profile =
            EmotionalProfile::build("alex", &history(&scorer, &["ок"; 5]), None, now()).unwrap();
        profile.stability = 1.5;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn temperament_quadrants() {
        assert_eq!(Temperament::from_quadrant(0.5, 0.6), Temperament::Sanguine);
        assert_eq!(Temperament::from_quadrant(-0.5, 0.6), Temperament::Choleric);
        assert_eq!(Temperament::from_quadrant(-0.5, 0.1), Temperament::Melancholic);
        assert_eq!(Temperament::from_quadrant(0.2, 0.1), Temperament::Phlegmatic);
    }
}
