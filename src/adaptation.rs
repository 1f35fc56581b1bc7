//! Behavioral adaptation: turns what we know about the author, the group and
//! the last few messages into a response directive.
//!
//! Layers apply in a fixed order. Profile first, then group (may override the
//! tone), then the short-term trend (may override again).

use crate::emotion::{Emotion, EmotionalProfile, GroupEmotionalState, SocialRole, Temperament};
use crate::memory::{ChatMessage, RelationshipKind};

use serde::Serialize;

const CONFLICT_MODIFIER: f64 = 1.5;
const WORSENING_MODIFIER: f64 = 1.3;
const HIGH_INTENSITY_MODIFIER: f64 = 1.4;
const HIGH_INTENSITY: f32 = 0.7;
const TREND_THRESHOLD: f32 = 0.2;
/// Human messages needed before a drift is read from the window, the same
/// floor as profiles and group state.
pub const MIN_TREND_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Supportive,
    Playful,
    Serious,
    Neutral,
    Calming,
    Energetic,
}

impl Tone {
    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Supportive => "supportive",
            Tone::Playful => "playful",
            Tone::Serious => "serious",
            Tone::Neutral => "neutral",
            Tone::Calming => "calming",
            Tone::Energetic => "energetic",
        }
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrategyFlags {
    pub comfort: bool,
    pub deescalate: bool,
    pub energize: bool,
    pub match_energy: bool,
    pub mediate: bool,
}

impl StrategyFlags {
    /// Names of the flags that are set.
    pub fn active(&self) -> Vec<&'static str> {
        [
            (self.comfort, "comfort"),
            (self.deescalate, "deescalate"),
            (self.energize, "energize"),
            (self.match_energy, "match_energy"),
            (self.mediate, "mediate"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

/// Free-text guidance for the prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PromptHints {
    pub context: Vec<String>,
    pub behavior: Vec<String>,
    pub avoid_topics: Vec<String>,
    pub emphasize_topics: Vec<String>,
}

impl PromptHints {
    fn avoid(&mut self, topic: &str) {
        if !self.avoid_topics.iter().any(|t| t == topic) {
            self.avoid_topics.push(topic.to_string());
        }
        self.emphasize_topics.retain(|t| t != topic);
    }

    fn emphasize(&mut self, topic: &str) {
        if !self.avoid_topics.iter().any(|t| t == topic)
            && !self.emphasize_topics.iter().any(|t| t == topic)
        {
            self.emphasize_topics.push(topic.to_string());
        }
    }
}

/// How to respond this turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Directive {
    pub tone: Tone,
    pub formality: f32,
    pub energy: f32,
    pub empathy: f32,
    pub humor: f32,
    pub flags: StrategyFlags,
    pub hints: PromptHints,
    /// Multiplies the response probability; starts at 1.0.
    pub probability_modifier: f64,
}

impl Default for Directive {
    fn default() -> Self {
        Self {
            tone: Tone::Neutral,
            formality: 0.3,
            energy: 0.5,
            empathy: 0.5,
            humor: 0.4,
            flags: StrategyFlags::default(),
            hints: PromptHints::default(),
            probability_modifier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Worsening,
    Stable,
}

/// Short-term emotional drift over the last few human messages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmotionTrend {
    pub dominant: Option<Emotion>,
    pub intensity: f32,
    pub direction: TrendDirection,
}

impl EmotionTrend {
    /// Compare the mean polarity of the first and second halves of the
    /// chronological `(emotion, intensity)` samples. Needs at least
    /// [`MIN_TREND_SAMPLES`].
    pub fn from_samples(samples: &[(Option<Emotion>, f32)]) -> Option<Self> {
        if samples.len() < MIN_TREND_SAMPLES {
            return None;
        }

        let polarity = |half: &[(Option<Emotion>, f32)]| -> f32 {
            let sum: f32 = half
                .iter()
                .map(|(emotion, intensity)| emotion.map_or(0.0, |e| e.polarity() * intensity))
                .sum();
            sum / half.len() as f32
        };
        let (first, second) = samples.split_at(samples.len() / 2);
        let delta = polarity(second) - polarity(first);
        let direction = if delta > TREND_THRESHOLD {
            TrendDirection::Improving
        } else if delta < -TREND_THRESHOLD {
            TrendDirection::Worsening
        } else {
            TrendDirection::Stable
        };

        let mut counts: Vec<(Emotion, usize)> = Vec::new();
        for emotion in second.iter().filter_map(|(e, _)| *e) {
            match counts.iter_mut().find(|(e, _)| *e == emotion) {
                Some((_, n)) => *n += 1,
                None => counts.push((emotion, 1)),
            }
        }
        // Ties go to the emotion that appeared later.
        let dominant = counts
            .iter()
            .max_by_key(|(_, n)| *n)
            .map(|(e, _)| *e);
        let intensity = second.iter().map(|(_, i)| *i).sum::<f32>() / second.len() as f32;

        Some(Self {
            dominant,
            intensity: intensity.clamp(0.0, 1.0),
            direction,
        })
    }

    /// Trend over the human messages in a chronological window.
    pub fn from_messages(messages: &[ChatMessage]) -> Option<Self> {
        let samples: Vec<(Option<Emotion>, f32)> = messages
            .iter()
            .filter(|m| !m.from_agent)
            .map(|m| (m.emotion, m.emotion_intensity))
            .collect();
        Self::from_samples(&samples)
    }
}

/// Build a directive from everything available. Any input may be absent.
pub fn adapt(
    profile: Option<&EmotionalProfile>,
    group: Option<&GroupEmotionalState>,
    trend: Option<&EmotionTrend>,
) -> Directive {
    let mut directive = Directive::default();
    if let Some(profile) = profile {
        directive.apply_profile(profile);
    }
    if let Some(group) = group {
        directive.apply_group(group);
    }
    if let Some(trend) = trend {
        directive.apply_trend(trend);
    }
    directive.clamp();
    directive
}

impl Directive {
    fn apply_profile(&mut self, profile: &EmotionalProfile) {
        self.hints.context.push(profile.summary());

        match profile.temperament {
            Temperament::Sanguine => {
                self.energy += 0.2;
                self.humor += 0.1;
            }
            Temperament::Choleric => {
                self.empathy += 0.1;
                self.hints.behavior.push("stay composed, do not escalate".into());
            }
            Temperament::Melancholic => {
                self.empathy += 0.2;
                self.tone = Tone::Supportive;
            }
            Temperament::Phlegmatic => {
                self.energy -= 0.1;
            }
        }

        if profile.expressiveness > 0.7 {
            self.energy += 0.1;
        } else if profile.expressiveness < 0.3 {
            self.hints.behavior.push("keep it short".into());
        }
        if profile.stability < 0.4 {
            self.empathy += 0.1;
            self.hints.behavior.push("their mood swings, be gentle".into());
        }

        match profile.social_role {
            SocialRole::Entertainer => {
                self.tone = Tone::Playful;
                self.humor += 0.2;
            }
            SocialRole::Supporter => {
                self.hints.behavior.push("acknowledge their care for others".into());
            }
            SocialRole::Challenger => {
                self.formality += 0.1;
                self.hints.behavior.push("do not take the bait".into());
            }
            SocialRole::Leader => {
                self.formality += 0.1;
            }
            SocialRole::Observer => {
                self.hints.behavior.push("invite them into the conversation".into());
            }
            SocialRole::Mediator => {}
        }

        if matches!(
            profile.current_mood(),
            Some(Emotion::Sadness | Emotion::Stress | Emotion::Fear)
        ) {
            self.flags.comfort = true;
            self.tone = Tone::Supportive;
            self.empathy += 0.3;
            self.humor -= 0.2;
        }

        match profile.relationship {
            Some(RelationshipKind::Newcomer) => {
                self.formality += 0.2;
                self.hints.behavior.push("be welcoming".into());
            }
            Some(RelationshipKind::Friend) => {
                self.formality -= 0.2;
                self.humor += 0.1;
            }
            _ => {}
        }
    }

    fn apply_group(&mut self, group: &GroupEmotionalState) {
        self.hints.context.push(group.summary());

        if group.has_active_conflicts() {
            self.flags.mediate = true;
            self.flags.deescalate = true;
            self.tone = Tone::Calming;
            self.humor -= 0.3;
            self.probability_modifier *= CONFLICT_MODIFIER;
            for topic in group.conflict_topics() {
                self.hints.avoid(&topic);
            }
            self.hints.behavior.push("mediate, do not take sides".into());
        } else if group.tension > 0.5 {
            self.flags.deescalate = true;
            self.tone = Tone::Calming;
            self.energy -= 0.2;
        } else if group.harmony > 0.6 && group.energy > 0.5 {
            self.tone = Tone::Playful;
            self.humor += 0.1;
        }

        if group.engagement < 0.3 {
            self.flags.energize = true;
            self.energy += 0.2;
        }

        for topic in &group.emotional_topics {
            self.hints.emphasize(topic);
        }
    }

    fn apply_trend(&mut self, trend: &EmotionTrend) {
        match trend.direction {
            TrendDirection::Worsening => {
                self.flags.comfort = true;
                self.flags.energize = true;
                self.tone = Tone::Supportive;
                self.empathy += 0.2;
                self.probability_modifier *= WORSENING_MODIFIER;
            }
            TrendDirection::Improving => {
                self.energy += 0.1;
                if matches!(trend.dominant, Some(Emotion::Joy | Emotion::Excitement))
                    && !self.flags.deescalate
                {
                    self.tone = Tone::Energetic;
                }
            }
            TrendDirection::Stable => {}
        }

        if trend.intensity > HIGH_INTENSITY {
            self.flags.match_energy = true;
            self.energy = self.energy.max(trend.intensity);
            self.probability_modifier *= HIGH_INTENSITY_MODIFIER;
        }
    }

    fn clamp(&mut self) {
        for value in [
            &mut self.formality,
            &mut self.energy,
            &mut self.empathy,
            &mut self.humor,
        ] {
            *value = value.clamp(0.0, 1.0);
        }
    }

    /// One line for prompts and logs.
    pub fn summary(&self) -> String {
        let flags = self.flags.active();
        let mut line = format!(
            "tone {}, formality {:.1}, energy {:.1}, empathy {:.1}, humor {:.1}",
            self.tone, self.formality, self.energy, self.empathy, self.humor
        );
        if !flags.is_empty() {
            line.push_str(&format!("; strategy: {}", flags.join(", ")));
        }
        line
    }
}
