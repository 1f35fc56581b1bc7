//! Emotion scoring, per-user profiles and group emotional state.

pub mod group;
pub mod lexicon;
pub mod profile;
pub mod scorer;

pub use group::{Conflict, ConflictStatus, GroupEmotionalState, ScoredMessage};
pub use lexicon::Lexicon;
pub use profile::{EmotionalProfile, MoodSample, SocialRole, Temperament};
pub use scorer::{EmotionReading, EmotionScorer};

use serde::{Deserialize, Serialize};

/// Number of scored dimensions (8 primary, 6 social, 6 contextual).
pub const DIMENSIONS: usize = 20;

/// Label used wherever no emotion clears the dominance floor.
pub const NEUTRAL: &str = "neutral";

/// Scored emotion dimensions. Discriminants index into [`EmotionVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    // Primary
    Joy,
    Sadness,
    Anger,
    Fear,
    Surprise,
    Disgust,
    Trust,
    Anticipation,
    // Social
    Friendly,
    Hostile,
    Supportive,
    Playful,
    Sarcastic,
    Affectionate,
    // Contextual
    Stress,
    Excitement,
    Boredom,
    Curiosity,
    Confusion,
    Gratitude,
}

impl Emotion {
    pub const ALL: [Emotion; DIMENSIONS] = [
        Emotion::Joy,
        Emotion::Sadness,
        Emotion::Anger,
        Emotion::Fear,
        Emotion::Surprise,
        Emotion::Disgust,
        Emotion::Trust,
        Emotion::Anticipation,
        Emotion::Friendly,
        Emotion::Hostile,
        Emotion::Supportive,
        Emotion::Playful,
        Emotion::Sarcastic,
        Emotion::Affectionate,
        Emotion::Stress,
        Emotion::Excitement,
        Emotion::Boredom,
        Emotion::Curiosity,
        Emotion::Confusion,
        Emotion::Gratitude,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Sadness => "sadness",
            Emotion::Anger => "anger",
            Emotion::Fear => "fear",
            Emotion::Surprise => "surprise",
            Emotion::Disgust => "disgust",
            Emotion::Trust => "trust",
            Emotion::Anticipation => "anticipation",
            Emotion::Friendly => "friendly",
            Emotion::Hostile => "hostile",
            Emotion::Supportive => "supportive",
            Emotion::Playful => "playful",
            Emotion::Sarcastic => "sarcastic",
            Emotion::Affectionate => "affectionate",
            Emotion::Stress => "stress",
            Emotion::Excitement => "excitement",
            Emotion::Boredom => "boredom",
            Emotion::Curiosity => "curiosity",
            Emotion::Confusion => "confusion",
            Emotion::Gratitude => "gratitude",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Emotion::ALL.into_iter().find(|emotion| emotion.as_str() == value)
    }

    /// Contribution to valence per unit of score. Positive dimensions add,
    /// negative dimensions subtract.
    pub fn valence_weight(self) -> f32 {
        match self {
            Emotion::Joy => 1.0,
            Emotion::Trust => 0.6,
            Emotion::Anticipation => 0.3,
            Emotion::Surprise => 0.1,
            Emotion::Friendly => 0.7,
            Emotion::Supportive => 0.7,
            Emotion::Playful => 0.5,
            Emotion::Affectionate => 0.8,
            Emotion::Excitement => 0.5,
            Emotion::Curiosity => 0.2,
            Emotion::Gratitude => 0.8,
            Emotion::Sadness => -0.8,
            Emotion::Anger => -1.0,
            Emotion::Fear => -0.7,
            Emotion::Disgust => -0.8,
            Emotion::Hostile => -1.0,
            Emotion::Sarcastic => -0.4,
            Emotion::Stress => -0.7,
            Emotion::Boredom => -0.3,
            Emotion::Confusion => -0.2,
        }
    }

    /// Contribution to arousal per unit of score. Calm dimensions subtract.
    pub fn arousal_weight(self) -> f32 {
        match self {
            Emotion::Excitement => 1.0,
            Emotion::Anger => 0.9,
            Emotion::Surprise => 0.8,
            Emotion::Fear => 0.7,
            Emotion::Hostile => 0.7,
            Emotion::Joy => 0.6,
            Emotion::Stress => 0.6,
            Emotion::Playful => 0.5,
            Emotion::Anticipation => 0.4,
            Emotion::Curiosity => 0.2,
            Emotion::Boredom => -0.8,
            Emotion::Sadness => -0.5,
            Emotion::Trust => -0.3,
            Emotion::Supportive => -0.2,
            Emotion::Gratitude => -0.1,
            Emotion::Disgust
            | Emotion::Friendly
            | Emotion::Sarcastic
            | Emotion::Affectionate
            | Emotion::Confusion => 0.0,
        }
    }

    /// Sign of the valence contribution: 1, -1, or 0.
    pub fn polarity(self) -> f32 {
        let weight = self.valence_weight();
        if weight > 0.15 {
            1.0
        } else if weight < -0.15 {
            -1.0
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Render an optional dominant emotion as a tag.
pub fn emotion_label(emotion: Option<Emotion>) -> &'static str {
    emotion.map(Emotion::as_str).unwrap_or(NEUTRAL)
}

/// Parse a stored tag back into an optional dominant emotion. Unknown tags
/// read as neutral.
pub fn parse_emotion_label(label: &str) -> Option<Emotion> {
    Emotion::parse(label)
}

/// Fixed-size score vector, one slot per [`Emotion`], each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionVector([f32; DIMENSIONS]);

impl Default for EmotionVector {
    fn default() -> Self {
        Self([0.0; DIMENSIONS])
    }
}

impl EmotionVector {
    pub fn get(&self, emotion: Emotion) -> f32 {
        self.0[emotion.index()]
    }

    /// Set a dimension, clamping into `[0, 1]`.
    pub fn set(&mut self, emotion: Emotion, value: f32) {
        self.0[emotion.index()] = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn values(&self) -> &[f32; DIMENSIONS] {
        &self.0
    }

    pub fn max(&self) -> f32 {
        self.0.iter().copied().fold(0.0, f32::max)
    }

    /// The highest-scoring dimension. Ties go to the earlier dimension.
    pub fn argmax(&self) -> (Emotion, f32) {
        let mut best = (Emotion::Joy, self.0[0]);
        for emotion in Emotion::ALL.into_iter().skip(1) {
            let value = self.get(emotion);
            if value > best.1 {
                best = (emotion, value);
            }
        }
        best
    }

    /// Element-wise mean of several vectors.
    pub fn mean<'a>(vectors: impl IntoIterator<Item = &'a EmotionVector>) -> EmotionVector {
        let mut sum = [0.0f32; DIMENSIONS];
        let mut count = 0usize;
        for vector in vectors {
            for (slot, value) in sum.iter_mut().zip(vector.0.iter()) {
                *slot += value;
            }
            count += 1;
        }
        let mut result = EmotionVector::default();
        if count > 0 {
            for emotion in Emotion::ALL {
                result.set(emotion, sum[emotion.index()] / count as f32);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_parse() {
        for emotion in Emotion::ALL {
            assert_eq!(Emotion::parse(emotion.as_str()), Some(emotion));
        }
        assert_eq!(parse_emotion_label(NEUTRAL), None);
        assert_eq!(emotion_label(None), NEUTRAL);
    }

    #[test]
    fn vector_clamps_and_breaks_ties_by_order() {
        let mut vector = EmotionVector::default();
        vector.set(Emotion::Anger, 3.0);
        vector.set(Emotion::Joy, 1.0);
        vector.set(Emotion::Fear, f32::NAN);
        assert_eq!(vector.get(Emotion::Anger), 1.0);
        assert_eq!(vector.get(Emotion::Fear), 0.0);
        assert_eq!(vector.argmax().0, Emotion::Joy);
    }
}
