//! Text → emotion vector scoring.
//!
//! Pure and deterministic for a fixed lexicon: hit counts per dimension are
//! scaled and capped, then intensity, valence, arousal and confidence are
//! derived from the vector plus a few structural signals (exclamations, caps,
//! length, emoji).

use crate::emotion::lexicon::{HitCounts, Lexicon};
use crate::emotion::{Emotion, EmotionVector, emotion_label};
use serde::{Deserialize, Serialize};

/// A dimension must exceed this to be called dominant.
pub const DOMINANCE_FLOOR: f32 = 0.1;

/// Weight of the surrounding window when scoring in context.
const CONTEXT_BLEND: f32 = 0.2;

/// Result of scoring one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub scores: EmotionVector,
    /// `None` means neutral.
    pub dominant: Option<Emotion>,
    pub intensity: f32,
    pub valence: f32,
    pub arousal: f32,
    pub confidence: f32,
}

impl EmotionReading {
    pub fn neutral() -> Self {
        Self {
            scores: EmotionVector::default(),
            dominant: None,
            intensity: 0.0,
            valence: 0.0,
            arousal: 0.0,
            confidence: 0.1,
        }
    }

    pub fn dominant_label(&self) -> &'static str {
        emotion_label(self.dominant)
    }

    pub fn is_neutral(&self) -> bool {
        self.dominant.is_none()
    }
}

/// Lexicon-backed scorer.
#[derive(Debug, Clone)]
pub struct EmotionScorer {
    lexicon: Lexicon,
}

impl EmotionScorer {
    pub fn new(lexicon: Lexicon) -> Self {
        Self { lexicon }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Score a single text with no surrounding context.
    pub fn score(&self, text: &str) -> EmotionReading {
        self.score_in_context(text, &[])
    }

    /// Score a text, letting a window of recent readings tint the vector.
    /// The window contributes a fixed share of the final scores; the dominance
    /// floor is applied after blending.
    pub fn score_in_context(&self, text: &str, window: &[EmotionReading]) -> EmotionReading {
        let hits = self.lexicon.count_hits(text);
        let mut scores = self.scale_hits(&hits);

        if !window.is_empty() && hits.total() > 0 {
            let context = EmotionVector::mean(window.iter().map(|reading| &reading.scores));
            for emotion in Emotion::ALL {
                let blended =
                    (1.0 - CONTEXT_BLEND) * scores.get(emotion) + CONTEXT_BLEND * context.get(emotion);
                scores.set(emotion, blended);
            }
        }

        let (top, max) = scores.argmax();
        let dominant = (max > DOMINANCE_FLOOR).then_some(top);

        let intensity = (max + structural_bonus(text)).clamp(0.0, 1.0);
        let valence = valence_of(&scores);
        let arousal = arousal_of(&scores);
        let confidence = confidence_of(text, &hits, dominant.is_none());

        EmotionReading {
            scores,
            dominant,
            intensity,
            valence,
            arousal,
            confidence,
        }
    }

    fn scale_hits(&self, hits: &HitCounts) -> EmotionVector {
        let mut scores = EmotionVector::default();
        for emotion in Emotion::ALL {
            let count = hits.per_dimension[emotion.index()];
            scores.set(emotion, (count as f32 * self.lexicon.scale()).min(1.0));
        }
        scores
    }
}

/// Exclamations, shouting and length push intensity above the raw maximum.
fn structural_bonus(text: &str) -> f32 {
    let exclamations = text.matches('!').count().min(3) as f32;
    let mut bonus = 0.1 * exclamations;

    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 5 {
        let upper = letters.iter().filter(|c| c.is_uppercase()).count() as f32;
        let caps_ratio = upper / letters.len() as f32;
        if caps_ratio > 0.5 {
            bonus += 0.2 * caps_ratio;
        }
    }

    let length = text.chars().count();
    if length > 200 {
        bonus += 0.1;
    } else if length > 100 {
        bonus += 0.05;
    }
    bonus
}

fn valence_of(scores: &EmotionVector) -> f32 {
    Emotion::ALL
        .into_iter()
        .map(|emotion| scores.get(emotion) * emotion.valence_weight())
        .sum::<f32>()
        .clamp(-1.0, 1.0)
}

fn arousal_of(scores: &EmotionVector) -> f32 {
    Emotion::ALL
        .into_iter()
        .map(|emotion| scores.get(emotion) * emotion.arousal_weight())
        .sum::<f32>()
        .clamp(0.0, 1.0)
}

fn confidence_of(text: &str, hits: &HitCounts, neutral: bool) -> f32 {
    let words = hits.meaningful_words;
    let length_factor = (words as f32 / 10.0).min(1.0) * 0.4;

    let signals = text.chars().filter(|c| matches!(c, '!' | '?')).count() + hits.emoji;
    let density = if words + hits.emoji == 0 {
        0.0
    } else {
        (signals as f32 / (words + hits.emoji) as f32).min(1.0) * 0.2
    };
    let lexical = (hits.total() as f32 / 3.0).min(1.0) * 0.2;

    let confidence = (0.2 + length_factor + density + lexical).clamp(0.0, 1.0);
    if neutral { confidence / 2.0 } else { confidence }
}
