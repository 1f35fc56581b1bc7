//! Emotion lexicons: swappable word lists, kept out of the scoring logic.

use crate::emotion::{DIMENSIONS, Emotion};
use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// The built-in Russian/English lexicon asset.
const BUILTIN_LEXICON: &str = include_str!("../../assets/lexicon.toml");

/// Default per-hit score coefficient.
pub const DEFAULT_SCALE: f32 = 0.35;

/// How a term is matched against text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    /// Single alphanumeric word, matched as a token prefix.
    Stem(String),
    /// Anything else (phrases, emoji, punctuation), matched as a substring.
    Literal(String),
}

impl Term {
    fn new(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        if lowered.chars().all(char::is_alphanumeric) {
            Some(Term::Stem(lowered))
        } else {
            Some(Term::Literal(lowered))
        }
    }

    fn hits(&self, tokens: &[&str], lowered_text: &str) -> usize {
        match self {
            Term::Stem(stem) => tokens
                .iter()
                .filter(|token| token.starts_with(stem.as_str()))
                .count(),
            Term::Literal(literal) => lowered_text.matches(literal.as_str()).count(),
        }
    }
}

/// Word lists for each emotion dimension plus stopwords.
#[derive(Debug, Clone)]
pub struct Lexicon {
    scale: f32,
    terms: Vec<Vec<Term>>,
    stopwords: HashSet<String>,
}

#[derive(Debug, Deserialize)]
struct LexiconFile {
    #[serde(default = "default_scale")]
    scale: f32,
    #[serde(default)]
    stopwords: Vec<String>,
    #[serde(default)]
    entries: HashMap<String, Vec<String>>,
}

fn default_scale() -> f32 {
    DEFAULT_SCALE
}

/// Raw per-dimension hit counts for one text.
#[derive(Debug, Clone, Copy, Default)]
pub struct HitCounts {
    pub per_dimension: [usize; DIMENSIONS],
    pub meaningful_words: usize,
    pub emoji: usize,
}

impl HitCounts {
    pub fn total(&self) -> usize {
        self.per_dimension.iter().sum()
    }
}

impl Lexicon {
    /// An empty lexicon with the given per-hit scale.
    pub fn new(scale: f32) -> Self {
        Self {
            scale,
            terms: vec![Vec::new(); DIMENSIONS],
            stopwords: HashSet::new(),
        }
    }

    /// The embedded Russian/English lexicon.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_LEXICON)
    }

    /// Parse a lexicon from TOML (`scale`, `stopwords`, `[entries]`).
    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: LexiconFile =
            toml::from_str(raw).map_err(|error| ConfigError::Parse(error.to_string()))?;

        if !(file.scale > 0.0 && file.scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "lexicon scale must be in (0, 1], got {}",
                file.scale
            ))
            .into());
        }

        let mut lexicon = Self::new(file.scale);
        for (name, terms) in file.entries {
            let emotion = Emotion::parse(&name).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown emotion in lexicon: {name}"))
            })?;
            lexicon = lexicon.with_terms(emotion, terms.iter().map(String::as_str));
        }
        lexicon = lexicon.with_stopwords(file.stopwords.iter().map(String::as_str));
        Ok(lexicon)
    }

    /// Add terms to one dimension.
    pub fn with_terms<'a>(mut self, emotion: Emotion, terms: impl IntoIterator<Item = &'a str>) -> Self {
        self.terms[emotion.index()].extend(terms.into_iter().filter_map(Term::new));
        self
    }

    pub fn with_stopwords<'a>(mut self, words: impl IntoIterator<Item = &'a str>) -> Self {
        self.stopwords
            .extend(words.into_iter().map(|word| word.trim().to_lowercase()));
        self
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(word)
    }

    pub fn stopwords(&self) -> &HashSet<String> {
        &self.stopwords
    }

    /// Count lexicon hits per dimension.
    pub fn count_hits(&self, text: &str) -> HitCounts {
        let lowered = text.to_lowercase();
        let tokens = tokenize(&lowered);

        let mut counts = HitCounts {
            meaningful_words: tokens.iter().filter(|t| !self.is_stopword(t)).count(),
            emoji: count_emoji(text),
            ..Default::default()
        };

        for emotion in Emotion::ALL {
            counts.per_dimension[emotion.index()] = self.terms[emotion.index()]
                .iter()
                .map(|term| term.hits(&tokens, &lowered))
                .sum();
        }
        counts
    }
}

/// Split lowercased text into alphanumeric tokens.
pub fn tokenize(lowered: &str) -> Vec<&str> {
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Rough emoji count: pictographic code points outside the letter ranges.
pub fn count_emoji(text: &str) -> usize {
    text.chars().filter(|c| is_emoji(*c)).count()
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F300..=0x1FAFF | 0x2600..=0x27BF | 0x1F000..=0x1F2FF | 0x2B50)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lexicon_parses() {
        let lexicon = Lexicon::builtin().expect("builtin lexicon should parse");
        assert_eq!(lexicon.scale(), DEFAULT_SCALE);
        assert!(lexicon.is_stopword("и"));
        assert!(lexicon.is_stopword("the"));
    }

    #[test]
    fn stems_match_as_prefixes_and_literals_as_substrings() {
        let lexicon = Lexicon::new(0.5)
            .with_terms(Emotion::Joy, ["рад", "🎉"])
            .with_terms(Emotion::Confusion, ["в смысле"]);

        let counts = lexicon.count_hits("Я так радуюсь! 🎉🎉 В смысле, правда");
        assert_eq!(counts.per_dimension[Emotion::Joy.index()], 3);
        assert_eq!(counts.per_dimension[Emotion::Confusion.index()], 1);
        assert_eq!(counts.emoji, 2);
    }

    #[test]
    fn rejects_unknown_emotion_names() {
        let error = Lexicon::from_toml("[entries]\nglee = [\"yay\"]\n")
            .expect_err("unknown dimension must fail");
        assert!(error.to_string().contains("glee"));
    }

    #[test]
    fn emoji_ranges_count_each_symbol_once() {
        assert_eq!(count_emoji("❤ ⭐ 🎉 ☀"), 4);
        assert_eq!(count_emoji("привет :)"), 0);
    }

    #[test]
    fn tokenizer_handles_cyrillic() {
        assert_eq!(tokenize("привет, как дела?"), vec!["привет", "как", "дела"]);
    }
}
