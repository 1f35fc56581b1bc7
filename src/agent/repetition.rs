//! Near-duplicate detection for messages an author keeps resending.
//!
//! The result is a hint for the prompt. It never blocks a reply.

use serde::Serialize;

/// Messages by the same author compared against.
pub const REPETITION_WINDOW: usize = 15;

/// Normalized similarity above which two messages count as the same.
const SIMILARITY_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionLevel {
    None,
    Mild,
    Moderate,
    High,
}

impl RepetitionLevel {
    /// Classify by how many times the message has now been sent, this one
    /// included.
    pub fn from_count(count: usize) -> Self {
        match count {
            0 | 1 => RepetitionLevel::None,
            2 | 3 => RepetitionLevel::Mild,
            4 | 5 => RepetitionLevel::Moderate,
            _ => RepetitionLevel::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RepetitionLevel::None => "none",
            RepetitionLevel::Mild => "mild",
            RepetitionLevel::Moderate => "moderate",
            RepetitionLevel::High => "high",
        }
    }

    /// Prompt guidance for this level, if any.
    pub fn hint(self) -> Option<&'static str> {
        match self {
            RepetitionLevel::None => None,
            RepetitionLevel::Mild => Some("they said nearly the same thing before, vary the answer"),
            RepetitionLevel::Moderate => {
                Some("they keep repeating themselves, gently point it out")
            }
            RepetitionLevel::High => {
                Some("they are spamming the same message, tease them about it or keep it very short")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Repetition {
    pub count: usize,
    pub level: RepetitionLevel,
    /// Highest similarity to any earlier message.
    pub max_similarity: f64,
}

/// Compare `content` against the author's earlier messages (any order; only
/// the newest [`REPETITION_WINDOW`] should be passed).
pub fn detect<'a>(content: &str, previous: impl IntoIterator<Item = &'a str>) -> Repetition {
    let current = normalize(content);
    let mut count = 1;
    let mut max_similarity: f64 = 0.0;

    if !current.is_empty() {
        for earlier in previous.into_iter().take(REPETITION_WINDOW) {
            let earlier = normalize(earlier);
            let similarity = similarity(&current, &earlier);
            max_similarity = max_similarity.max(similarity);
            if current == earlier || similarity > SIMILARITY_THRESHOLD {
                count += 1;
            }
        }
    }

    Repetition {
        count,
        level: RepetitionLevel::from_count(count),
        max_similarity,
    }
}

/// `1 - distance / max_len` over characters. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a_len, b_len) = (a.chars().count(), b.chars().count());
    let longest = a_len.max(b_len);
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Edit distance over characters, two-row dynamic programming.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("привет", "привет!"), 1);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn repeat_counts_map_to_levels() {
        let message = "кто-нибудь видел мои ключи?";
        let cases = [
            (1, RepetitionLevel::None),
            (2, RepetitionLevel::Mild),
            (4, RepetitionLevel::Moderate),
            (6, RepetitionLevel::High),
        ];
        for (times, expected) in cases {
            let previous = vec![message; times - 1];
            let repetition = detect(message, previous.iter().copied());
            assert_eq!(repetition.count, times);
            assert_eq!(repetition.level, expected, "{times} sends");
        }
    }

    #[test]
    fn near_duplicates_count_and_different_text_does_not() {
        let previous = ["Кто-нибудь видел мои ключи??", "пойдем гулять"];
        let repetition = detect("кто-нибудь видел мои ключи?", previous);
        assert_eq!(repetition.count, 2);
        assert_eq!(repetition.level, RepetitionLevel::Mild);

        let fresh = detect("совсем другое сообщение", previous);
        assert_eq!(fresh.level, RepetitionLevel::None);
        assert!(fresh.max_similarity < 0.85);
    }

    #[test]
    fn window_is_bounded() {
        let previous = vec!["ау"; 40];
        assert_eq!(detect("ау", previous).count, REPETITION_WINDOW + 1);
    }

    #[test]
    fn only_repeats_carry_a_hint() {
        assert!(RepetitionLevel::None.hint().is_none());
        assert!(RepetitionLevel::High.hint().is_some());
    }
}
