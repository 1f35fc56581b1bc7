//! Static replies used when generation is unavailable, fails or times out.

use crate::error::{ConfigError, Result};

use rand::Rng;
use rand::seq::IndexedRandom as _;
use regex::Regex;

/// Pattern table in priority order: the first matching pattern answers.
const BUILTIN: &[(&str, &[&str])] = &[
    (
        r"(?i)как\s+(дела|ты|жизнь|сам|сама)|how\s+are\s+you",
        &[
            "Привет! Да потихоньку, а у тебя как?",
            "Нормально, лапки на месте. Ты как?",
            "Живу, мурчу. Рассказывай, что нового?",
        ],
    ),
    (
        r"(?i)\b(привет|приветик|здравствуй\w*|хай|hello|hi|hey)\b",
        &["Привет!", "Приветик 👋", "О, привет!"],
    ),
    (
        r"(?i)спасиб|благодар|\bthanks?\b",
        &["Да не за что!", "Обращайся 😊", "Всегда пожалуйста"],
    ),
    (
        r"(?i)\b(пока|до\s+свидания|спокойной\s+ночи|bye)\b",
        &["Пока-пока!", "До встречи 👋", "Спокойной ночи!"],
    ),
    (
        r"(?i)(ха){2,}|\bлол\b|😂|🤣",
        &["😂", "Ахах, да", "Ну вы даете 😄"],
    ),
    (
        r"(?i)грустн|плохо|устал|тоскл|\bsad\b",
        &["Обнимаю 🫂", "Эй, держись. Хочешь рассказать?", "Бывает. Я рядом, если что"],
    ),
];

struct Pattern {
    regex: Regex,
    replies: Vec<String>,
}

/// Regex-matched canned replies.
pub struct FallbackReplies {
    patterns: Vec<Pattern>,
}

impl FallbackReplies {
    pub fn new(table: &[(&str, &[&str])]) -> Result<Self> {
        let patterns = table
            .iter()
            .map(|(pattern, replies)| {
                let regex = Regex::new(pattern).map_err(|error| {
                    ConfigError::Invalid(format!("bad fallback pattern {pattern}: {error}"))
                })?;
                Ok(Pattern {
                    regex,
                    replies: replies.iter().map(|r| r.to_string()).collect(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn builtin() -> Result<Self> {
        Self::new(BUILTIN)
    }

    /// A canned reply for `text`, or `None` when no pattern matches.
    pub fn reply<R: Rng + ?Sized>(&self, text: &str, rng: &mut R) -> Option<String> {
        self.patterns
            .iter()
            .find(|pattern| pattern.regex.is_match(text))
            .and_then(|pattern| pattern.replies.choose(rng).cloned())
    }

    /// Every reply a pattern matching `text` could produce.
    pub fn candidates(&self, text: &str) -> &[String] {
        self.patterns
            .iter()
            .find(|pattern| pattern.regex.is_match(text))
            .map(|pattern| pattern.replies.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng as _;
    use rand::rngs::StdRng;

    #[test]
    fn greeting_question_gets_a_how_are_you_reply() {
        let replies = FallbackReplies::builtin().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let reply = replies.reply("Привет, как дела?", &mut rng).unwrap();
        assert!(replies.candidates("Привет, как дела?").contains(&reply));
        assert!(reply.contains('?'));
    }

    #[test]
    fn same_seed_same_reply() {
        let replies = FallbackReplies::builtin().unwrap();
        let first = replies.reply("спасибо!", &mut StdRng::seed_from_u64(1));
        let second = replies.reply("спасибо!", &mut StdRng::seed_from_u64(1));
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn unmatched_text_stays_silent() {
        let replies = FallbackReplies::builtin().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(replies.reply("завтра дождь обещают", &mut rng), None);
        assert!(replies.candidates("завтра дождь обещают").is_empty());
    }

    #[test]
    fn invalid_patterns_are_config_errors() {
        assert!(FallbackReplies::new(&[("(", &["x"])]).is_err());
    }
}
