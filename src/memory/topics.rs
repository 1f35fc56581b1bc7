//! Topic, keyword and mention extraction from message text.

use crate::emotion::lexicon::tokenize;

use std::collections::HashSet;

/// Words that introduce a topic phrase ("про отпуск", "about the trip").
const TOPIC_MARKERS: &[&str] = &["про", "насчет", "насчёт", "about", "regarding"];

/// Pulls topic candidates out of free text.
#[derive(Debug, Clone)]
pub struct TopicExtractor {
    max_topics: usize,
    min_word_length: usize,
    stopwords: HashSet<String>,
}

impl Default for TopicExtractor {
    fn default() -> Self {
        Self {
            max_topics: 3,
            min_word_length: 4,
            stopwords: HashSet::new(),
        }
    }
}

impl TopicExtractor {
    pub fn new(max_topics: usize, min_word_length: usize) -> Self {
        Self {
            max_topics,
            min_word_length,
            stopwords: HashSet::new(),
        }
    }

    pub fn with_stopwords(mut self, stopwords: &HashSet<String>) -> Self {
        self.stopwords.extend(stopwords.iter().cloned());
        self
    }

    /// Up to `max_topics` lowercase topic words.
    ///
    /// Words right after a topic marker come first, then the remaining
    /// significant words by frequency, first occurrence breaking ties.
    pub fn extract(&self, text: &str) -> Vec<String> {
        self.rank(text, self.max_topics)
    }

    /// Like [`extract`](Self::extract) but with a caller-chosen limit, for
    /// building relevance queries.
    pub fn keywords(&self, text: &str, limit: usize) -> Vec<String> {
        self.rank(text, limit)
    }

    fn rank(&self, text: &str, limit: usize) -> Vec<String> {
        let lowered = text.to_lowercase();
        let tokens = tokenize(&lowered);

        let mut marked: Vec<&str> = Vec::new();
        for pair in tokens.windows(2) {
            if TOPIC_MARKERS.contains(&pair[0]) && self.is_significant(pair[1]) && !marked.contains(&pair[1]) {
                marked.push(pair[1]);
            }
        }

        let mut counted: Vec<(&str, usize)> = Vec::new();
        for token in tokens.iter().copied().filter(|t| self.is_significant(t)) {
            match counted.iter_mut().find(|(word, _)| *word == token) {
                Some((_, count)) => *count += 1,
                None => counted.push((token, 1)),
            }
        }
        // Stable sort keeps first-occurrence order among equal counts.
        counted.sort_by(|a, b| b.1.cmp(&a.1));

        let mut topics: Vec<String> = marked.iter().map(|word| word.to_string()).collect();
        for (word, _) in counted {
            if topics.len() >= limit {
                break;
            }
            if !topics.iter().any(|topic| topic == word) {
                topics.push(word.to_string());
            }
        }
        topics.truncate(limit);
        topics
    }

    fn is_significant(&self, word: &str) -> bool {
        word.chars().count() >= self.min_word_length
            && word.chars().any(char::is_alphabetic)
            && !self.stopwords.contains(word)
            && !TOPIC_MARKERS.contains(&word)
    }
}

/// `@name` mentions, lowercased, in order of appearance.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for (index, _) in text.match_indices('@') {
        let name: String = text[index + 1..]
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();
        if !name.is_empty() && !mentions.contains(&name) {
            mentions.push(name);
        }
    }
    mentions
}
