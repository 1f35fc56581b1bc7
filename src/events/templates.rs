//! Event templates: keyword, marker and clue lists per event type.

use crate::error::{ConfigError, Result};
use crate::events::types::EventType;

use serde::Deserialize;

const BUILTIN_TEMPLATES: &str = include_str!("../../assets/event_templates.toml");

/// A list saturates at this many matches.
const SATURATION: usize = 2;

/// Patterns for one event type.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTemplate {
    pub event_type: EventType,
    pub title: String,
    pub keywords: Vec<String>,
    pub markers: Vec<String>,
    pub clues: Vec<String>,
    pub min_importance: f32,
}

impl EventTemplate {
    pub fn new(event_type: EventType, min_importance: f32) -> Self {
        Self {
            event_type,
            title: event_type.as_str().to_string(),
            keywords: Vec::new(),
            markers: Vec::new(),
            clues: Vec::new(),
            min_importance,
        }
    }

    pub fn with_keywords(mut self, terms: &[&str]) -> Self {
        self.keywords = lowercase(terms);
        self
    }

    pub fn with_markers(mut self, terms: &[&str]) -> Self {
        self.markers = lowercase(terms);
        self
    }

    pub fn with_clues(mut self, terms: &[&str]) -> Self {
        self.clues = lowercase(terms);
        self
    }
}

/// Share of a term list present in `lowered`, saturating at two matches.
pub fn match_ratio(terms: &[String], lowered: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let matches = terms.iter().filter(|term| lowered.contains(term.as_str())).count();
    let denominator = terms.len().min(SATURATION);
    (matches as f32 / denominator as f32).min(1.0)
}

/// Terms from `terms` present in `lowered`.
pub fn matched_terms<'a>(terms: &'a [String], lowered: &str) -> Vec<&'a str> {
    terms
        .iter()
        .filter(|term| lowered.contains(term.as_str()))
        .map(String::as_str)
        .collect()
}

fn lowercase(terms: &[&str]) -> Vec<String> {
    terms.iter().map(|term| term.to_lowercase()).collect()
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(rename = "template", default)]
    templates: Vec<TemplateEntry>,
}

#[derive(Debug, Deserialize)]
struct TemplateEntry {
    #[serde(rename = "type")]
    event_type: String,
    title: Option<String>,
    min_importance: f32,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    markers: Vec<String>,
    #[serde(default)]
    clues: Vec<String>,
}

/// Ordered template set. Order is priority.
#[derive(Debug, Clone)]
pub struct EventTemplates {
    templates: Vec<EventTemplate>,
}

impl EventTemplates {
    pub fn new(templates: Vec<EventTemplate>) -> Self {
        Self { templates }
    }

    /// The embedded ten-template set.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_TEMPLATES)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: TemplateFile =
            toml::from_str(raw).map_err(|error| ConfigError::Parse(error.to_string()))?;

        let mut templates = Vec::with_capacity(file.templates.len());
        for entry in file.templates {
            let event_type = EventType::parse(&entry.event_type).ok_or_else(|| {
                ConfigError::Invalid(format!("unknown event type: {}", entry.event_type))
            })?;
            if !(0.0..=1.0).contains(&entry.min_importance) {
                return Err(ConfigError::Invalid(format!(
                    "{event_type} threshold out of range: {}",
                    entry.min_importance
                ))
                .into());
            }
            let to_lower = |terms: Vec<String>| -> Vec<String> {
                terms.into_iter().map(|t| t.to_lowercase()).collect()
            };
            templates.push(EventTemplate {
                event_type,
                title: entry.title.unwrap_or_else(|| event_type.as_str().to_string()),
                keywords: to_lower(entry.keywords),
                markers: to_lower(entry.markers),
                clues: to_lower(entry.clues),
                min_importance: entry.min_importance,
            });
        }
        Ok(Self { templates })
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_cover_every_type_in_priority_order() {
        let templates = EventTemplates::builtin().unwrap();
        let order: Vec<EventType> = templates.iter().map(|t| t.event_type).collect();
        assert_eq!(order, EventType::ALL.to_vec());
        for template in templates.iter() {
            assert!(!template.keywords.is_empty(), "{} has no keywords", template.event_type);
        }
    }

    #[test]
    fn ratio_saturates_at_two_matches() {
        let terms: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        assert_eq!(match_ratio(&terms, "a"), 0.5);
        assert_eq!(match_ratio(&terms, "a b"), 1.0);
        assert_eq!(match_ratio(&terms, "a b c d"), 1.0);
        assert_eq!(match_ratio(&[], "a"), 0.0);

        let single = vec!["x".to_string()];
        assert_eq!(match_ratio(&single, "x"), 1.0);
    }

    #[test]
    fn rejects_unknown_types() {
        let raw = "[[template]]\ntype = \"picnic\"\nmin_importance = 0.5\n";
        assert!(EventTemplates::from_toml(raw).is_err());
    }
}
