//! Matches a message and its preceding window against the event templates.

use crate::events::templates::{EventTemplates, match_ratio, matched_terms};
use crate::events::types::ChatEvent;
use crate::memory::ChatMessage;

/// Preceding messages considered alongside the current one.
pub const PRECEDING_WINDOW: usize = 3;

const KEYWORD_WEIGHT: f32 = 0.4;
const MARKER_WEIGHT: f32 = 0.3;
const CLUE_WEIGHT: f32 = 0.2;
const CONTEXT_WEIGHT: f32 = 0.1;

/// Template-driven event detector.
#[derive(Debug, Clone)]
pub struct EventDetector {
    templates: EventTemplates,
}

impl EventDetector {
    pub fn new(templates: EventTemplates) -> Self {
        Self { templates }
    }

    /// Detect at most one event for `message`.
    ///
    /// `preceding` is chronological; only its last [`PRECEDING_WINDOW`]
    /// entries are used. Templates are tried in order and the first whose
    /// score reaches its threshold wins, with the score as importance.
    pub fn detect(&self, message: &ChatMessage, preceding: &[ChatMessage]) -> Option<ChatEvent> {
        let window = &preceding[preceding.len().saturating_sub(PRECEDING_WINDOW)..];
        let lowered = message.content.to_lowercase();
        let context = window
            .iter()
            .map(|m| m.content.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n");

        for template in self.templates.iter() {
            let score = KEYWORD_WEIGHT * match_ratio(&template.keywords, &lowered)
                + MARKER_WEIGHT * match_ratio(&template.markers, &lowered)
                + CLUE_WEIGHT * match_ratio(&template.clues, &lowered)
                + CONTEXT_WEIGHT * match_ratio(&template.keywords, &context);

            if score < template.min_importance {
                continue;
            }

            let mut event = ChatEvent::new(&message.chat_id, template.event_type, message.timestamp);
            event.importance = score.clamp(0.0, 1.0);
            event.title = format!("{}: {}", template.title, excerpt(&message.content, 60));
            event.description = excerpt(&message.content, 280);
            event.participants = participants(message, window);
            event.tags = matched_terms(&template.keywords, &lowered)
                .into_iter()
                .map(str::to_string)
                .collect();
            event.related_message_ids = window
                .iter()
                .map(|m| m.source_id.clone())
                .chain(std::iter::once(message.source_id.clone()))
                .collect();

            tracing::debug!(
                chat_id = %message.chat_id,
                event_type = %template.event_type,
                score,
                "event detected"
            );
            return Some(event);
        }
        None
    }
}

/// Author, then mentions, then preceding authors; deduplicated.
fn participants(message: &ChatMessage, window: &[ChatMessage]) -> Vec<String> {
    let mut participants = vec![message.author.clone()];
    let others = message
        .mentions
        .iter()
        .cloned()
        .chain(window.iter().filter(|m| !m.from_agent).map(|m| m.author.clone()));
    for name in others {
        let lowered = name.to_lowercase();
        if !participants.iter().any(|p| p.to_lowercase() == lowered) {
            participants.push(name);
        }
    }
    participants
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::events::templates::EventTemplate;
    use chrono::{Duration, TimeZone as _, Utc};

    fn detector() -> EventDetector {
        EventDetector::new(EventTemplates::builtin().unwrap())
    }

    fn message(id: &str, author: &str, text: &str) -> ChatMessage {
        let base = Utc.with_ymd_and_hms(2024, 9, 1, 15, 0, 0).unwrap();
        ChatMessage::new("chat", id, author, text, base + Duration::minutes(id.len() as i64))
    }

    #[test]
    fn birthday_greeting_is_a_celebration() {
        let event = detector()
            .detect(&message("1", "vera", "Поздравляю с днем рождения! 🎂🎉"), &[])
            .expect("celebration expected");
        assert_eq!(event.event_type, EventType::Celebration);
        assert!(event.importance >= 0.4);
        assert!(event.is_recurring);
        assert_eq!(event.participants, vec!["vera".to_string()]);
        assert_eq!(event.related_message_ids, vec!["1".to_string()]);
        assert!(event.tags.contains(&"поздравл".to_string()));
    }

    #[test]
    fn small_talk_is_not_an_event() {
        assert!(detector().detect(&message("1", "alex", "Привет, как дела?"), &[]).is_none());
        assert!(detector().detect(&message("1", "alex", ""), &[]).is_none());
    }

    #[test]
    fn participants_include_mentions_and_preceding_authors() {
        let preceding = vec![
            message("a", "boris", "ну что там"),
            message("bb", "anna", "ждем новостей"),
        ];
        let current = message("ccc", "vera", "Мы решили: договорились, встречаемся в субботу ✅")
            .with_mentions(vec!["kit".to_string()]);
        let event = detector().detect(&current, &preceding).expect("decision expected");
        assert_eq!(event.event_type, EventType::Decision);
        assert!(!event.is_recurring);
        assert_eq!(
            event.participants,
            vec!["vera".to_string(), "kit".to_string(), "boris".to_string(), "anna".to_string()]
        );
        assert_eq!(event.related_message_ids.len(), 3);
    }

    #[test]
    fn first_qualifying_template_wins() {
        let templates = EventTemplates::new(vec![
            EventTemplate::new(EventType::Milestone, 0.3).with_keywords(&["ура"]),
            EventTemplate::new(EventType::Celebration, 0.3).with_keywords(&["ура"]),
        ]);
        let event = EventDetector::new(templates)
            .detect(&message("1", "alex", "Ура"), &[])
            .unwrap();
        assert_eq!(event.event_type, EventType::Milestone);
    }

    #[test]
    fn preceding_window_contributes_context() {
        let templates = EventTemplates::new(vec![
            EventTemplate::new(EventType::Tradition, 0.35)
                .with_keywords(&["пятниц"])
                .with_markers(&["🍻"]),
        ]);
        let detector = EventDetector::new(templates);
        let current = message("2", "alex", "🍻");
        assert!(detector.detect(&current, &[]).is_none());

        let preceding = vec![message("1", "vera", "пятница!")];
        let event = detector.detect(&current, &preceding).unwrap();
        assert!((event.importance - 0.4).abs() < 1e-6);
    }
}
