//! The respond/suppress gate.
//!
//! Everything here is synchronous; the channel gathers the inputs from the
//! store and hands them over in a [`DecisionInput`].

use crate::activity::ActivityModifiers;
use crate::config::{BehaviorConfig, PersonaConfig, ScheduleConfig};
use crate::emotion::{Emotion, EmotionReading, GroupEmotionalState};
use crate::events::EventType;
use crate::memory::ChatMessage;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

/// Recent messages inspected for distinct authors.
const DISCUSSION_WINDOW: usize = 10;
const DISCUSSION_AUTHORS: usize = 3;

/// Response boost after more than an hour of silence, and damping inside a
/// rapid exchange (under five minutes). Both apply only to chats with an
/// established activity pattern.
const LONG_SILENCE_BOOST: f64 = 1.5;
const RAPID_EXCHANGE_DAMPING: f64 = 0.7;

const TECHNICAL_MARKERS: &[&str] = &[
    "```", "ошибк", "баг", "код", "сервер", "компил", "python", "rust", "javascript", "api",
    "error", "bug", "deploy", "линукс", "linux", "докер", "docker",
];

/// Conversational situation, each with its own response multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Situation {
    Normal,
    Conflict,
    Celebration,
    GroupDiscussion,
    Technical,
    PersonalDistress,
}

impl Situation {
    pub fn multiplier(self) -> f64 {
        match self {
            Situation::Normal => 1.0,
            Situation::Conflict => 0.3,
            Situation::Celebration => 1.5,
            Situation::GroupDiscussion => 0.7,
            Situation::Technical => 1.2,
            Situation::PersonalDistress => 1.8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Situation::Normal => "normal",
            Situation::Conflict => "conflict",
            Situation::Celebration => "celebration",
            Situation::GroupDiscussion => "group_discussion",
            Situation::Technical => "technical",
            Situation::PersonalDistress => "personal_distress",
        }
    }

    /// First matching situation wins: conflict, distress, celebration,
    /// technical, then a busy multi-author discussion.
    pub fn classify(
        content: &str,
        reading: &EmotionReading,
        event: Option<EventType>,
        recent: &[ChatMessage],
        group: Option<&GroupEmotionalState>,
    ) -> Self {
        let hostile = reading.scores.get(Emotion::Hostile);
        if group.is_some_and(GroupEmotionalState::has_active_conflicts)
            || hostile > 0.3
            || event == Some(EventType::Conflict)
        {
            return Situation::Conflict;
        }

        let distress = [Emotion::Sadness, Emotion::Stress, Emotion::Fear]
            .into_iter()
            .map(|e| reading.scores.get(e))
            .fold(0.0f32, f32::max);
        if distress > 0.4 {
            return Situation::PersonalDistress;
        }

        if matches!(event, Some(EventType::Celebration | EventType::Milestone)) {
            return Situation::Celebration;
        }

        let lowered = content.to_lowercase();
        if TECHNICAL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return Situation::Technical;
        }

        let window = &recent[recent.len().saturating_sub(DISCUSSION_WINDOW)..];
        let mut authors: Vec<&str> = Vec::new();
        for message in window.iter().filter(|m| !m.from_agent) {
            if !authors.contains(&message.author.as_str()) {
                authors.push(&message.author);
            }
        }
        if authors.len() >= DISCUSSION_AUTHORS {
            return Situation::GroupDiscussion;
        }

        Situation::Normal
    }
}

/// Why the gate decided what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    OwnMessage,
    CalledABot,
    DirectMention,
    Backoff,
    ProbabilityHit,
    ProbabilityMiss,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::OwnMessage => "own_message",
            DecisionReason::CalledABot => "called_a_bot",
            DecisionReason::DirectMention => "direct_mention",
            DecisionReason::Backoff => "backoff",
            DecisionReason::ProbabilityHit => "probability_hit",
            DecisionReason::ProbabilityMiss => "probability_miss",
        }
    }
}

/// Outcome of the respond gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub respond: bool,
    pub reason: DecisionReason,
    pub situation: Situation,
    /// Final probability compared against the draw; 1.0 for overrides.
    pub probability: f64,
    pub draw: Option<f64>,
    pub delay_multiplier: f64,
}

impl Decision {
    fn fixed(respond: bool, reason: DecisionReason, situation: Situation) -> Self {
        Self {
            respond,
            reason,
            situation,
            probability: if respond { 1.0 } else { 0.0 },
            draw: None,
            delay_multiplier: 1.0,
        }
    }

    /// Send delay for a reply of `reply_chars` characters: one to four
    /// seconds by length, scaled by chat rhythm.
    pub fn reply_delay(&self, reply_chars: usize) -> Duration {
        let base = (1.0 + reply_chars as f64 / 100.0).clamp(1.0, 4.0);
        Duration::from_secs_f64(base * self.delay_multiplier)
    }
}

/// Everything the gate looks at for one message.
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub author: &'a str,
    pub content: &'a str,
    pub now: DateTime<Utc>,
    pub situation: Situation,
    pub activity: ActivityModifiers,
    /// Product of the adaptation layers.
    pub probability_modifier: f64,
    pub last_agent_reply: Option<DateTime<Utc>>,
    /// Human messages since the agent last spoke.
    pub messages_since_reply: usize,
}

/// Identity, schedule and pacing rules, built from config.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    persona: PersonaConfig,
    schedule: ScheduleConfig,
    behavior: BehaviorConfig,
}

impl DecisionPolicy {
    pub fn new(persona: PersonaConfig, schedule: ScheduleConfig, behavior: BehaviorConfig) -> Self {
        let persona = PersonaConfig {
            aliases: persona.aliases.iter().map(|a| a.to_lowercase()).collect(),
            bot_denylist: persona.bot_denylist.iter().map(|p| p.to_lowercase()).collect(),
            ..persona
        };
        Self {
            persona,
            schedule,
            behavior,
        }
    }

    pub fn is_own_author(&self, author: &str) -> bool {
        author.trim().to_lowercase() == self.persona.name.trim().to_lowercase()
    }

    pub fn calls_a_bot(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        self.persona.bot_denylist.iter().any(|phrase| lowered.contains(phrase.as_str()))
    }

    /// An alias as a whole word, or `@alias` / `@name` anywhere.
    pub fn is_direct_mention(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        let name = self.persona.name.to_lowercase();
        if lowered.contains(&format!("@{name}")) {
            return true;
        }
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '@' && c != '_')
            .filter(|w| !w.is_empty())
            .collect();
        self.persona
            .aliases
            .iter()
            .chain(std::iter::once(&name))
            .any(|alias| {
                words.iter().any(|word| {
                    let word = word.trim_start_matches('@');
                    word == alias
                })
            })
    }

    /// Seconds the agent waits after its own reply, scaled inversely with
    /// the activity level.
    pub fn backoff_secs(&self) -> f64 {
        let level = self.behavior.activity_level.max(f64::EPSILON);
        self.behavior.min_reply_interval_secs as f64 * (0.5 / level).clamp(0.2, 5.0)
    }

    /// Hard suppressions and the mention override, which need no store data.
    /// `None` means the remaining gates must run.
    pub fn pre_gate(&self, author: &str, content: &str) -> Option<Decision> {
        if self.is_own_author(author) {
            return Some(Decision::fixed(false, DecisionReason::OwnMessage, Situation::Normal));
        }
        if self.calls_a_bot(content) {
            return Some(Decision::fixed(false, DecisionReason::CalledABot, Situation::Normal));
        }
        if self.is_direct_mention(content) {
            return Some(Decision::fixed(true, DecisionReason::DirectMention, Situation::Normal));
        }
        None
    }

    /// Run every gate in order.
    pub fn decide<R: Rng + ?Sized>(&self, input: &DecisionInput<'_>, rng: &mut R) -> Decision {
        if let Some(mut decision) = self.pre_gate(input.author, input.content) {
            decision.situation = input.situation;
            decision.delay_multiplier = input.activity.delay_multiplier;
            return decision;
        }

        let mut schedule_factor = 1.0;
        if !self.schedule.is_active(input.now) {
            schedule_factor *= self.schedule.off_schedule_dampening;
        }
        if input.activity.established && !input.activity.is_active_time {
            schedule_factor *= 0.8;
        }

        if let Some(last) = input.last_agent_reply {
            let elapsed = (input.now - last).num_milliseconds() as f64 / 1000.0;
            if elapsed < self.backoff_secs()
                && input.messages_since_reply < self.behavior.min_messages_between
            {
                let mut decision =
                    Decision::fixed(false, DecisionReason::Backoff, input.situation);
                decision.delay_multiplier = input.activity.delay_multiplier;
                return decision;
            }
        }

        let mut activity_factor = input.activity.response_multiplier;
        if input.activity.established {
            match input.activity.inactivity_minutes {
                Some(minutes) if minutes > 60 => activity_factor *= LONG_SILENCE_BOOST,
                Some(minutes) if minutes < 5 => activity_factor *= RAPID_EXCHANGE_DAMPING,
                _ => {}
            }
        }

        let probability = (self.behavior.activity_level
            * input.situation.multiplier()
            * input.probability_modifier
            * activity_factor
            * schedule_factor)
            .clamp(0.0, 1.0);
        let draw: f64 = rng.random();
        let respond = draw < probability;

        Decision {
            respond,
            reason: if respond {
                DecisionReason::ProbabilityHit
            } else {
                DecisionReason::ProbabilityMiss
            },
            situation: input.situation,
            probability,
            draw: Some(draw),
            delay_multiplier: input.activity.delay_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::{EmotionScorer, Lexicon};
    use chrono::{Duration as ChronoDuration, TimeZone as _};
    use rand::SeedableRng as _;
    use rand::rngs::StdRng;

    fn policy(level: f64) -> DecisionPolicy {
        let behavior = BehaviorConfig {
            activity_level: level,
            ..BehaviorConfig::default()
        };
        DecisionPolicy::new(PersonaConfig::default(), ScheduleConfig::default(), behavior)
    }

    /// 14:00 Moscow time on a Wednesday.
    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 11, 0, 0).unwrap()
    }

    fn input<'a>(author: &'a str, content: &'a str) -> DecisionInput<'a> {
        DecisionInput {
            author,
            content,
            now: noon(),
            situation: Situation::Normal,
            activity: ActivityModifiers::neutral(None),
            probability_modifier: 1.0,
            last_agent_reply: None,
            messages_since_reply: 0,
        }
    }

    #[test]
    fn own_messages_never_get_a_reply() {
        let policy = policy(1.0);
        let mut rng = StdRng::seed_from_u64(0);
        for text in ["Муся, привет", "@Муся", "что угодно", ""] {
            let decision = policy.decide(&input("Муся", text), &mut rng);
            assert!(!decision.respond);
            assert_eq!(decision.reason, DecisionReason::OwnMessage);
        }
    }

    #[test]
    fn alias_overrides_schedule_and_probability() {
        let policy = DecisionPolicy::new(
            PersonaConfig::default(),
            ScheduleConfig::default(),
            BehaviorConfig {
                activity_level: 0.01,
                ..BehaviorConfig::default()
            },
        );
        let mut late = input("alex", "мусь, ты тут?");
        // 03:00 local, outside the active window, right after a reply.
        late.now = Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap();
        late.last_agent_reply = Some(late.now - ChronoDuration::seconds(5));

        let decision = policy.decide(&late, &mut StdRng::seed_from_u64(0));
        assert!(decision.respond);
        assert_eq!(decision.reason, DecisionReason::DirectMention);
        assert!(policy.is_direct_mention("эй @муся глянь"));
        assert!(!policy.is_direct_mention("мусорка переполнена"));
    }

    #[test]
    fn bot_denylist_suppresses() {
        let decision = policy(1.0).decide(&input("alex", "Да ты бот!"), &mut StdRng::seed_from_u64(0));
        assert!(!decision.respond);
        assert_eq!(decision.reason, DecisionReason::CalledABot);
    }

    #[test]
    fn backoff_needs_both_recent_reply_and_few_messages() {
        let policy = policy(0.5);
        assert_eq!(policy.backoff_secs(), 60.0);

        let mut recent = input("alex", "ну и ладно");
        recent.last_agent_reply = Some(noon() - ChronoDuration::seconds(30));
        recent.messages_since_reply = 1;
        let decision = policy.decide(&recent, &mut StdRng::seed_from_u64(0));
        assert_eq!(decision.reason, DecisionReason::Backoff);

        recent.messages_since_reply = 3;
        let decision = policy.decide(&recent, &mut StdRng::seed_from_u64(0));
        assert_ne!(decision.reason, DecisionReason::Backoff);
    }

    #[test]
    fn base_probability_is_level_times_situation() {
        let policy = policy(0.3);
        let decision = policy.decide(&input("alex", "как дела"), &mut StdRng::seed_from_u64(3));
        assert!((decision.probability - 0.3).abs() < 1e-9);
        let draw = decision.draw.unwrap();
        assert_eq!(decision.respond, draw < 0.3);

        let again = policy.decide(&input("alex", "как дела"), &mut StdRng::seed_from_u64(3));
        assert_eq!(again, decision);

        let mut distress = input("alex", "как дела");
        distress.situation = Situation::PersonalDistress;
        let decision = policy.decide(&distress, &mut StdRng::seed_from_u64(3));
        assert!((decision.probability - 0.54).abs() < 1e-9);
    }

    #[test]
    fn silence_factors_need_an_established_pattern() {
        let policy = policy(0.4);
        let mut quiet = input("alex", "есть кто?");
        quiet.activity = ActivityModifiers::neutral(Some(120));
        let decision = policy.decide(&quiet, &mut StdRng::seed_from_u64(1));
        assert!((decision.probability - 0.4).abs() < 1e-9);

        quiet.activity.established = true;
        let decision = policy.decide(&quiet, &mut StdRng::seed_from_u64(1));
        assert!((decision.probability - 0.4 * LONG_SILENCE_BOOST).abs() < 1e-9);

        quiet.activity.inactivity_minutes = Some(2);
        let decision = policy.decide(&quiet, &mut StdRng::seed_from_u64(1));
        assert!((decision.probability - 0.4 * RAPID_EXCHANGE_DAMPING).abs() < 1e-9);
    }

    #[test]
    fn off_schedule_dampens_instead_of_stopping() {
        let policy = policy(1.0);
        let mut night = input("alex", "не спится");
        night.now = Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).unwrap();
        let decision = policy.decide(&night, &mut StdRng::seed_from_u64(0));
        assert!((decision.probability - 0.3).abs() < 1e-9);
    }

    #[test]
    fn classifies_situations() {
        let scorer = EmotionScorer::new(Lexicon::builtin().unwrap());
        let classify = |text: &str, recent: &[ChatMessage]| {
            Situation::classify(text, &scorer.score(text), None, recent, None)
        };

        assert_eq!(classify("Привет, как дела?", &[]), Situation::Normal);
        assert_eq!(classify("у меня ошибка компиляции в rust", &[]), Situation::Technical);

        let at = noon();
        let busy: Vec<ChatMessage> = ["anna", "boris", "vera"]
            .iter()
            .enumerate()
            .map(|(i, author)| ChatMessage::new("chat", i.to_string(), *author, "ну", at))
            .collect();
        assert_eq!(classify("ну да", &busy), Situation::GroupDiscussion);

        let reading = scorer.score("ура");
        assert_eq!(
            Situation::classify("ура", &reading, Some(EventType::Celebration), &[], None),
            Situation::Celebration
        );
    }

    #[test]
    fn reply_delay_scales_with_length_and_rhythm() {
        let mut decision = Decision::fixed(true, DecisionReason::DirectMention, Situation::Normal);
        assert_eq!(decision.reply_delay(0), Duration::from_secs(1));
        assert_eq!(decision.reply_delay(1000), Duration::from_secs(4));
        decision.delay_multiplier = 0.5;
        assert_eq!(decision.reply_delay(1000), Duration::from_secs(2));
    }
}
