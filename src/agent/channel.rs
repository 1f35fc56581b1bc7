//! Chat worker: processes one chat's messages strictly in arrival order.

use crate::activity::ActivityModifiers;
use crate::adaptation::{Directive, EmotionTrend, adapt};
use crate::agent::context::{assemble, recent_window};
use crate::agent::decision::{Decision, DecisionInput, DecisionReason, Situation};
use crate::agent::repetition::{self, REPETITION_WINDOW};
use crate::cache::response_key;
use crate::emotion::profile::MIN_PROFILE_MESSAGES;
use crate::emotion::{EmotionReading, EmotionalProfile, GroupEmotionalState, ScoredMessage};
use crate::events::ChatEvent;
use crate::llm::{GenerationRequest, StyleHints, generate_with_timeout};
use crate::memory::{ChatMessage, extract_mentions, read_with_retry};
use crate::messaging::TransportDyn;
use crate::{AgentDeps, ChatId, InboundMessage};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Preceding readings blended into the current message's score.
const SCORING_CONTEXT: usize = 3;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Already stored under the same transport id; nothing was done.
    Duplicate,
    Suppressed(DecisionReason),
    /// The gate said yes but neither generation nor fallback produced text.
    Silent,
    Replied { message_id: String, text: String },
}

/// Per-chat worker. Owns the chat's inbox and its random draws.
pub struct ChatChannel {
    pub id: ChatId,
    deps: AgentDeps,
    transport: Arc<dyn TransportDyn>,
    message_rx: mpsc::UnboundedReceiver<InboundMessage>,
    shutdown_rx: watch::Receiver<bool>,
    rng: StdRng,
    last_decision: Option<Decision>,
}

impl std::fmt::Debug for ChatChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatChannel")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ChatChannel {
    pub fn new(
        id: ChatId,
        deps: AgentDeps,
        transport: Arc<dyn TransportDyn>,
        rng: StdRng,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, mpsc::UnboundedSender<InboundMessage>) {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let channel = Self {
            id,
            deps,
            transport,
            message_rx,
            shutdown_rx,
            rng,
            last_decision: None,
        };
        (channel, message_tx)
    }

    /// Process the inbox until it closes, stays empty for the idle timeout,
    /// or shutdown is signalled. A message already being handled always
    /// finishes first.
    pub async fn run(mut self) {
        tracing::info!(chat_id = %self.id, "chat worker started");
        let idle = std::time::Duration::from_secs(self.deps.config.maintenance.worker_idle_secs);

        while !*self.shutdown_rx.borrow() {
            tokio::select! {
                biased;
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                message = self.message_rx.recv() => {
                    let Some(message) = message else { break };
                    let outcome = self.handle_message(message).await;
                    tracing::debug!(chat_id = %self.id, ?outcome, "turn finished");
                }
                _ = tokio::time::sleep(idle) => {
                    // Refuse new sends, then finish whatever slipped in.
                    self.message_rx.close();
                    while let Ok(message) = self.message_rx.try_recv() {
                        let outcome = self.handle_message(message).await;
                        tracing::debug!(chat_id = %self.id, ?outcome, "turn finished");
                    }
                    tracing::debug!(chat_id = %self.id, "chat worker idle");
                    break;
                }
            }
        }

        tracing::info!(chat_id = %self.id, "chat worker stopped");
    }

    /// The gate's verdict on the most recent message that reached it.
    pub fn last_decision(&self) -> Option<&Decision> {
        self.last_decision.as_ref()
    }

    /// Remember the message, decide whether to answer, and answer.
    ///
    /// Never fails: every store or generation problem is logged and the turn
    /// continues with what it has, at worst ending in silence.
    #[tracing::instrument(skip(self, message), fields(chat_id = %self.id, message_id = %message.id, author = %message.author))]
    pub async fn handle_message(&mut self, message: InboundMessage) -> TurnOutcome {
        let now = message.timestamp;
        let deps = self.deps.clone();
        let chat_id = self.id.clone();

        let preceding = match recent_window(&deps, &chat_id, deps.config.memory.short_term_window).await {
            Ok(window) => window,
            Err(error) => {
                tracing::warn!(%error, chat_id = %chat_id, "recent window unavailable");
                Arc::new(Vec::new())
            }
        };

        if deps.policy.is_own_author(&message.author) {
            let echo = ChatMessage::new(
                chat_id.as_ref(),
                &message.id,
                &message.author,
                &message.content,
                now,
            )
            .from_agent();
            if let Err(error) = deps.store.save_message(&echo).await {
                tracing::warn!(%error, chat_id = %chat_id, "failed to store own message");
            }
            deps.caches.invalidate_chat(&chat_id);
            return TurnOutcome::Suppressed(DecisionReason::OwnMessage);
        }

        let reading = self.score(&message.content, &preceding);
        let topics = deps.topics.extract(&message.content);
        let mentions = extract_mentions(&message.content);
        let stored = ChatMessage::new(chat_id.as_ref(), &message.id, &message.author, &message.content, now)
            .with_emotion(reading.dominant, reading.intensity)
            .with_topics(topics)
            .with_mentions(mentions);
        let event = deps.detector.detect(&stored, &preceding);
        let score = importance(&stored, &reading, event.as_ref());
        let stored = stored.with_importance(score);

        if self.remember_inbound(&stored, event.as_ref()).await == Some(false) {
            tracing::debug!(chat_id = %chat_id, "duplicate delivery ignored");
            return TurnOutcome::Duplicate;
        }

        let mut window: Vec<ChatMessage> = preceding.as_ref().clone();
        window.push(stored.clone());

        let profile = self.refresh_profile(&message.author, now).await;
        let group = self.group_state(now).await;
        let trend = EmotionTrend::from_messages(&window);
        let directive = adapt(profile.as_ref(), group.as_ref(), trend.as_ref());

        let situation = Situation::classify(
            &message.content,
            &reading,
            event.as_ref().map(|e| e.event_type),
            &window,
            group.as_ref(),
        );
        let decision = self.should_respond(&stored, situation, &directive).await;

        tracing::info!(
            chat_id = %chat_id,
            respond = decision.respond,
            reason = decision.reason.as_str(),
            situation = decision.situation.as_str(),
            probability = decision.probability,
            tone = %directive.tone,
            "response decision"
        );
        self.last_decision = Some(decision.clone());

        if !decision.respond {
            return TurnOutcome::Suppressed(decision.reason);
        }

        let Some(text) = self.generate_response(&stored, &directive, group, now).await else {
            tracing::info!(chat_id = %chat_id, "nothing to say, staying silent");
            return TurnOutcome::Silent;
        };

        let delay = decision.reply_delay(text.chars().count());
        if deps.config.behavior.simulate_typing {
            tokio::time::sleep(delay).await;
        }

        let message_id = match self.transport.send(&chat_id, &text).await {
            Ok(id) => id,
            Err(error) => {
                tracing::error!(%error, chat_id = %chat_id, "failed to send reply");
                return TurnOutcome::Silent;
            }
        };

        let sent_at = now + Duration::from_std(delay).unwrap_or_else(|_| Duration::seconds(1));
        self.remember_reply(&stored, &message_id, &text, sent_at, &window).await;

        TurnOutcome::Replied { message_id, text }
    }

    fn score(&self, content: &str, preceding: &[ChatMessage]) -> EmotionReading {
        let context: Vec<EmotionReading> = preceding
            .iter()
            .rev()
            .filter(|m| !m.from_agent)
            .take(SCORING_CONTEXT)
            .map(|m| self.deps.scorer.score(&m.content))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        self.deps.scorer.score_in_context(content, &context)
    }

    /// Store the inbound message and everything derived from it. Returns
    /// whether the message was new, or `None` if the store was unreachable.
    async fn remember_inbound(&self, message: &ChatMessage, event: Option<&ChatEvent>) -> Option<bool> {
        let deps = &self.deps;
        let chat_id = message.chat_id.as_str();

        let inserted = match deps.store.save_message(message).await {
            Ok(inserted) => Some(inserted),
            Err(error) => {
                tracing::warn!(%error, chat_id, "failed to store inbound message");
                None
            }
        };
        if inserted == Some(false) {
            return inserted;
        }

        if let Err(error) = deps
            .store
            .record_interaction(chat_id, &message.author, message.timestamp, &message.topics, message.emotion)
            .await
        {
            tracing::warn!(%error, chat_id, "failed to record interaction");
        }
        for topic in &message.topics {
            if let Err(error) = deps
                .store
                .upsert_topic(chat_id, topic, &message.author, message.timestamp)
                .await
            {
                tracing::warn!(%error, chat_id, topic, "failed to upsert topic");
            }
        }
        if let Err(error) = deps.events.record_mentions(chat_id, &message.content).await {
            tracing::warn!(%error, chat_id, "failed to count event mentions");
        }
        if let Some(event) = event {
            tracing::info!(chat_id, event_type = %event.event_type, importance = event.importance, "event detected");
            if let Err(error) = deps.events.save(event).await {
                tracing::warn!(%error, chat_id, "failed to store event");
            }
        }

        deps.caches.invalidate_chat(chat_id);
        inserted
    }

    /// Rebuild the author's profile from their recent history.
    async fn refresh_profile(&self, author: &str, now: DateTime<Utc>) -> Option<EmotionalProfile> {
        let deps = &self.deps;
        let chat_id = self.id.as_ref();
        let limit = deps.config.memory.profile_history_limit as i64;

        let history = match read_with_retry("author history", || {
            deps.store.author_messages(chat_id, author, limit)
        })
        .await
        {
            Ok(history) => history,
            Err(error) => {
                tracing::warn!(%error, chat_id, author, "author history unavailable");
                return None;
            }
        };
        if history.len() < MIN_PROFILE_MESSAGES {
            return None;
        }

        let scored: Vec<ScoredMessage> = history
            .iter()
            .map(|m| {
                ScoredMessage::score(&deps.scorer, &m.author, &m.content, m.timestamp)
                    .with_topics(m.topics.clone())
            })
            .collect();
        let relationship = match deps.store.get_relationship(chat_id, author).await {
            Ok(relationship) => relationship.map(|r| r.kind),
            Err(error) => {
                tracing::warn!(%error, chat_id, author, "relationship unavailable");
                None
            }
        };

        let profile = EmotionalProfile::build(author, &scored, relationship, now)?;
        if let Err(error) = deps.store.save_profile(chat_id, &profile).await {
            tracing::warn!(%error, chat_id, author, "failed to store profile");
        }
        Some(profile)
    }

    /// The chat's group state, recomputed at most once per configured interval.
    async fn group_state(&self, now: DateTime<Utc>) -> Option<GroupEmotionalState> {
        let deps = &self.deps;
        let chat_id = self.id.as_ref();
        let memory = deps.config.memory;

        let latest = read_with_retry("group state", || deps.store.latest_group_state(chat_id))
            .await
            .unwrap_or_else(|error| {
                tracing::warn!(%error, chat_id, "latest group state unavailable");
                None
            });
        if let Some(latest) = &latest
            && now - latest.computed_at < Duration::minutes(memory.group_state_interval_mins)
        {
            return Some(latest.clone());
        }

        let window = match recent_window(deps, chat_id, memory.group_window).await {
            Ok(window) => window,
            Err(error) => {
                tracing::warn!(%error, chat_id, "group window unavailable");
                return latest;
            }
        };
        let scored: Vec<ScoredMessage> = window
            .iter()
            .filter(|m| !m.from_agent)
            .map(|m| {
                ScoredMessage::score(&deps.scorer, &m.author, &m.content, m.timestamp)
                    .with_topics(m.topics.clone())
            })
            .collect();
        let profiles = deps.store.load_profiles(chat_id).await.unwrap_or_else(|error| {
            tracing::warn!(%error, chat_id, "profiles unavailable");
            Vec::new()
        });

        match GroupEmotionalState::aggregate(&scored, &profiles, latest.as_ref(), now) {
            Some(state) => {
                if let Err(error) = deps.store.append_group_state(chat_id, &state).await {
                    tracing::warn!(%error, chat_id, "failed to store group state");
                }
                Some(state)
            }
            None => latest,
        }
    }

    /// Gather the store-backed gate inputs and run the decision policy.
    async fn should_respond(
        &mut self,
        message: &ChatMessage,
        situation: Situation,
        directive: &Directive,
    ) -> Decision {
        let deps = self.deps.clone();
        let chat_id = self.id.as_ref();
        let now = message.timestamp;

        let activity = deps.activity.modifiers(chat_id, now).await.unwrap_or_else(|error| {
            tracing::warn!(%error, chat_id, "activity modifiers unavailable");
            ActivityModifiers::neutral(None)
        });

        let last_reply = read_with_retry("last reply", || deps.store.last_agent_message(chat_id))
            .await
            .unwrap_or_else(|error| {
                tracing::warn!(%error, chat_id, "last reply unavailable");
                None
            });
        let mut messages_since_reply = 0;
        if let Some(last) = &last_reply {
            messages_since_reply = deps
                .store
                .count_user_messages_after(chat_id, last.timestamp)
                .await
                .unwrap_or_else(|error| {
                    tracing::warn!(%error, chat_id, "message count unavailable");
                    0
                })
                .max(0) as usize;
        }

        let input = DecisionInput {
            author: &message.author,
            content: &message.content,
            now,
            situation,
            activity,
            probability_modifier: directive.probability_modifier,
            last_agent_reply: last_reply.map(|m| m.timestamp),
            messages_since_reply,
        };
        deps.policy.decide(&input, &mut self.rng)
    }

    /// Produce reply text: generation first, then the static patterns.
    async fn generate_response(
        &mut self,
        message: &ChatMessage,
        directive: &Directive,
        group: Option<GroupEmotionalState>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let deps = self.deps.clone();
        let chat_id = self.id.as_ref();
        let memory = assemble(&deps, message, group, now).await;

        let previous = deps
            .store
            .author_messages(chat_id, &message.author, REPETITION_WINDOW as i64 + 1)
            .await
            .unwrap_or_else(|error| {
                tracing::warn!(%error, chat_id, "author history unavailable for repetition check");
                Vec::new()
            });
        let repeated = repetition::detect(
            &message.content,
            previous
                .iter()
                .filter(|m| m.source_id != message.source_id)
                .map(|m| m.content.as_str()),
        );
        if repeated.count > 0 {
            tracing::debug!(chat_id, count = repeated.count, level = repeated.level.as_str(), "repeated message");
        }

        if let Some(generator) = &deps.generator {
            let key = response_key(&message.content, &memory.fingerprint(), generator.model_tag());
            if let Some(cached) = deps.caches.responses.get(&key) {
                tracing::debug!(chat_id, "reusing cached response");
                return Some(cached);
            }

            let prompts = deps
                .prompts
                .render_system_prompt(directive, &memory, Some(&repeated))
                .and_then(|system| {
                    deps.prompts
                        .render_user_prompt(message, &memory)
                        .map(|user| (system, user))
                });
            match prompts {
                Ok((system_prompt, user_prompt)) => {
                    let request = GenerationRequest {
                        system_prompt,
                        user_prompt,
                        style: StyleHints::from_directive(directive),
                    };
                    let generated =
                        generate_with_timeout(generator.as_ref(), &request, deps.generation_timeout()).await;
                    if let Some(text) = generated {
                        deps.caches.responses.set(key, text.clone(), Some(deps.caches.response_ttl()));
                        return Some(text);
                    }
                }
                Err(error) => tracing::error!(%error, chat_id, "failed to render prompts"),
            }
        }

        deps.fallback.reply(&message.content, &mut self.rng)
    }

    /// Store the sent reply and what follows from it.
    async fn remember_reply(
        &self,
        replying_to: &ChatMessage,
        message_id: &str,
        text: &str,
        sent_at: DateTime<Utc>,
        window: &[ChatMessage],
    ) {
        let deps = &self.deps;
        let chat_id = self.id.as_ref();
        let persona = deps.config.persona.name.as_str();

        let reading = deps.scorer.score(text);
        let topics = deps.topics.extract(text);
        let reply = ChatMessage::new(chat_id, message_id, persona, text, sent_at)
            .from_agent()
            .with_emotion(reading.dominant, reading.intensity)
            .with_topics(topics);

        if let Err(error) = deps.store.save_message(&reply).await {
            tracing::warn!(%error, chat_id, "failed to store reply");
        }
        if let Err(error) = deps
            .store
            .record_interaction(chat_id, &replying_to.author, sent_at, &reply.topics, None)
            .await
        {
            tracing::warn!(%error, chat_id, "failed to record interaction for reply");
        }
        for topic in &reply.topics {
            if let Err(error) = deps.store.upsert_topic(chat_id, topic, persona, sent_at).await {
                tracing::warn!(%error, chat_id, topic, "failed to upsert reply topic");
            }
        }
        if let Some(event) = deps.detector.detect(&reply, window)
            && let Err(error) = deps.events.save(&event).await
        {
            tracing::warn!(%error, chat_id, "failed to store reply event");
        }

        deps.caches.invalidate_chat(chat_id);
    }
}

/// Importance of an inbound message: emotional intensity, questions,
/// mentions, length and any detected event all raise it.
fn importance(message: &ChatMessage, reading: &EmotionReading, event: Option<&ChatEvent>) -> f32 {
    let mut score = ChatMessage::default_importance() + 0.2 * reading.intensity;
    if message.content.contains('?') {
        score += 0.1;
    }
    if !message.mentions.is_empty() {
        score += 0.1;
    }
    if message.content.chars().count() > 100 {
        score += 0.1;
    }
    if let Some(event) = event {
        score += 0.3 * event.importance;
    }
    if !(0.0..=1.0).contains(&score) {
        tracing::warn!(score, source_id = %message.source_id, "importance out of range, clamping");
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::messaging::Transport;
    use crate::test_support::deps_with;
    use chrono::TimeZone as _;
    use rand::SeedableRng as _;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Transport for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn start(&self) -> crate::Result<crate::messaging::InboundStream> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn send(&self, chat_id: &str, text: &str) -> crate::Result<String> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((chat_id.to_string(), text.to_string()));
            Ok(format!("out-{}", sent.len()))
        }
    }

    fn at(minute: i64) -> DateTime<Utc> {
        // 12:00 local at the default +3 offset.
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn inbound(id: &str, author: &str, content: &str, timestamp: DateTime<Utc>) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            chat_id: ChatId::from("family"),
            author: author.to_string(),
            content: content.to_string(),
            timestamp,
        }
    }

    async fn channel(level: f64) -> (ChatChannel, Arc<Recorder>) {
        let mut config = Config::default();
        config.behavior.activity_level = level;
        let deps = deps_with(config).await;
        let recorder = Arc::new(Recorder::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (channel, _tx) = ChatChannel::new(
            ChatId::from("family"),
            deps,
            recorder.clone(),
            StdRng::seed_from_u64(7),
            shutdown_rx,
        );
        (channel, recorder)
    }

    #[tokio::test]
    async fn own_messages_are_stored_but_never_answered() {
        let (mut channel, recorder) = channel(1.0).await;
        let outcome = channel
            .handle_message(inbound("1", "Муся", "Муся, привет!", at(0)))
            .await;
        assert_eq!(outcome, TurnOutcome::Suppressed(DecisionReason::OwnMessage));
        assert!(recorder.sent.lock().unwrap().is_empty());

        let last = channel.deps.store.last_agent_message("family").await.unwrap();
        assert_eq!(last.unwrap().source_id, "1");
    }

    #[tokio::test]
    async fn mention_replies_and_persists_reply() {
        let (mut channel, recorder) = channel(0.01).await;
        let outcome = channel
            .handle_message(inbound("1", "alex", "Муся, привет!", at(0)))
            .await;
        let TurnOutcome::Replied { message_id, .. } = outcome else {
            panic!("expected a reply, got {outcome:?}");
        };
        assert_eq!(message_id, "out-1");
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);

        let history = channel.deps.store.recent_messages("family", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[1].from_agent);
        assert!(history[1].timestamp > history[0].timestamp);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_ignored() {
        let (mut channel, _recorder) = channel(0.01).await;
        channel.handle_message(inbound("1", "alex", "ну и ладно", at(0))).await;
        let outcome = channel.handle_message(inbound("1", "alex", "ну и ладно", at(0))).await;
        assert_eq!(outcome, TurnOutcome::Duplicate);
    }

    #[tokio::test]
    async fn backoff_blocks_quick_follow_ups() {
        let (mut channel, recorder) = channel(1.0).await;
        channel.handle_message(inbound("1", "alex", "Муся, привет!", at(0))).await;
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);

        let outcome = channel
            .handle_message(inbound("2", "alex", "Привет, как дела?", at(0) + Duration::seconds(10)))
            .await;
        assert_eq!(outcome, TurnOutcome::Suppressed(DecisionReason::Backoff));
    }

    #[tokio::test]
    async fn profile_appears_after_five_messages() {
        let (mut channel, _recorder) = channel(0.01).await;
        for i in 0..5 {
            channel
                .handle_message(inbound(&i.to_string(), "vera", "ура, отличный день!", at(i * 30)))
                .await;
        }
        let profile = channel.deps.store.load_profile("family", "vera").await.unwrap();
        assert_eq!(profile.unwrap().message_count, 5);
        assert_eq!(channel.deps.store.group_state_count("family").await.unwrap(), 1);
    }

    #[test]
    fn importance_rises_with_questions_and_events() {
        let plain = ChatMessage::new("c", "1", "alex", "ок", at(0));
        let question = ChatMessage::new("c", "2", "alex", "как ты?", at(0));
        let neutral = EmotionReading::neutral();
        let base = importance(&plain, &neutral, None);
        assert!((base - 0.3).abs() < 1e-6);
        assert!(importance(&question, &neutral, None) > base);

        let mut event = ChatEvent::new("c", crate::events::EventType::Celebration, at(0));
        event.importance = 1.0;
        assert!((importance(&plain, &neutral, Some(&event)) - 0.6).abs() < 1e-6);
    }
}
