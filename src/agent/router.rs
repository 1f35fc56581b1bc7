//! Inbound routing: one FIFO worker per chat.

use crate::agent::channel::ChatChannel;
use crate::error::{AgentError, Result};
use crate::messaging::{InboundStream, TransportDyn};
use crate::{AgentDeps, ChatId, InboundMessage};

use futures::StreamExt as _;
use rand::SeedableRng as _;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A running chat worker and its inbox.
struct ChatWorker {
    sender: mpsc::UnboundedSender<InboundMessage>,
    handle: JoinHandle<()>,
}

/// Spawns chat workers on first contact and feeds them in delivery order.
///
/// Inboxes never apply backpressure, so a chat stuck on a slow generation
/// only delays its own messages. Workers that stopped after going idle are
/// reaped and respawned on the chat's next message.
pub struct ChatRouter {
    deps: AgentDeps,
    transport: Arc<dyn TransportDyn>,
    shutdown_rx: watch::Receiver<bool>,
    chats: HashMap<ChatId, ChatWorker>,
}

impl ChatRouter {
    pub fn new(
        deps: AgentDeps,
        transport: Arc<dyn TransportDyn>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            deps,
            transport,
            shutdown_rx,
            chats: HashMap::new(),
        }
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    /// Route until the stream ends or shutdown is signalled, then let every
    /// worker finish and wait for it.
    pub async fn run(mut self, mut inbound: InboundStream) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("router stopping on shutdown");
                        break;
                    }
                }
                message = inbound.next() => {
                    let Some(message) = message else {
                        tracing::info!("inbound stream ended");
                        break;
                    };
                    if let Err(error) = self.route(message).await {
                        tracing::error!(%error, "failed to route message");
                    }
                }
            }
        }
        self.join().await;
        Ok(())
    }

    /// Hand `message` to its chat's worker, spawning one if needed.
    pub async fn route(&mut self, message: InboundMessage) -> Result<()> {
        self.reap_finished().await;

        let chat_id = message.chat_id.clone();
        let message = match self.chats.get(&chat_id) {
            Some(worker) => match worker.sender.send(message) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        // The old worker closed its inbox and may still be finishing the
        // last few turns; they must land before the new worker starts.
        if let Some(stale) = self.chats.remove(&chat_id) {
            drop(stale.sender);
            await_worker(&chat_id, stale.handle).await;
        }

        let sender = self.spawn_worker(chat_id.clone());
        sender.send(message).map_err(|_| AgentError::ChannelClosed {
            chat_id: chat_id.to_string(),
        })?;
        Ok(())
    }

    fn spawn_worker(&mut self, chat_id: ChatId) -> mpsc::UnboundedSender<InboundMessage> {
        let rng = match self.deps.config.behavior.seed {
            Some(seed) => StdRng::seed_from_u64(chat_seed(seed, &chat_id)),
            None => StdRng::from_os_rng(),
        };
        let (channel, sender) = ChatChannel::new(
            chat_id.clone(),
            self.deps.clone(),
            self.transport.clone(),
            rng,
            self.shutdown_rx.clone(),
        );
        let handle = tokio::spawn(channel.run());
        self.chats.insert(
            chat_id.clone(),
            ChatWorker {
                sender: sender.clone(),
                handle,
            },
        );
        tracing::debug!(chat_id = %chat_id, chats = self.chats.len(), "spawned chat worker");
        sender
    }

    /// Drop workers that have stopped, along with their cached activity.
    async fn reap_finished(&mut self) {
        let finished: Vec<ChatId> = self
            .chats
            .iter()
            .filter(|(_, worker)| worker.handle.is_finished())
            .map(|(chat_id, _)| chat_id.clone())
            .collect();
        for chat_id in finished {
            if let Some(worker) = self.chats.remove(&chat_id) {
                await_worker(&chat_id, worker.handle).await;
                self.deps.activity.forget(&chat_id).await;
                tracing::debug!(chat_id = %chat_id, "reaped idle chat worker");
            }
        }
    }

    /// Close every inbox and wait for the workers to drain them.
    async fn join(&mut self) {
        for (chat_id, worker) in self.chats.drain() {
            drop(worker.sender);
            await_worker(&chat_id, worker.handle).await;
        }
    }
}

async fn await_worker(chat_id: &ChatId, handle: JoinHandle<()>) {
    if let Err(error) = handle.await {
        tracing::error!(%error, chat_id = %chat_id, "chat worker panicked");
    }
}

/// Per-chat seed so each chat's draws are reproducible on their own.
fn chat_seed(seed: u64, chat_id: &str) -> u64 {
    chat_id
        .bytes()
        .fold(seed, |acc, byte| acc.rotate_left(5) ^ u64::from(byte))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::{GenerationRequest, Generator};
    use crate::test_support::{deps, deps_with};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Null;

    impl crate::messaging::Transport for Null {
        fn name(&self) -> &str {
            "null"
        }

        async fn start(&self) -> Result<InboundStream> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn send(&self, _chat_id: &str, _text: &str) -> Result<String> {
            Ok("sent".into())
        }
    }

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<String>>,
    }

    impl Recording {
        fn sent_to(&self, chat: &str) -> bool {
            self.sent.lock().unwrap().iter().any(|c| c == chat)
        }
    }

    impl crate::messaging::Transport for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn start(&self) -> Result<InboundStream> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn send(&self, chat_id: &str, _text: &str) -> Result<String> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(chat_id.to_string());
            Ok(format!("out-{}", sent.len()))
        }
    }

    /// Hangs on the first "подожди" until released; answers everything else.
    #[derive(Default)]
    struct Stalling {
        release: Notify,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl Generator for Stalling {
        fn model_tag(&self) -> &str {
            "stalling"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>> {
            if request.user_prompt.contains("подожди") && !self.stalled.swap(true, Ordering::SeqCst) {
                self.release.notified().await;
            }
            Ok(Some("ага".into()))
        }
    }

    fn message(chat: &str, id: &str) -> InboundMessage {
        InboundMessage {
            id: id.into(),
            chat_id: ChatId::from(chat),
            author: "alex".into(),
            content: "ну".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn one_worker_per_chat() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut router = ChatRouter::new(deps().await, Arc::new(Null), shutdown_rx);
        router.route(message("a", "1")).await.unwrap();
        router.route(message("a", "2")).await.unwrap();
        router.route(message("b", "3")).await.unwrap();
        assert_eq!(router.chat_count(), 2);
        router.join().await;
    }

    #[tokio::test]
    async fn run_drains_the_stream_in_order() {
        let deps = deps().await;
        let store = deps.store.clone();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = ChatRouter::new(deps, Arc::new(Null), shutdown_rx);
        let base = Utc::now();
        let messages: Vec<InboundMessage> = (0..5)
            .map(|i| {
                let mut m = message("a", &i.to_string());
                m.timestamp = base + chrono::Duration::seconds(i);
                m
            })
            .collect();
        router.run(Box::pin(futures::stream::iter(messages))).await.unwrap();

        let stored = store.recent_messages("a", 10).await.unwrap();
        let ids: Vec<&str> = stored
            .iter()
            .filter(|m| !m.from_agent)
            .map(|m| m.source_id.as_str())
            .collect();
        assert_eq!(ids, ["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn stalled_chat_does_not_hold_up_others() {
        let mut deps = deps().await;
        let generator = Arc::new(Stalling::default());
        deps.generator = Some(generator.clone());
        let transport = Arc::new(Recording::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut router = ChatRouter::new(deps, transport.clone(), shutdown_rx);

        let mut slow = message("a", "0");
        slow.content = "Муся, подожди".into();
        router.route(slow).await.unwrap();
        for i in 1..100 {
            router.route(message("a", &i.to_string())).await.unwrap();
        }
        let mut quick = message("b", "0");
        quick.content = "Муся, привет".into();
        router.route(quick).await.unwrap();

        let answered = tokio::time::timeout(Duration::from_secs(5), async {
            while !transport.sent_to("b") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(answered.is_ok(), "chat b should be answered while chat a is stuck");
        assert!(!transport.sent_to("a"));

        generator.release.notify_one();
        router.join().await;
        assert!(transport.sent_to("a"));
    }

    #[tokio::test]
    async fn idle_workers_are_reaped_and_respawned() {
        let mut config = Config::default();
        config.maintenance.worker_idle_secs = 1;
        let deps = deps_with(config).await;
        let store = deps.store.clone();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut router = ChatRouter::new(deps, Arc::new(Null), shutdown_rx);

        router.route(message("a", "1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        router.reap_finished().await;
        assert_eq!(router.chat_count(), 0);

        let mut later = message("a", "2");
        later.timestamp = Utc::now() + chrono::Duration::seconds(1);
        router.route(later).await.unwrap();
        assert_eq!(router.chat_count(), 1);
        router.join().await;

        let stored = store.recent_messages("a", 10).await.unwrap();
        let ids: Vec<&str> = stored
            .iter()
            .filter(|m| !m.from_agent)
            .map(|m| m.source_id.as_str())
            .collect();
        assert_eq!(ids, ["1", "2"]);
    }

    #[test]
    fn chat_seeds_differ_per_chat() {
        assert_ne!(chat_seed(7, "a"), chat_seed(7, "b"));
        assert_eq!(chat_seed(7, "a"), chat_seed(7, "a"));
    }
}
