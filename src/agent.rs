//! Orchestration: chat workers, the respond gate, context assembly and
//! background upkeep, owned by one [`Engine`].

pub mod channel;
pub mod context;
pub mod decision;
pub mod fallback;
pub mod maintenance;
pub mod repetition;
pub mod router;

pub use channel::{ChatChannel, TurnOutcome};
pub use router::ChatRouter;

use crate::AgentDeps;
use crate::error::Result;
use crate::messaging::TransportDyn;

use std::sync::Arc;
use tokio::sync::watch;

/// Flips the engine's shutdown flag from anywhere.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }
}

/// Root of the running agent: routes transport traffic to chat workers and
/// owns the maintenance tasks. One shutdown flag stops everything.
pub struct Engine {
    deps: AgentDeps,
    transport: Arc<dyn TransportDyn>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Engine {
    pub fn new(deps: AgentDeps, transport: Arc<dyn TransportDyn>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            deps,
            transport,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    pub fn deps(&self) -> &AgentDeps {
        &self.deps
    }

    /// Run until the transport's stream ends or shutdown is requested.
    /// Workers finish their current message; maintenance stops after.
    pub async fn run(self) -> Result<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let maintenance = maintenance::spawn_all(&self.deps, &shutdown_rx);

        tracing::info!(
            transport = self.transport.name(),
            persona = %self.deps.config.persona.name,
            generator = self.deps.generator.as_ref().map(|g| g.model_tag()).unwrap_or("fallback only"),
            "engine started"
        );

        let outcome = match self.transport.start().await {
            Ok(inbound) => {
                ChatRouter::new(self.deps.clone(), self.transport.clone(), shutdown_rx)
                    .run(inbound)
                    .await
            }
            Err(error) => Err(error),
        };

        self.shutdown_tx.send_replace(true);
        for handle in maintenance {
            if let Err(error) = handle.await {
                tracing::error!(%error, "maintenance task panicked");
            }
        }
        if let Err(error) = self.transport.shutdown().await {
            tracing::warn!(%error, "transport shutdown failed");
        }

        tracing::info!("engine stopped");
        outcome
    }
}
