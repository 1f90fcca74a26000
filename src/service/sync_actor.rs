//! Coordinator actor for sync runs.
//!
//! Every run — background tick or manual trigger — funnels through this actor
//! so per-connection exclusivity is enforced in one place: a trigger for a
//! connection that is already running is skipped, not queued. Runs themselves
//! execute on detached tasks; any error is caught there, logged, and already
//! recorded in SyncStatus by the orchestrator, so nothing propagates to the
//! caller.

use crate::service::orchestrator::SyncOrchestrator;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum SyncActorMessage {
    /// Start a detached sync run for the connection unless one is in flight.
    TriggerSync { connection_id: i64 },
    // Internal: a detached run finished (either way); release the slot.
    RunCompleted { connection_id: i64 },
}

/// Handle for requesting sync runs. Cloneable and cheap; `trigger_sync` is
/// fire-and-forget — callers learn the outcome by polling SyncStatus.
#[derive(Clone)]
pub struct SyncHandle {
    actor: ActorRef<SyncActorMessage>,
}

impl SyncHandle {
    pub fn trigger_sync(&self, connection_id: i64) {
        if let Err(e) = ractor::cast!(self.actor, SyncActorMessage::TriggerSync { connection_id }) {
            warn!(connection_id, "failed to enqueue sync trigger: {}", e);
        }
    }

    /// Stops the actor; in-flight runs finish on their own tasks.
    pub fn shutdown(&self) {
        self.actor.stop(None);
    }
}

struct SyncActorState {
    orchestrator: Arc<SyncOrchestrator>,
    in_flight: HashSet<i64>,
}

struct SyncActor;

#[ractor::async_trait]
impl Actor for SyncActor {
    type Msg = SyncActorMessage;
    type State = SyncActorState;
    type Arguments = Arc<SyncOrchestrator>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        orchestrator: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(SyncActorState {
            orchestrator,
            in_flight: HashSet::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SyncActorMessage::TriggerSync { connection_id } => {
                if !state.in_flight.insert(connection_id) {
                    info!(connection_id, "sync already in flight; trigger skipped");
                    return Ok(());
                }

                let orchestrator = state.orchestrator.clone();
                let me = myself.clone();
                tokio::spawn(async move {
                    // The orchestrator records the outcome in SyncStatus; the
                    // error here is for operators only and goes no further.
                    if let Err(e) = orchestrator.sync_connection(connection_id).await {
                        warn!(connection_id, error = %e, "detached sync run failed");
                    }
                    let _ = ractor::cast!(me, SyncActorMessage::RunCompleted { connection_id });
                });
                debug!(connection_id, "sync run dispatched");
            }
            SyncActorMessage::RunCompleted { connection_id } => {
                state.in_flight.remove(&connection_id);
            }
        }
        Ok(())
    }
}

/// Spawn the sync coordinator and return a handle to it. The actor is
/// unnamed; a process may host more than one coordinator.
pub async fn spawn(orchestrator: Arc<SyncOrchestrator>) -> SyncHandle {
    let (actor, _jh) = Actor::spawn(None, SyncActor, orchestrator)
        .await
        .expect("failed to spawn sync coordinator actor");
    SyncHandle { actor }
}
