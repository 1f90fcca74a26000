//! Read/write surface for per-connection sync state.
//!
//! Written only by the orchestrator; every other collaborator polls through
//! [`SyncStatusTracker::read`]. Failure detail reaches readers exclusively
//! through the `Failed` state's message, never as a thrown error.

use crate::db::ConnectionDataCache;
use crate::error::MirrorError;
use crate::types::{SyncState, SyncStatus, SyncStep};

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct SyncStatusTracker {
    cache: Arc<dyn ConnectionDataCache>,
}

impl SyncStatusTracker {
    pub fn new(cache: Arc<dyn ConnectionDataCache>) -> Self {
        Self { cache }
    }

    /// Marks a fresh run: `InProgress` at step 1 with a new `started_at`.
    /// A terminal previous state restarts directly; no run queueing.
    pub async fn begin(&self, connection_id: i64) -> Result<(), MirrorError> {
        let status = SyncStatus {
            connection_id,
            state: SyncState::in_progress(SyncStep::Organizations),
            started_at: Some(Utc::now()),
        };
        self.cache.put_sync_status(&status).await
    }

    /// Moves the in-flight run to the given step, keeping `started_at`.
    pub async fn advance(&self, connection_id: i64, step: SyncStep) -> Result<(), MirrorError> {
        let prev = self.cache.get_sync_status(connection_id).await?;
        let next = SyncState::in_progress(step);
        if !prev.state.can_transition_to(&next) {
            warn!(
                connection_id,
                step = step.label(),
                "step advance outside of a running sync"
            );
        }
        self.cache
            .put_sync_status(&SyncStatus {
                connection_id,
                state: next,
                started_at: prev.started_at,
            })
            .await
    }

    pub async fn complete(&self, connection_id: i64) -> Result<(), MirrorError> {
        self.finish(
            connection_id,
            SyncState::Completed {
                completed_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn fail(&self, connection_id: i64, error: &str) -> Result<(), MirrorError> {
        self.finish(
            connection_id,
            SyncState::Failed {
                error: error.to_string(),
                failed_at: Utc::now(),
            },
        )
        .await
    }

    async fn finish(&self, connection_id: i64, state: SyncState) -> Result<(), MirrorError> {
        let prev = self.cache.get_sync_status(connection_id).await?;
        if !prev.state.can_transition_to(&state) {
            warn!(connection_id, "terminal transition outside of a running sync");
        }
        self.cache
            .put_sync_status(&SyncStatus {
                connection_id,
                state,
                started_at: prev.started_at,
            })
            .await
    }

    pub async fn read(&self, connection_id: i64) -> Result<SyncStatus, MirrorError> {
        self.cache.get_sync_status(connection_id).await
    }
}
