//! Per-connection sync progress as a tagged state machine.
//!
//! `NotStarted -> InProgress -> {Completed, Failed}`; starting a new run moves a
//! terminal state straight back to `InProgress`. Only the orchestrator writes
//! this; everything else polls it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three provider-facing steps of one sync run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Organizations,
    Networks,
    Devices,
}

impl SyncStep {
    pub const TOTAL: u8 = 3;

    pub fn number(self) -> u8 {
        match self {
            SyncStep::Organizations => 1,
            SyncStep::Networks => 2,
            SyncStep::Devices => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SyncStep::Organizations => "fetching organizations",
            SyncStep::Networks => "fetching networks",
            SyncStep::Devices => "fetching devices",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    NotStarted,
    InProgress {
        current_step: String,
        step_number: u8,
        total_steps: u8,
    },
    Completed {
        completed_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl SyncState {
    pub fn in_progress(step: SyncStep) -> Self {
        SyncState::InProgress {
            current_step: step.label().to_string(),
            step_number: step.number(),
            total_steps: SyncStep::TOTAL,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Completed { .. } | SyncState::Failed { .. })
    }

    /// Legal edges of the state machine. A new run may leave any state except
    /// an already-running one.
    pub fn can_transition_to(&self, next: &SyncState) -> bool {
        match (self, next) {
            // Step advance within a run, or a fresh run from any other state.
            (_, SyncState::InProgress { .. }) => true,
            (SyncState::InProgress { .. }, s) if s.is_terminal() => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub connection_id: i64,
    pub state: SyncState,
    /// When the most recent run began; survives into the terminal states.
    pub started_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    pub fn not_started(connection_id: i64) -> Self {
        Self {
            connection_id,
            state: SyncState::NotStarted,
            started_at: None,
        }
    }
}
