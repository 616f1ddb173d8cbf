use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use crate::engine::RunResult;

/// Step of the reconciliation state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    #[default]
    Idle,
    Fetching,
    Mapping,
    Submitting,
    /// Last run deferred or failed; the scheduler decides when to try again.
    ErrorBackoff,
}

impl fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Mapping => write!(f, "mapping"),
            Self::Submitting => write!(f, "submitting"),
            Self::ErrorBackoff => write!(f, "error_backoff"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcomeKind {
    Success,
    Deferred,
    Failed,
    AlreadyRunning,
}

impl fmt::Display for RunOutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Deferred => write!(f, "deferred"),
            Self::Failed => write!(f, "failed"),
            Self::AlreadyRunning => write!(f, "already_running"),
        }
    }
}

/// In-memory bookkeeping for one provider instance.
///
/// Observability only: nothing in a run reads it back to decide what to
/// submit, so losing it on restart is harmless.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderRunState {
    pub phase: EnginePhase,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success_at: Option<OffsetDateTime>,
    pub last_entity_names: BTreeSet<String>,
    pub last_error: Option<String>,
    pub last_outcome: Option<RunOutcomeKind>,
    pub last_mapping_errors: usize,
    pub runs_total: u64,
    pub consecutive_unsuccessful: u32,
}

impl ProviderRunState {
    pub(crate) fn record(&mut self, result: &RunResult, now: OffsetDateTime) {
        // An overlapping invocation never touched the run it collided with.
        if matches!(result, RunResult::AlreadyRunning) {
            return;
        }

        self.runs_total += 1;
        self.last_outcome = Some(result.kind());

        match result {
            RunResult::Success(report) => {
                self.phase = EnginePhase::Idle;
                self.last_success_at = Some(now);
                self.last_entity_names = report.entity_names.clone();
                self.last_mapping_errors = report.mapping_errors.len();
                self.last_error = None;
                self.consecutive_unsuccessful = 0;
            }
            RunResult::Deferred(reason) => {
                self.phase = EnginePhase::ErrorBackoff;
                self.last_error = Some(reason.to_string());
                self.consecutive_unsuccessful += 1;
            }
            RunResult::Failed(error) => {
                self.phase = EnginePhase::ErrorBackoff;
                self.last_error = Some(error.to_string());
                self.consecutive_unsuccessful += 1;
            }
            RunResult::AlreadyRunning => {}
        }
    }
}
