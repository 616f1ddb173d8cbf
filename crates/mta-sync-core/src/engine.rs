//! The reconciliation engine.
//!
//! One run walks `Idle → Fetching → Mapping → Submitting → Idle` and submits
//! exactly one full mutation. Anything that makes the fetched inventory
//! untrustworthy (remote errors, timeouts, cancellation, every record
//! unmappable) defers the run instead, leaving the catalog as it was.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::entity::EntityMutation;
use crate::error::{ErrorCategory, MappingError, SourceError, SubmissionError};
use crate::mapper::EntityMapper;
use crate::state::{EnginePhase, ProviderRunState, RunOutcomeKind};
use crate::traits::{ApplicationSource, EntityProviderConnection, ScheduledTask};
use crate::types::RemoteApplicationRecord;

/// Step-level bounds for the two network calls of a run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub fetch_timeout: Duration,
    pub submit_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a run submitted nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferReason {
    /// The remote inventory could not be read.
    Source(SourceError),
    /// Records were fetched but none of them could be mapped.
    AllRecordsUnmappable {
        records: usize,
        errors: Vec<MappingError>,
    },
    /// The catalog did not answer within the submit timeout. Whether the
    /// mutation landed is unknown; the next full mutation settles it.
    SubmissionTimeout,
    /// The catalog could not be reached; nothing was applied.
    CatalogUnavailable(String),
    /// The host cancelled the run or its deadline passed.
    Cancelled,
}

impl DeferReason {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Source(e) => e.category(),
            Self::AllRecordsUnmappable { .. } => ErrorCategory::InvariantViolation,
            Self::SubmissionTimeout | Self::CatalogUnavailable(_) => {
                ErrorCategory::TransientRemote
            }
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Source(e) => e.retry_after(),
            _ => None,
        }
    }
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(e) => write!(f, "{e}"),
            Self::AllRecordsUnmappable { records, .. } => {
                write!(f, "all {records} fetched records failed mapping")
            }
            Self::SubmissionTimeout => write!(f, "catalog submission timed out"),
            Self::CatalogUnavailable(msg) => write!(f, "catalog unavailable: {msg}"),
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Summary of a run that submitted its mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub records_fetched: usize,
    pub entity_names: BTreeSet<String>,
    pub mapping_errors: Vec<MappingError>,
    /// Entity names produced by more than one record in this run.
    pub conflicts: Vec<String>,
}

/// Outcome handed back to the scheduler. Runs never panic or return `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Success(RunReport),
    Deferred(DeferReason),
    Failed(SubmissionError),
    /// Another run of this engine was still in progress.
    AlreadyRunning,
}

impl RunResult {
    pub fn kind(&self) -> RunOutcomeKind {
        match self {
            Self::Success(_) => RunOutcomeKind::Success,
            Self::Deferred(_) => RunOutcomeKind::Deferred,
            Self::Failed(_) => RunOutcomeKind::Failed,
            Self::AlreadyRunning => RunOutcomeKind::AlreadyRunning,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::Success(report) => Some(report),
            _ => None,
        }
    }
}

/// Pulls the MTA inventory and reconciles it into the catalog.
pub struct ReconciliationEngine<S, C>
where
    S: ApplicationSource,
    C: EntityProviderConnection,
{
    provider_name: String,
    source: Arc<S>,
    connection: Arc<C>,
    mapper: EntityMapper,
    options: EngineOptions,
    run_guard: Mutex<()>,
    state: RwLock<ProviderRunState>,
}

impl<S, C> ReconciliationEngine<S, C>
where
    S: ApplicationSource,
    C: EntityProviderConnection,
{
    pub fn new(
        source: Arc<S>,
        connection: Arc<C>,
        mapper: EntityMapper,
        options: EngineOptions,
    ) -> Self {
        Self {
            provider_name: provider_name_for(&mapper.options().provider_id),
            source,
            connection,
            mapper,
            options,
            run_guard: Mutex::new(()),
            state: RwLock::new(ProviderRunState::default()),
        }
    }

    /// Identity string the catalog uses to scope this provider's entities.
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Snapshot of the run bookkeeping.
    pub async fn state(&self) -> ProviderRunState {
        self.state.read().await.clone()
    }

    /// Execute one reconciliation run.
    pub async fn run(&self) -> RunResult {
        self.run_cancellable(&CancellationToken::new()).await
    }

    /// Execute one run that stops, without submitting, once `cancel` fires.
    pub async fn run_cancellable(&self, cancel: &CancellationToken) -> RunResult {
        let Ok(_guard) = self.run_guard.try_lock() else {
            let phase = self.state.read().await.phase;
            warn!(
                provider = %self.provider_name,
                %phase,
                "Reconciliation already in progress, rejecting overlapping run"
            );
            return RunResult::AlreadyRunning;
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile_run", provider = %self.provider_name, %run_id);
        async {
            let result = self.execute(run_id, cancel).await;
            self.log_outcome(&result);
            self.state
                .write()
                .await
                .record(&result, OffsetDateTime::now_utc());
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, run_id: Uuid, cancel: &CancellationToken) -> RunResult {
        self.enter_phase(EnginePhase::Fetching).await;
        let records = match self.fetch(cancel).await {
            Ok(records) => records,
            Err(reason) => return RunResult::Deferred(reason),
        };

        self.enter_phase(EnginePhase::Mapping).await;
        let batch = self.mapper.map_batch(&records);
        for err in &batch.errors {
            warn!(
                record_id = err.record_id.as_deref().unwrap_or("<unknown>"),
                reason = %err.reason,
                "Skipping application record"
            );
        }
        for name in &batch.conflicts {
            warn!(entity = %name, "Duplicate application identifier, keeping last record");
        }

        // A non-empty inventory that maps to nothing means we could not
        // understand the source, not that it is empty.
        if !records.is_empty() && batch.entities.is_empty() {
            return RunResult::Deferred(DeferReason::AllRecordsUnmappable {
                records: records.len(),
                errors: batch.errors,
            });
        }
        if cancel.is_cancelled() {
            return RunResult::Deferred(DeferReason::Cancelled);
        }

        self.enter_phase(EnginePhase::Submitting).await;
        let entity_names = batch.entity_names();
        let mutation = EntityMutation::full(batch.entities);
        if let Err(result) = self.submit(cancel, mutation).await {
            return result;
        }

        RunResult::Success(RunReport {
            run_id,
            records_fetched: records.len(),
            entity_names,
            mapping_errors: batch.errors,
            conflicts: batch.conflicts,
        })
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteApplicationRecord>, DeferReason> {
        let fetch_timeout = self.options.fetch_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DeferReason::Cancelled),
            fetched = timeout(fetch_timeout, self.source.fetch_applications()) => match fetched {
                Ok(Ok(records)) => {
                    debug!(records = records.len(), "Fetched application inventory");
                    Ok(records)
                }
                Ok(Err(e)) => Err(DeferReason::Source(e)),
                Err(_) => Err(DeferReason::Source(SourceError::unreachable(format!(
                    "fetch timed out after {}ms",
                    fetch_timeout.as_millis()
                )))),
            },
        }
    }

    async fn submit(
        &self,
        cancel: &CancellationToken,
        mutation: EntityMutation,
    ) -> Result<(), RunResult> {
        let submit_timeout = self.options.submit_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunResult::Deferred(DeferReason::Cancelled)),
            applied = timeout(
                submit_timeout,
                self.connection.apply_mutation(&self.provider_name, mutation),
            ) => match applied {
                Ok(Ok(())) => Ok(()),
                Ok(Err(SubmissionError::Timeout)) | Err(_) => {
                    Err(RunResult::Deferred(DeferReason::SubmissionTimeout))
                }
                Ok(Err(SubmissionError::Unavailable(msg))) => {
                    Err(RunResult::Deferred(DeferReason::CatalogUnavailable(msg)))
                }
                Ok(Err(e)) => Err(RunResult::Failed(e)),
            },
        }
    }

    async fn enter_phase(&self, phase: EnginePhase) {
        debug!(%phase, "Entering phase");
        self.state.write().await.phase = phase;
    }

    fn log_outcome(&self, result: &RunResult) {
        match result {
            RunResult::Success(report) => info!(
                records = report.records_fetched,
                entities = report.entity_names.len(),
                mapping_errors = report.mapping_errors.len(),
                conflicts = report.conflicts.len(),
                "Reconciliation run completed"
            ),
            RunResult::Deferred(reason) => warn!(
                reason = %reason,
                category = %reason.category(),
                "Reconciliation run deferred, catalog left untouched"
            ),
            RunResult::Failed(e) => error!(
                error = %e,
                category = %e.category(),
                "Reconciliation run failed"
            ),
            RunResult::AlreadyRunning => {}
        }
    }
}

#[async_trait]
impl<S, C> ScheduledTask for ReconciliationEngine<S, C>
where
    S: ApplicationSource + 'static,
    C: EntityProviderConnection + 'static,
{
    fn task_id(&self) -> String {
        format!("{}:refresh", self.provider_name)
    }

    async fn run_once(&self, cancel: CancellationToken) -> RunResult {
        self.run_cancellable(&cancel).await
    }
}

/// Provider identity string for a configured provider id.
pub fn provider_name_for(provider_id: &str) -> String {
    format!("MtaEntityProvider:{provider_id}")
}
