use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::RunResult;
use crate::entity::EntityMutation;
use crate::error::{LeaseError, SourceError, SubmissionError};
use crate::types::RemoteApplicationRecord;

/// Authenticated read access to the remote application inventory.
#[async_trait]
pub trait ApplicationSource: Send + Sync {
    /// Fetch the complete current inventory.
    ///
    /// An empty vector means the remote system genuinely holds no
    /// applications. Failures must be reported as errors, never as an empty
    /// inventory.
    async fn fetch_applications(&self) -> Result<Vec<RemoteApplicationRecord>, SourceError>;
}

/// Connection to the catalog processing engine.
#[async_trait]
pub trait EntityProviderConnection: Send + Sync {
    /// Apply a mutation on behalf of `provider`.
    ///
    /// For a full mutation the catalog removes every entity it previously
    /// attributed to `provider` that is absent from the new set, and leaves
    /// entities of other providers untouched. The call is all-or-nothing.
    async fn apply_mutation(
        &self,
        provider: &str,
        mutation: EntityMutation,
    ) -> Result<(), SubmissionError>;
}

/// Proof of holding a lease, returned to [`DistributedLease::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken {
    pub task_id: String,
    pub holder: String,
}

/// Fleet-wide mutual exclusion for scheduled tasks.
///
/// Exactly one instance may hold the lease for a task id at a time. A lease
/// expires on its own after `ttl` so a crashed holder cannot block the fleet.
#[async_trait]
pub trait DistributedLease: Send + Sync {
    /// Try to take the lease. `Ok(None)` means another holder has it.
    async fn try_acquire(
        &self,
        task_id: &str,
        ttl: Duration,
    ) -> Result<Option<LeaseToken>, LeaseError>;

    async fn release(&self, token: LeaseToken) -> Result<(), LeaseError>;
}

/// A unit of work the periodic runner invokes once per tick.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    /// Stable id, also used as the lease key.
    fn task_id(&self) -> String;

    /// Execute once. Must stop early, without side effects, once `cancel`
    /// fires.
    async fn run_once(&self, cancel: CancellationToken) -> RunResult;
}
