//! Periodic execution of a [`ScheduledTask`] under a fleet-wide lease.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{DeferReason, RunResult};
use crate::error::ErrorCategory;
use crate::traits::{DistributedLease, ScheduledTask};

/// When and for how long the task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub frequency: Duration,
    /// Run deadline, also the lease TTL.
    pub timeout: Duration,
    pub initial_delay: Duration,
    /// Upper bound of the random delay added to `initial_delay` so a fleet
    /// restarting together does not stampede the remote system.
    pub initial_jitter: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            frequency: Duration::from_secs(60 * 60),
            timeout: Duration::from_secs(5 * 60),
            initial_delay: Duration::from_secs(15),
            initial_jitter: Duration::from_secs(30),
        }
    }
}

impl ScheduleSettings {
    /// Delay before the first tick: `initial_delay` plus a uniform jitter.
    pub fn first_delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.initial_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=jitter_ms))
        };
        self.initial_delay.saturating_add(jitter)
    }
}

/// Spacing between runs after an unsuccessful outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub transient_backoff: Duration,
    pub max_backoff: Duration,
    pub auth_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30 * 60),
            auth_backoff: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay until the next tick.
    ///
    /// Transient remote failures back off exponentially but never wait longer
    /// than the regular period. Credential failures wait at least
    /// `auth_backoff`, since retrying sooner cannot fix a bad token.
    pub fn next_delay(
        &self,
        result: &RunResult,
        consecutive_unsuccessful: u32,
        frequency: Duration,
    ) -> Duration {
        let RunResult::Deferred(reason) = result else {
            return frequency;
        };

        match reason.category() {
            ErrorCategory::Auth => frequency.max(self.auth_backoff),
            ErrorCategory::TransientRemote => {
                let exponent = consecutive_unsuccessful.saturating_sub(1).min(31);
                let backoff = self
                    .transient_backoff
                    .saturating_mul(1u32 << exponent)
                    .min(self.max_backoff)
                    .min(frequency);
                match reason.retry_after() {
                    Some(hint) => backoff.max(hint),
                    None => backoff,
                }
            }
            _ => frequency,
        }
    }
}

/// Drives one task on its schedule until shutdown.
pub struct PeriodicRunner {
    task: Arc<dyn ScheduledTask>,
    lease: Arc<dyn DistributedLease>,
    schedule: ScheduleSettings,
    retry: RetryPolicy,
}

impl PeriodicRunner {
    pub fn new(
        task: Arc<dyn ScheduledTask>,
        lease: Arc<dyn DistributedLease>,
        schedule: ScheduleSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            task,
            lease,
            schedule,
            retry,
        }
    }

    /// Run until `shutdown` fires. An in-flight run is cancelled and allowed
    /// to return before the loop ends.
    pub async fn run(&self, shutdown: CancellationToken) {
        let task_id = self.task.task_id();
        let first = self.schedule.first_delay();
        info!(
            task = %task_id,
            first_run_in_ms = first.as_millis() as u64,
            frequency_secs = self.schedule.frequency.as_secs(),
            "Periodic runner started"
        );

        let mut delay = first;
        let mut consecutive_unsuccessful = 0u32;
        while sleep_unless_shutdown(delay, &shutdown).await {
            delay = match self.tick(&shutdown).await {
                Some(result) => {
                    match &result {
                        RunResult::Success(_) => consecutive_unsuccessful = 0,
                        RunResult::AlreadyRunning => {}
                        RunResult::Deferred(_) | RunResult::Failed(_) => {
                            consecutive_unsuccessful = consecutive_unsuccessful.saturating_add(1);
                        }
                    }
                    self.retry
                        .next_delay(&result, consecutive_unsuccessful, self.schedule.frequency)
                }
                None => self.schedule.frequency,
            };
            debug!(task = %task_id, next_run_in_ms = delay.as_millis() as u64, "Next run scheduled");
        }

        info!(task = %task_id, "Periodic runner stopped");
    }

    /// Execute a single tick. Returns `None` when the lease could not be
    /// taken, in which case the task did not run.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Option<RunResult> {
        let task_id = self.task.task_id();
        let token = match self.lease.try_acquire(&task_id, self.schedule.timeout).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(task = %task_id, "Lease held by another instance, skipping tick");
                return None;
            }
            Err(e) => {
                warn!(task = %task_id, error = %e, "Failed to acquire lease, skipping tick");
                return None;
            }
        };

        let run_cancel = shutdown.child_token();
        let deadline = self.schedule.timeout;
        let watchdog = tokio::spawn({
            let run_cancel = run_cancel.clone();
            async move {
                tokio::time::sleep(deadline).await;
                run_cancel.cancel();
            }
        });

        let result = self.task.run_once(run_cancel.clone()).await;
        watchdog.abort();

        if matches!(result, RunResult::Deferred(DeferReason::Cancelled)) && !shutdown.is_cancelled()
        {
            warn!(
                task = %task_id,
                timeout_secs = deadline.as_secs(),
                "Run exceeded its deadline and was cancelled"
            );
        }

        if let Err(e) = self.lease.release(token).await {
            warn!(task = %task_id, error = %e, "Failed to release lease");
        }

        Some(result)
    }
}

/// Returns `false` if shutdown fired first.
async fn sleep_unless_shutdown(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
