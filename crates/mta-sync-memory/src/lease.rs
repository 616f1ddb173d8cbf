use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use mta_sync_core::{DistributedLease, LeaseError, LeaseToken};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
struct Held {
    holder: String,
    expires_at: Instant,
}

/// Process-local lease table.
///
/// Sufficient for a single instance, or for several runners sharing one
/// `Arc<LocalLease>` in tests. Each acquisition gets a fresh holder id.
#[derive(Debug, Default)]
pub struct LocalLease {
    leases: Mutex<HashMap<String, Held>>,
}

impl LocalLease {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_held(&self, task_id: &str) -> bool {
        self.leases
            .lock()
            .await
            .get(task_id)
            .is_some_and(|held| held.expires_at > Instant::now())
    }
}

#[async_trait]
impl DistributedLease for LocalLease {
    async fn try_acquire(
        &self,
        task_id: &str,
        ttl: Duration,
    ) -> Result<Option<LeaseToken>, LeaseError> {
        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        if leases.get(task_id).is_some_and(|held| held.expires_at > now) {
            return Ok(None);
        }

        let expires_at = now.checked_add(ttl).ok_or_else(|| {
            LeaseError::Backend(format!("lease ttl of {}s is out of range", ttl.as_secs()))
        })?;
        let holder = Uuid::new_v4().to_string();
        leases.insert(
            task_id.to_string(),
            Held {
                holder: holder.clone(),
                expires_at,
            },
        );
        Ok(Some(LeaseToken {
            task_id: task_id.to_string(),
            holder,
        }))
    }

    async fn release(&self, token: LeaseToken) -> Result<(), LeaseError> {
        let mut leases = self.leases.lock().await;
        // A lease that expired and was re-acquired belongs to someone else now.
        if leases
            .get(&token.task_id)
            .is_some_and(|held| held.holder == token.holder)
        {
            leases.remove(&token.task_id);
        }
        Ok(())
    }
}
