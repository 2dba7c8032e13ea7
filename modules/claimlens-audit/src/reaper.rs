//! Stale-run reaper.
//!
//! A worker that dies mid-run leaves its run `running` with a frozen
//! heartbeat. The reaper finalizes those as `timeout` through the same
//! write-once conditional update the supervisor uses, so a run that finishes
//! in the race window keeps its real terminal state. Cached stage records
//! survive; a fresh run picks up where the dead one left off.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use claimlens_common::RunStatus;
use claimlens_store::AuditStore;

pub struct Reaper {
    store: Arc<dyn AuditStore>,
    stale_after: Duration,
}

impl Reaper {
    pub fn new(store: Arc<dyn AuditStore>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    /// Finalize every run whose heartbeat went stale. Returns how many were
    /// timed out.
    pub async fn sweep(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.stale_after;
        let stale = self.store.stale_runs(cutoff).await?;

        let mut reaped = 0u64;
        for run in stale {
            let message = format!(
                "heartbeat stalled at {} with progress {}",
                run.last_heartbeat.format("%Y-%m-%dT%H:%M:%S"),
                run.progress
            );
            match self
                .store
                .finish_run(run.id, RunStatus::Timeout, Some(message))
                .await
            {
                Ok(true) => {
                    warn!(run_id = %run.id, subject = %run.subject_id, "Reaped stalled run");
                    reaped += 1;
                }
                Ok(false) => {
                    // finished between the scan and the update — leave it
                }
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "Failed to reap run");
                }
            }
        }

        info!(reaped, "Reaper sweep complete");
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimlens_common::AuditRun;
    use claimlens_store::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_times_out_only_stalled_runs() {
        let store = Arc::new(MemoryStore::new());
        let run = AuditRun::new(Uuid::new_v4());
        store.create_run(&run).await.unwrap();
        store.claim_run(run.id).await.unwrap();

        // Heartbeat is recent, nothing to reap.
        let reaper = Reaper::new(store.clone(), Duration::minutes(10));
        assert_eq!(reaper.sweep().await.unwrap(), 0);

        // With a zero threshold the same run is stalled.
        let eager = Reaper::new(store.clone(), Duration::seconds(-1));
        assert_eq!(eager.sweep().await.unwrap(), 1);

        let stored = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Timeout);
        assert!(stored.error.unwrap().contains("heartbeat stalled"));
    }

    #[tokio::test]
    async fn sweep_skips_pending_and_finished_runs() {
        let store = Arc::new(MemoryStore::new());

        let pending = AuditRun::new(Uuid::new_v4());
        store.create_run(&pending).await.unwrap();

        let finished = AuditRun::new(Uuid::new_v4());
        store.create_run(&finished).await.unwrap();
        store.claim_run(finished.id).await.unwrap();
        store
            .finish_run(finished.id, RunStatus::Done, None)
            .await
            .unwrap();

        let reaper = Reaper::new(store.clone(), Duration::seconds(-1));
        assert_eq!(reaper.sweep().await.unwrap(), 0);
    }
}
