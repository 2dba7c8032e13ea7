//! Store trait for audit runs and per-stage records.
//!
//! Stage records are keyed by `(subject_id, stage_key)` — writing one stage
//! never touches another stage's cached result. Run transitions that must be
//! race-free (claiming, finishing) are conditional updates, not read-check-write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use claimlens_common::{AuditRun, RunStatus, StageKey, StageRecord};

use crate::error::Result;

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// All stage records for a subject.
    async fn stage_map(&self, subject_id: Uuid) -> Result<HashMap<StageKey, StageRecord>>;

    async fn get_stage(&self, subject_id: Uuid, key: StageKey) -> Result<Option<StageRecord>>;

    /// Insert or replace a single stage record. Other stages are untouched.
    async fn upsert_stage(
        &self,
        subject_id: Uuid,
        key: StageKey,
        record: StageRecord,
    ) -> Result<()>;

    async fn create_run(&self, run: &AuditRun) -> Result<()>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<AuditRun>>;

    /// Atomic pending → running transition. Returns false when another worker
    /// already claimed the run.
    async fn claim_run(&self, run_id: Uuid) -> Result<bool>;

    /// Touch the heartbeat and raise progress. Progress never decreases.
    async fn heartbeat(&self, run_id: Uuid, progress: i32) -> Result<()>;

    /// Write-once terminal transition from running. Returns false when the
    /// run was no longer running (already finalized elsewhere).
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<bool>;

    /// Runs still marked running whose heartbeat predates `cutoff`.
    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuditRun>>;
}
