//! In-memory store for tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use claimlens_common::{AuditRun, RunStatus, StageKey, StageRecord};

use crate::error::{Result, StoreError};
use crate::store::AuditStore;

#[derive(Default)]
struct Inner {
    stages: HashMap<Uuid, HashMap<StageKey, StageRecord>>,
    runs: HashMap<Uuid, AuditRun>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn stage_map(&self, subject_id: Uuid) -> Result<HashMap<StageKey, StageRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.stages.get(&subject_id).cloned().unwrap_or_default())
    }

    async fn get_stage(&self, subject_id: Uuid, key: StageKey) -> Result<Option<StageRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .stages
            .get(&subject_id)
            .and_then(|map| map.get(&key))
            .cloned())
    }

    async fn upsert_stage(
        &self,
        subject_id: Uuid,
        key: StageKey,
        record: StageRecord,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .stages
            .entry(subject_id)
            .or_default()
            .insert(key, record);
        Ok(())
    }

    async fn create_run(&self, run: &AuditRun) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<AuditRun>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.runs.get(&run_id).cloned())
    }

    async fn claim_run(&self, run_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        if run.status != RunStatus::Pending {
            return Ok(false);
        }
        run.status = RunStatus::Running;
        run.started_at = Utc::now();
        run.last_heartbeat = Utc::now();
        Ok(true)
    }

    async fn heartbeat(&self, run_id: Uuid, progress: i32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        run.last_heartbeat = Utc::now();
        run.progress = run.progress.max(progress);
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        if run.status != RunStatus::Running {
            return Ok(false);
        }
        run.status = status;
        run.error = error;
        run.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuditRun>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Running && r.last_heartbeat < cutoff)
            .cloned()
            .collect())
    }
}
