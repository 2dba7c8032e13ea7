//! Postgres-backed store. One row per `(subject_id, stage_key)` and one row
//! per run; claim and finish are conditional updates so transitions stay
//! race-free under concurrent workers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use claimlens_common::{AuditRun, RunStatus, StageKey, StageRecord, StageStatus};

use crate::error::{Result, StoreError};
use crate::store::AuditStore;

pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct StageRow {
    stage_key: String,
    status: String,
    completed_at: Option<DateTime<Utc>>,
    ttl_days: i64,
    data: Option<serde_json::Value>,
    error: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    subject_id: Uuid,
    status: String,
    progress: i32,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    last_heartbeat: DateTime<Utc>,
    error: Option<String>,
}

fn stage_status_str(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "pending",
        StageStatus::Running => "running",
        StageStatus::Done => "done",
        StageStatus::Blocked => "blocked",
        StageStatus::Error => "error",
    }
}

fn parse_stage_status(s: &str) -> StageStatus {
    match s {
        "running" => StageStatus::Running,
        "done" => StageStatus::Done,
        "blocked" => StageStatus::Blocked,
        "error" => StageStatus::Error,
        _ => StageStatus::Pending,
    }
}

impl StageRow {
    fn into_record(self) -> (Option<StageKey>, StageRecord) {
        let key = StageKey::parse(&self.stage_key);
        let record = StageRecord {
            status: parse_stage_status(&self.status),
            completed_at: self.completed_at,
            ttl_days: self.ttl_days,
            data: self.data,
            error: self.error,
        };
        (key, record)
    }
}

impl RunRow {
    fn into_run(self) -> AuditRun {
        AuditRun {
            id: self.id,
            subject_id: self.subject_id,
            status: RunStatus::parse(&self.status).unwrap_or(RunStatus::Error),
            progress: self.progress,
            started_at: self.started_at,
            finished_at: self.finished_at,
            last_heartbeat: self.last_heartbeat,
            error: self.error,
        }
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn stage_map(&self, subject_id: Uuid) -> Result<HashMap<StageKey, StageRecord>> {
        let rows: Vec<StageRow> = sqlx::query_as(
            r#"
            SELECT stage_key, status, completed_at, ttl_days, data, error
            FROM audit_stage_records
            WHERE subject_id = $1
            "#,
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let (key, record) = row.into_record();
                key.map(|k| (k, record))
            })
            .collect())
    }

    async fn get_stage(&self, subject_id: Uuid, key: StageKey) -> Result<Option<StageRecord>> {
        let row: Option<StageRow> = sqlx::query_as(
            r#"
            SELECT stage_key, status, completed_at, ttl_days, data, error
            FROM audit_stage_records
            WHERE subject_id = $1 AND stage_key = $2
            "#,
        )
        .bind(subject_id)
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into_record().1))
    }

    async fn upsert_stage(
        &self,
        subject_id: Uuid,
        key: StageKey,
        record: StageRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_stage_records
                (subject_id, stage_key, status, completed_at, ttl_days, data, error, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            ON CONFLICT (subject_id, stage_key) DO UPDATE SET
                status = EXCLUDED.status,
                completed_at = EXCLUDED.completed_at,
                ttl_days = EXCLUDED.ttl_days,
                data = EXCLUDED.data,
                error = EXCLUDED.error,
                updated_at = now()
            "#,
        )
        .bind(subject_id)
        .bind(key.as_str())
        .bind(stage_status_str(record.status))
        .bind(record.completed_at)
        .bind(record.ttl_days)
        .bind(&record.data)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_run(&self, run: &AuditRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_runs
                (id, subject_id, status, progress, started_at, finished_at, last_heartbeat, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(run.id)
        .bind(run.subject_id)
        .bind(run.status.as_str())
        .bind(run.progress)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.last_heartbeat)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<AuditRun>> {
        let row: Option<RunRow> = sqlx::query_as(
            r#"
            SELECT id, subject_id, status, progress, started_at, finished_at, last_heartbeat, error
            FROM audit_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RunRow::into_run))
    }

    async fn claim_run(&self, run_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE audit_runs
            SET status = 'running', started_at = now(), last_heartbeat = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn heartbeat(&self, run_id: Uuid, progress: i32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE audit_runs
            SET last_heartbeat = now(), progress = GREATEST(progress, $2)
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(progress)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE audit_runs
            SET status = $2, error = $3, finished_at = now(), last_heartbeat = now()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(&error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<AuditRun>> {
        let rows: Vec<RunRow> = sqlx::query_as(
            r#"
            SELECT id, subject_id, status, progress, started_at, finished_at, last_heartbeat, error
            FROM audit_runs
            WHERE status = 'running' AND last_heartbeat < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RunRow::into_run).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_status_text_roundtrip() {
        for status in [
            StageStatus::Pending,
            StageStatus::Running,
            StageStatus::Done,
            StageStatus::Blocked,
            StageStatus::Error,
        ] {
            assert_eq!(parse_stage_status(stage_status_str(status)), status);
        }
    }

    #[test]
    fn unknown_stage_key_rows_are_dropped() {
        let row = StageRow {
            stage_key: "retired_stage".to_string(),
            status: "done".to_string(),
            completed_at: None,
            ttl_days: 30,
            data: None,
            error: None,
        };
        let (key, _) = row.into_record();
        assert!(key.is_none());
    }
}
