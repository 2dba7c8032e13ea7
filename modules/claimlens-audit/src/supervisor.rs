//! Run supervisor: drives the four stages in order, persists each stage
//! record as it completes, and finalizes the run exactly once.
//!
//! Stage records are cached per subject and reused while fresh, so a new run
//! only executes what has expired — and a run blocked at Stage 4 can be
//! retried later without repeating Stages 1–3.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use claimlens_common::{
    AuditRun, ClaimLensError, ClaimProfile, DiscrepancyReport, RunStatus, SignalDigest, StageKey,
    StageRecord, Subject, TruthIndexReport,
};
use claimlens_store::{AuditStore, StoreError};

use crate::claims::extract_claims;
use crate::discrepancy::analyze_discrepancies;
use crate::policy::NormalizerPolicy;
use crate::report::compose_report;
use crate::signal::gather_signal;
use crate::traits::Generator;

// Fixed progress milestones, one per supervisor step.
pub const PROGRESS_PICKUP: i32 = 10;
pub const PROGRESS_CLAIMS_DONE: i32 = 25;
pub const PROGRESS_SIGNAL_START: i32 = 35;
pub const PROGRESS_SIGNAL_DONE: i32 = 55;
pub const PROGRESS_NORMALIZED: i32 = 70;
pub const PROGRESS_SCORED: i32 = 85;
pub const PROGRESS_INDEXED: i32 = 92;
pub const PROGRESS_COMPLETE: i32 = 100;

/// What a finished (or failed) run looked like.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub truth_index: Option<i64>,
    pub error: Option<String>,
}

pub struct RunSupervisor {
    store: Arc<dyn AuditStore>,
    generator: Arc<dyn Generator>,
    policy: NormalizerPolicy,
}

fn store_err(e: StoreError) -> ClaimLensError {
    ClaimLensError::Store(e.to_string())
}

impl RunSupervisor {
    pub fn new(store: Arc<dyn AuditStore>, generator: Arc<dyn Generator>) -> Self {
        Self {
            store,
            generator,
            policy: NormalizerPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: NormalizerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register a new pending run for a subject.
    pub async fn start_audit(&self, subject: &Subject) -> Result<AuditRun, ClaimLensError> {
        let run = AuditRun::new(subject.id);
        self.store.create_run(&run).await.map_err(store_err)?;
        info!(run_id = %run.id, subject = %subject.id, "Audit run created");
        Ok(run)
    }

    /// Execute a run to a terminal state. Pipeline failures finalize the run
    /// and come back inside the outcome; `Err` is reserved for infrastructure
    /// problems and losing the pickup race.
    pub async fn run(
        &self,
        run_id: Uuid,
        subject: &Subject,
    ) -> Result<RunOutcome, ClaimLensError> {
        let run = self
            .store
            .get_run(run_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| ClaimLensError::Validation(format!("run {run_id} not found")))?;

        match run.status {
            RunStatus::Pending => {
                if !self.store.claim_run(run_id).await.map_err(store_err)? {
                    info!(run_id = %run_id, "Lost pickup race, another worker owns this run");
                    return Err(ClaimLensError::RunClaimConflict);
                }
            }
            RunStatus::Running => {
                info!(run_id = %run_id, "Resuming a running audit");
            }
            other => {
                return Err(ClaimLensError::Validation(format!(
                    "run {run_id} already finalized as {other}"
                )));
            }
        }

        self.heartbeat(run_id, PROGRESS_PICKUP).await?;

        // --- Stage 1: claim extraction (cannot fail) ---
        let claims = match self
            .fresh_stage::<ClaimProfile>(subject.id, StageKey::ClaimProfile)
            .await?
        {
            Some(profile) => profile.claim_profile,
            None => {
                let profile = ClaimProfile {
                    claim_profile: extract_claims(subject),
                };
                self.persist_done(subject.id, StageKey::ClaimProfile, &profile)
                    .await?;
                profile.claim_profile
            }
        };
        self.heartbeat(run_id, PROGRESS_CLAIMS_DONE).await?;

        // --- Stage 2: community signal (degrades, never fatal) ---
        self.heartbeat(run_id, PROGRESS_SIGNAL_START).await?;
        let digest = match self
            .fresh_stage::<SignalDigest>(subject.id, StageKey::CommunitySignal)
            .await?
        {
            Some(digest) => digest,
            None => {
                let digest = gather_signal(self.generator.as_ref(), subject, &claims).await;
                self.persist_done(subject.id, StageKey::CommunitySignal, &digest)
                    .await?;
                digest
            }
        };
        self.heartbeat(run_id, PROGRESS_SIGNAL_DONE).await?;

        // --- Stage 3: discrepancy analysis (fatal on failure) ---
        let report = match self
            .fresh_stage::<DiscrepancyReport>(subject.id, StageKey::DiscrepancyAnalysis)
            .await?
        {
            Some(report) => report,
            None => {
                match analyze_discrepancies(
                    self.generator.as_ref(),
                    &self.policy,
                    subject,
                    &claims,
                    &digest,
                )
                .await
                {
                    Ok(report) => {
                        self.persist_done(subject.id, StageKey::DiscrepancyAnalysis, &report)
                            .await?;
                        report
                    }
                    Err(e) => {
                        return self
                            .fail_stage(run_id, subject.id, StageKey::DiscrepancyAnalysis, e)
                            .await;
                    }
                }
            }
        };
        self.heartbeat(run_id, PROGRESS_NORMALIZED).await?;

        // --- Blocking rule: no entries means nothing to score ---
        if report.entries.is_empty() {
            let message = match &report.parse_error {
                Some(note) => format!("no scoreable discrepancies ({note})"),
                None => "no unique discrepancies survived normalization".to_string(),
            };
            warn!(run_id = %run_id, %message, "Stage 4 blocked");
            self.store
                .upsert_stage(
                    subject.id,
                    StageKey::TruthIndex,
                    StageRecord::blocked(StageKey::TruthIndex, message.clone()),
                )
                .await
                .map_err(store_err)?;
            return self
                .finalize(run_id, RunStatus::Incomplete, Some(message))
                .await;
        }

        self.heartbeat(run_id, PROGRESS_SCORED).await?;

        // --- Stage 4: truth index (fatal on failure) ---
        let index_report = match self
            .fresh_stage::<TruthIndexReport>(subject.id, StageKey::TruthIndex)
            .await?
        {
            Some(report) => report,
            None => {
                match compose_report(self.generator.as_ref(), subject, &report.entries, &digest)
                    .await
                {
                    Ok(report) => {
                        self.persist_done(subject.id, StageKey::TruthIndex, &report)
                            .await?;
                        report
                    }
                    Err(e) => {
                        return self
                            .fail_stage(run_id, subject.id, StageKey::TruthIndex, e)
                            .await;
                    }
                }
            }
        };
        self.heartbeat(run_id, PROGRESS_INDEXED).await?;

        self.heartbeat(run_id, PROGRESS_COMPLETE).await?;
        let mut outcome = self.finalize(run_id, RunStatus::Done, None).await?;
        outcome.truth_index = Some(index_report.truth_index.final_score);
        info!(
            run_id = %run_id,
            truth_index = index_report.truth_index.final_score,
            "Audit run complete"
        );
        Ok(outcome)
    }

    /// Re-execute exactly one stage, consuming cached upstream data. This is
    /// the retry path for a blocked or errored stage — completed stages are
    /// not re-run.
    pub async fn run_single_stage(
        &self,
        subject: &Subject,
        key: StageKey,
    ) -> Result<(), ClaimLensError> {
        info!(subject = %subject.id, stage = %key, "Re-running single stage");
        match key {
            StageKey::ClaimProfile => {
                let profile = ClaimProfile {
                    claim_profile: extract_claims(subject),
                };
                self.persist_done(subject.id, key, &profile).await
            }
            StageKey::CommunitySignal => {
                let claims = self.claims_for(subject).await?;
                let digest = gather_signal(self.generator.as_ref(), subject, &claims).await;
                self.persist_done(subject.id, key, &digest).await
            }
            StageKey::DiscrepancyAnalysis => {
                let claims = self.claims_for(subject).await?;
                let digest = self.digest_for(subject.id).await?;
                match analyze_discrepancies(
                    self.generator.as_ref(),
                    &self.policy,
                    subject,
                    &claims,
                    &digest,
                )
                .await
                {
                    Ok(report) => self.persist_done(subject.id, key, &report).await,
                    Err(e) => {
                        self.record_stage_error(subject.id, key, &e).await?;
                        Err(e)
                    }
                }
            }
            StageKey::TruthIndex => {
                let report: DiscrepancyReport = self
                    .stored_stage(subject.id, StageKey::DiscrepancyAnalysis)
                    .await?
                    .ok_or_else(|| {
                        ClaimLensError::Validation(
                            "discrepancy analysis has no completed record to score".to_string(),
                        )
                    })?;
                if report.entries.is_empty() {
                    return Err(ClaimLensError::Validation(
                        "discrepancy analysis produced no entries, nothing to score".to_string(),
                    ));
                }
                let digest = self.digest_for(subject.id).await?;
                match compose_report(self.generator.as_ref(), subject, &report.entries, &digest)
                    .await
                {
                    Ok(index_report) => self.persist_done(subject.id, key, &index_report).await,
                    Err(e) => {
                        self.record_stage_error(subject.id, key, &e).await?;
                        Err(e)
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Cached upstream claims, recomputed when absent — extraction is free.
    async fn claims_for(&self, subject: &Subject) -> Result<Vec<claimlens_common::ClaimField>, ClaimLensError> {
        Ok(match self
            .fresh_stage::<ClaimProfile>(subject.id, StageKey::ClaimProfile)
            .await?
        {
            Some(profile) => profile.claim_profile,
            None => extract_claims(subject),
        })
    }

    /// Stored signal digest, or empty when the stage never completed.
    async fn digest_for(&self, subject_id: Uuid) -> Result<SignalDigest, ClaimLensError> {
        Ok(self
            .stored_stage::<SignalDigest>(subject_id, StageKey::CommunitySignal)
            .await?
            .unwrap_or_default())
    }

    /// Deserialize a stage's payload when the record is Done and fresh.
    async fn fresh_stage<T: DeserializeOwned>(
        &self,
        subject_id: Uuid,
        key: StageKey,
    ) -> Result<Option<T>, ClaimLensError> {
        let record = self
            .store
            .get_stage(subject_id, key)
            .await
            .map_err(store_err)?;
        let now = Utc::now();
        let payload = record
            .filter(|r| r.is_fresh(now))
            .and_then(|r| r.data)
            .and_then(|data| serde_json::from_value(data).ok());
        if payload.is_some() {
            debug!(subject = %subject_id, stage = %key, "Reusing fresh cached stage");
        }
        Ok(payload)
    }

    /// Deserialize a stage's payload when the record is Done, fresh or not.
    async fn stored_stage<T: DeserializeOwned>(
        &self,
        subject_id: Uuid,
        key: StageKey,
    ) -> Result<Option<T>, ClaimLensError> {
        let record = self
            .store
            .get_stage(subject_id, key)
            .await
            .map_err(store_err)?;
        Ok(record
            .and_then(|r| r.data)
            .and_then(|data| serde_json::from_value(data).ok()))
    }

    async fn persist_done<T: Serialize>(
        &self,
        subject_id: Uuid,
        key: StageKey,
        payload: &T,
    ) -> Result<(), ClaimLensError> {
        let data =
            serde_json::to_value(payload).map_err(|e| ClaimLensError::Store(e.to_string()))?;
        self.store
            .upsert_stage(subject_id, key, StageRecord::done(key, data))
            .await
            .map_err(store_err)
    }

    async fn record_stage_error(
        &self,
        subject_id: Uuid,
        key: StageKey,
        error: &ClaimLensError,
    ) -> Result<(), ClaimLensError> {
        self.store
            .upsert_stage(subject_id, key, StageRecord::error(key, error.to_string()))
            .await
            .map_err(store_err)
    }

    async fn heartbeat(&self, run_id: Uuid, progress: i32) -> Result<(), ClaimLensError> {
        self.store
            .heartbeat(run_id, progress)
            .await
            .map_err(store_err)
    }

    /// Write the stage's error record, then finalize the run as Error.
    async fn fail_stage(
        &self,
        run_id: Uuid,
        subject_id: Uuid,
        key: StageKey,
        error: ClaimLensError,
    ) -> Result<RunOutcome, ClaimLensError> {
        warn!(run_id = %run_id, stage = %key, error = %error, "Stage failed, halting run");
        self.record_stage_error(subject_id, key, &error).await?;
        self.finalize(run_id, RunStatus::Error, Some(error.to_string()))
            .await
    }

    async fn finalize(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<RunOutcome, ClaimLensError> {
        let applied = self
            .store
            .finish_run(run_id, status, error.clone())
            .await
            .map_err(store_err)?;
        if !applied {
            warn!(run_id = %run_id, status = %status, "Run was already finalized, keeping first terminal state");
        }
        Ok(RunOutcome {
            run_id,
            status,
            truth_index: None,
            error,
        })
    }
}
