use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Stage identity ---

/// The four ordered stages of an audit. Each persists one record per subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    ClaimProfile,
    CommunitySignal,
    DiscrepancyAnalysis,
    TruthIndex,
}

impl StageKey {
    pub const ALL: [StageKey; 4] = [
        StageKey::ClaimProfile,
        StageKey::CommunitySignal,
        StageKey::DiscrepancyAnalysis,
        StageKey::TruthIndex,
    ];

    pub fn index(self) -> u8 {
        match self {
            StageKey::ClaimProfile => 1,
            StageKey::CommunitySignal => 2,
            StageKey::DiscrepancyAnalysis => 3,
            StageKey::TruthIndex => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKey::ClaimProfile => "claim_profile",
            StageKey::CommunitySignal => "community_signal",
            StageKey::DiscrepancyAnalysis => "discrepancy_analysis",
            StageKey::TruthIndex => "truth_index",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claim_profile" => Some(StageKey::ClaimProfile),
            "community_signal" => Some(StageKey::CommunitySignal),
            "discrepancy_analysis" => Some(StageKey::DiscrepancyAnalysis),
            "truth_index" => Some(StageKey::TruthIndex),
            _ => None,
        }
    }

    /// Reuse window for a cached record. Community signal decays much faster
    /// than spec-derived stages.
    pub fn ttl_days(self) -> i64 {
        match self {
            StageKey::ClaimProfile => 90,
            StageKey::CommunitySignal => 14,
            StageKey::DiscrepancyAnalysis => 30,
            StageKey::TruthIndex => 30,
        }
    }
}

impl std::fmt::Display for StageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Stage records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Blocked,
    Error,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Done => "done",
            StageStatus::Blocked => "blocked",
            StageStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One persisted stage result for a subject. `data` is present iff `status == Done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub ttl_days: i64,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StageRecord {
    pub fn done(key: StageKey, data: serde_json::Value) -> Self {
        Self {
            status: StageStatus::Done,
            completed_at: Some(Utc::now()),
            ttl_days: key.ttl_days(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(key: StageKey, message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Error,
            completed_at: None,
            ttl_days: key.ttl_days(),
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn blocked(key: StageKey, message: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Blocked,
            completed_at: None,
            ttl_days: key.ttl_days(),
            data: None,
            error: Some(message.into()),
        }
    }

    /// A record is reusable iff it completed and its TTL has not lapsed.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.status == StageStatus::Done
            && self
                .completed_at
                .map(|done| now - done < Duration::days(self.ttl_days))
                .unwrap_or(false)
    }
}

// --- Runs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Done,
    Error,
    Incomplete,
    Timeout,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Done | RunStatus::Error | RunStatus::Incomplete | RunStatus::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Error => "error",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "done" => Some(RunStatus::Done),
            "error" => Some(RunStatus::Error),
            "incomplete" => Some(RunStatus::Incomplete),
            "timeout" => Some(RunStatus::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution attempt of the full pipeline for a subject.
/// Terminal status is written exactly once; progress never decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub status: RunStatus,
    pub progress: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_heartbeat: DateTime<Utc>,
    pub error: Option<String>,
}

impl AuditRun {
    pub fn new(subject_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject_id,
            status: RunStatus::Pending,
            progress: 0,
            started_at: now,
            finished_at: None,
            last_heartbeat: now,
            error: None,
        }
    }
}

// --- Subjects ---

/// The audited product. `attributes` is either an array of `{label, value}`
/// objects or a (possibly nested) key/value map, as delivered by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    pub brand: String,
    pub model: String,
    pub category: String,
    pub weight_kg: Option<f64>,
    pub price: Option<f64>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

// --- Claims (Stage 1 payload) ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClaimField {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimProfile {
    pub claim_profile: Vec<ClaimField>,
}

// --- Community signal (Stage 2 payload) ---

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SignalItem {
    /// What owners consistently report, one concrete point per item.
    pub text: String,
    /// How many independent sources mention it, if known.
    pub sources: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SignalDigest {
    #[serde(default)]
    pub most_praised: Vec<SignalItem>,
    #[serde(default)]
    pub most_reported_issues: Vec<SignalItem>,
}

// --- Normalized discrepancies (Stage 3 payload) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Severe,
}

impl Severity {
    /// Score penalty applied to each tagged bucket.
    pub fn penalty(self) -> i64 {
        match self {
            Severity::Minor => 5,
            Severity::Moderate => 10,
            Severity::Severe => 15,
        }
    }
}

/// Scoring category an entry can be tagged with. An entry carries at least
/// one tag; multi-membership is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    ClaimsAccuracy,
    RealWorldFit,
    OperationalNoise,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [
        Bucket::ClaimsAccuracy,
        Bucket::RealWorldFit,
        Bucket::OperationalNoise,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Bucket::ClaimsAccuracy => "Claims Accuracy",
            Bucket::RealWorldFit => "Real-World Fit",
            Bucket::OperationalNoise => "Operational Noise",
        }
    }
}

/// A deduplicated, bucketed discrepancy between a claim and observed reality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEntry {
    /// Dedup fingerprint derived from normalized claim + reality (or impact).
    pub key: String,
    pub claim: String,
    pub reality: String,
    pub impact: String,
    pub severity: Severity,
    pub tags: BTreeSet<Bucket>,
}

/// Stage 3 wire payload. Field names `totalCount`/`uniqueCount` are part of
/// the rendering contract; everything else stays snake_case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscrepancyReport {
    pub entries: Vec<NormalizedEntry>,
    #[serde(rename = "totalCount")]
    pub total_count: usize,
    #[serde(rename = "uniqueCount")]
    pub unique_count: usize,
    pub red_flags: Vec<String>,
    pub discrepancies: Vec<DiscrepancyRow>,
    /// Set when the raw payload needed degraded recovery (or none succeeded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

/// Render projection of a normalized entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscrepancyRow {
    pub claim: String,
    pub reality: String,
    pub impact: String,
    pub severity: Severity,
}

// --- Scores (Stage 3b / Stage 4 payloads) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseScores {
    pub claims_accuracy: i64,
    pub real_world_fit: i64,
    pub operational_noise: i64,
}

impl BaseScores {
    pub fn get(&self, bucket: Bucket) -> i64 {
        match bucket {
            Bucket::ClaimsAccuracy => self.claims_accuracy,
            Bucket::RealWorldFit => self.real_world_fit,
            Bucket::OperationalNoise => self.operational_noise,
        }
    }

    pub fn get_mut(&mut self, bucket: Bucket) -> &mut i64 {
        match bucket {
            Bucket::ClaimsAccuracy => &mut self.claims_accuracy,
            Bucket::RealWorldFit => &mut self.real_world_fit,
            Bucket::OperationalNoise => &mut self.operational_noise,
        }
    }
}

impl Default for BaseScores {
    fn default() -> Self {
        Self {
            claims_accuracy: 100,
            real_world_fit: 100,
            operational_noise: 100,
        }
    }
}

/// Informational penalty tallies. Not an input to the final score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyTotals {
    pub severe: i64,
    pub moderate: i64,
    pub minor: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub claims_accuracy: f64,
    pub real_world_fit: f64,
    pub operational_noise: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            claims_accuracy: 0.45,
            real_world_fit: 0.35,
            operational_noise: 0.20,
        }
    }
}

/// A generator-proposed score adjustment that survived the validation gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub delta: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthIndexBreakdown {
    pub base: i64,
    #[serde(rename = "final")]
    pub final_score: i64,
    pub weights: ScoreWeights,
    pub component_scores: BaseScores,
    pub penalties: PenaltyTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_adjustment: Option<Adjustment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    High,
    Moderate,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricBar {
    pub label: String,
    pub rating: Rating,
    pub percentage: i64,
}

/// Evidence volume behind the score, computed locally for auditability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataConfidence {
    High,
    Moderate,
    Limited,
}

/// Stage 4 wire payload consumed by external rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthIndexReport {
    pub truth_index: TruthIndexBreakdown,
    pub metric_bars: Vec<MetricBar>,
    pub strengths: Vec<String>,
    pub limitations: Vec<String>,
    pub practical_impact: String,
    pub good_fit: Vec<String>,
    pub consider_alternatives: Vec<String>,
    pub score_interpretation: String,
    pub data_confidence: DataConfidence,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_key_roundtrip() {
        for key in StageKey::ALL {
            assert_eq!(StageKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(StageKey::parse("stage_five"), None);
    }

    #[test]
    fn signal_ttl_is_shortest() {
        for key in StageKey::ALL {
            assert!(key.ttl_days() >= StageKey::CommunitySignal.ttl_days());
        }
    }

    #[test]
    fn fresh_record_within_ttl() {
        let record = StageRecord::done(StageKey::ClaimProfile, serde_json::json!({}));
        assert!(record.is_fresh(Utc::now()));
        assert!(!record.is_fresh(Utc::now() + Duration::days(91)));
    }

    #[test]
    fn error_record_is_never_fresh() {
        let record = StageRecord::error(StageKey::TruthIndex, "boom");
        assert!(!record.is_fresh(Utc::now()));
        assert!(record.data.is_none());
    }

    #[test]
    fn terminal_run_states() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::Incomplete.is_terminal());
        assert!(RunStatus::Timeout.is_terminal());
    }

    #[test]
    fn breakdown_final_field_name() {
        let breakdown = TruthIndexBreakdown {
            base: 95,
            final_score: 95,
            weights: ScoreWeights::default(),
            component_scores: BaseScores::default(),
            penalties: PenaltyTotals::default(),
            llm_adjustment: None,
        };
        let json = serde_json::to_value(&breakdown).unwrap();
        assert_eq!(json["final"], 95);
        assert!(json.get("final_score").is_none());
    }

    #[test]
    fn discrepancy_report_wire_names() {
        let report = DiscrepancyReport {
            entries: vec![],
            total_count: 3,
            unique_count: 2,
            red_flags: vec![],
            discrepancies: vec![],
            parse_error: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["totalCount"], 3);
        assert_eq!(json["uniqueCount"], 2);
    }
}
