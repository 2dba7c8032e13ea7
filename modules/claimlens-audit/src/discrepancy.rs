//! Stage 3 execution: ask the generator for claim/reality discrepancies,
//! repair whatever comes back, and normalize it into the persisted report.
//!
//! Unlike Stage 2, a failed generation call here is fatal for the run — the
//! discrepancy list gates scoring, so there is nothing meaningful to degrade
//! to.

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use ai_client::StructuredOutput;
use claimlens_common::{
    ClaimField, ClaimLensError, DiscrepancyReport, DiscrepancyRow, Severity, SignalDigest, Subject,
};

use crate::normalize::{candidates_from_value, normalize_candidates, NormalizedOutcome};
use crate::policy::NormalizerPolicy;
use crate::repair::repair_parse;
use crate::signal::render_context;
use crate::traits::{GenerateRequest, Generator, ModelTier};

pub const DISCREPANCY_TIMEOUT: Duration = Duration::from_secs(25);

const DISCREPANCY_SYSTEM_PROMPT: &str = "You are a claims auditor. Compare each manufacturer \
    claim against the independent owner feedback and list concrete discrepancies: the claim as \
    stated, the observed reality, how severe the gap is (minor, moderate, severe), and the \
    practical impact on an owner. Only report discrepancies supported by the feedback; do not \
    speculate.";

/// Strict shape requested from the generator. Drifted replies are still
/// accepted by the lenient parse side.
#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct CandidateWire {
    /// The manufacturer claim, quoted or closely paraphrased.
    claim: String,
    /// What owners actually observe.
    reality: String,
    /// One of: minor, moderate, severe.
    severity: String,
    /// Practical consequence for an owner.
    impact: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct DiscrepancyFindings {
    discrepancies: Vec<CandidateWire>,
}

fn render_evidence(subject: &Subject, claims: &[ClaimField], digest: &SignalDigest) -> String {
    let mut out = render_context(subject, claims);
    out.push_str("\nIndependent owner feedback:\n");
    if digest.most_praised.is_empty() && digest.most_reported_issues.is_empty() {
        out.push_str("(none gathered)\n");
    }
    for item in &digest.most_praised {
        out.push_str(&format!("+ {}\n", item.text));
    }
    for item in &digest.most_reported_issues {
        out.push_str(&format!("- {}\n", item.text));
    }
    out
}

pub async fn analyze_discrepancies(
    generator: &dyn Generator,
    policy: &NormalizerPolicy,
    subject: &Subject,
    claims: &[ClaimField],
    digest: &SignalDigest,
) -> Result<DiscrepancyReport, ClaimLensError> {
    let request = GenerateRequest {
        system: DISCREPANCY_SYSTEM_PROMPT.to_string(),
        user: render_evidence(subject, claims, digest),
        schema: DiscrepancyFindings::tool_schema(),
        timeout: DISCREPANCY_TIMEOUT,
        tier: ModelTier::Deep,
    };

    let raw = generator
        .generate(request)
        .await
        .map_err(|e| ClaimLensError::Generation(e.to_string()))?;

    let (candidates, parse_error) = match repair_parse(&raw) {
        Some((value, strategy)) => {
            let candidates = candidates_from_value(&value);
            let note = strategy
                .is_degraded()
                .then(|| format!("partial recovery via {}", strategy.as_str()));
            if let Some(ref note) = note {
                warn!(subject = %subject.id, note, "Discrepancy payload needed degraded recovery");
            }
            (candidates, note)
        }
        None => {
            warn!(subject = %subject.id, "Discrepancy payload unrecoverable");
            (vec![], Some("unrecoverable generator output".to_string()))
        }
    };

    let outcome = normalize_candidates(candidates, policy);
    info!(
        subject = %subject.id,
        total = outcome.total_count,
        unique = outcome.unique_count,
        "Discrepancy normalization complete"
    );

    Ok(build_report(outcome, parse_error))
}

pub fn build_report(outcome: NormalizedOutcome, parse_error: Option<String>) -> DiscrepancyReport {
    let red_flags = outcome
        .entries
        .iter()
        .filter(|e| e.severity == Severity::Severe)
        .map(|e| e.claim.clone())
        .collect();

    let discrepancies = outcome
        .entries
        .iter()
        .map(|e| DiscrepancyRow {
            claim: e.claim.clone(),
            reality: e.reality.clone(),
            impact: e.impact.clone(),
            severity: e.severity,
        })
        .collect();

    DiscrepancyReport {
        total_count: outcome.total_count,
        unique_count: outcome.unique_count,
        entries: outcome.entries,
        red_flags,
        discrepancies,
        parse_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RawCandidate;
    use claimlens_common::SignalItem;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn report_projects_red_flags_and_rows() {
        let candidates: Vec<RawCandidate> = serde_json::from_value(json!([
            {"claim": "1024Wh", "reality": "942Wh measured", "severity": "severe", "impact": "Shorter runtime"},
            {"claim": "Silent operation", "reality": "Fan audible", "severity": "minor"},
        ]))
        .unwrap();
        let outcome = normalize_candidates(candidates, &NormalizerPolicy::default());
        let report = build_report(outcome, None);

        assert_eq!(report.unique_count, 2);
        assert_eq!(report.red_flags, vec!["1024Wh"]);
        assert_eq!(report.discrepancies.len(), 2);
        assert_eq!(report.discrepancies[0].impact, "Shorter runtime");
        assert!(report.parse_error.is_none());
    }

    #[test]
    fn evidence_bundle_marks_missing_signal() {
        let subject = Subject {
            id: Uuid::new_v4(),
            brand: "Acme".to_string(),
            model: "PowerCube".to_string(),
            category: "Power Station".to_string(),
            weight_kg: None,
            price: None,
            attributes: json!({}),
        };
        let empty = render_evidence(&subject, &[], &SignalDigest::default());
        assert!(empty.contains("(none gathered)"));

        let digest = SignalDigest {
            most_praised: vec![SignalItem {
                text: "Charges fast".to_string(),
                sources: Some(3),
            }],
            most_reported_issues: vec![],
        };
        let with_signal = render_evidence(&subject, &[], &digest);
        assert!(with_signal.contains("+ Charges fast"));
    }
}
