//! Stage 4 execution: deterministic index plus generator-written narrative.
//!
//! The score never depends on the narrative; the narrative call may propose
//! an adjustment that is gated in `index`. Malformed or failed generation
//! here is fatal — the run ends `Error` with earlier stages preserved.

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

use ai_client::StructuredOutput;
use claimlens_common::{
    ClaimLensError, NormalizedEntry, SignalDigest, Subject, TruthIndexReport,
};

use crate::index::{compute_truth_index, data_confidence, ProposedAdjustment};
use crate::repair::repair_parse;
use crate::score::{build_metric_bars, compute_base_scores};
use crate::traits::{GenerateRequest, Generator, ModelTier};

pub const INDEX_TIMEOUT: Duration = Duration::from_secs(30);

const NARRATIVE_SYSTEM_PROMPT: &str = "You are writing the summary section of a product claim \
    audit. You are given the verified discrepancies and the computed sub-scores. Write the \
    narrative fields grounded strictly in that data. You may propose a score adjustment of at \
    most a few points, only when the computed score clearly misrepresents the evidence, and \
    your reason must quote the discrepancy that motivates it.";

/// Narrative fields the generator fills in around the computed score.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AuditNarrative {
    /// Where the product delivers on its claims.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// Where it falls short.
    #[serde(default)]
    pub limitations: Vec<String>,
    /// What the discrepancies mean day to day.
    #[serde(default)]
    pub practical_impact: String,
    /// Who the product suits.
    #[serde(default)]
    pub good_fit: Vec<String>,
    /// Who should look elsewhere.
    #[serde(default)]
    pub consider_alternatives: Vec<String>,
    /// One-paragraph reading of the score.
    #[serde(default)]
    pub score_interpretation: String,
    /// Optional score adjustment; discarded unless it passes every gate.
    #[serde(default)]
    pub adjustment: Option<ProposedAdjustment>,
}

fn render_assessment(
    subject: &Subject,
    entries: &[NormalizedEntry],
    digest: &SignalDigest,
    base: i64,
) -> String {
    let mut out = format!(
        "Product: {} {} ({})\nComputed base score: {base}\n\nVerified discrepancies:\n",
        subject.brand, subject.model, subject.category
    );
    if entries.is_empty() {
        out.push_str("(none)\n");
    }
    for entry in entries {
        out.push_str(&format!(
            "- claim: {} | reality: {} | severity: {:?} | impact: {}\n",
            entry.claim, entry.reality, entry.severity, entry.impact
        ));
    }
    out.push_str("\nOwner praise:\n");
    for item in &digest.most_praised {
        out.push_str(&format!("+ {}\n", item.text));
    }
    out.push_str("\nOwner issues:\n");
    for item in &digest.most_reported_issues {
        out.push_str(&format!("- {}\n", item.text));
    }
    out
}

pub async fn compose_report(
    generator: &dyn Generator,
    subject: &Subject,
    entries: &[NormalizedEntry],
    digest: &SignalDigest,
) -> Result<TruthIndexReport, ClaimLensError> {
    let scores = compute_base_scores(entries);
    let provisional = compute_truth_index(entries, &scores, None);

    let request = GenerateRequest {
        system: NARRATIVE_SYSTEM_PROMPT.to_string(),
        user: render_assessment(subject, entries, digest, provisional.base),
        schema: AuditNarrative::tool_schema(),
        timeout: INDEX_TIMEOUT,
        tier: ModelTier::Deep,
    };

    let raw = generator
        .generate(request)
        .await
        .map_err(|e| ClaimLensError::Generation(e.to_string()))?;

    let (value, _) = repair_parse(&raw)
        .ok_or_else(|| ClaimLensError::Parse("unrecoverable index narrative".to_string()))?;
    let narrative: AuditNarrative =
        serde_json::from_value(value).map_err(|e| ClaimLensError::Parse(e.to_string()))?;

    let truth_index = compute_truth_index(entries, &scores, narrative.adjustment.as_ref());

    Ok(TruthIndexReport {
        metric_bars: build_metric_bars(&scores),
        strengths: narrative.strengths,
        limitations: narrative.limitations,
        practical_impact: narrative.practical_impact,
        good_fit: narrative.good_fit,
        consider_alternatives: narrative.consider_alternatives,
        score_interpretation: narrative.score_interpretation,
        data_confidence: data_confidence(digest, entries.len()),
        truth_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimlens_common::{Bucket, Severity};
    use serde_json::json;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    #[test]
    fn assessment_includes_discrepancies_and_base() {
        let subject = Subject {
            id: Uuid::new_v4(),
            brand: "Acme".to_string(),
            model: "PowerCube".to_string(),
            category: "Power Station".to_string(),
            weight_kg: None,
            price: None,
            attributes: json!({}),
        };
        let entries = vec![NormalizedEntry {
            key: "1024wh::942wh measured".to_string(),
            claim: "1024Wh".to_string(),
            reality: "942Wh measured".to_string(),
            impact: String::new(),
            severity: Severity::Moderate,
            tags: [Bucket::ClaimsAccuracy].into_iter().collect::<BTreeSet<_>>(),
        }];
        let rendered = render_assessment(&subject, &entries, &SignalDigest::default(), 95);
        assert!(rendered.contains("Computed base score: 95"));
        assert!(rendered.contains("claim: 1024Wh | reality: 942Wh measured"));
    }

    #[test]
    fn narrative_tolerates_missing_fields() {
        let narrative: AuditNarrative = serde_json::from_value(json!({
            "strengths": ["Solid inverter"]
        }))
        .unwrap();
        assert_eq!(narrative.strengths.len(), 1);
        assert!(narrative.limitations.is_empty());
        assert!(narrative.adjustment.is_none());
    }
}
