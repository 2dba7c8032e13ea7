//! Stage 4: truth index calculation.
//!
//! The index itself is deterministic. The generator may propose a small
//! adjustment, but an unconstrained adjustment would let the non-deterministic
//! component dominate the metric — so every proposal passes hard gates or is
//! discarded outright, never clamped into range.

use schemars::JsonSchema;
use serde::Deserialize;

use claimlens_common::{
    Adjustment, BaseScores, DataConfidence, NormalizedEntry, ScoreWeights, SignalDigest,
    TruthIndexBreakdown,
};

use crate::normalize::normalize_text;
use crate::score::penalty_totals;

/// Largest adjustment magnitude the generator may propose.
const MAX_ADJUSTMENT: i64 = 3;
/// Minimum trimmed length for an adjustment reason.
const MIN_REASON_LEN: usize = 10;
/// How much of an entry's claim must be quoted for textual grounding.
const CLAIM_PREFIX_CHARS: usize = 20;
/// Minimum key-fragment length that counts as grounding.
const MIN_KEY_FRAGMENT: usize = 5;

/// What the generator returns alongside the narrative fields.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ProposedAdjustment {
    /// Signed score delta. Anything outside ±3 or fractional is rejected.
    pub delta: f64,
    /// Justification quoting the discrepancy that motivates the change.
    pub reason: String,
}

pub fn weighted_base(scores: &BaseScores, weights: &ScoreWeights) -> i64 {
    (weights.claims_accuracy * scores.claims_accuracy as f64
        + weights.real_world_fit * scores.real_world_fit as f64
        + weights.operational_noise * scores.operational_noise as f64)
        .round() as i64
}

/// All gates must pass or the proposal is discarded entirely:
/// a nonzero integer delta within ±3, a reason of substance, and the reason
/// textually referencing a surviving entry.
pub fn validate_adjustment(
    proposed: &ProposedAdjustment,
    entries: &[NormalizedEntry],
) -> Option<Adjustment> {
    if proposed.delta.fract() != 0.0 {
        return None;
    }
    let delta = proposed.delta as i64;
    if delta == 0 || delta.abs() > MAX_ADJUSTMENT {
        return None;
    }

    let reason = proposed.reason.trim();
    if reason.len() < MIN_REASON_LEN {
        return None;
    }

    if !references_entry(reason, entries) {
        return None;
    }

    Some(Adjustment {
        delta,
        reason: reason.to_string(),
    })
}

fn references_entry(reason: &str, entries: &[NormalizedEntry]) -> bool {
    let reason_lc = reason.to_lowercase();
    let reason_norm = normalize_text(reason);

    entries.iter().any(|entry| {
        let prefix: String = entry
            .claim
            .to_lowercase()
            .chars()
            .take(CLAIM_PREFIX_CHARS)
            .collect();
        let prefix = prefix.trim();
        if !prefix.is_empty() && reason_lc.contains(prefix) {
            return true;
        }

        entry
            .key
            .split("::")
            .any(|fragment| fragment.len() >= MIN_KEY_FRAGMENT && reason_norm.contains(fragment))
    })
}

/// Blend the sub-scores and apply a validated adjustment, if any survived.
pub fn compute_truth_index(
    entries: &[NormalizedEntry],
    scores: &BaseScores,
    proposed: Option<&ProposedAdjustment>,
) -> TruthIndexBreakdown {
    let weights = ScoreWeights::default();
    let base = weighted_base(scores, &weights);

    let llm_adjustment = proposed.and_then(|p| validate_adjustment(p, entries));
    let delta = llm_adjustment.as_ref().map(|a| a.delta).unwrap_or(0);

    TruthIndexBreakdown {
        base,
        final_score: (base + delta).clamp(0, 100),
        weights,
        component_scores: *scores,
        penalties: penalty_totals(entries),
        llm_adjustment,
    }
}

/// Evidence volume behind the score. Computed locally so the confidence
/// label is reproducible from stored stage data.
pub fn data_confidence(signal: &SignalDigest, unique_entries: usize) -> DataConfidence {
    let signal_items = signal.most_praised.len() + signal.most_reported_issues.len();
    let volume = signal_items + unique_entries;
    if signal_items >= 4 && volume >= 8 {
        DataConfidence::High
    } else if volume >= 3 {
        DataConfidence::Moderate
    } else {
        DataConfidence::Limited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimlens_common::{Bucket, Severity, SignalItem};
    use std::collections::BTreeSet;

    fn capacity_entry() -> NormalizedEntry {
        NormalizedEntry {
            key: "1024wh rated capacity::942wh measured".to_string(),
            claim: "1024Wh rated capacity".to_string(),
            reality: "942Wh measured".to_string(),
            impact: "Shorter runtimes".to_string(),
            severity: Severity::Moderate,
            tags: [Bucket::ClaimsAccuracy].into_iter().collect::<BTreeSet<_>>(),
        }
    }

    fn scores() -> BaseScores {
        BaseScores {
            claims_accuracy: 90,
            real_world_fit: 100,
            operational_noise: 100,
        }
    }

    #[test]
    fn base_is_the_weighted_round() {
        assert_eq!(weighted_base(&scores(), &ScoreWeights::default()), 95);
        assert_eq!(
            weighted_base(&BaseScores::default(), &ScoreWeights::default()),
            100
        );
    }

    #[test]
    fn oversized_delta_is_rejected() {
        let proposed = ProposedAdjustment {
            delta: 4.0,
            reason: "The 1024Wh rated capacity claim is badly off".to_string(),
        };
        assert!(validate_adjustment(&proposed, &[capacity_entry()]).is_none());
    }

    #[test]
    fn fractional_and_zero_deltas_are_rejected() {
        for delta in [0.0, 1.5, -2.5] {
            let proposed = ProposedAdjustment {
                delta,
                reason: "The 1024Wh rated capacity claim is badly off".to_string(),
            };
            assert!(validate_adjustment(&proposed, &[capacity_entry()]).is_none());
        }
    }

    #[test]
    fn short_reason_is_rejected() {
        let proposed = ProposedAdjustment {
            delta: 2.0,
            reason: "ok".to_string(),
        };
        assert!(validate_adjustment(&proposed, &[capacity_entry()]).is_none());
    }

    #[test]
    fn ungrounded_reason_is_rejected() {
        let proposed = ProposedAdjustment {
            delta: 2.0,
            reason: "The product generally underperforms expectations".to_string(),
        };
        assert!(validate_adjustment(&proposed, &[capacity_entry()]).is_none());
    }

    #[test]
    fn reason_quoting_the_claim_is_accepted() {
        let proposed = ProposedAdjustment {
            delta: 2.0,
            reason: "Dock the score: the 1024Wh rated capacity shortfall is systematic".to_string(),
        };
        let adjustment = validate_adjustment(&proposed, &[capacity_entry()]).unwrap();
        assert_eq!(adjustment.delta, 2);
    }

    #[test]
    fn reason_quoting_a_key_fragment_is_accepted() {
        let proposed = ProposedAdjustment {
            delta: -2.0,
            reason: "Only 942wh measured under a controlled load".to_string(),
        };
        assert!(validate_adjustment(&proposed, &[capacity_entry()]).is_some());
    }

    #[test]
    fn index_applies_accepted_adjustment() {
        let entries = vec![capacity_entry()];
        let proposed = ProposedAdjustment {
            delta: 2.0,
            reason: "Raising slightly: the 1024Wh rated capacity gap has a workaround".to_string(),
        };
        let breakdown = compute_truth_index(&entries, &scores(), Some(&proposed));
        assert_eq!(breakdown.base, 95);
        assert_eq!(breakdown.final_score, 97);
        assert_eq!(breakdown.llm_adjustment.as_ref().unwrap().delta, 2);
    }

    #[test]
    fn index_discards_rejected_adjustment() {
        let entries = vec![capacity_entry()];
        let proposed = ProposedAdjustment {
            delta: 3.0,
            reason: "vibes".to_string(),
        };
        let breakdown = compute_truth_index(&entries, &scores(), Some(&proposed));
        assert_eq!(breakdown.final_score, 95);
        assert!(breakdown.llm_adjustment.is_none());
    }

    #[test]
    fn final_score_clamps_to_range() {
        let entries = vec![capacity_entry()];
        let high = BaseScores {
            claims_accuracy: 100,
            real_world_fit: 100,
            operational_noise: 100,
        };
        let proposed = ProposedAdjustment {
            delta: 3.0,
            reason: "Crediting the 1024Wh rated capacity under mild loads".to_string(),
        };
        let breakdown = compute_truth_index(&entries, &high, Some(&proposed));
        assert_eq!(breakdown.final_score, 100);
    }

    #[test]
    fn confidence_tracks_evidence_volume() {
        let empty = SignalDigest::default();
        assert_eq!(data_confidence(&empty, 0), DataConfidence::Limited);
        assert_eq!(data_confidence(&empty, 3), DataConfidence::Moderate);

        let rich = SignalDigest {
            most_praised: (0..4)
                .map(|i| SignalItem {
                    text: format!("praise {i}"),
                    sources: Some(2),
                })
                .collect(),
            most_reported_issues: (0..4)
                .map(|i| SignalItem {
                    text: format!("issue {i}"),
                    sources: None,
                })
                .collect(),
        };
        assert_eq!(data_confidence(&rich, 2), DataConfidence::High);
    }
}
