//! Stage 3b: severity-weighted sub-scores.

use claimlens_common::{BaseScores, Bucket, MetricBar, NormalizedEntry, PenaltyTotals, Rating};

/// Each bucket starts at 100; every entry subtracts its severity penalty from
/// each bucket it is tagged with, and nothing else. Clamping happens once at
/// the end — scores only decrease, so per-subtraction clamping would give the
/// same result, but a single clamp avoids any order dependence.
pub fn compute_base_scores(entries: &[NormalizedEntry]) -> BaseScores {
    let mut scores = BaseScores::default();

    for entry in entries {
        for &bucket in &entry.tags {
            *scores.get_mut(bucket) -= entry.severity.penalty();
        }
    }

    for bucket in Bucket::ALL {
        *scores.get_mut(bucket) = scores.get(bucket).clamp(0, 100);
    }

    scores
}

/// Informational tallies for the breakdown. Not a score input.
pub fn penalty_totals(entries: &[NormalizedEntry]) -> PenaltyTotals {
    let mut totals = PenaltyTotals::default();
    for entry in entries {
        match entry.severity {
            claimlens_common::Severity::Severe => totals.severe += 1,
            claimlens_common::Severity::Moderate => totals.moderate += 1,
            claimlens_common::Severity::Minor => totals.minor += 1,
        }
        totals.total += entry.severity.penalty() * entry.tags.len() as i64;
    }
    totals
}

pub fn rating_for(score: i64) -> Rating {
    if score >= 85 {
        Rating::High
    } else if score >= 60 {
        Rating::Moderate
    } else {
        Rating::Low
    }
}

pub fn build_metric_bars(scores: &BaseScores) -> Vec<MetricBar> {
    Bucket::ALL
        .iter()
        .map(|&bucket| {
            let score = scores.get(bucket);
            MetricBar {
                label: bucket.label().to_string(),
                rating: rating_for(score),
                percentage: score,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimlens_common::Severity;
    use std::collections::BTreeSet;

    fn entry(severity: Severity, buckets: &[Bucket]) -> NormalizedEntry {
        NormalizedEntry {
            key: format!("{severity:?}::{buckets:?}"),
            claim: "claim".to_string(),
            reality: "reality".to_string(),
            impact: String::new(),
            severity,
            tags: buckets.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn no_entries_means_perfect_scores() {
        let scores = compute_base_scores(&[]);
        assert_eq!(scores, BaseScores::default());
    }

    #[test]
    fn one_moderate_claims_entry_scores_ninety() {
        let scores = compute_base_scores(&[entry(Severity::Moderate, &[Bucket::ClaimsAccuracy])]);
        assert_eq!(scores.claims_accuracy, 90);
        assert_eq!(scores.real_world_fit, 100);
        assert_eq!(scores.operational_noise, 100);
    }

    #[test]
    fn penalties_only_hit_tagged_buckets() {
        let scores = compute_base_scores(&[entry(
            Severity::Severe,
            &[Bucket::RealWorldFit, Bucket::OperationalNoise],
        )]);
        assert_eq!(scores.claims_accuracy, 100);
        assert_eq!(scores.real_world_fit, 85);
        assert_eq!(scores.operational_noise, 85);
    }

    #[test]
    fn scores_clamp_at_zero() {
        let entries: Vec<_> = (0..10)
            .map(|_| entry(Severity::Severe, &[Bucket::ClaimsAccuracy]))
            .enumerate()
            .map(|(i, mut e)| {
                e.key = format!("k{i}");
                e
            })
            .collect();
        let scores = compute_base_scores(&entries);
        assert_eq!(scores.claims_accuracy, 0);
    }

    #[test]
    fn heavier_entries_never_raise_a_bucket() {
        let light = compute_base_scores(&[entry(Severity::Minor, &[Bucket::ClaimsAccuracy])]);
        let heavy = compute_base_scores(&[
            entry(Severity::Minor, &[Bucket::ClaimsAccuracy]),
            entry(Severity::Severe, &[Bucket::ClaimsAccuracy]),
        ]);
        assert!(heavy.claims_accuracy <= light.claims_accuracy);
    }

    #[test]
    fn metric_bar_ratings() {
        assert_eq!(rating_for(100), Rating::High);
        assert_eq!(rating_for(85), Rating::High);
        assert_eq!(rating_for(84), Rating::Moderate);
        assert_eq!(rating_for(60), Rating::Moderate);
        assert_eq!(rating_for(59), Rating::Low);

        let bars = build_metric_bars(&BaseScores {
            claims_accuracy: 90,
            real_world_fit: 70,
            operational_noise: 40,
        });
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].label, "Claims Accuracy");
        assert_eq!(bars[0].rating, Rating::High);
        assert_eq!(bars[1].rating, Rating::Moderate);
        assert_eq!(bars[2].rating, Rating::Low);
        assert_eq!(bars[2].percentage, 40);
    }

    #[test]
    fn penalty_totals_count_tag_multiplicity() {
        let totals = penalty_totals(&[
            entry(Severity::Severe, &[Bucket::ClaimsAccuracy, Bucket::RealWorldFit]),
            entry(Severity::Minor, &[Bucket::OperationalNoise]),
        ]);
        assert_eq!(totals.severe, 1);
        assert_eq!(totals.minor, 1);
        assert_eq!(totals.moderate, 0);
        assert_eq!(totals.total, 35);
    }
}
