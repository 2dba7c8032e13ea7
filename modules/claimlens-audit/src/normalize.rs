//! Stage 3a: discrepancy normalization.
//!
//! Raw candidates arrive from the generator with drifting field names and
//! free-form severities. Coercion, suppression, dedup, and bucket tagging
//! happen here; the result is deterministic for a given input.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use claimlens_common::{NormalizedEntry, Severity};

use crate::policy::NormalizerPolicy;

/// Lenient parse target for one raw candidate. The strict schema sent to the
/// generator asks for `claim`/`reality`, but drifted output uses
/// `issue`/`description` — both spellings are accepted and coerced.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub claim: Option<String>,
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default)]
    pub reality: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub impact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedOutcome {
    pub entries: Vec<NormalizedEntry>,
    /// Raw candidate count before suppression and dedup.
    pub total_count: usize,
    /// Surviving entry count. Always ≤ total_count.
    pub unique_count: usize,
}

/// Lower-case, strip punctuation, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    static PUNCT: OnceLock<Regex> = OnceLock::new();
    let re = PUNCT.get_or_init(|| Regex::new(r"[^a-z0-9\s]+").expect("static regex"));
    let lower = s.to_lowercase();
    let stripped = re.replace_all(&lower, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Dedup fingerprint: claim + reality, falling back to claim + impact when
/// reality is absent.
pub fn dedup_key(claim: &str, reality: Option<&str>, impact: &str) -> String {
    let second = reality.unwrap_or(impact);
    format!("{}::{}", normalize_text(claim), normalize_text(second))
}

pub fn coerce_severity(raw: Option<&str>) -> Severity {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("severe") | Some("high") | Some("critical") => Severity::Severe,
        Some("moderate") | Some("medium") | Some("med") => Severity::Moderate,
        _ => Severity::Minor,
    }
}

/// Pull candidates out of whatever shape the repair ladder recovered: a bare
/// array, a `{discrepancies: [...]}` wrapper, or a single object.
pub fn candidates_from_value(value: &Value) -> Vec<RawCandidate> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("discrepancies").and_then(Value::as_array) {
            Some(items) => items.iter().collect(),
            None => vec![value],
        },
        _ => vec![],
    };

    items
        .into_iter()
        .filter(|v| v.is_object())
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}

pub fn normalize_candidates(
    candidates: Vec<RawCandidate>,
    policy: &NormalizerPolicy,
) -> NormalizedOutcome {
    let total_count = candidates.len();
    let mut seen: HashSet<String> = HashSet::new();
    let mut entries = Vec::new();

    for candidate in candidates {
        let Some(claim) = non_empty(candidate.claim).or(non_empty(candidate.issue)) else {
            continue;
        };
        let reality = non_empty(candidate.reality).or(non_empty(candidate.description));
        let impact = non_empty(candidate.impact).unwrap_or_default();
        let severity = coerce_severity(candidate.severity.as_deref());

        let combined = format!(
            "{} {} {}",
            claim,
            reality.as_deref().unwrap_or(""),
            impact
        )
        .to_lowercase();

        if policy.suppression.matches(&combined) {
            continue;
        }

        let key = dedup_key(&claim, reality.as_deref(), &impact);
        if !seen.insert(key.clone()) {
            // first occurrence wins
            continue;
        }

        let tags = policy.tags_for(&combined);

        entries.push(NormalizedEntry {
            key,
            claim,
            reality: reality.unwrap_or_default(),
            impact,
            severity,
            tags,
        });
    }

    NormalizedOutcome {
        unique_count: entries.len(),
        total_count,
        entries,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimlens_common::Bucket;
    use serde_json::json;

    fn candidates(raw: Value) -> Vec<RawCandidate> {
        candidates_from_value(&raw)
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = json!([
            {"claim": "1024Wh", "reality": "942Wh measured", "severity": "moderate"},
            {"issue": "Fan noise", "description": "Loud under load", "severity": "low"},
        ]);
        let policy = NormalizerPolicy::default();
        let first = normalize_candidates(candidates(raw.clone()), &policy);
        let second = normalize_candidates(candidates(raw), &policy);
        assert_eq!(
            serde_json::to_vec(&first.entries).unwrap(),
            serde_json::to_vec(&second.entries).unwrap()
        );
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let raw = json!([
            {"claim": "1024Wh", "reality": "942Wh measured", "severity": "severe"},
            {"claim": "1024wh.", "reality": "942WH, measured!", "severity": "minor"},
            {"claim": "1024Wh", "reality": "942Wh measured"},
        ]);
        let outcome = normalize_candidates(candidates(raw), &NormalizerPolicy::default());
        assert_eq!(outcome.total_count, 3);
        assert_eq!(outcome.unique_count, 1);
        // first occurrence's severity survives
        assert_eq!(outcome.entries[0].severity, Severity::Severe);
    }

    #[test]
    fn unique_never_exceeds_total() {
        let raw = json!([
            {"claim": "a", "reality": "b"},
            {"claim": "c", "reality": "d"},
            {"claim": "a", "reality": "b"},
        ]);
        let outcome = normalize_candidates(candidates(raw), &NormalizerPolicy::default());
        assert!(outcome.unique_count <= outcome.total_count);
        assert_eq!(outcome.unique_count, 2);
    }

    #[test]
    fn empty_input_yields_zero_counts() {
        let outcome = normalize_candidates(vec![], &NormalizerPolicy::default());
        assert_eq!(outcome.total_count, 0);
        assert_eq!(outcome.unique_count, 0);
    }

    #[test]
    fn capacity_addon_confusion_is_suppressed_before_dedup() {
        let raw = json!([
            {"claim": "Storage Capacity", "reality": "Add-on battery not included", "severity": "severe"},
        ]);
        let outcome = normalize_candidates(candidates(raw), &NormalizerPolicy::default());
        assert_eq!(outcome.total_count, 1);
        assert_eq!(outcome.unique_count, 0);
    }

    #[test]
    fn severity_synonyms_are_coerced() {
        assert_eq!(coerce_severity(Some("HIGH")), Severity::Severe);
        assert_eq!(coerce_severity(Some("critical")), Severity::Severe);
        assert_eq!(coerce_severity(Some("Medium")), Severity::Moderate);
        assert_eq!(coerce_severity(Some("med")), Severity::Moderate);
        assert_eq!(coerce_severity(Some("negligible")), Severity::Minor);
        assert_eq!(coerce_severity(None), Severity::Minor);
    }

    #[test]
    fn reality_falls_back_to_impact_in_key() {
        let raw = json!([
            {"claim": "3000 cycles", "impact": "Cells degrade early", "severity": "moderate"},
        ]);
        let outcome = normalize_candidates(candidates(raw), &NormalizerPolicy::default());
        assert_eq!(outcome.entries[0].key, "3000 cycles::cells degrade early");
    }

    #[test]
    fn entries_always_carry_a_tag() {
        let raw = json!([{"claim": "zzz", "reality": "yyy"}]);
        let outcome = normalize_candidates(candidates(raw), &NormalizerPolicy::default());
        assert_eq!(
            outcome.entries[0].tags.iter().collect::<Vec<_>>(),
            vec![&Bucket::ClaimsAccuracy]
        );
    }

    #[test]
    fn candidates_accept_wrapped_and_bare_shapes() {
        let wrapped = json!({"discrepancies": [{"claim": "a", "reality": "b"}]});
        assert_eq!(candidates_from_value(&wrapped).len(), 1);

        let bare = json!([{"claim": "a", "reality": "b"}, "not an object"]);
        assert_eq!(candidates_from_value(&bare).len(), 1);

        let single = json!({"claim": "a", "reality": "b"});
        assert_eq!(candidates_from_value(&single).len(), 1);
    }
}
