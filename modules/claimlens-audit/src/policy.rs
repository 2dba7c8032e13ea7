//! Replaceable normalization heuristics.
//!
//! Bucket keyword lists and the capacity/add-on suppression rule are tuned ad
//! hoc against observed generator confusion, so they live in policy tables
//! the normalizer is constructed with, not in code.

use std::collections::BTreeSet;

use claimlens_common::Bucket;

/// Keywords (stems allowed) that tag an entry into one bucket.
#[derive(Debug, Clone)]
pub struct BucketRule {
    pub bucket: Bucket,
    pub keywords: Vec<String>,
}

/// Drops candidates where the generator conflated an optional accessory's
/// capacity with the base unit's: both a capacity term and an add-on term in
/// the same candidate is a known false-positive pattern.
#[derive(Debug, Clone)]
pub struct SuppressionRule {
    pub capacity_terms: Vec<String>,
    pub addon_terms: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NormalizerPolicy {
    pub bucket_rules: Vec<BucketRule>,
    pub suppression: SuppressionRule,
}

impl Default for NormalizerPolicy {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            bucket_rules: vec![
                BucketRule {
                    bucket: Bucket::OperationalNoise,
                    keywords: list(&[
                        "firmware", "fan", "bluetooth", "app", "software", "update", "noise",
                        "beep", "wifi", "connectivity",
                    ]),
                },
                BucketRule {
                    bucket: Bucket::RealWorldFit,
                    keywords: list(&[
                        "weight", "compatib", "voltage", "size", "dimension", "fit",
                        "temperature", "cold", "portab",
                    ]),
                },
                BucketRule {
                    bucket: Bucket::ClaimsAccuracy,
                    keywords: list(&[
                        "watt", "capacity", "efficien", "output", "runtime", "rating", "spec",
                        "advertis",
                    ]),
                },
            ],
            suppression: SuppressionRule {
                capacity_terms: list(&["capacity", "wh", "kwh", "watt-hour", "watt hour"]),
                addon_terms: list(&[
                    "expansion",
                    "add-on",
                    "add on",
                    "addon",
                    "extra battery",
                    "expandable",
                ]),
            },
        }
    }
}

impl NormalizerPolicy {
    /// Buckets whose keyword list matches the lower-cased entry text. Falls
    /// back to ClaimsAccuracy when nothing matches — the tag set is never
    /// empty.
    pub fn tags_for(&self, text_lc: &str) -> BTreeSet<Bucket> {
        let mut tags: BTreeSet<Bucket> = self
            .bucket_rules
            .iter()
            .filter(|rule| rule.keywords.iter().any(|kw| term_hit(kw, text_lc)))
            .map(|rule| rule.bucket)
            .collect();
        if tags.is_empty() {
            tags.insert(Bucket::ClaimsAccuracy);
        }
        tags
    }
}

impl SuppressionRule {
    pub fn matches(&self, text_lc: &str) -> bool {
        let capacity = self.capacity_terms.iter().any(|t| term_hit(t, text_lc));
        let addon = self.addon_terms.iter().any(|t| term_hit(t, text_lc));
        capacity && addon
    }
}

/// Short terms match whole tokens (with a numeric prefix allowed, so "wh"
/// hits "1024wh"); longer terms match as substrings.
fn term_hit(term: &str, text_lc: &str) -> bool {
    if term.len() > 3 {
        return text_lc.contains(term);
    }
    text_lc
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| {
            token == term
                || (token.ends_with(term)
                    && token[..token.len() - term.len()]
                        .chars()
                        .all(|c| c.is_ascii_digit())
                    && token.len() > term.len())
        })
}
