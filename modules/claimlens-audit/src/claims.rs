//! Stage 1: claim extraction.
//!
//! Pure transform from a subject's attribute bag to an ordered claim list.
//! This stage has no failure path — the worst case is a minimal identity
//! profile, which keeps the rest of the pipeline unblocked.

use serde_json::Value;

use claimlens_common::{ClaimField, Subject};

/// Catalog bookkeeping keys that are not product claims.
const SKIP_KEYS: &[&str] = &["id", "created_at", "updated_at", "internal_notes"];

/// Values that mean "the manufacturer said nothing".
const EMPTY_VALUES: &[&str] = &["not specified", "null", "undefined", "", "false"];

/// Extract the claim profile from a subject's attribute bag.
pub fn extract_claims(subject: &Subject) -> Vec<ClaimField> {
    let mut fields = Vec::new();

    match &subject.attributes {
        Value::Array(items) => {
            for item in items {
                let label = item.get("label").and_then(Value::as_str);
                let value = item.get("value");
                if let (Some(label), Some(value)) = (label, value) {
                    if let Some(value) = stringify(value) {
                        fields.push(ClaimField {
                            label: humanize(label),
                            value,
                        });
                    }
                }
            }
        }
        Value::Object(map) => flatten_into(map, &mut fields),
        _ => {}
    }

    fields.retain(|f| !is_empty_value(&f.value));

    if fields.is_empty() {
        return identity_profile(subject);
    }

    fields
}

fn flatten_into(map: &serde_json::Map<String, Value>, out: &mut Vec<ClaimField>) {
    for (key, value) in map {
        if key.starts_with('_') || SKIP_KEYS.contains(&key.as_str()) {
            continue;
        }
        match value {
            Value::Object(nested) => flatten_into(nested, out),
            Value::Array(items) => {
                let scalars: Vec<String> = items.iter().filter_map(stringify).collect();
                if !scalars.is_empty() {
                    out.push(ClaimField {
                        label: humanize(key),
                        value: scalars.join(", "),
                    });
                }
            }
            other => {
                if let Some(value) = stringify(other) {
                    out.push(ClaimField {
                        label: humanize(key),
                        value,
                    });
                }
            }
        }
    }
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        _ => None,
    }
}

fn is_empty_value(value: &str) -> bool {
    let trimmed = value.trim().to_lowercase();
    EMPTY_VALUES.contains(&trimmed.as_str())
}

/// Turn a snake_case attribute key into a human label.
fn humanize(key: &str) -> String {
    key.split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Minimal fallback when every attribute was filtered out.
fn identity_profile(subject: &Subject) -> Vec<ClaimField> {
    let mut fields = vec![
        ClaimField {
            label: "Brand".to_string(),
            value: subject.brand.clone(),
        },
        ClaimField {
            label: "Model".to_string(),
            value: subject.model.clone(),
        },
        ClaimField {
            label: "Category".to_string(),
            value: subject.category.clone(),
        },
    ];
    if let Some(weight) = subject.weight_kg {
        fields.push(ClaimField {
            label: "Weight".to_string(),
            value: format!("{weight} kg"),
        });
    }
    if let Some(price) = subject.price {
        fields.push(ClaimField {
            label: "Price".to_string(),
            value: format!("${price:.2}"),
        });
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn subject(attributes: Value) -> Subject {
        Subject {
            id: Uuid::new_v4(),
            brand: "Acme".to_string(),
            model: "PowerCube 1000".to_string(),
            category: "Portable Power Station".to_string(),
            weight_kg: Some(11.5),
            price: Some(899.0),
            attributes,
        }
    }

    #[test]
    fn flattens_nested_groups_and_humanizes_keys() {
        let claims = extract_claims(&subject(json!({
            "battery": {
                "rated_capacity": "1024Wh",
                "cell_chemistry": "LiFePO4"
            },
            "ac_output": "1800W"
        })));

        let labels: Vec<&str> = claims.iter().map(|c| c.label.as_str()).collect();
        assert!(labels.contains(&"Rated Capacity"));
        assert!(labels.contains(&"Cell Chemistry"));
        assert!(labels.contains(&"Ac Output"));
    }

    #[test]
    fn accepts_label_value_arrays() {
        let claims = extract_claims(&subject(json!([
            {"label": "rated_capacity", "value": "1024Wh"},
            {"label": "cycle_life", "value": 3000}
        ])));
        assert_eq!(
            claims,
            vec![
                ClaimField {
                    label: "Rated Capacity".to_string(),
                    value: "1024Wh".to_string()
                },
                ClaimField {
                    label: "Cycle Life".to_string(),
                    value: "3000".to_string()
                },
            ]
        );
    }

    #[test]
    fn filters_placeholder_values() {
        let claims = extract_claims(&subject(json!({
            "solar_input": "Not Specified",
            "ups_mode": "false",
            "wireless_charging": null,
            "blank": "  ",
            "rated_capacity": "1024Wh"
        })));
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].label, "Rated Capacity");
    }

    #[test]
    fn skips_bookkeeping_keys() {
        let claims = extract_claims(&subject(json!({
            "id": "sku-123",
            "_revision": 4,
            "created_at": "2026-01-01",
            "rated_capacity": "1024Wh"
        })));
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn empty_bag_falls_back_to_identity_profile() {
        let claims = extract_claims(&subject(json!({})));
        let labels: Vec<&str> = claims.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Brand", "Model", "Category", "Weight", "Price"]);
        assert_eq!(claims[3].value, "11.5 kg");
        assert_eq!(claims[4].value, "$899.00");
    }

    #[test]
    fn all_filtered_bag_falls_back_too() {
        let claims = extract_claims(&subject(json!({"a": "null", "b": "undefined"})));
        assert_eq!(claims[0].label, "Brand");
    }
}
