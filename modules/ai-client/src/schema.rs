use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// Trait for types the generator is asked to produce.
///
/// Automatically implemented for any type that implements `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Generate a strict tool-input schema for this type.
    ///
    /// The schema is tightened before being sent:
    /// 1. `additionalProperties: false` on every object
    /// 2. every property listed in `required`, nullable ones included
    /// 3. `$ref`s inlined so the schema is self-contained
    fn tool_schema() -> serde_json::Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        tighten_objects(&mut value);
        inline_definitions(&mut value);

        if let serde_json::Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
        }

        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn tighten_objects(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if map.get("type") == Some(&serde_json::Value::String("object".to_string())) {
                map.insert(
                    "additionalProperties".to_string(),
                    serde_json::Value::Bool(false),
                );

                if let Some(serde_json::Value::Object(props)) = map.get("properties") {
                    let all_keys: Vec<serde_json::Value> = props
                        .keys()
                        .map(|k| serde_json::Value::String(k.clone()))
                        .collect();
                    map.insert("required".to_string(), serde_json::Value::Array(all_keys));
                }
            }

            for (_, v) in map.iter_mut() {
                tighten_objects(v);
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                tighten_objects(item);
            }
        }
        _ => {}
    }
}

fn inline_definitions(value: &mut serde_json::Value) {
    let definitions = if let serde_json::Value::Object(map) = value {
        map.get("definitions").cloned()
    } else {
        None
    };

    if let Some(defs) = definitions {
        inline_recursive(value, &defs);
    }
}

fn inline_recursive(value: &mut serde_json::Value, definitions: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(ref_path)) = map.get("$ref").cloned() {
                if ref_path.starts_with("#/definitions/") {
                    let type_name = ref_path.trim_start_matches("#/definitions/");
                    if let Some(def) = definitions.get(type_name) {
                        *value = def.clone();
                        inline_recursive(value, definitions);
                        return;
                    }
                }
            }

            // schemars wraps single-variant refs in allOf
            if let Some(serde_json::Value::Array(all_of)) = map.get("allOf").cloned() {
                if all_of.len() == 1 {
                    *value = all_of.into_iter().next().unwrap();
                    inline_recursive(value, definitions);
                    return;
                }
            }

            for (_, v) in map.iter_mut() {
                inline_recursive(v, definitions);
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                inline_recursive(item, definitions);
            }
        }
        _ => {}
    }
}
