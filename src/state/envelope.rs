//! The two-key envelope grammar shared by every persisted entity.
//!
//! An entity on disk is always `{"class": <discriminator>, "args": {...}}`,
//! nested entities repeat the same shape, and string sets travel as
//! `{"__set__": [...]}` so they survive the trip through JSON. Everything
//! else is plain JSON. The helpers here only handle the grammar; which
//! classes exist and how their args map onto fields is the registry's
//! business in [`super::model`].

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::StateError;

/// Key carrying the type discriminator.
pub(crate) const CLASS_KEY: &str = "class";
/// Key carrying the field map.
pub(crate) const ARGS_KEY: &str = "args";
/// Marker key for persisted string sets.
pub(crate) const SET_KEY: &str = "__set__";

/// Wrap an args map in the envelope shape under `class`.
pub(crate) fn seal(class: &str, args: Map<String, Value>) -> Value {
    let mut envelope = Map::new();
    envelope.insert(CLASS_KEY.to_string(), Value::String(class.to_string()));
    envelope.insert(ARGS_KEY.to_string(), Value::Object(args));
    Value::Object(envelope)
}

/// Split a persisted value into its discriminator and args map.
///
/// Anything that is not a two-key envelope object is an
/// [`StateError::InvalidEnvelope`].
pub(crate) fn open(value: &Value) -> Result<(&str, &Map<String, Value>), StateError> {
    let envelope = value
        .as_object()
        .ok_or_else(|| StateError::InvalidEnvelope("persisted value is not a JSON object".to_string()))?;
    let class = envelope
        .get(CLASS_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            StateError::InvalidEnvelope(format!("missing string '{CLASS_KEY}' discriminator"))
        })?;
    let args = envelope
        .get(ARGS_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| {
            StateError::InvalidEnvelope(format!("'{class}' carries no '{ARGS_KEY}' object"))
        })?;
    Ok((class, args))
}

/// Encode a string set as `{"__set__": [...]}`, preserving sorted order.
pub(crate) fn encode_set(items: &BTreeSet<String>) -> Value {
    let list: Vec<Value> = items
        .iter()
        .map(|item| Value::String(item.clone()))
        .collect();
    let mut wrapper = Map::new();
    wrapper.insert(SET_KEY.to_string(), Value::Array(list));
    Value::Object(wrapper)
}

/// Decode a `{"__set__": [...]}` wrapper back into a string set.
pub(crate) fn decode_set(
    class: &str,
    field: &str,
    value: &Value,
) -> Result<BTreeSet<String>, StateError> {
    let items = value
        .get(SET_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| wrong_type(class, field, "a {\"__set__\": [...]} wrapper"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| wrong_type(class, field, "a list of strings"))
        })
        .collect()
}

/// Read a constructor argument that must be present and must be a string.
pub(crate) fn require_str(
    class: &str,
    args: &Map<String, Value>,
    field: &str,
) -> Result<String, StateError> {
    match args.get(field) {
        None => Err(StateError::MissingField {
            class: class.to_string(),
            field: field.to_string(),
        }),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(_) => Err(wrong_type(class, field, "a string")),
    }
}

/// Read an optional patch argument, deserializing it into `T` when present.
///
/// Absent keys yield `Ok(None)` so the field keeps its constructed default;
/// present keys that do not fit `T` are a [`StateError::WrongType`].
pub(crate) fn field<T: DeserializeOwned>(
    class: &str,
    args: &Map<String, Value>,
    field: &str,
    expected: &'static str,
) -> Result<Option<T>, StateError> {
    match args.get(field) {
        None => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|_| wrong_type(class, field, expected)),
    }
}

fn wrong_type(class: &str, field: &str, expected: &'static str) -> StateError {
    StateError::WrongType {
        class: class.to_string(),
        field: field.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seal_and_open_round_trip() {
        let mut args = Map::new();
        args.insert("name".to_string(), json!("sale price"));
        let sealed = seal("EndogenousVariable", args);

        let (class, opened) = open(&sealed).unwrap();
        assert_eq!(class, "EndogenousVariable");
        assert_eq!(opened.get("name"), Some(&json!("sale price")));
    }

    #[test]
    fn test_open_rejects_non_objects() {
        let value = json!(["not", "an", "envelope"]);
        let result = open(&value);
        assert!(matches!(result, Err(StateError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_open_rejects_missing_class() {
        let value = json!({ "args": {} });
        let result = open(&value);
        assert!(matches!(result, Err(StateError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_open_rejects_missing_args() {
        let value = json!({ "class": "CausalGraph" });
        let result = open(&value);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("CausalGraph"));
    }

    #[test]
    fn test_set_wrapper_round_trip() {
        let items: BTreeSet<String> = ["zeta", "alpha"].iter().map(|s| s.to_string()).collect();
        let encoded = encode_set(&items);
        assert_eq!(encoded, json!({ "__set__": ["alpha", "zeta"] }));

        let decoded = decode_set("CausalGraph", "edges", &encoded).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn test_decode_set_rejects_bare_lists() {
        let result = decode_set("CausalGraph", "edges", &json!(["alpha"]));
        assert!(matches!(
            result,
            Err(StateError::WrongType { ref field, .. }) if field == "edges"
        ));
    }

    #[test]
    fn test_require_str_reports_the_missing_field() {
        let args = Map::new();
        let error = require_str("ExogenousVariable", &args, "name").unwrap_err();
        assert!(matches!(
            error,
            StateError::MissingField { ref class, ref field }
                if class == "ExogenousVariable" && field == "name"
        ));
    }

    #[test]
    fn test_field_absent_keeps_the_default() {
        let args = Map::new();
        let value: Option<Vec<String>> = field("CausalGraph", &args, "variables", "a list").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_field_with_wrong_shape_errors() {
        let mut args = Map::new();
        args.insert("units".to_string(), json!(42));
        let result: Result<Option<String>, _> = field("EndogenousVariable", &args, "units", "a string");
        assert!(matches!(result, Err(StateError::WrongType { .. })));
    }
}
