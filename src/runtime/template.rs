//! `{variable}` interpolation against trigger data.
//!
//! Unknown variables are left in place verbatim.

use crate::workflow::types::TriggerData;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("variable pattern is valid")
});

/// Replace every `{name}` whose key exists in `context`
pub fn interpolate(template: &str, context: &TriggerData) -> String {
    VARIABLE
        .replace_all(template, |caps: &Captures| match context.get(&caps[1]) {
            Some(value) => render(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Interpolate every string nested inside a JSON value
pub fn interpolate_value(value: &Value, context: &TriggerData) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, context)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Strings are inserted raw, everything else as compact JSON
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
