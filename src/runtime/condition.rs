//! Condition evaluation against trigger data.
//!
//! Logic is decided once for the whole list: a single condition carrying
//! `logic = "OR"` (any case) turns the list into an OR, otherwise it is an AND.

use crate::error::ConditionError;
use crate::workflow::types::{Condition, Operator, TriggerData};
use serde_json::Value;

/// Evaluate a condition list. An empty list always passes.
pub fn evaluate(conditions: &[Condition], context: &TriggerData) -> Result<bool, ConditionError> {
    if conditions.is_empty() {
        return Ok(true);
    }

    let use_or = conditions.iter().any(|c| {
        c.logic
            .as_deref()
            .is_some_and(|logic| logic.eq_ignore_ascii_case("or"))
    });

    if use_or {
        for condition in conditions {
            if evaluate_condition(condition, context)? {
                return Ok(true);
            }
        }
        Ok(false)
    } else {
        for condition in conditions {
            if !evaluate_condition(condition, context)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Evaluate one condition. A missing field only passes `not_equals`.
pub fn evaluate_condition(condition: &Condition, context: &TriggerData) -> Result<bool, ConditionError> {
    let actual = match context.get(&condition.field) {
        Some(value) => value,
        None if condition.operator == Operator::NotEquals => return Ok(true),
        None => return Err(ConditionError::MissingField(condition.field.clone())),
    };
    let expected = &condition.value;
    let op = condition.operator;

    match op {
        Operator::Equals => Ok(values_equal(actual, expected)),
        Operator::NotEquals => Ok(!values_equal(actual, expected)),
        Operator::GreaterThan => Ok(as_number(op, actual)? > as_number(op, expected)?),
        Operator::GreaterOrEqual => Ok(as_number(op, actual)? >= as_number(op, expected)?),
        Operator::LessThan => Ok(as_number(op, actual)? < as_number(op, expected)?),
        Operator::LessOrEqual => Ok(as_number(op, actual)? <= as_number(op, expected)?),
        Operator::Contains => {
            let (haystack, needle) = as_lowercase_pair(op, actual, expected)?;
            Ok(haystack.contains(&needle))
        }
        Operator::NotContains => {
            let (haystack, needle) = as_lowercase_pair(op, actual, expected)?;
            Ok(!haystack.contains(&needle))
        }
        Operator::StartsWith => {
            let (haystack, prefix) = as_lowercase_pair(op, actual, expected)?;
            Ok(haystack.starts_with(&prefix))
        }
        Operator::EndsWith => {
            let (haystack, suffix) = as_lowercase_pair(op, actual, expected)?;
            Ok(haystack.ends_with(&suffix))
        }
        Operator::InList => Ok(as_list(op, expected)?.iter().any(|item| values_equal(actual, item))),
        Operator::NotInList => Ok(!as_list(op, expected)?.iter().any(|item| values_equal(actual, item))),
    }
}

/// Structural equality over JSON values
///
/// Numbers compare by their f64 value so `5` equals `5.0`; objects compare
/// key by key regardless of order.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => false,
    }
}

fn as_number(op: Operator, value: &Value) -> Result<f64, ConditionError> {
    value.as_f64().ok_or_else(|| ConditionError::NotNumeric {
        operator: op.as_str(),
        value: value.to_string(),
    })
}

fn as_lowercase_pair(op: Operator, actual: &Value, expected: &Value) -> Result<(String, String), ConditionError> {
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(b)) => Ok((a.to_lowercase(), b.to_lowercase())),
        _ => Err(ConditionError::NotString { operator: op.as_str() }),
    }
}

fn as_list(op: Operator, value: &Value) -> Result<&Vec<Value>, ConditionError> {
    value
        .as_array()
        .ok_or(ConditionError::NotAList { operator: op.as_str() })
}
