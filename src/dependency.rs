//! Visibility predicate evaluation over the live form state.
//!
//! Pure functions, no async. Dependencies evaluate against current form
//! values, never against the schema.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::schema::{Condition, Dependency};

/// True iff every dependency evaluates true (logical AND). An empty or
/// absent dependency list means visible.
pub fn is_visible(dependencies: &[Dependency], values: &HashMap<String, Value>) -> bool {
    dependencies.iter().all(|dep| evaluate(dep, values))
}

fn evaluate(dep: &Dependency, values: &HashMap<String, Value>) -> bool {
    // routing-only dependencies carry no condition and never gate visibility
    let Some(condition) = &dep.condition else {
        return true;
    };

    let field_value = dep.field_id.as_deref().and_then(|id| values.get(id));

    match condition {
        // strict equality: a string "true" does not equal boolean true
        Condition::Equals => match (&dep.value, field_value) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => false,
        },
        Condition::IsNotEmpty => is_not_empty(field_value),
        Condition::Other(kind) => {
            // Fail-open policy: an unrecognized condition never hides the
            // subject, but schema authors should see it in the logs.
            warn!(
                "unknown dependency condition '{}' on field {:?}, treating as visible",
                kind, dep.field_id
            );
            true
        }
    }
}

fn is_not_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}
