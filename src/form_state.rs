//! Flat form value store, one owned instance per active form flow.
//!
//! Each flow (truck certification, site monitor, field monitor) constructs
//! its own `FormState` and tears it down when the flow completes; instances
//! are never shared between concurrently open flows.

use std::collections::HashMap;

use serde_json::Value;

use crate::schema::{Field, FormSchema};

/// Mapping from field name to current value. Last write wins; no history.
#[derive(Debug, Clone, Default)]
pub struct FormState {
    values: HashMap<String, Value>,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Point update: replaces exactly one key, preserves all others. No
    /// validation happens here; the interpretation engine validates at read
    /// time.
    pub fn set_value(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Atomic multi-key merge for batched updates (e.g. a scan action that
    /// fills several fields at once).
    pub fn set_values<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.values.extend(entries);
    }

    /// Merge schema-declared defaults under any values already set: fields
    /// the user has answered keep their answers, everything else gets its
    /// default or null. Safe to call again after a schema version bump.
    pub fn load_defaults(&mut self, schema: &FormSchema) {
        let fields = schema.sections.iter().flat_map(|s| s.fields.iter());
        self.merge_defaults(fields);
    }

    /// Defaults for one type definition in the type-keyed schema variant.
    /// A missing type key leaves the state untouched.
    pub fn load_type_defaults(&mut self, schema: &FormSchema, type_key: &str) {
        let Some(typedef) = schema.types.get(type_key) else {
            return;
        };
        self.merge_defaults(typedef.fields.iter());
    }

    fn merge_defaults<'a, I>(&mut self, fields: I)
    where
        I: Iterator<Item = &'a Field>,
    {
        let mut merged: HashMap<String, Value> = fields
            .map(|f| {
                (
                    f.name.clone(),
                    f.default_value.clone().unwrap_or(Value::Null),
                )
            })
            .collect();
        // existing user input is never clobbered by a defaults reload
        merged.extend(self.values.drain());
        self.values = merged;
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_with_defaults() -> FormSchema {
        FormSchema::from_value(json!({
            "formId": "truck-cert",
            "version": "1.0",
            "sections": [
                {"sectionId": "a", "order": 1, "fields": [
                    {"fieldId": "f1", "name": "x", "type": "text", "defaultValue": "schema-default"},
                    {"fieldId": "f2", "name": "y", "type": "toggle"}
                ]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_load_defaults_preserves_user_input() {
        let mut state = FormState::new();
        state.set_value("x", json!("user-typed"));
        state.load_defaults(&schema_with_defaults());

        assert_eq!(state.get("x"), Some(&json!("user-typed")));
        assert_eq!(state.get("y"), Some(&json!(null)));
    }

    #[test]
    fn test_load_defaults_fills_untouched_fields() {
        let mut state = FormState::new();
        state.load_defaults(&schema_with_defaults());
        assert_eq!(state.get("x"), Some(&json!("schema-default")));
    }

    #[test]
    fn test_set_value_is_point_update() {
        let mut state = FormState::new();
        state.set_value("a", json!(1));
        state.set_value("b", json!(2));
        state.set_value("a", json!(3));
        assert_eq!(state.get("a"), Some(&json!(3)));
        assert_eq!(state.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_set_values_merges_batch() {
        let mut state = FormState::new();
        state.set_value("keep", json!("kept"));
        state.set_values([
            ("plate".to_string(), json!("ABC-123")),
            ("vin".to_string(), json!("1FT...")),
        ]);
        assert_eq!(state.get("keep"), Some(&json!("kept")));
        assert_eq!(state.get("plate"), Some(&json!("ABC-123")));
        assert_eq!(state.get("vin"), Some(&json!("1FT...")));
    }

    #[test]
    fn test_load_type_defaults() {
        let schema = FormSchema::from_value(json!({
            "formId": "field-monitor",
            "version": "1.0",
            "types": {
                "vegetative": {"fields": [
                    {"fieldId": "f1", "name": "load_call", "type": "dropdown", "defaultValue": 50}
                ]}
            }
        }))
        .unwrap();

        let mut state = FormState::new();
        state.load_type_defaults(&schema, "vegetative");
        assert_eq!(state.get("load_call"), Some(&json!(50)));

        // unknown type key is a no-op
        state.load_type_defaults(&schema, "construction");
        assert_eq!(state.get("load_call"), Some(&json!(50)));
    }

    #[test]
    fn test_reset() {
        let mut state = FormState::new();
        state.set_value("a", json!(1));
        state.reset();
        assert!(state.values().is_empty());
    }
}
