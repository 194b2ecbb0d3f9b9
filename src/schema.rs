//! Form schema types.
//!
//! These match the JSON documents served by the schema provider: a versioned
//! document holding either a flat list of wizard sections (truck
//! certification) or a map from a type key to a type definition (site/field
//! monitoring). Field values everywhere are `serde_json::Value`, which gives
//! the strict, type-sensitive equality the dependency rules require.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::SchemaError;

fn default_true() -> bool {
    true
}

/// Schema version tag. Servers send either a string or a number; both
/// normalize to the string form and compare by string equality. There is no
/// ordering: any difference triggers reprocessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for VersionToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(Self(s)),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "version must be a string or number, got {other}"
            ))),
        }
    }
}

/// Input widget type declared by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Email,
    Phone,
    Number,
    Measurement,
    Date,
    Toggle,
    Dropdown,
    #[serde(rename = "imageUpload")]
    ImageUpload,
    #[serde(rename = "customSelector")]
    CustomSelector,
    Scan,
    #[serde(rename = "calculated_view")]
    CalculatedView,
    #[serde(rename = "imagedisplay")]
    ImageDisplay,
}

impl FieldType {
    /// Field types whose selected option may carry a navigation override.
    pub fn is_routing(self) -> bool {
        matches!(self, FieldType::CustomSelector | FieldType::Toggle)
    }
}

/// Dependency predicate kind. Unknown kinds are preserved verbatim so the
/// resolver can apply its fail-open policy and log them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "isNotEmpty")]
    IsNotEmpty,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyAction {
    pub action: String,
}

/// A predicate over current form values gating visibility or routing.
/// Section-level routing dependencies may omit the field/condition pair and
/// carry only a `conditionalNextSection`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(rename = "fieldId", default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<DependencyAction>,
    #[serde(
        rename = "conditionalNextSection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub conditional_next_section: Option<ConditionalNextSection>,
}

/// Value-keyed branch table: route to `mapping[value_key(state[based_on_field])]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalNextSection {
    #[serde(rename = "basedOnField")]
    pub based_on_field: String,
    pub mapping: HashMap<String, String>,
}

/// Remote image plus the local handle the asset cache fills in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "localUri", default, skip_serializing_if = "Option::is_none")]
    pub local_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldOption {
    #[serde(default)]
    pub label: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<ImageRef>,
    #[serde(
        rename = "nextSectionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_section_id: Option<String>,
    #[serde(
        rename = "conditionalNextSection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub conditional_next_section: Option<ConditionalNextSection>,
}

/// Option lists arrive either as a plain array or wrapped in a
/// `{type, data}` object. Both shapes deserialize; `items()` flattens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldOptions {
    Plain(Vec<FieldOption>),
    Structured {
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        data: Vec<FieldOption>,
    },
}

impl FieldOptions {
    pub fn items(&self) -> &[FieldOption] {
        match self {
            FieldOptions::Plain(items) => items,
            FieldOptions::Structured { data, .. } => data,
        }
    }

    pub fn items_mut(&mut self) -> &mut [FieldOption] {
        match self {
            FieldOptions::Plain(items) => items,
            FieldOptions::Structured { data, .. } => data,
        }
    }
}

/// Upload constraints for `imageUpload` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(rename = "maxFiles", default, skip_serializing_if = "Option::is_none")]
    pub max_files: Option<u32>,
    #[serde(
        rename = "allowedTypes",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub allowed_types: Vec<String>,
}

/// Formula over other fields; `variables` lists, in order, the field names
/// the formula's unique identifier tokens bind to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calculation {
    pub formula: String,
    pub variables: Vec<String>,
    #[serde(default)]
    pub unit: String,
}

/// One schema-declared input unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    #[serde(rename = "fieldId")]
    pub field_id: String,
    /// Machine name; the key into form values.
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(default)]
    pub multiline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<FieldOptions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<Calculation>,
    #[serde(
        rename = "defaultValue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_value: Option<Value>,
    #[serde(rename = "ref_img", default, skip_serializing_if = "Option::is_none")]
    pub ref_img: Option<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<UploadConfig>,
}

impl Field {
    /// Flat option list regardless of wire shape; empty if none declared.
    pub fn options(&self) -> &[FieldOption] {
        self.options.as_ref().map(FieldOptions::items).unwrap_or(&[])
    }
}

/// One wizard screen in the sections-variant schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    #[serde(rename = "sectionId")]
    pub section_id: String,
    #[serde(default)]
    pub title: String,
    /// Integer display order; sections are presented sorted by this.
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(
        rename = "nextSectionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_section_id: Option<String>,
    #[serde(rename = "isLast", default)]
    pub is_last: bool,
}

/// Per-type field list in the type-keyed schema variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// A versioned schema document, immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchema {
    #[serde(rename = "formId")]
    pub form_id: String,
    pub version: VersionToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Total sections along the longest path, for progress chrome.
    #[serde(
        rename = "totalSections",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_sections: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, TypeDefinition>,
}

impl FormSchema {
    /// Parse and structurally validate a fetched document. Missing
    /// identifier/version fields or an empty body are `Validation` errors.
    pub fn from_value(doc: Value) -> Result<Self, SchemaError> {
        let schema: FormSchema =
            serde_json::from_value(doc).map_err(|e| SchemaError::Validation(e.to_string()))?;
        if schema.form_id.is_empty() {
            return Err(SchemaError::Validation("formId is empty".to_string()));
        }
        if schema.sections.is_empty() && schema.types.is_empty() {
            return Err(SchemaError::Validation(
                "schema declares neither sections nor types".to_string(),
            ));
        }
        Ok(schema)
    }

    /// Sections sorted by display order.
    pub fn ordered_sections(&self) -> Vec<&Section> {
        let mut sections: Vec<&Section> = self.sections.iter().collect();
        sections.sort_by_key(|s| s.order);
        sections
    }

    pub fn find_section(&self, section_id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    /// Progress-indicator total: the declared `totalSections` when present,
    /// otherwise the section count.
    pub fn total_sections(&self) -> usize {
        self.total_sections
            .map(|n| n as usize)
            .unwrap_or(self.sections.len())
    }

    /// Every field in document order: sections first, then type definitions
    /// (type keys in lexical order, so index collisions are deterministic).
    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.sections
            .iter()
            .flat_map(|s| s.fields.iter())
            .chain(self.types.values().flat_map(|t| t.fields.iter()))
    }
}

/// Derived mapping from field name to field, for O(1) lookups during review
/// and option resolution. Built once per schema version.
pub type FieldIndex = HashMap<String, Field>;

/// Build the field index by flat iteration. Field names are expected unique
/// by contract, not enforced: a later duplicate wins, and the colliding
/// names are returned (and logged) as an authoring diagnostic.
pub fn build_field_index(schema: &FormSchema) -> (FieldIndex, Vec<String>) {
    let mut index = FieldIndex::new();
    let mut collisions = Vec::new();
    for field in schema.all_fields() {
        if index.insert(field.name.clone(), field.clone()).is_some() {
            collisions.push(field.name.clone());
        }
    }
    if !collisions.is_empty() {
        warn!("duplicate field names in schema: {:?}", collisions);
    }
    (index, collisions)
}

/// Stringify a form value the way conditional mappings key it: strings
/// as-is, booleans as `true`/`false`, whole numbers without a fraction.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9e15 => {
                        format!("{}", f as i64)
                    }
                    _ => n.to_string(),
                }
            }
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_section_doc() -> Value {
        json!({
            "formId": "truck-cert",
            "version": "2.1",
            "sections": [
                {
                    "sectionId": "vehicle",
                    "title": "Vehicle",
                    "order": 1,
                    "fields": [
                        {"fieldId": "f1", "name": "plate", "type": "text", "label": "Plate", "required": true},
                        {"fieldId": "f2", "name": "bed_length", "type": "measurement", "label": "Bed length"}
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_parse_sections_variant() {
        let schema = FormSchema::from_value(minimal_section_doc()).unwrap();
        assert_eq!(schema.form_id, "truck-cert");
        assert_eq!(schema.version.as_str(), "2.1");
        assert_eq!(schema.sections.len(), 1);
        assert_eq!(schema.sections[0].fields[0].field_type, FieldType::Text);
        assert!(schema.sections[0].fields[0].editable);
    }

    #[test]
    fn test_parse_types_variant() {
        let doc = json!({
            "formId": "field-monitor",
            "version": 3,
            "types": {
                "vegetative": {
                    "fields": [
                        {"fieldId": "f1", "name": "load_call", "type": "dropdown"}
                    ]
                }
            }
        });
        let schema = FormSchema::from_value(doc).unwrap();
        assert_eq!(schema.version.as_str(), "3");
        assert!(schema.types.contains_key("vegetative"));
    }

    #[test]
    fn test_missing_version_is_validation_error() {
        let doc = json!({"formId": "truck-cert", "sections": []});
        assert!(matches!(
            FormSchema::from_value(doc),
            Err(SchemaError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_body_is_validation_error() {
        let doc = json!({"formId": "truck-cert", "version": "1.0"});
        assert!(matches!(
            FormSchema::from_value(doc),
            Err(SchemaError::Validation(_))
        ));
    }

    #[test]
    fn test_version_token_number_equals_string() {
        let from_number: VersionToken = serde_json::from_value(json!(2)).unwrap();
        let from_string: VersionToken = serde_json::from_value(json!("2")).unwrap();
        assert_eq!(from_number, from_string);
    }

    #[test]
    fn test_options_both_wire_shapes() {
        let plain: FieldOptions =
            serde_json::from_value(json!([{"label": "Yes", "value": true}])).unwrap();
        assert_eq!(plain.items().len(), 1);

        let structured: FieldOptions = serde_json::from_value(json!({
            "type": "static",
            "data": [{"label": "Oak", "value": "oak"}, {"label": "Pine", "value": "pine"}]
        }))
        .unwrap();
        assert_eq!(structured.items().len(), 2);
        assert_eq!(structured.items()[1].label, "Pine");
    }

    #[test]
    fn test_unknown_condition_roundtrips() {
        let dep: Dependency = serde_json::from_value(json!({
            "fieldId": "x",
            "condition": "matchesRegex",
            "value": "a.*"
        }))
        .unwrap();
        assert_eq!(
            dep.condition,
            Some(Condition::Other("matchesRegex".to_string()))
        );
    }

    #[test]
    fn test_field_index_collision_reported() {
        let doc = json!({
            "formId": "truck-cert",
            "version": "1.0",
            "sections": [
                {"sectionId": "a", "order": 1, "fields": [
                    {"fieldId": "f1", "name": "plate", "type": "text"}
                ]},
                {"sectionId": "b", "order": 2, "fields": [
                    {"fieldId": "f2", "name": "plate", "type": "textarea"}
                ]}
            ]
        });
        let schema = FormSchema::from_value(doc).unwrap();
        let (index, collisions) = build_field_index(&schema);
        assert_eq!(collisions, vec!["plate".to_string()]);
        // later occurrence wins
        assert_eq!(index["plate"].field_type, FieldType::Textarea);
    }

    #[test]
    fn test_ordered_sections_sorts_by_order() {
        let doc = json!({
            "formId": "truck-cert",
            "version": "1.0",
            "sections": [
                {"sectionId": "second", "order": 2, "fields": []},
                {"sectionId": "first", "order": 1, "fields": []}
            ]
        });
        let schema = FormSchema::from_value(doc).unwrap();
        let ordered = schema.ordered_sections();
        assert_eq!(ordered[0].section_id, "first");
        assert_eq!(ordered[1].section_id, "second");
    }

    #[test]
    fn test_value_key() {
        assert_eq!(value_key(&json!("oak")), "oak");
        assert_eq!(value_key(&json!(true)), "true");
        assert_eq!(value_key(&json!(5)), "5");
        assert_eq!(value_key(&json!(5.5)), "5.5");
        assert_eq!(value_key(&json!(null)), "");
    }
}
