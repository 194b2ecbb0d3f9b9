//! Form interpretation: per-field render instructions, required-field
//! completeness, and data-dependent next-route resolution.
//!
//! This layer composes the dependency resolver and formula evaluator over a
//! processed schema and the live form state. It hands the (excluded)
//! presentation layer plain data; it never renders anything itself.

use serde_json::Value;
use tracing::{debug, warn};

use crate::dependency::is_visible;
use crate::form_state::FormState;
use crate::formula;
use crate::schema::{
    value_key, Calculation, ConditionalNextSection, Field, FieldType, FormSchema, Section,
    TypeDefinition,
};

/// Renderer contract: which input widget the presentation layer should
/// mount for a field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Widget {
    TextInput,
    TextArea,
    EmailInput,
    PhoneInput,
    NumberInput,
    MeasurementInput,
    DatePicker,
    Toggle,
    Dropdown,
    ImageUpload,
    OptionSelector,
    Scanner,
    CalculatedDisplay,
    ImageDisplay,
}

pub fn widget_for(field_type: FieldType) -> Widget {
    match field_type {
        FieldType::Text => Widget::TextInput,
        FieldType::Textarea => Widget::TextArea,
        FieldType::Email => Widget::EmailInput,
        FieldType::Phone => Widget::PhoneInput,
        FieldType::Number => Widget::NumberInput,
        FieldType::Measurement => Widget::MeasurementInput,
        FieldType::Date => Widget::DatePicker,
        FieldType::Toggle => Widget::Toggle,
        FieldType::Dropdown => Widget::Dropdown,
        FieldType::ImageUpload => Widget::ImageUpload,
        FieldType::CustomSelector => Widget::OptionSelector,
        FieldType::Scan => Widget::Scanner,
        FieldType::CalculatedView => Widget::CalculatedDisplay,
        FieldType::ImageDisplay => Widget::ImageDisplay,
    }
}

/// One render instruction, emitted in schema-declared field order.
#[derive(Debug, Clone)]
pub struct FieldRender<'a> {
    pub field: &'a Field,
    pub widget: Widget,
    pub visible: bool,
    pub current_value: Option<&'a Value>,
    /// Evaluated formula result for `calculated_view` fields, full
    /// precision. `None` means indeterminate (arity/parse failure or a
    /// non-finite result); consumers display it as 0.
    pub computed_value: Option<f64>,
}

impl FieldRender<'_> {
    /// Display string for a calculated field: 2-decimal rounding plus the
    /// unit, indeterminate values rendered as 0.
    pub fn computed_display(&self) -> Option<String> {
        let calc = self.field.calculation.as_ref()?;
        let value = self.computed_value.unwrap_or(0.0);
        if calc.unit.is_empty() {
            Some(format!("{value:.2}"))
        } else {
            Some(format!("{value:.2} {}", calc.unit))
        }
    }
}

/// Render instructions for one wizard section.
pub fn render_section<'a>(section: &'a Section, state: &'a FormState) -> Vec<FieldRender<'a>> {
    render_fields(&section.fields, state)
}

/// Render instructions for one type definition (flat-type schema variant).
pub fn render_type<'a>(typedef: &'a TypeDefinition, state: &'a FormState) -> Vec<FieldRender<'a>> {
    render_fields(&typedef.fields, state)
}

fn render_fields<'a>(fields: &'a [Field], state: &'a FormState) -> Vec<FieldRender<'a>> {
    fields
        .iter()
        .map(|field| {
            let computed_value = match (&field.field_type, &field.calculation) {
                (FieldType::CalculatedView, Some(calc)) => compute(field, calc, state),
                (FieldType::CalculatedView, None) => {
                    warn!("calculated field '{}' has no calculation config", field.name);
                    None
                }
                _ => None,
            };
            FieldRender {
                field,
                widget: widget_for(field.field_type),
                visible: is_visible(&field.dependencies, state.values()),
                current_value: state.get(&field.name),
                computed_value,
            }
        })
        .collect()
}

fn compute(field: &Field, calc: &Calculation, state: &FormState) -> Option<f64> {
    let bindings: Vec<(String, f64)> = calc
        .variables
        .iter()
        .map(|name| (name.clone(), coerce_number(state.get(name))))
        .collect();

    match formula::evaluate(&calc.formula, &bindings) {
        Ok(value) if value.is_finite() => Some(value),
        Ok(_) => {
            debug!("non-finite result for calculated field '{}'", field.name);
            None
        }
        Err(e) => {
            warn!("calculation failed for field '{}': {}", field.name, e);
            None
        }
    }
}

/// Non-numeric and missing values coerce to 0.
fn coerce_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// A section is complete iff every required field has an answer. Toggles
/// only need a defined answer: `false` completes a toggle.
pub fn section_complete(section: &Section, state: &FormState) -> bool {
    section
        .fields
        .iter()
        .filter(|f| f.required)
        .all(|field| match state.get(&field.name) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) if field.field_type != FieldType::Toggle => !s.is_empty(),
            Some(_) => true,
        })
}

/// Opaque navigation target. The excluded navigation layer resolves it into
/// an actual screen transition; the engine never navigates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteToken {
    Section(String),
    Review,
    Summary,
}

/// Schemas spell the review step as a literal target id.
const REVIEW_TARGET: &str = "review";

fn route_for(target: &str) -> RouteToken {
    if target == REVIEW_TARGET {
        RouteToken::Review
    } else {
        RouteToken::Section(target.to_string())
    }
}

fn resolve_conditional(cond: &ConditionalNextSection, state: &FormState) -> Option<RouteToken> {
    let value = state.get(&cond.based_on_field)?;
    cond.mapping.get(&value_key(value)).map(|t| route_for(t))
}

/// Next-route decision, ordered precedence, first match wins:
///
/// 1. section explicitly marked last → review
/// 2. section-level dependency with a resolving conditional mapping
/// 3. first customSelector/toggle field with options: the selected option's
///    own `nextSectionId`, then that option's conditional mapping
/// 4. the section's default `nextSectionId`
/// 5. generic summary fallback
pub fn next_route(section: &Section, state: &FormState) -> RouteToken {
    if section.is_last {
        return RouteToken::Review;
    }

    for dep in &section.dependencies {
        if let Some(cond) = &dep.conditional_next_section {
            if let Some(route) = resolve_conditional(cond, state) {
                return route;
            }
        }
    }

    let routing_field = section
        .fields
        .iter()
        .find(|f| f.field_type.is_routing() && !f.options().is_empty());
    if let Some(field) = routing_field {
        let selected = state
            .get(&field.name)
            .and_then(|value| field.options().iter().find(|opt| &opt.value == value));
        if let Some(option) = selected {
            if let Some(target) = &option.next_section_id {
                return route_for(target);
            }
            if let Some(cond) = &option.conditional_next_section {
                if let Some(route) = resolve_conditional(cond, state) {
                    return route;
                }
            }
        }
    }

    if let Some(target) = &section.next_section_id {
        return route_for(target);
    }

    RouteToken::Summary
}

/// Order-adjacent neighbors of a section, for the wizard's back button and
/// progress chrome. Unknown section ids yield no neighbors.
pub fn adjacent_sections<'a>(
    schema: &'a FormSchema,
    section_id: &str,
) -> (Option<&'a Section>, Option<&'a Section>) {
    let ordered = schema.ordered_sections();
    let Some(index) = ordered.iter().position(|s| s.section_id == section_id) else {
        warn!("section id '{}' not found in loaded schema", section_id);
        return (None, None);
    };
    let previous = index.checked_sub(1).and_then(|i| ordered.get(i).copied());
    let next = ordered.get(index + 1).copied();
    (previous, next)
}
