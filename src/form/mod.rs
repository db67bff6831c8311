//! Form schema reconciliation.
//!
//! The form builder submits an ordered list of field specs; this module
//! validates them and computes a `FormPlan` — the complete target state
//! of an assignment's fields and choices. Planning is pure and happens
//! entirely in memory; the repository then applies the plan in a single
//! transaction. Computing final orders up front means the persisted rows
//! never pass through an intermediate unordered state.

mod sanitize;

pub use sanitize::{clean_text, MAX_TEXT_LEN};

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{Choice, Field, FieldKind};

/// One field as submitted by the form builder. Loosely typed so that
/// shape problems surface as validation messages, not decode failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldSpec {
    /// Identifier of the persisted field this spec refers to, if any.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub gallery: bool,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub values: Option<Vec<ChoiceSpec>>,
}

/// One choice of a choice-accepting field spec.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceSpec {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// A field spec that passed validation.
#[derive(Debug, Clone)]
pub struct ParsedSpec {
    pub name: Option<String>,
    pub label: String,
    pub kind: FieldKind,
    pub description: String,
    pub required: bool,
    pub gallery: bool,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub choices: Option<Vec<(String, String)>>,
}

/// Validate form-builder field specs, normalizing them for planning.
///
/// Mirrors the contract the builder widget relies on: at least one
/// field; every field a label and a known type; choice-accepting types
/// must supply their choices, each with both label and value.
pub fn validate_specs(specs: &[FieldSpec]) -> Result<Vec<ParsedSpec>, AppError> {
    if specs.is_empty() {
        return Err(AppError::Validation(
            "Having at least one field on the form is required".to_string(),
        ));
    }
    let mut parsed = Vec::with_capacity(specs.len());
    for spec in specs {
        let label = match spec.label.as_deref() {
            Some(label) if !label.is_empty() => label,
            _ => {
                return Err(AppError::Validation(
                    "Invalid form data: Missing label".to_string(),
                ))
            }
        };
        let kind_str = spec.kind.as_deref().unwrap_or("");
        if kind_str.is_empty() {
            return Err(AppError::Validation(format!(
                "Invalid form data: Missing type for {}",
                label
            )));
        }
        let kind = FieldKind::from_str(kind_str).ok_or_else(|| {
            AppError::Validation(format!("Invalid form data: Bad type {}", kind_str))
        })?;
        let choices = if kind.accepts_choices() {
            let values = spec.values.as_ref().ok_or_else(|| {
                AppError::Validation(format!("Invalid form data: {} requires choices", kind_str))
            })?;
            let mut choices = Vec::with_capacity(values.len());
            for value in values {
                let choice_label = match value.label.as_deref() {
                    Some(l) if !l.is_empty() => l,
                    _ => {
                        return Err(AppError::Validation(format!(
                            "Invalid form data: Missing label for choice of {}",
                            label
                        )))
                    }
                };
                let choice_value = match value.value.as_deref() {
                    Some(v) if !v.is_empty() => v,
                    _ => {
                        return Err(AppError::Validation(format!(
                            "Invalid form data: Missing value for choice {} of {}",
                            choice_label, label
                        )))
                    }
                };
                choices.push((choice_label.to_string(), choice_value.to_string()));
            }
            Some(choices)
        } else {
            None
        };
        parsed.push(ParsedSpec {
            name: spec.name.clone(),
            label: label.to_string(),
            kind,
            description: spec.description.clone().unwrap_or_default(),
            required: spec.required,
            gallery: spec.gallery,
            min: spec.min,
            max: spec.max,
            choices,
        });
    }
    Ok(parsed)
}

/// The complete target state of an assignment's form, ready to apply.
#[derive(Debug, Clone)]
pub struct FormPlan {
    /// Live fields in display order.
    pub fields: Vec<PlannedField>,
    /// Previously live fields not claimed by any spec.
    pub soft_deleted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlannedField {
    pub id: String,
    /// False when updating a persisted field in place.
    pub is_new: bool,
    pub label: String,
    pub kind: FieldKind,
    pub help_text: String,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub required: bool,
    pub gallery: bool,
    pub order: i64,
    /// When present, the field's choice list is replaced wholesale.
    pub choices: Option<Vec<PlannedChoice>>,
}

#[derive(Debug, Clone)]
pub struct PlannedChoice {
    pub id: String,
    pub is_new: bool,
    pub label: String,
    pub value: String,
    pub ord: i64,
}

/// Compute the reconciliation plan for `specs` against the persisted
/// fields and choices of one assignment.
///
/// Labels are sanitized and made unique within the pass; identity is
/// resolved through the spec's `name` where it names an unclaimed field
/// of this assignment, falling back to creation otherwise. Claimed
/// fields are (re)activated at their spec position; unclaimed live
/// fields are soft-deleted.
pub fn plan(existing_fields: &[Field], existing_choices: &[Choice], specs: &[ParsedSpec]) -> FormPlan {
    let by_id: HashMap<&str, &Field> = existing_fields
        .iter()
        .map(|f| (f.id.as_str(), f))
        .collect();
    let mut seen_labels = HashSet::new();
    let mut claimed: HashSet<String> = HashSet::new();
    let mut fields = Vec::with_capacity(specs.len());

    for (i, spec) in specs.iter().enumerate() {
        let label = uniquify_label(&mut seen_labels, clean_text(&spec.label));
        let help_text = clean_text(&spec.description);

        let existing = spec
            .name
            .as_deref()
            .and_then(|name| by_id.get(name).copied())
            .filter(|field| !claimed.contains(&field.id));
        let (id, is_new) = match existing {
            Some(field) => {
                claimed.insert(field.id.clone());
                (field.id.clone(), false)
            }
            None => (uuid::Uuid::new_v4().to_string(), true),
        };

        let choices = match (&spec.choices, spec.kind.accepts_choices()) {
            (Some(choice_specs), true) => Some(plan_choices(&id, is_new, choice_specs, existing_choices)),
            _ => None,
        };

        fields.push(PlannedField {
            id,
            is_new,
            label,
            kind: spec.kind,
            help_text,
            min: spec.min,
            max: spec.max,
            required: spec.required,
            gallery: spec.gallery,
            order: i as i64,
            choices,
        });
    }

    let soft_deleted = existing_fields
        .iter()
        .filter(|f| !f.state.is_deleted() && !claimed.contains(&f.id))
        .map(|f| f.id.clone())
        .collect();

    FormPlan {
        fields,
        soft_deleted,
    }
}

/// Plan the full replacement of a field's choice list, preserving the
/// row id of any prior choice with the same label.
fn plan_choices(
    field_id: &str,
    field_is_new: bool,
    choice_specs: &[(String, String)],
    existing_choices: &[Choice],
) -> Vec<PlannedChoice> {
    let mut prior: HashMap<&str, &Choice> = if field_is_new {
        HashMap::new()
    } else {
        existing_choices
            .iter()
            .filter(|c| c.field_id == field_id)
            .map(|c| (c.label.as_str(), c))
            .collect()
    };
    choice_specs
        .iter()
        .enumerate()
        .map(|(ord, (label, value))| {
            let label = clean_text(label);
            let value = clean_text(value);
            match prior.remove(label.as_str()) {
                Some(choice) => PlannedChoice {
                    id: choice.id.clone(),
                    is_new: false,
                    label,
                    value,
                    ord: ord as i64,
                },
                None => PlannedChoice {
                    id: uuid::Uuid::new_v4().to_string(),
                    is_new: true,
                    label,
                    value,
                    ord: ord as i64,
                },
            }
        })
        .collect()
}

/// Ensure `label` is unique within the pass, appending `-1`, `-2`, ...
/// and truncating the base so the result stays within the length cap.
fn uniquify_label(seen: &mut HashSet<String>, label: String) -> String {
    let mut new_label = label.clone();
    let mut i = 0;
    while seen.contains(&new_label) {
        i += 1;
        let postfix = i.to_string();
        let base: String = label
            .chars()
            .take(MAX_TEXT_LEN - 1 - postfix.len())
            .collect();
        new_label = format!("{}-{}", base, postfix);
    }
    seen.insert(new_label.clone());
    new_label
}
