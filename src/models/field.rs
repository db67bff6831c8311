//! Form field model: the closed field-kind enum, its capability table,
//! and the Active/Deleted field state.

use serde::{Deserialize, Serialize};

/// The kinds of form fields an assignment may carry.
///
/// This is a closed enum with a static capability table, replacing an
/// open string-keyed registry: every kind the form builder can emit is
/// known at compile time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FieldKind {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "select")]
    Select,
    #[serde(rename = "checkbox2")]
    Checkbox,
    #[serde(rename = "checkbox-group")]
    CheckboxGroup,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "textarea")]
    Textarea,
    #[serde(rename = "header")]
    Header,
    #[serde(rename = "paragraph")]
    Paragraph,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Select => "select",
            FieldKind::Checkbox => "checkbox2",
            FieldKind::CheckboxGroup => "checkbox-group",
            FieldKind::Date => "date",
            FieldKind::Number => "number",
            FieldKind::Textarea => "textarea",
            FieldKind::Header => "header",
            FieldKind::Paragraph => "paragraph",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(FieldKind::Text),
            "select" => Some(FieldKind::Select),
            "checkbox2" => Some(FieldKind::Checkbox),
            "checkbox-group" => Some(FieldKind::CheckboxGroup),
            "date" => Some(FieldKind::Date),
            "number" => Some(FieldKind::Number),
            "textarea" => Some(FieldKind::Textarea),
            "header" => Some(FieldKind::Header),
            "paragraph" => Some(FieldKind::Paragraph),
            _ => None,
        }
    }

    /// Whether this kind carries a choice list.
    pub fn accepts_choices(&self) -> bool {
        matches!(self, FieldKind::Select | FieldKind::CheckboxGroup)
    }

    /// Static kinds render content but never collect a value.
    pub fn is_static(&self) -> bool {
        matches!(self, FieldKind::Header | FieldKind::Paragraph)
    }

    /// Whether a single response may carry several values for this kind.
    pub fn multiple_values(&self) -> bool {
        matches!(self, FieldKind::CheckboxGroup)
    }
}

/// Placement state of a field after reconciliation.
///
/// A field is either live at a definite position or soft-deleted; the
/// pair of nullable-order and deleted-flag columns is never allowed to
/// disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Active { order: i64 },
    Deleted,
}

impl FieldState {
    /// Decode from the stored (ord, deleted) column pair.
    pub fn from_columns(ord: Option<i64>, deleted: bool) -> Self {
        match (ord, deleted) {
            (Some(order), false) => FieldState::Active { order },
            _ => FieldState::Deleted,
        }
    }

    /// Encode to the stored (ord, deleted) column pair.
    pub fn to_columns(&self) -> (Option<i64>, bool) {
        match self {
            FieldState::Active { order } => (Some(*order), false),
            FieldState::Deleted => (None, true),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, FieldState::Deleted)
    }
}

/// One input element of an assignment's form.
#[derive(Debug, Clone)]
pub struct Field {
    pub id: String,
    pub assignment_id: String,
    pub label: String,
    pub kind: FieldKind,
    pub help_text: String,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub required: bool,
    /// Show this field's values in the public gallery.
    pub gallery: bool,
    pub state: FieldState,
}

impl Field {
    /// The label as presented in exports, marking soft-deleted fields.
    pub fn export_label(&self) -> String {
        if self.state.is_deleted() {
            format!("{} (deleted)", self.label)
        } else {
            self.label.clone()
        }
    }
}

/// A choice presented by a select or checkbox-group field.
#[derive(Debug, Clone)]
pub struct Choice {
    pub id: String,
    pub field_id: String,
    pub label: String,
    pub value: String,
    pub ord: i64,
}

/// Wire shape of a choice inside a field definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceDef {
    pub label: String,
    pub value: String,
}

/// Wire shape of a live field, as consumed by the form renderer and the
/// form builder (round-trips through `FieldSpec` via the `name` id).
#[derive(Debug, Clone, Serialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub label: String,
    pub description: String,
    pub required: bool,
    pub gallery: bool,
    /// The field's persisted identifier.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<ChoiceDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl FieldDef {
    /// Assemble the rendered definition for a live field.
    pub fn new(field: &Field, choices: &[Choice]) -> Self {
        let values = if field.kind.accepts_choices() {
            Some(
                choices
                    .iter()
                    .filter(|c| c.field_id == field.id)
                    .map(|c| ChoiceDef {
                        label: c.label.clone(),
                        value: c.value.clone(),
                    })
                    .collect(),
            )
        } else {
            None
        };
        FieldDef {
            kind: field.kind,
            label: field.label.clone(),
            description: field.help_text.clone(),
            required: field.required,
            gallery: field.gallery,
            name: field.id.clone(),
            values,
            min: field.min,
            max: field.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_round_trip() {
        let kinds = [
            FieldKind::Text,
            FieldKind::Select,
            FieldKind::Checkbox,
            FieldKind::CheckboxGroup,
            FieldKind::Date,
            FieldKind::Number,
            FieldKind::Textarea,
            FieldKind::Header,
            FieldKind::Paragraph,
        ];
        for kind in kinds {
            assert_eq!(FieldKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(FieldKind::from_str("checkbox"), None);
    }

    #[test]
    fn test_capability_table() {
        assert!(FieldKind::Select.accepts_choices());
        assert!(FieldKind::CheckboxGroup.accepts_choices());
        assert!(!FieldKind::Text.accepts_choices());
        assert!(!FieldKind::Checkbox.accepts_choices());

        assert!(FieldKind::Header.is_static());
        assert!(FieldKind::Paragraph.is_static());
        assert!(!FieldKind::Select.is_static());

        assert!(FieldKind::CheckboxGroup.multiple_values());
        assert!(!FieldKind::Select.multiple_values());
    }

    #[test]
    fn test_field_state_columns() {
        assert_eq!(
            FieldState::from_columns(Some(3), false),
            FieldState::Active { order: 3 }
        );
        assert_eq!(FieldState::from_columns(None, true), FieldState::Deleted);
        // A row with no order is deleted no matter what the flag says.
        assert_eq!(FieldState::from_columns(None, false), FieldState::Deleted);

        assert_eq!(FieldState::Active { order: 0 }.to_columns(), (Some(0), false));
        assert_eq!(FieldState::Deleted.to_columns(), (None, true));
    }

    #[test]
    fn test_export_label_marks_deleted() {
        let field = Field {
            id: "f1".to_string(),
            assignment_id: "a1".to_string(),
            label: "Color".to_string(),
            kind: FieldKind::Text,
            help_text: String::new(),
            min: None,
            max: None,
            required: false,
            gallery: false,
            state: FieldState::Deleted,
        };
        assert_eq!(field.export_label(), "Color (deleted)");
    }
}
