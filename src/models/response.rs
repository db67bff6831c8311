//! Response and value models, submitter identity, and the value
//! aggregation rules shared by the API serializers and the CSV export.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::field::Field;

/// The identity a response is attributed to for exhaustion and
/// non-repetition checks: an authenticated user reference or, for
/// anonymous submissions, the client IP address. Never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(String),
    Ip(String),
}

impl Identity {
    /// Resolve from optional user / ip inputs; a user reference wins.
    pub fn resolve(user: Option<&str>, ip_address: Option<&str>) -> Option<Self> {
        match (user, ip_address) {
            (Some(u), _) if !u.is_empty() => Some(Identity::User(u.to_string())),
            (_, Some(ip)) if !ip.is_empty() => Some(Identity::Ip(ip.to_string())),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            Identity::User(u) => Some(u),
            Identity::Ip(_) => None,
        }
    }

    pub fn ip_address(&self) -> Option<&str> {
        match self {
            Identity::User(_) => None,
            Identity::Ip(ip) => Some(ip),
        }
    }
}

/// One completed submission against an assignment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub assignment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_id: Option<String>,
    pub public: bool,
    pub skip: bool,
    /// Ordinal count of this identity's completions against this datum;
    /// always 1 outside multiple-per-page assignments.
    pub number: i64,
    pub flag: bool,
    pub gallery: bool,
    pub tags: Vec<String>,
    pub datetime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_datetime: Option<String>,
}

impl Response {
    /// The name shown for this response's submitter.
    pub fn submitter(&self) -> &str {
        match (&self.user, &self.ip_address) {
            (Some(user), _) => user,
            (None, Some(_)) | (None, None) => "Anonymous",
        }
    }
}

/// One field's answer within a response. `original_value` keeps the
/// as-submitted value across admin edits so a response can be reverted.
#[derive(Debug, Clone)]
pub struct Value {
    pub id: String,
    pub response_id: String,
    pub field_id: String,
    pub value: String,
    pub original_value: String,
}

/// Request body for submitting a response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponseRequest {
    /// Authenticated user reference, when present.
    #[serde(default)]
    pub user: Option<String>,
    /// Client address for anonymous submissions.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Display name volunteered by an anonymous submitter.
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// The datum this submission is about, as offered by the selector.
    #[serde(default)]
    pub data_id: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub skip: bool,
    /// Field id -> submitted value; a JSON array for multi-valued fields.
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl SubmitResponseRequest {
    /// Flatten a submitted value into its list of string values.
    pub fn value_items(value: &serde_json::Value) -> Vec<String> {
        match value {
            serde_json::Value::Null => vec![String::new()],
            serde_json::Value::Array(items) => items.iter().map(json_to_string).collect(),
            other => vec![json_to_string(other)],
        }
    }
}

fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Request body for an admin edit of a response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResponseRequest {
    /// The admin performing the edit.
    pub editor: String,
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub flag: Option<bool>,
    #[serde(default)]
    pub gallery: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Request body for reverting a response to its original values.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertResponseRequest {
    pub editor: String,
}

/// One labelled value in a serialized response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldValue {
    pub field: String,
    pub value: String,
}

/// A response with its values, as returned to administrators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDetail {
    #[serde(flatten)]
    pub response: Response,
    pub values: Vec<FieldValue>,
}

/// A response as shown in the public gallery: gallery fields only, and
/// the submitter credited only when they opted in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEntry {
    pub user: String,
    pub datetime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datum: Option<String>,
    pub values: Vec<FieldValue>,
}

/// Aggregate a response's values for display: non-static fields in form
/// order (optionally gallery fields only), blank values dropped, multiple
/// values for one field joined with ", ".
pub fn display_values(fields: &[Field], values: &[Value], gallery_only: bool) -> Vec<FieldValue> {
    let mut out = Vec::new();
    for field in fields {
        if field.kind.is_static() {
            continue;
        }
        if gallery_only && !field.gallery {
            continue;
        }
        let joined = values
            .iter()
            .filter(|v| v.field_id == field.id && !v.value.is_empty())
            .map(|v| v.value.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        out.push(FieldValue {
            field: field.export_label(),
            value: joined,
        });
    }
    out
}

/// Aggregate a response's values for CSV export, keyed by field id:
/// blank values are dropped for multi-valued fields only (they may exist
/// solely to hold original values), then joined with ", ".
pub fn export_values(fields: &[Field], values: &[Value]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for field in fields {
        if field.kind.is_static() {
            continue;
        }
        let joined = values
            .iter()
            .filter(|v| {
                v.field_id == field.id && !(field.kind.multiple_values() && v.value.is_empty())
            })
            .map(|v| v.value.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        out.insert(field.id.clone(), joined);
    }
    out
}
