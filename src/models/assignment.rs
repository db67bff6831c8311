//! Assignment model and its lifecycle enums.

use serde::{Deserialize, Serialize};

/// Publication status of an assignment.
///
/// Transitions are monotonic: draft -> open -> closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Draft,
    Open,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Open => "open",
            Status::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Status::Draft),
            "open" => Some(Status::Open),
            "closed" => Some(Status::Closed),
            _ => None,
        }
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Draft, Status::Open) | (Status::Open, Status::Closed)
        )
    }
}

/// Registration policy for submitting responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Registration {
    Required,
    Off,
    Optional,
}

impl Registration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Registration::Required => "required",
            Registration::Off => "off",
            Registration::Optional => "optional",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "required" => Some(Registration::Required),
            "off" => Some(Registration::Off),
            "optional" => Some(Registration::Optional),
            _ => None,
        }
    }
}

/// A crowdsourced form definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub status: Status,
    pub registration: Registration,
    /// Max completions per data item (by different identities).
    pub data_limit: i64,
    /// Restrict each identity to one completion when no data backs the
    /// assignment.
    pub user_limit: bool,
    /// Allow multiple submissions per data item by the same identity.
    pub multiple_per_page: bool,
    /// Ask submitters whether they may be publicly credited.
    pub ask_public: bool,
    pub owner: String,
    #[serde(default)]
    pub submission_emails: Vec<String>,
    pub datetime_created: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime_opened: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime_closed: Option<String>,
    /// Internal version for optimistic concurrency control
    #[serde(default)]
    pub version: i64,
}

/// Request body for creating a new assignment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssignmentRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub owner: String,
    #[serde(default)]
    pub registration: Option<Registration>,
    #[serde(default)]
    pub data_limit: Option<i64>,
    #[serde(default)]
    pub user_limit: Option<bool>,
    #[serde(default)]
    pub multiple_per_page: Option<bool>,
    #[serde(default)]
    pub ask_public: Option<bool>,
    #[serde(default)]
    pub submission_emails: Option<Vec<String>>,
    /// Field specs for the initial form, in display order.
    pub fields: Vec<crate::form::FieldSpec>,
    /// Inline data items to seed the assignment with.
    #[serde(default)]
    pub data: Vec<CreateDatumRequest>,
    /// Open the assignment immediately instead of leaving it in draft.
    #[serde(default)]
    pub open: bool,
}

/// Request body for updating assignment settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAssignmentRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub registration: Option<Registration>,
    #[serde(default)]
    pub data_limit: Option<i64>,
    #[serde(default)]
    pub user_limit: Option<bool>,
    #[serde(default)]
    pub multiple_per_page: Option<bool>,
    #[serde(default)]
    pub ask_public: Option<bool>,
    #[serde(default)]
    pub submission_emails: Option<Vec<String>>,
    /// When present, the form is re-reconciled against these specs.
    #[serde(default)]
    pub fields: Option<Vec<crate::form::FieldSpec>>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request body for adding data items to an assignment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatumRequest {
    pub url: String,
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, String>,
}

/// Assignment list entry with completion counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSummary {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub response_count: i64,
    pub data_count: i64,
}

/// Aggregate statistics for an assignment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentStats {
    pub response_count: i64,
    pub contributor_count: i64,
    /// data_count * data_limit; absent when the assignment has no data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_assignments: Option<i64>,
    pub percent_complete: i64,
    pub responses_per_day: Vec<DayCount>,
}

/// Responses submitted on a single day.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCount {
    pub date: String,
    pub count: i64,
}
