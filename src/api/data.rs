//! Data item endpoints: admin upload and the public data-assignment
//! hand-out.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{CreateDatumRequest, Datum, Identity, Status};
use crate::AppState;

/// POST /api/assignments/:id/data - Add data items.
pub async fn add_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(items): Json<Vec<CreateDatumRequest>>,
) -> ApiResult<Vec<Datum>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if items.is_empty() {
        return error(
            AppError::Validation("No data items provided".to_string()),
            revision_id,
        );
    }
    match state.repo.get_assignment(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error(
                AppError::NotFound(format!("Assignment {} not found", id)),
                revision_id,
            )
        }
        Err(e) => return error(e, revision_id),
    }

    match state.repo.add_data(&id, &items).await {
        Ok(created) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(created, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/assignments/:id/data - List data items.
pub async fn list_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Datum>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_data(&id).await {
        Ok(data) => success(data, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// Identity query for the data hand-out: a user reference or, for
/// anonymous visitors, the client address.
#[derive(Debug, Deserialize)]
pub struct NextQuery {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// The work offered to an identity: a datum to respond about (absent
/// when the assignment is dataless or exhausted) and whether any work
/// remains at all.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAssignment {
    pub datum: Option<Datum>,
    pub has_assignment: bool,
    /// Ordinal of the identity's next completion, for multiple-per-page
    /// rendering.
    pub number: i64,
}

/// GET /api/assignments/:id/next - Pick the datum to show an identity.
///
/// An exhausted assignment is a normal empty result, not an error.
pub async fn next_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<NextQuery>,
) -> ApiResult<NextAssignment> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let assignment = match state.repo.get_assignment(&id).await {
        Ok(Some(assignment)) => assignment,
        Ok(None) => {
            return error(
                AppError::NotFound(format!("Assignment {} not found", id)),
                revision_id,
            )
        }
        Err(e) => return error(e, revision_id),
    };
    // Drafts are invisible to the public
    if assignment.status == Status::Draft {
        return error(
            AppError::NotFound(format!("Assignment {} not found", id)),
            revision_id,
        );
    }

    let Some(identity) = Identity::resolve(query.user.as_deref(), query.ip.as_deref()) else {
        return error(
            AppError::Validation("A user or ip query parameter is required".to_string()),
            revision_id,
        );
    };

    if assignment.status == Status::Closed {
        return success(
            NextAssignment {
                datum: None,
                has_assignment: false,
                number: 1,
            },
            revision_id,
        );
    }

    let has_data = match state.repo.has_data(&id).await {
        Ok(has_data) => has_data,
        Err(e) => return error(e, revision_id),
    };

    if !has_data {
        let already = match state.repo.identity_has_response(&id, &identity).await {
            Ok(already) => already,
            Err(e) => return error(e, revision_id),
        };
        let has_assignment = !(assignment.user_limit && already);
        let number = match completion_number(&state, &assignment, &identity, None).await {
            Ok(number) => number,
            Err(e) => return error(e, revision_id),
        };
        return success(
            NextAssignment {
                datum: None,
                has_assignment,
                number,
            },
            revision_id,
        );
    }

    let eligible = match state.repo.eligible_data(&assignment, &identity).await {
        Ok(eligible) => eligible,
        Err(e) => return error(e, revision_id),
    };
    let datum = {
        let mut selector = state.selector.lock().await;
        selector.pick(&eligible).cloned()
    };
    let number = match completion_number(&state, &assignment, &identity, datum.as_ref()).await {
        Ok(number) => number,
        Err(e) => return error(e, revision_id),
    };

    let has_assignment = datum.is_some();
    success(
        NextAssignment {
            datum,
            has_assignment,
            number,
        },
        revision_id,
    )
}

/// Next completion ordinal for the identity against the offered datum;
/// only meaningful for multiple-per-page assignments.
async fn completion_number(
    state: &AppState,
    assignment: &crate::models::Assignment,
    identity: &Identity,
    datum: Option<&Datum>,
) -> Result<i64, AppError> {
    if !assignment.multiple_per_page {
        return Ok(1);
    }
    let count = state
        .repo
        .identity_response_count(&assignment.id, identity, datum.map(|d| d.id.as_str()))
        .await?;
    Ok(count + 1)
}
