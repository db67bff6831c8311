//! Response endpoints: public submission, admin listing and moderation,
//! and the public gallery.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    display_values, EditResponseRequest, GalleryEntry, Identity, Registration, Response,
    ResponseDetail, RevertResponseRequest, Status, SubmitResponseRequest,
};
use crate::AppState;

/// POST /api/assignments/:id/responses - Submit a response.
pub async fn submit_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SubmitResponseRequest>,
) -> ApiResult<Response> {
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
    if assignment.status != Status::Open {
        return error(
            AppError::Validation(format!(
                "No submitting to {} assignments",
                assignment.status.as_str()
            )),
            revision_id,
        );
    }

    let identity = Identity::resolve(request.user.as_deref(), request.ip_address.as_deref());

    // Anonymous submitters registering interest must give both a name
    // and an email, or neither.
    let email = request.email.as_deref().filter(|e| !e.is_empty());
    let full_name = request.full_name.as_deref().filter(|n| !n.is_empty());
    if email.is_some() && full_name.is_none() {
        return error(
            AppError::Validation("Name is required if registering with an email".to_string()),
            revision_id,
        );
    }
    if full_name.is_some() && email.is_none() {
        return error(
            AppError::Validation("Email is required if registering with a name".to_string()),
            revision_id,
        );
    }

    let is_authenticated = matches!(identity, Some(Identity::User(_)));
    if assignment.registration == Registration::Required && !is_authenticated {
        return error(
            AppError::Validation("Registration is required for this assignment".to_string()),
            revision_id,
        );
    }

    let has_data = match state.repo.has_data(&id).await {
        Ok(has_data) => has_data,
        Err(e) => return error(e, revision_id),
    };

    // With backing data, a submission must name a datum of this
    // assignment; without it the one-response-per-identity policy
    // applies instead.
    let data_id = if has_data {
        let Some(data_id) = request.data_id.as_deref() else {
            return error(
                AppError::Validation("A data item is required".to_string()),
                revision_id,
            );
        };
        match state.repo.get_datum(data_id).await {
            Ok(Some(datum)) if datum.assignment_id == id => Some(datum.id),
            Ok(_) => {
                return error(
                    AppError::Validation("Invalid data item".to_string()),
                    revision_id,
                )
            }
            Err(e) => return error(e, revision_id),
        }
    } else {
        None
    };

    let number = match &identity {
        Some(identity) => {
            if !has_data && assignment.user_limit {
                let already = match state.repo.identity_has_response(&id, identity).await {
                    Ok(already) => already,
                    Err(e) => return error(e, revision_id),
                };
                if already {
                    return error(
                        AppError::Validation(
                            "You have already completed this assignment".to_string(),
                        ),
                        revision_id,
                    );
                }
            }
            let count = match state
                .repo
                .identity_response_count(&id, identity, data_id.as_deref())
                .await
            {
                Ok(count) => count,
                Err(e) => return error(e, revision_id),
            };
            if has_data && !assignment.multiple_per_page && count > 0 && !request.skip {
                return error(
                    AppError::Validation(
                        "You have already responded to this data item".to_string(),
                    ),
                    revision_id,
                );
            }
            count + 1
        }
        None => 1,
    };

    let public = request.public && assignment.ask_public;
    let (skip, number) = if request.skip { (true, 1) } else { (false, number) };

    let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if !skip {
        for (field_id, value) in &request.values {
            values.insert(field_id.clone(), SubmitResponseRequest::value_items(value));
        }
    }

    match state
        .repo
        .create_response(
            &id,
            identity.as_ref(),
            email,
            data_id.as_deref(),
            public,
            skip,
            number,
            &values,
        )
        .await
    {
        Ok(response) => {
            tracing::info!(
                "Response {} submitted to assignment {} by {}",
                response.id,
                id,
                response.submitter()
            );
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(response, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/assignments/:id/responses - List responses with values.
pub async fn list_responses(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ResponseDetail>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match load_details(&state, &id, false).await {
        Ok(details) => success(details, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/assignments/:id/gallery - Public gallery of responses.
pub async fn gallery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<GalleryEntry>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let details = match load_details(&state, &id, true).await {
        Ok(details) => details,
        Err(e) => return error(e, revision_id),
    };
    let data = match state.repo.list_data(&id).await {
        Ok(data) => data,
        Err(e) => return error(e, revision_id),
    };

    let entries = details
        .into_iter()
        .filter(|d| d.response.gallery)
        .map(|d| {
            // Credit the submitter only when they opted into it
            let user = match (&d.response.user, d.response.public) {
                (Some(user), true) => user.clone(),
                _ => "Anonymous".to_string(),
            };
            let datum = d
                .response
                .data_id
                .as_deref()
                .and_then(|data_id| data.iter().find(|datum| datum.id == data_id))
                .map(|datum| datum.url.clone());
            GalleryEntry {
                user,
                datetime: d.response.datetime.clone(),
                datum,
                values: d.values,
            }
        })
        .collect();
    success(entries, revision_id)
}

/// PUT /api/responses/:id - Edit a response's values and moderation
/// flags, preserving original values for revert.
pub async fn edit_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<EditResponseRequest>,
) -> ApiResult<Response> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.editor.trim().is_empty() {
        return error(
            AppError::Validation("Editor is required".to_string()),
            revision_id,
        );
    }
    let response = match state.repo.get_response(&id).await {
        Ok(Some(response)) => response,
        Ok(None) => {
            return error(
                AppError::NotFound(format!("Response {} not found", id)),
                revision_id,
            )
        }
        Err(e) => return error(e, revision_id),
    };
    let fields = match state
        .repo
        .list_fields(&response.assignment_id, true)
        .await
    {
        Ok(fields) => fields,
        Err(e) => return error(e, revision_id),
    };

    let mut edits: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (field_id, value) in &request.values {
        edits.insert(field_id.clone(), SubmitResponseRequest::value_items(value));
    }

    match state
        .repo
        .edit_response(
            &response,
            &fields,
            &edits,
            &request.editor,
            request.flag,
            request.gallery,
            request.tags.as_deref(),
        )
        .await
    {
        Ok(()) => match state.repo.get_response(&id).await {
            Ok(Some(updated)) => {
                let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
                success(updated, new_revision)
            }
            Ok(None) => error(
                AppError::NotFound(format!("Response {} not found", id)),
                revision_id,
            ),
            Err(e) => error(e, revision_id),
        },
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/responses/:id/revert - Restore every value to its
/// as-submitted original.
pub async fn revert_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RevertResponseRequest>,
) -> ApiResult<Response> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.editor.trim().is_empty() {
        return error(
            AppError::Validation("Editor is required".to_string()),
            revision_id,
        );
    }
    match state.repo.get_response(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error(
                AppError::NotFound(format!("Response {} not found", id)),
                revision_id,
            )
        }
        Err(e) => return error(e, revision_id),
    }

    match state.repo.revert_response(&id, &request.editor).await {
        Ok(()) => match state.repo.get_response(&id).await {
            Ok(Some(updated)) => {
                let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
                success(updated, new_revision)
            }
            Ok(None) => error(
                AppError::NotFound(format!("Response {} not found", id)),
                revision_id,
            ),
            Err(e) => error(e, revision_id),
        },
        Err(e) => error(e, revision_id),
    }
}

/// Load an assignment's responses with their aggregated values.
async fn load_details(
    state: &AppState,
    assignment_id: &str,
    gallery_only: bool,
) -> Result<Vec<ResponseDetail>, AppError> {
    if state.repo.get_assignment(assignment_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "Assignment {} not found",
            assignment_id
        )));
    }
    let fields = state.repo.list_fields(assignment_id, true).await?;
    let responses = state.repo.list_responses(assignment_id).await?;

    let mut details = Vec::with_capacity(responses.len());
    for response in responses {
        let values = state.repo.list_values(&response.id).await?;
        let shown = display_values(&fields, &values, gallery_only);
        details.push(ResponseDetail {
            response,
            values: shown,
        });
    }
    Ok(details)
}
