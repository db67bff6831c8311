//! Assignment API endpoints: CRUD, lifecycle and the form itself.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::form;
use crate::models::{
    Assignment, AssignmentStats, AssignmentSummary, CreateAssignmentRequest, FieldDef, Status,
    UpdateAssignmentRequest,
};
use crate::AppState;

/// GET /api/assignments - List all assignments with counts.
pub async fn list_assignments(State(state): State<AppState>) -> ApiResult<Vec<AssignmentSummary>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_assignments().await {
        Ok(assignments) => success(assignments, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/assignments/:id - Get a single assignment.
pub async fn get_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Assignment> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_assignment(&id).await {
        Ok(Some(assignment)) => success(assignment, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("Assignment {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/assignments - Create a new assignment with its form.
pub async fn create_assignment(
    State(state): State<AppState>,
    Json(request): Json<CreateAssignmentRequest>,
) -> ApiResult<Assignment> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.title.trim().is_empty() {
        return error(
            AppError::Validation("Title is required".to_string()),
            revision_id,
        );
    }
    if request.owner.trim().is_empty() {
        return error(
            AppError::Validation("Owner is required".to_string()),
            revision_id,
        );
    }
    if let Some(limit) = request.data_limit {
        if limit < 1 {
            return error(
                AppError::Validation("Data limit must be at least 1".to_string()),
                revision_id,
            );
        }
    }
    let specs = match form::validate_specs(&request.fields) {
        Ok(specs) => specs,
        Err(e) => return error(e, revision_id),
    };
    let plan = form::plan(&[], &[], &specs);

    match state.repo.create_assignment(&request, &plan).await {
        Ok(assignment) => {
            tracing::info!("Created assignment {} ({})", assignment.title, assignment.id);
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(assignment, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/assignments/:id - Update settings, optionally reconciling
/// the form when field specs are supplied.
pub async fn update_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateAssignmentRequest>,
) -> ApiResult<Assignment> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Some(limit) = request.data_limit {
        if limit < 1 {
            return error(
                AppError::Validation("Data limit must be at least 1".to_string()),
                revision_id,
            );
        }
    }

    let plan = match &request.fields {
        Some(specs) => {
            let specs = match form::validate_specs(specs) {
                Ok(specs) => specs,
                Err(e) => return error(e, revision_id),
            };
            let existing_fields = match state.repo.list_fields(&id, true).await {
                Ok(fields) => fields,
                Err(e) => return error(e, revision_id),
            };
            let existing_choices = match state.repo.list_choices(&id).await {
                Ok(choices) => choices,
                Err(e) => return error(e, revision_id),
            };
            Some(form::plan(&existing_fields, &existing_choices, &specs))
        }
        None => None,
    };

    match state
        .repo
        .update_assignment(&id, &request, plan.as_ref())
        .await
    {
        Ok(assignment) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(assignment, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/assignments/:id/open - Publish a draft assignment.
pub async fn open_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Assignment> {
    transition(state, id, Status::Open).await
}

/// POST /api/assignments/:id/close - Close an open assignment.
pub async fn close_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Assignment> {
    transition(state, id, Status::Closed).await
}

async fn transition(state: AppState, id: String, next: Status) -> ApiResult<Assignment> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.transition_status(&id, next).await {
        Ok(assignment) => {
            tracing::info!("Assignment {} moved to {}", id, next.as_str());
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(assignment, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/assignments/:id/form - Live field definitions in form order.
pub async fn get_form(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<FieldDef>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

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

    let fields = match state.repo.list_fields(&id, false).await {
        Ok(fields) => fields,
        Err(e) => return error(e, revision_id),
    };
    let choices = match state.repo.list_choices(&id).await {
        Ok(choices) => choices,
        Err(e) => return error(e, revision_id),
    };
    let defs = fields.iter().map(|f| FieldDef::new(f, &choices)).collect();
    success(defs, revision_id)
}

/// PUT /api/assignments/:id/form - Reconcile the form against new specs.
pub async fn put_form(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(specs): Json<Vec<form::FieldSpec>>,
) -> ApiResult<Vec<FieldDef>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

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

    let parsed = match form::validate_specs(&specs) {
        Ok(parsed) => parsed,
        Err(e) => return error(e, revision_id),
    };
    let existing_fields = match state.repo.list_fields(&id, true).await {
        Ok(fields) => fields,
        Err(e) => return error(e, revision_id),
    };
    let existing_choices = match state.repo.list_choices(&id).await {
        Ok(choices) => choices,
        Err(e) => return error(e, revision_id),
    };
    let plan = form::plan(&existing_fields, &existing_choices, &parsed);

    if let Err(e) = state.repo.reconcile_form(&id, &plan).await {
        return error(e, revision_id);
    }

    let fields = match state.repo.list_fields(&id, false).await {
        Ok(fields) => fields,
        Err(e) => return error(e, revision_id),
    };
    let choices = match state.repo.list_choices(&id).await {
        Ok(choices) => choices,
        Err(e) => return error(e, revision_id),
    };
    let defs = fields.iter().map(|f| FieldDef::new(f, &choices)).collect();
    let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
    success(defs, new_revision)
}

/// GET /api/assignments/:id/stats - Aggregate completion statistics.
pub async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<AssignmentStats> {
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

    match state.repo.assignment_stats(&assignment).await {
        Ok(stats) => success(stats, revision_id),
        Err(e) => error(e, revision_id),
    }
}
