//! CSV export endpoint.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::errors::{AppError, AppErrorWithRevision};
use crate::export::render_csv;
use crate::AppState;

/// GET /api/assignments/:id/export - Download all responses as CSV.
///
/// Unlike the JSON endpoints this returns a raw text/csv body.
pub async fn export_responses(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppErrorWithRevision> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result = async {
        let assignment = state
            .repo
            .get_assignment(&id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Assignment {} not found", id)))?;
        let fields = state.repo.list_fields(&id, true).await?;
        let data = state.repo.list_data(&id).await?;
        let responses = state.repo.list_responses(&id).await?;
        let values = state.repo.list_assignment_values(&id).await?;
        render_csv(&assignment, &fields, &data, &responses, &values)
    }
    .await;

    match result {
        Ok(csv) => {
            let headers = [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"results.csv\"",
                ),
            ];
            Ok((StatusCode::OK, headers, csv).into_response())
        }
        Err(error) => Err(AppErrorWithRevision { error, revision_id }),
    }
}
