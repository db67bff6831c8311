//! CSV export of an assignment's responses.
//!
//! One header row of fixed columns plus one column per non-static field
//! (soft-deleted fields marked), then one row per response with
//! multi-valued fields concatenated.

use chrono::DateTime;

use crate::errors::AppError;
use crate::models::{export_values, Assignment, Datum, Field, Response, Value};

/// Header row: fixed columns, the optional number/datum/metadata block,
/// then the labels of all non-static fields.
pub fn header_row(
    assignment: &Assignment,
    fields: &[Field],
    metadata_keys: &[String],
    has_data: bool,
) -> Vec<String> {
    let mut row = vec![
        "user".to_string(),
        "email".to_string(),
        "public".to_string(),
        "datetime".to_string(),
        "skip".to_string(),
        "flag".to_string(),
        "gallery".to_string(),
        "tags".to_string(),
    ];
    if assignment.multiple_per_page {
        row.push("number".to_string());
    }
    if has_data {
        row.push("datum".to_string());
        row.extend(metadata_keys.iter().cloned());
    }
    row.extend(
        fields
            .iter()
            .filter(|f| !f.kind.is_static())
            .map(|f| f.export_label()),
    );
    row
}

/// One CSV row for a response, aligned with `header_row`.
pub fn response_row(
    assignment: &Assignment,
    response: &Response,
    datum: Option<&Datum>,
    fields: &[Field],
    values: &[Value],
    metadata_keys: &[String],
    has_data: bool,
) -> Vec<String> {
    let mut row = vec![
        response.submitter().to_string(),
        response.email.clone().unwrap_or_default(),
        response.public.to_string(),
        csv_datetime(&response.datetime),
        response.skip.to_string(),
        response.flag.to_string(),
        response.gallery.to_string(),
        response.tags.join(", "),
    ];
    if assignment.multiple_per_page {
        row.push(response.number.to_string());
    }
    if has_data {
        row.push(datum.map(|d| d.url.clone()).unwrap_or_default());
        for key in metadata_keys {
            row.push(
                datum
                    .and_then(|d| d.metadata.get(key).cloned())
                    .unwrap_or_default(),
            );
        }
    }
    // one cell per field - default to empty string; a multivalued field
    // may have no values at all
    let by_field = export_values(fields, values);
    row.extend(
        fields
            .iter()
            .filter(|f| !f.kind.is_static())
            .map(|f| by_field.get(&f.id).cloned().unwrap_or_default()),
    );
    row
}

/// Render the full CSV document for an assignment.
pub fn render_csv(
    assignment: &Assignment,
    fields: &[Field],
    data: &[Datum],
    responses: &[Response],
    values: &[Value],
) -> Result<String, AppError> {
    let has_data = !data.is_empty();
    let metadata_keys = data.first().map(Datum::metadata_keys).unwrap_or_default();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(header_row(assignment, fields, &metadata_keys, has_data))
        .map_err(|e| AppError::Internal(format!("CSV error: {}", e)))?;

    for response in responses {
        let datum = response
            .data_id
            .as_deref()
            .and_then(|id| data.iter().find(|d| d.id == id));
        let response_values: Vec<Value> = values
            .iter()
            .filter(|v| v.response_id == response.id)
            .cloned()
            .collect();
        writer
            .write_record(response_row(
                assignment,
                response,
                datum,
                fields,
                &response_values,
                &metadata_keys,
                has_data,
            ))
            .map_err(|e| AppError::Internal(format!("CSV error: {}", e)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV error: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("CSV error: {}", e)))
}

/// Stored RFC 3339 timestamps rendered in the export's date format.
fn csv_datetime(datetime: &str) -> String {
    DateTime::parse_from_rfc3339(datetime)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| datetime.to_string())
}
