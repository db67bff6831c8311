//! Database repository for CRUD operations.
//!
//! Uses prepared statements and transactions for data integrity. Form
//! reconciliation plans are applied atomically so a crash can never
//! leave an assignment with a partially rewritten field set.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::form::FormPlan;
use crate::models::{
    Assignment, AssignmentStats, AssignmentSummary, Choice, CreateAssignmentRequest,
    CreateDatumRequest, Datum, DayCount, Field, FieldKind, FieldState, Identity, Registration,
    Response, Status, UpdateAssignmentRequest, Value,
};

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Increment the revision ID and return the new value.
    pub async fn increment_revision(&self) -> Result<i64, AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        self.get_revision_id().await
    }

    // ==================== ASSIGNMENT OPERATIONS ====================

    /// List all assignments with their response and data counts.
    pub async fn list_assignments(&self) -> Result<Vec<AssignmentSummary>, AppError> {
        let rows = sqlx::query(
            r#"SELECT a.*,
                      (SELECT COUNT(*) FROM responses r WHERE r.assignment_id = a.id) AS response_count,
                      (SELECT COUNT(*) FROM data d WHERE d.assignment_id = a.id) AS data_count
               FROM assignments a ORDER BY a.datetime_created DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| AssignmentSummary {
                assignment: assignment_from_row(row),
                response_count: row.get("response_count"),
                data_count: row.get("data_count"),
            })
            .collect())
    }

    /// Get an assignment by ID.
    pub async fn get_assignment(&self, id: &str) -> Result<Option<Assignment>, AppError> {
        let row = sqlx::query("SELECT * FROM assignments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(assignment_from_row))
    }

    /// Create an assignment together with its initial form and data, in
    /// one transaction.
    pub async fn create_assignment(
        &self,
        request: &CreateAssignmentRequest,
        plan: &FormPlan,
    ) -> Result<Assignment, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let status = if request.open {
            Status::Open
        } else {
            Status::Draft
        };
        let registration = request.registration.unwrap_or(Registration::Required);
        let submission_emails = request.submission_emails.clone().unwrap_or_default();
        let emails_json = serde_json::to_string(&submission_emails).unwrap_or_default();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO assignments (
                id, title, slug, description, status, registration, data_limit,
                user_limit, multiple_per_page, ask_public, owner,
                submission_emails, datetime_created, datetime_opened, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)"#,
        )
        .bind(&id)
        .bind(&request.title)
        .bind(slugify(&request.title))
        .bind(&request.description)
        .bind(status.as_str())
        .bind(registration.as_str())
        .bind(request.data_limit.unwrap_or(3))
        .bind(request.user_limit.unwrap_or(true) as i32)
        .bind(request.multiple_per_page.unwrap_or(false) as i32)
        .bind(request.ask_public.unwrap_or(true) as i32)
        .bind(&request.owner)
        .bind(&emails_json)
        .bind(&now)
        .bind(if request.open { Some(&now) } else { None })
        .execute(&mut *tx)
        .await?;

        apply_plan(&mut tx, &id, plan).await?;

        for datum in &request.data {
            insert_datum(&mut tx, &id, datum).await?;
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        match self.get_assignment(&id).await? {
            Some(assignment) => Ok(assignment),
            None => Err(AppError::Internal(
                "Assignment vanished after creation".to_string(),
            )),
        }
    }

    /// Update assignment settings with optimistic concurrency control,
    /// optionally reconciling the form in the same transaction.
    pub async fn update_assignment(
        &self,
        id: &str,
        request: &UpdateAssignmentRequest,
        plan: Option<&FormPlan>,
    ) -> Result<Assignment, AppError> {
        let existing = self
            .get_assignment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Assignment {} not found", id)))?;

        // Check version for optimistic concurrency
        if let Some(expected) = request.expected_version {
            if existing.version != expected {
                return Err(AppError::Conflict {
                    message: format!(
                        "Version mismatch: expected {}, current {}",
                        expected, existing.version
                    ),
                    current_version: existing.version,
                });
            }
        }

        let new_version = existing.version + 1;
        let title = request.title.as_ref().unwrap_or(&existing.title);
        let description = request
            .description
            .as_ref()
            .unwrap_or(&existing.description);
        let registration = request.registration.unwrap_or(existing.registration);
        let data_limit = request.data_limit.unwrap_or(existing.data_limit);
        let user_limit = request.user_limit.unwrap_or(existing.user_limit);
        let multiple_per_page = request
            .multiple_per_page
            .unwrap_or(existing.multiple_per_page);
        let ask_public = request.ask_public.unwrap_or(existing.ask_public);
        let submission_emails = request
            .submission_emails
            .clone()
            .unwrap_or_else(|| existing.submission_emails.clone());
        let emails_json = serde_json::to_string(&submission_emails).unwrap_or_default();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE assignments SET
                title = ?, slug = ?, description = ?, registration = ?,
                data_limit = ?, user_limit = ?, multiple_per_page = ?,
                ask_public = ?, submission_emails = ?, version = ?
            WHERE id = ? AND version = ?"#,
        )
        .bind(title)
        .bind(slugify(title))
        .bind(description)
        .bind(registration.as_str())
        .bind(data_limit)
        .bind(user_limit as i32)
        .bind(multiple_per_page as i32)
        .bind(ask_public as i32)
        .bind(&emails_json)
        .bind(new_version)
        .bind(id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Race condition - version changed between read and write
            let current = self.get_assignment(id).await?;
            return Err(AppError::Conflict {
                message: "Concurrent modification detected".to_string(),
                current_version: current.map(|a| a.version).unwrap_or(0),
            });
        }

        if let Some(plan) = plan {
            apply_plan(&mut tx, id, plan).await?;
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        match self.get_assignment(id).await? {
            Some(assignment) => Ok(assignment),
            None => Err(AppError::Internal(
                "Assignment vanished after update".to_string(),
            )),
        }
    }

    /// Move an assignment forward through its lifecycle, stamping the
    /// transition time. Backward moves are rejected.
    pub async fn transition_status(&self, id: &str, next: Status) -> Result<Assignment, AppError> {
        let existing = self
            .get_assignment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Assignment {} not found", id)))?;

        if !existing.status.can_transition(next) {
            return Err(AppError::Validation(format!(
                "Cannot move assignment from {} to {}",
                existing.status.as_str(),
                next.as_str()
            )));
        }

        let now = Utc::now().to_rfc3339();
        let stamp_column = match next {
            Status::Open => "datetime_opened",
            _ => "datetime_closed",
        };
        let sql = format!(
            "UPDATE assignments SET status = ?, {} = ?, version = version + 1 WHERE id = ?",
            stamp_column
        );
        sqlx::query(&sql)
            .bind(next.as_str())
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.increment_revision().await?;

        match self.get_assignment(id).await? {
            Some(assignment) => Ok(assignment),
            None => Err(AppError::Internal(
                "Assignment vanished after transition".to_string(),
            )),
        }
    }

    // ==================== FORM OPERATIONS ====================

    /// List an assignment's fields: live fields in display order,
    /// followed by soft-deleted fields when requested.
    pub async fn list_fields(
        &self,
        assignment_id: &str,
        include_deleted: bool,
    ) -> Result<Vec<Field>, AppError> {
        let sql = if include_deleted {
            "SELECT * FROM fields WHERE assignment_id = ? ORDER BY ord IS NULL, ord"
        } else {
            "SELECT * FROM fields WHERE assignment_id = ? AND deleted = 0 ORDER BY ord"
        };
        let rows = sqlx::query(sql)
            .bind(assignment_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(field_from_row).collect())
    }

    /// List all choices for an assignment's fields, in field order.
    pub async fn list_choices(&self, assignment_id: &str) -> Result<Vec<Choice>, AppError> {
        let rows = sqlx::query(
            r#"SELECT c.* FROM choices c
               JOIN fields f ON f.id = c.field_id
               WHERE f.assignment_id = ?
               ORDER BY f.ord IS NULL, f.ord, c.ord"#,
        )
        .bind(assignment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(choice_from_row).collect())
    }

    /// Apply a reconciliation plan to an assignment's form, atomically.
    pub async fn reconcile_form(
        &self,
        assignment_id: &str,
        plan: &FormPlan,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        apply_plan(&mut tx, assignment_id, plan).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    // ==================== DATA OPERATIONS ====================

    /// Add data items to an assignment.
    pub async fn add_data(
        &self,
        assignment_id: &str,
        items: &[CreateDatumRequest],
    ) -> Result<Vec<Datum>, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let id = insert_datum(&mut tx, assignment_id, item).await?;
            created.push(Datum {
                id,
                assignment_id: assignment_id.to_string(),
                url: item.url.clone(),
                metadata: item.metadata.clone(),
            });
        }
        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// List an assignment's data items.
    pub async fn list_data(&self, assignment_id: &str) -> Result<Vec<Datum>, AppError> {
        let rows = sqlx::query("SELECT * FROM data WHERE assignment_id = ? ORDER BY rowid")
            .bind(assignment_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(datum_from_row).collect())
    }

    /// Get a datum by ID.
    pub async fn get_datum(&self, id: &str) -> Result<Option<Datum>, AppError> {
        let row = sqlx::query("SELECT * FROM data WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(datum_from_row))
    }

    /// Whether the assignment has any backing data.
    pub async fn has_data(&self, assignment_id: &str) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM data WHERE assignment_id = ?")
            .bind(assignment_id)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    /// Compute the data items this identity may still be assigned: items
    /// whose first-completion count (responses with number = 1) is below
    /// the assignment's limit, excluding items the identity has already
    /// responded to. Anonymous responses only count against IP
    /// exclusion, so a user is never blocked by someone else's shared
    /// address.
    pub async fn eligible_data(
        &self,
        assignment: &Assignment,
        identity: &Identity,
    ) -> Result<Vec<Datum>, AppError> {
        let rows = match identity {
            Identity::User(user) => {
                sqlx::query(
                    r#"SELECT d.* FROM data d
                       WHERE d.assignment_id = ?
                         AND (SELECT COUNT(*) FROM responses r
                              WHERE r.data_id = d.id AND r.number = 1) < ?
                         AND NOT EXISTS (SELECT 1 FROM responses r
                                         WHERE r.data_id = d.id AND r.user = ?)
                       ORDER BY d.rowid"#,
                )
                .bind(&assignment.id)
                .bind(assignment.data_limit)
                .bind(user)
                .fetch_all(&self.pool)
                .await?
            }
            Identity::Ip(ip_address) => {
                sqlx::query(
                    r#"SELECT d.* FROM data d
                       WHERE d.assignment_id = ?
                         AND (SELECT COUNT(*) FROM responses r
                              WHERE r.data_id = d.id AND r.number = 1) < ?
                         AND NOT EXISTS (SELECT 1 FROM responses r
                                         WHERE r.data_id = d.id AND r.ip_address = ?
                                           AND r.user IS NULL)
                       ORDER BY d.rowid"#,
                )
                .bind(&assignment.id)
                .bind(assignment.data_limit)
                .bind(ip_address)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(datum_from_row).collect())
    }

    // ==================== RESPONSE OPERATIONS ====================

    /// Count the identity's responses against one datum (or against the
    /// bare assignment when `data_id` is None). Feeds the completion
    /// ordinal and the one-response-per-identity fallback.
    pub async fn identity_response_count(
        &self,
        assignment_id: &str,
        identity: &Identity,
        data_id: Option<&str>,
    ) -> Result<i64, AppError> {
        let row = match identity {
            Identity::User(user) => {
                sqlx::query(
                    r#"SELECT COUNT(*) AS n FROM responses
                       WHERE assignment_id = ? AND user = ?
                         AND (data_id = ? OR (data_id IS NULL AND ? IS NULL))"#,
                )
                .bind(assignment_id)
                .bind(user)
                .bind(data_id)
                .bind(data_id)
                .fetch_one(&self.pool)
                .await?
            }
            Identity::Ip(ip_address) => {
                sqlx::query(
                    r#"SELECT COUNT(*) AS n FROM responses
                       WHERE assignment_id = ? AND ip_address = ? AND user IS NULL
                         AND (data_id = ? OR (data_id IS NULL AND ? IS NULL))"#,
                )
                .bind(assignment_id)
                .bind(ip_address)
                .bind(data_id)
                .bind(data_id)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(row.get("n"))
    }

    /// Whether the identity has any response against the assignment,
    /// regardless of datum. Backs the one-response-per-identity policy
    /// for assignments without data.
    pub async fn identity_has_response(
        &self,
        assignment_id: &str,
        identity: &Identity,
    ) -> Result<bool, AppError> {
        let row = match identity {
            Identity::User(user) => {
                sqlx::query(
                    "SELECT COUNT(*) AS n FROM responses WHERE assignment_id = ? AND user = ?",
                )
                .bind(assignment_id)
                .bind(user)
                .fetch_one(&self.pool)
                .await?
            }
            Identity::Ip(ip_address) => {
                sqlx::query(
                    r#"SELECT COUNT(*) AS n FROM responses
                       WHERE assignment_id = ? AND ip_address = ? AND user IS NULL"#,
                )
                .bind(assignment_id)
                .bind(ip_address)
                .fetch_one(&self.pool)
                .await?
            }
        };
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    /// Create a response and its values in one transaction. Values for
    /// field ids not belonging to the assignment are silently dropped.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_response(
        &self,
        assignment_id: &str,
        identity: Option<&Identity>,
        email: Option<&str>,
        data_id: Option<&str>,
        public: bool,
        skip: bool,
        number: i64,
        values: &BTreeMap<String, Vec<String>>,
    ) -> Result<Response, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let user = identity.and_then(|i| i.user());
        let ip_address = identity.and_then(|i| i.ip_address());

        let field_ids: Vec<String> = self
            .list_fields(assignment_id, true)
            .await?
            .into_iter()
            .map(|f| f.id)
            .collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO responses (
                id, assignment_id, user, email, ip_address, data_id,
                public, skip, number, flag, gallery, tags, datetime
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, '[]', ?)"#,
        )
        .bind(&id)
        .bind(assignment_id)
        .bind(user)
        .bind(email)
        .bind(ip_address)
        .bind(data_id)
        .bind(public as i32)
        .bind(skip as i32)
        .bind(number)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for (field_id, items) in values {
            if !field_ids.iter().any(|f| f == field_id) {
                continue;
            }
            for item in items {
                sqlx::query(
                    r#"INSERT INTO field_values (id, response_id, field_id, value, original_value)
                       VALUES (?, ?, ?, ?, ?)"#,
                )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(&id)
                .bind(field_id)
                .bind(item)
                .bind(item)
                .execute(&mut *tx)
                .await?;
            }
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;

        match self.get_response(&id).await? {
            Some(response) => Ok(response),
            None => Err(AppError::Internal(
                "Response vanished after creation".to_string(),
            )),
        }
    }

    /// Get a response by ID.
    pub async fn get_response(&self, id: &str) -> Result<Option<Response>, AppError> {
        let row = sqlx::query("SELECT * FROM responses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(response_from_row))
    }

    /// List an assignment's responses, oldest first.
    pub async fn list_responses(&self, assignment_id: &str) -> Result<Vec<Response>, AppError> {
        let rows =
            sqlx::query("SELECT * FROM responses WHERE assignment_id = ? ORDER BY datetime, rowid")
                .bind(assignment_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.iter().map(response_from_row).collect())
    }

    /// List a single response's values in insertion order.
    pub async fn list_values(&self, response_id: &str) -> Result<Vec<Value>, AppError> {
        let rows = sqlx::query("SELECT * FROM field_values WHERE response_id = ? ORDER BY rowid")
            .bind(response_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(value_from_row).collect())
    }

    /// List every value of an assignment's responses, for export.
    pub async fn list_assignment_values(
        &self,
        assignment_id: &str,
    ) -> Result<Vec<Value>, AppError> {
        let rows = sqlx::query(
            r#"SELECT v.* FROM field_values v
               JOIN responses r ON r.id = v.response_id
               WHERE r.assignment_id = ?
               ORDER BY v.rowid"#,
        )
        .bind(assignment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(value_from_row).collect())
    }

    /// Edit a response, stamping the editor. Single-valued fields update
    /// in place, keeping the as-submitted original; multi-valued fields
    /// are recreated pairing surviving originals with the new values
    /// positionally. Moderation flags and tags update when present.
    #[allow(clippy::too_many_arguments)]
    pub async fn edit_response(
        &self,
        response: &Response,
        fields: &[Field],
        edits: &BTreeMap<String, Vec<String>>,
        editor: &str,
        flag: Option<bool>,
        gallery: Option<bool>,
        tags: Option<&[String]>,
    ) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE responses SET edit_user = ?, edit_datetime = ? WHERE id = ?")
            .bind(editor)
            .bind(&now)
            .bind(&response.id)
            .execute(&mut *tx)
            .await?;

        if let Some(flag) = flag {
            sqlx::query("UPDATE responses SET flag = ? WHERE id = ?")
                .bind(flag as i32)
                .bind(&response.id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(gallery) = gallery {
            sqlx::query("UPDATE responses SET gallery = ? WHERE id = ?")
                .bind(gallery as i32)
                .bind(&response.id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(tags) = tags {
            let tags_json = serde_json::to_string(tags).unwrap_or_default();
            sqlx::query("UPDATE responses SET tags = ? WHERE id = ?")
                .bind(&tags_json)
                .bind(&response.id)
                .execute(&mut *tx)
                .await?;
        }

        for (field_id, new_values) in edits {
            let Some(field) = fields.iter().find(|f| &f.id == field_id) else {
                continue;
            };
            if field.kind.multiple_values() {
                let original_rows = sqlx::query(
                    r#"SELECT original_value FROM field_values
                       WHERE response_id = ? AND field_id = ? AND original_value != ''
                       ORDER BY rowid"#,
                )
                .bind(&response.id)
                .bind(field_id)
                .fetch_all(&mut *tx)
                .await?;
                let originals: Vec<String> = original_rows
                    .iter()
                    .map(|row| row.get("original_value"))
                    .collect();

                sqlx::query("DELETE FROM field_values WHERE response_id = ? AND field_id = ?")
                    .bind(&response.id)
                    .bind(field_id)
                    .execute(&mut *tx)
                    .await?;

                let len = originals.len().max(new_values.len());
                for i in 0..len {
                    let original = originals.get(i).map(String::as_str).unwrap_or("");
                    let value = new_values.get(i).map(String::as_str).unwrap_or("");
                    sqlx::query(
                        r#"INSERT INTO field_values
                           (id, response_id, field_id, value, original_value)
                           VALUES (?, ?, ?, ?, ?)"#,
                    )
                    .bind(uuid::Uuid::new_v4().to_string())
                    .bind(&response.id)
                    .bind(field_id)
                    .bind(value)
                    .bind(original)
                    .execute(&mut *tx)
                    .await?;
                }
            } else {
                let value = new_values.first().map(String::as_str).unwrap_or("");
                let result = sqlx::query(
                    "UPDATE field_values SET value = ? WHERE response_id = ? AND field_id = ?",
                )
                .bind(value)
                .bind(&response.id)
                .bind(field_id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    sqlx::query(
                        r#"INSERT INTO field_values
                           (id, response_id, field_id, value, original_value)
                           VALUES (?, ?, ?, ?, '')"#,
                    )
                    .bind(uuid::Uuid::new_v4().to_string())
                    .bind(&response.id)
                    .bind(field_id)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Revert every value of a response to its as-submitted original.
    pub async fn revert_response(&self, response_id: &str, editor: &str) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE responses SET edit_user = ?, edit_datetime = ? WHERE id = ?")
            .bind(editor)
            .bind(&now)
            .bind(response_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE field_values SET value = original_value WHERE response_id = ?")
            .bind(response_id)
            .execute(&mut *tx)
            .await?;

        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    // ==================== STATS ====================

    /// Aggregate statistics for an assignment's progress.
    pub async fn assignment_stats(
        &self,
        assignment: &Assignment,
    ) -> Result<AssignmentStats, AppError> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS response_count,
                      COUNT(DISTINCT user) AS contributor_count
               FROM responses WHERE assignment_id = ?"#,
        )
        .bind(&assignment.id)
        .fetch_one(&self.pool)
        .await?;
        let response_count: i64 = row.get("response_count");
        let contributor_count: i64 = row.get("contributor_count");

        let data_row = sqlx::query("SELECT COUNT(*) AS n FROM data WHERE assignment_id = ?")
            .bind(&assignment.id)
            .fetch_one(&self.pool)
            .await?;
        let data_count: i64 = data_row.get("n");

        let total_assignments = if data_count > 0 {
            Some(data_count * assignment.data_limit)
        } else {
            None
        };
        let percent_complete = match total_assignments {
            Some(total) if total > 0 => (100 * response_count / total).min(100),
            _ => 0,
        };

        let day_rows = sqlx::query(
            r#"SELECT substr(datetime, 1, 10) AS date, COUNT(*) AS count
               FROM responses WHERE assignment_id = ?
               GROUP BY date ORDER BY date"#,
        )
        .bind(&assignment.id)
        .fetch_all(&self.pool)
        .await?;
        let responses_per_day = day_rows
            .iter()
            .map(|row| DayCount {
                date: row.get("date"),
                count: row.get("count"),
            })
            .collect();

        Ok(AssignmentStats {
            response_count,
            contributor_count,
            total_assignments,
            percent_complete,
            responses_per_day,
        })
    }
}

// Transaction helpers

/// Apply a form reconciliation plan inside an open transaction:
/// soft-delete unclaimed fields, upsert planned fields at their final
/// orders, and rewrite choice lists wholesale.
async fn apply_plan(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    assignment_id: &str,
    plan: &FormPlan,
) -> Result<(), AppError> {
    for field_id in &plan.soft_deleted {
        sqlx::query(
            "UPDATE fields SET ord = NULL, deleted = 1 WHERE id = ? AND assignment_id = ?",
        )
        .bind(field_id)
        .bind(assignment_id)
        .execute(&mut **tx)
        .await?;
    }

    for field in &plan.fields {
        if field.is_new {
            sqlx::query(
                r#"INSERT INTO fields (
                    id, assignment_id, label, kind, help_text, min, max,
                    required, gallery, ord, deleted
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)"#,
            )
            .bind(&field.id)
            .bind(assignment_id)
            .bind(&field.label)
            .bind(field.kind.as_str())
            .bind(&field.help_text)
            .bind(field.min)
            .bind(field.max)
            .bind(field.required as i32)
            .bind(field.gallery as i32)
            .bind(field.order)
            .execute(&mut **tx)
            .await?;
        } else {
            sqlx::query(
                r#"UPDATE fields SET
                    label = ?, kind = ?, help_text = ?, min = ?, max = ?,
                    required = ?, gallery = ?, ord = ?, deleted = 0
                WHERE id = ? AND assignment_id = ?"#,
            )
            .bind(&field.label)
            .bind(field.kind.as_str())
            .bind(&field.help_text)
            .bind(field.min)
            .bind(field.max)
            .bind(field.required as i32)
            .bind(field.gallery as i32)
            .bind(field.order)
            .bind(&field.id)
            .bind(assignment_id)
            .execute(&mut **tx)
            .await?;
        }

        if let Some(choices) = &field.choices {
            sqlx::query("DELETE FROM choices WHERE field_id = ?")
                .bind(&field.id)
                .execute(&mut **tx)
                .await?;
            for choice in choices {
                sqlx::query(
                    "INSERT INTO choices (id, field_id, label, value, ord) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&choice.id)
                .bind(&field.id)
                .bind(&choice.label)
                .bind(&choice.value)
                .bind(choice.ord)
                .execute(&mut **tx)
                .await?;
            }
        }
    }

    Ok(())
}

/// Insert one datum inside an open transaction, returning its id.
async fn insert_datum(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    assignment_id: &str,
    datum: &CreateDatumRequest,
) -> Result<String, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let metadata_json = serde_json::to_string(&datum.metadata).unwrap_or_default();
    sqlx::query("INSERT INTO data (id, assignment_id, url, metadata) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(assignment_id)
        .bind(&datum.url)
        .bind(&metadata_json)
        .execute(&mut **tx)
        .await?;
    Ok(id)
}

/// Increment the revision counter inside an open transaction.
async fn bump_revision(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<(), AppError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(&now)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// URL-safe slug for an assignment title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

// Helper functions for row conversion

fn assignment_from_row(row: &sqlx::sqlite::SqliteRow) -> Assignment {
    let status: String = row.get("status");
    let registration: String = row.get("registration");
    let user_limit: i32 = row.get("user_limit");
    let multiple_per_page: i32 = row.get("multiple_per_page");
    let ask_public: i32 = row.get("ask_public");
    let emails_str: Option<String> = row.get("submission_emails");
    Assignment {
        id: row.get("id"),
        title: row.get("title"),
        slug: row.get("slug"),
        description: row.get("description"),
        status: Status::from_str(&status).unwrap_or(Status::Draft),
        registration: Registration::from_str(&registration).unwrap_or(Registration::Required),
        data_limit: row.get("data_limit"),
        user_limit: user_limit != 0,
        multiple_per_page: multiple_per_page != 0,
        ask_public: ask_public != 0,
        owner: row.get("owner"),
        submission_emails: emails_str.map(|s| parse_json_array(&s)).unwrap_or_default(),
        datetime_created: row.get("datetime_created"),
        datetime_opened: row.get("datetime_opened"),
        datetime_closed: row.get("datetime_closed"),
        version: row.get("version"),
    }
}

fn field_from_row(row: &sqlx::sqlite::SqliteRow) -> Field {
    let kind: String = row.get("kind");
    let required: i32 = row.get("required");
    let gallery: i32 = row.get("gallery");
    let ord: Option<i64> = row.get("ord");
    let deleted: i32 = row.get("deleted");
    Field {
        id: row.get("id"),
        assignment_id: row.get("assignment_id"),
        label: row.get("label"),
        kind: FieldKind::from_str(&kind).unwrap_or(FieldKind::Text),
        help_text: row.get("help_text"),
        min: row.get("min"),
        max: row.get("max"),
        required: required != 0,
        gallery: gallery != 0,
        state: FieldState::from_columns(ord, deleted != 0),
    }
}

fn choice_from_row(row: &sqlx::sqlite::SqliteRow) -> Choice {
    Choice {
        id: row.get("id"),
        field_id: row.get("field_id"),
        label: row.get("label"),
        value: row.get("value"),
        ord: row.get("ord"),
    }
}

fn datum_from_row(row: &sqlx::sqlite::SqliteRow) -> Datum {
    let metadata_str: String = row.get("metadata");
    Datum {
        id: row.get("id"),
        assignment_id: row.get("assignment_id"),
        url: row.get("url"),
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
    }
}

fn response_from_row(row: &sqlx::sqlite::SqliteRow) -> Response {
    let public: i32 = row.get("public");
    let skip: i32 = row.get("skip");
    let flag: i32 = row.get("flag");
    let gallery: i32 = row.get("gallery");
    let tags_str: Option<String> = row.get("tags");
    Response {
        id: row.get("id"),
        assignment_id: row.get("assignment_id"),
        user: row.get("user"),
        email: row.get("email"),
        ip_address: row.get("ip_address"),
        data_id: row.get("data_id"),
        public: public != 0,
        skip: skip != 0,
        number: row.get("number"),
        flag: flag != 0,
        gallery: gallery != 0,
        tags: tags_str.map(|s| parse_json_array(&s)).unwrap_or_default(),
        datetime: row.get("datetime"),
        edit_user: row.get("edit_user"),
        edit_datetime: row.get("edit_datetime"),
    }
}

fn value_from_row(row: &sqlx::sqlite::SqliteRow) -> Value {
    Value {
        id: row.get("id"),
        response_id: row.get("response_id"),
        field_id: row.get("field_id"),
        value: row.get("value"),
        original_value: row.get("original_value"),
    }
}

fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  Lots -- of?? punctuation  "), "lots-of-punctuation");
        assert_eq!(slugify("Already-Slugged"), "already-slugged");
    }
}
