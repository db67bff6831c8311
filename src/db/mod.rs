//! Database module for SQLite persistence.
//!
//! SQLite is the source of truth for all application data.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run embedded migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Create tables if they don't exist
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL DEFAULT 1,
            revision_id INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO meta (id, schema_version, revision_id, generated_at)
        VALUES (1, 1, 0, datetime('now'));
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assignments (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            slug TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'draft',
            registration TEXT NOT NULL DEFAULT 'required',
            data_limit INTEGER NOT NULL DEFAULT 3,
            user_limit INTEGER NOT NULL DEFAULT 1,
            multiple_per_page INTEGER NOT NULL DEFAULT 0,
            ask_public INTEGER NOT NULL DEFAULT 1,
            owner TEXT NOT NULL,
            submission_emails TEXT,
            datetime_created TEXT NOT NULL,
            datetime_opened TEXT,
            datetime_closed TEXT,
            version INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fields (
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL REFERENCES assignments(id) ON DELETE CASCADE,
            label TEXT NOT NULL,
            kind TEXT NOT NULL,
            help_text TEXT NOT NULL DEFAULT '',
            min INTEGER,
            max INTEGER,
            required INTEGER NOT NULL DEFAULT 0,
            gallery INTEGER NOT NULL DEFAULT 0,
            ord INTEGER,
            deleted INTEGER NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS choices (
            id TEXT PRIMARY KEY,
            field_id TEXT NOT NULL REFERENCES fields(id) ON DELETE CASCADE,
            label TEXT NOT NULL,
            value TEXT NOT NULL,
            ord INTEGER NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS data (
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL REFERENCES assignments(id) ON DELETE CASCADE,
            url TEXT NOT NULL DEFAULT '',
            metadata TEXT NOT NULL DEFAULT '{}'
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS responses (
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL REFERENCES assignments(id) ON DELETE CASCADE,
            user TEXT,
            email TEXT,
            ip_address TEXT,
            data_id TEXT REFERENCES data(id),
            public INTEGER NOT NULL DEFAULT 0,
            skip INTEGER NOT NULL DEFAULT 0,
            number INTEGER NOT NULL DEFAULT 1,
            flag INTEGER NOT NULL DEFAULT 0,
            gallery INTEGER NOT NULL DEFAULT 0,
            tags TEXT,
            datetime TEXT NOT NULL,
            edit_user TEXT,
            edit_datetime TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_values (
            id TEXT PRIMARY KEY,
            response_id TEXT NOT NULL REFERENCES responses(id) ON DELETE CASCADE,
            field_id TEXT NOT NULL REFERENCES fields(id),
            value TEXT NOT NULL DEFAULT '',
            original_value TEXT NOT NULL DEFAULT ''
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_fields_assignment ON fields(assignment_id, ord);
        CREATE INDEX IF NOT EXISTS idx_choices_field ON choices(field_id, ord);
        CREATE INDEX IF NOT EXISTS idx_data_assignment ON data(assignment_id);
        CREATE INDEX IF NOT EXISTS idx_responses_assignment ON responses(assignment_id, datetime);
        CREATE INDEX IF NOT EXISTS idx_responses_data ON responses(data_id, number);
        CREATE INDEX IF NOT EXISTS idx_field_values_response ON field_values(response_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
