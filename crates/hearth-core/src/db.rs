use crate::error::CoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub type DbPool = SqlitePool;

const CREATE_REMINDERS: &str = r#"
CREATE TABLE IF NOT EXISTS reminders (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    family_id TEXT,
    title TEXT NOT NULL,
    notes TEXT,
    due_date TEXT NOT NULL,
    due_time TEXT,
    timezone TEXT NOT NULL,
    anchor_date TEXT NOT NULL,
    recurrence TEXT,
    completed_occurrences INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    notification_policy TEXT NOT NULL,
    assignment TEXT NOT NULL DEFAULT '[]',
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
)
"#;

const CREATE_OWNER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_reminders_owner_due ON reminders (owner_id, due_date)";

const CREATE_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_reminders_status ON reminders (status)";

/// Open (creating if missing) the SQLite database at the given path and
/// ensure the schema exists.
pub async fn establish_connection(database_path: &str) -> Result<DbPool, CoreError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    ensure_schema(&pool).await?;
    Ok(pool)
}

async fn ensure_schema(pool: &DbPool) -> Result<(), CoreError> {
    sqlx::query(CREATE_REMINDERS).execute(pool).await?;
    sqlx::query(CREATE_OWNER_INDEX).execute(pool).await?;
    sqlx::query(CREATE_STATUS_INDEX).execute(pool).await?;
    Ok(())
}
