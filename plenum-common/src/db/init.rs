//! Database initialization
//!
//! Creates the database with its default schema on first run; all table
//! creation is idempotent so startup never depends on prior state.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Default collection-stage countdown in seconds
pub const DEFAULT_COLLECTION_SECONDS: u32 = 600;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_and_migrate(&pool).await?;
    Ok(pool)
}

/// Initialize an in-memory database (integration tests)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_and_migrate(&pool).await?;
    Ok(pool)
}

async fn configure_and_migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer; idea inserts and the
    // directory listing overlap constantly during a live session.
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_topics_table(pool).await?;
    create_participants_table(pool).await?;
    create_ideas_table(pool).await?;

    init_default_settings(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_topics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topics (
            guid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            goal TEXT NOT NULL DEFAULT '',
            question1 TEXT NOT NULL DEFAULT '',
            question2 TEXT NOT NULL DEFAULT '',
            host_name TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            reference_doc_name TEXT,
            reference_doc_url TEXT,
            meeting_url TEXT,
            status TEXT NOT NULL DEFAULT 'upcoming',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_participants_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS participants (
            guid TEXT PRIMARY KEY,
            topic_id TEXT NOT NULL REFERENCES topics(guid),
            name TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('host', 'guest')),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ideas_table(pool: &SqlitePool) -> Result<()> {
    // seq gives ideas a stable append order within a topic; clustering
    // output indexes into that order, so it must never be renumbered.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ideas (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            topic_id TEXT NOT NULL REFERENCES topics(guid),
            participant_id TEXT NOT NULL REFERENCES participants(guid),
            content TEXT NOT NULL,
            question_section TEXT CHECK (question_section IN ('question1', 'question2')),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ideas_topic ON ideas(topic_id, seq)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Initialize default settings (insert-if-missing, never overwrites)
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    let defaults: &[(&str, String)] = &[
        (
            "collection_seconds",
            DEFAULT_COLLECTION_SECONDS.to_string(),
        ),
        ("facilitator_model", "claude-sonnet-4-20250514".to_string()),
        ("facilitator_max_tokens", "1000".to_string()),
        ("analysis_model", "claude-sonnet-4-20250514".to_string()),
        ("analysis_max_tokens", "4000".to_string()),
        // Hold the analysis stage on screen briefly before the mapping
        // appears, so the transition is legible.
        ("analysis_delay_ms", "1000".to_string()),
    ];

    for (key, value) in defaults {
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Read a setting, falling back to the given default when absent or
/// unparsable.
pub async fn setting_or<T: std::str::FromStr>(pool: &SqlitePool, key: &str, default: T) -> T {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten();

    row.and_then(|(value,)| value.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_schema_and_defaults() {
        let pool = init_memory_database().await.unwrap();

        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='ideas'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count.0, 1);

        let secs: u32 = setting_or(&pool, "collection_seconds", 0).await;
        assert_eq!(secs, DEFAULT_COLLECTION_SECONDS);
    }

    #[tokio::test]
    async fn setting_or_falls_back_when_missing() {
        let pool = init_memory_database().await.unwrap();
        let value: u32 = setting_or(&pool, "no_such_key", 42).await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn file_backed_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("plenum.db");

        let pool = init_database(&db_path).await.unwrap();
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES ('probe', 'kept')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let pool = init_database(&db_path).await.unwrap();
        let value: String = setting_or(&pool, "probe", String::new()).await;
        assert_eq!(value, "kept");
    }
}
