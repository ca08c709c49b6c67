//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates the validation tables.
//! Every statement is idempotent so this runs on each service start.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Busy timeout applied to every pooled connection
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Connection options shared by the service and the tests
///
/// Pragmas are set on the options rather than with `PRAGMA` statements so
/// that each pooled connection gets them, not just the first one.
pub fn connect_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
}

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL lets readers proceed while a claim is being written
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(1)
        .connect_with(connect_options(db_path))
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_validation_results_table(pool).await?;
    create_validation_queue_table(pool).await?;
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

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_validation_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS validation_results (
            id TEXT PRIMARY KEY,
            tenant_id TEXT,
            suite_run_id TEXT,
            multi_turn_execution_id TEXT,
            step_execution_id TEXT,
            expected_outcome_id TEXT,
            command_kind_match_score REAL
                CHECK (command_kind_match_score IS NULL OR command_kind_match_score IN (0.0, 1.0)),
            asr_confidence_score REAL
                CHECK (asr_confidence_score IS NULL OR (asr_confidence_score >= 0.0 AND asr_confidence_score <= 1.0)),
            houndify_passed INTEGER,
            houndify_result TEXT,
            llm_passed INTEGER,
            ensemble_result TEXT,
            final_decision TEXT NOT NULL CHECK (final_decision IN ('pass', 'fail', 'uncertain')),
            review_status TEXT NOT NULL CHECK (review_status IN ('auto_pass', 'auto_fail', 'needs_review')),
            language_code TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_validation_results_tenant ON validation_results(tenant_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_validation_results_step ON validation_results(step_execution_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_validation_queue_table(pool: &SqlitePool) -> Result<()> {
    // seq is the FIFO tie-breaker inside one (priority, created_at) group
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS validation_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            validation_result_id TEXT NOT NULL
                REFERENCES validation_results(id) ON DELETE CASCADE,
            priority INTEGER NOT NULL DEFAULT 5 CHECK (priority >= 1 AND priority <= 10),
            confidence_score REAL
                CHECK (confidence_score IS NULL OR (confidence_score >= 0.0 AND confidence_score <= 100.0)),
            language_code TEXT,
            requires_native_speaker INTEGER NOT NULL DEFAULT 0,
            claimed_by TEXT,
            claimed_at TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'claimed', 'completed')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (
                (status = 'pending' AND claimed_by IS NULL AND claimed_at IS NULL)
                OR (status <> 'pending' AND claimed_by IS NOT NULL AND claimed_at IS NOT NULL)
            )
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_validation_queue_result_status ON validation_queue(validation_result_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_validation_queue_pending_order ON validation_queue(status, priority, created_at, seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
