//! SQLite-backed storage for the poll service.

pub mod codec;
pub mod constants;
pub mod migrator;
pub mod models;
pub mod operations;
pub mod sql;

use std::path::{Component, Path};
use std::time::Duration;

use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use constants::POOL_MAX_CONNECTIONS;
pub use migrator::run_migrations;

/// Handle to the SQLite pool. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database at `db_path`, creating it if missing, and bring
    /// its schema up to date.
    ///
    /// `:memory:` is accepted for tests. Such a pool is clamped to one
    /// connection, since every pooled in-memory connection would otherwise
    /// be a separate empty database.
    pub async fn connect(db_path: &str) -> Result<Self> {
        validate_db_path(db_path)?;
        let memory = db_path == ":memory:";

        let mut options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if memory { 1 } else { POOL_MAX_CONNECTIONS })
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;
        info!("Database schema is current");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Reject paths that are empty, carry control characters, or climb out of
/// the working directory.
fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path is empty");
    }
    if path == ":memory:" {
        return Ok(());
    }
    if path.chars().any(char::is_control) {
        bail!("database path contains control characters");
    }
    if Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        bail!("database path must not contain ..");
    }
    Ok(())
}

/// Random database file path under the system temp dir.
#[cfg(test)]
pub(crate) fn temp_db_path(prefix: &str) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    std::env::temp_dir()
        .join(format!("{}-{}.db", prefix, suffix))
        .to_string_lossy()
        .into_owned()
}

/// Remove a test database along with its WAL sidecar files.
#[cfg(test)]
pub(crate) fn cleanup_db_files(path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path, suffix));
    }
}
