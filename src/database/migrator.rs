//! Versioned schema migrations.
//!
//! Each migration runs inside a transaction together with its
//! `schema_migrations` bookkeeping row, so a half-applied migration can
//! never be mistaken for a finished one.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::constants::{CURRENT_SCHEMA_VERSION, MIGRATION_DESCRIPTIONS};
use super::sql;
use crate::utils::now_timestamp;

/// Bring the schema up to `CURRENT_SCHEMA_VERSION`. Safe to call on every
/// startup; a database that is already current is left untouched.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(sql::CREATE_MIGRATIONS_TABLE_SQL)
        .execute(pool)
        .await
        .context("creating schema_migrations table")?;

    let current = get_current_version(pool).await?;
    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!(
        "Migrating database schema from version {} to {}",
        current, CURRENT_SCHEMA_VERSION
    );
    for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
        apply_migration(pool, version)
            .await
            .with_context(|| format!("applying schema migration {}", version))?;
    }
    Ok(())
}

async fn get_current_version(pool: &SqlitePool) -> Result<i32> {
    let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i32, _>("version"))
}

async fn apply_migration(pool: &SqlitePool, version: i32) -> Result<()> {
    let mut tx = pool.begin().await?;

    match version {
        1 => {
            let tables = [
                sql::CREATE_POLLS_TABLE_SQL,
                sql::CREATE_POLL_OPTIONS_TABLE_SQL,
                sql::CREATE_POLL_VOTES_TABLE_SQL,
                sql::CREATE_USERS_TABLE_SQL,
                sql::CREATE_ARCHIVED_POLLS_TABLE_SQL,
                sql::CREATE_ARCHIVED_POLL_OPTIONS_TABLE_SQL,
            ];
            for statement in tables {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            for statement in sql::CREATE_DB_INDEXES {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
        }
        other => anyhow::bail!("no migration defined for schema version {}", other),
    }

    let description = MIGRATION_DESCRIPTIONS
        .get((version - 1) as usize)
        .copied()
        .unwrap_or("");
    sqlx::query("INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)")
        .bind(version)
        .bind(now_timestamp())
        .bind(description)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!("Applied schema migration {}: {}", version, description);
    Ok(())
}
