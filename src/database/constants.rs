//! Database migration constants and metadata

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Migration descriptions
pub const MIGRATION_DESCRIPTIONS: &[&str] =
    &["Initial schema: polls, options, vote ledger, directory, archive mirrors"];

/// Default database file path
pub const DEFAULT_DB_PATH: &str = "./polls.db";

/// Connections held by the pool against a file-backed database
pub const POOL_MAX_CONNECTIONS: u32 = 5;
