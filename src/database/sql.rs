//! SQL statements for database schema creation

pub const CREATE_MIGRATIONS_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT NOT NULL
)";

pub const CREATE_POLLS_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS polls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question TEXT NOT NULL,
    creator_id INTEGER NOT NULL,
    scope TEXT NOT NULL,
    creator_avatar TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
)";

pub const CREATE_POLL_OPTIONS_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS poll_options (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    poll_id INTEGER NOT NULL REFERENCES polls (id),
    ordinal INTEGER NOT NULL,
    label TEXT NOT NULL,
    vote_count INTEGER NOT NULL DEFAULT 0
)";

// One row per ballot. The unique pair is what makes a repeat vote a no-op.
pub const CREATE_POLL_VOTES_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS poll_votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    poll_id INTEGER NOT NULL REFERENCES polls (id),
    option_id INTEGER NOT NULL REFERENCES poll_options (id),
    user_id INTEGER NOT NULL,
    anonymous INTEGER NOT NULL DEFAULT 0,
    cast_at TEXT NOT NULL,
    UNIQUE (poll_id, user_id)
)";

pub const CREATE_USERS_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL,
    avatar TEXT
)";

pub const CREATE_ARCHIVED_POLLS_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS archived_polls (
    id INTEGER PRIMARY KEY,
    question TEXT NOT NULL,
    creator_id INTEGER NOT NULL,
    scope TEXT NOT NULL,
    creator_avatar TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    archived_at TEXT NOT NULL
)";

pub const CREATE_ARCHIVED_POLL_OPTIONS_TABLE_SQL: &str = "
CREATE TABLE IF NOT EXISTS archived_poll_options (
    id INTEGER PRIMARY KEY,
    poll_id INTEGER NOT NULL REFERENCES archived_polls (id),
    ordinal INTEGER NOT NULL,
    label TEXT NOT NULL,
    vote_count INTEGER NOT NULL,
    voters TEXT NOT NULL,
    anonymity TEXT NOT NULL
)";

pub const CREATE_DB_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_poll_options_poll_id ON poll_options (poll_id)",
    "CREATE INDEX IF NOT EXISTS idx_poll_votes_poll_id ON poll_votes (poll_id)",
    "CREATE INDEX IF NOT EXISTS idx_poll_votes_option_id ON poll_votes (option_id)",
    "CREATE INDEX IF NOT EXISTS idx_polls_expires_at ON polls (expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_archived_poll_options_poll_id ON archived_poll_options (poll_id)",
];
