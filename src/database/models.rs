//! Database models for poll records

pub mod views;

use serde::{Deserialize, Serialize};

/// An active poll as stored in the `polls` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollRecord {
    pub id: i64,
    pub question: String,
    pub creator_id: i64,
    pub scope: String,
    pub creator_avatar: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

/// One answer choice of an active poll. `vote_count` is maintained by the
/// ledger and always equals the number of `poll_votes` rows for the option.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollOptionRecord {
    pub id: i64,
    pub poll_id: i64,
    pub ordinal: i64,
    pub label: String,
    pub vote_count: i64,
}

/// A single ballot in the vote ledger.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VoteRecord {
    pub id: i64,
    pub poll_id: i64,
    pub option_id: i64,
    pub user_id: i64,
    pub anonymous: bool,
    pub cast_at: String,
}

/// Directory row for a known user. Maintained outside this service; we only
/// ever read it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub avatar: Option<String>,
}

/// An archived poll. Same shape as `PollRecord` plus the archival timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArchivedPollRecord {
    pub id: i64,
    pub question: String,
    pub creator_id: i64,
    pub scope: String,
    pub creator_avatar: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    pub archived_at: String,
}

/// A frozen option of an archived poll. `voters` and `anonymity` hold the
/// final ledger as comma-joined, positionally aligned strings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArchivedPollOptionRecord {
    pub id: i64,
    pub poll_id: i64,
    pub ordinal: i64,
    pub label: String,
    pub vote_count: i64,
    pub voters: String,
    pub anonymity: String,
}

/// Payload for creating a poll; ids are assigned by the store.
#[derive(Debug, Clone)]
pub struct PollInsertion {
    pub question: String,
    pub creator_id: i64,
    pub scope: String,
    pub creator_avatar: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}
