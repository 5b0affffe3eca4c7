//! Request and response types for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::ledger::VoteOutcome;

/// Body of POST /polls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
    pub creator_id: i64,
    pub scope: String,
    /// "YYYY-MM-DD HH:MM:SS", read as UTC.
    pub expires_at: String,
    #[serde(default)]
    pub creator_avatar: Option<String>,
}

/// Body of POST /polls/vote, and the payload of the realtime "vote" event.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub anonymous: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VoteResponse {
    pub status: VoteOutcome,
}
