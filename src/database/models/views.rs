//! View models assembled for API responses.
//!
//! Records mirror table rows; views are what clients see. The split keeps
//! storage column names out of the wire format, which is camelCase.

use serde::{Deserialize, Serialize};

/// A fully assembled poll: creator resolved, options ordered, voters
/// attached. Served for both active and archived polls; `archived_at` is
/// only present for the latter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub id: i64,
    pub question: String,
    pub scope: String,
    pub creator: CreatorView,
    pub created_at: String,
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
    pub options: Vec<PollOptionView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorView {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOptionView {
    pub id: i64,
    pub ordinal: i64,
    pub label: String,
    pub vote_count: i64,
    pub voters: Vec<VoterView>,
}

/// One entry in an option's voter list. Anonymous entries carry no
/// identifying fields, only the placeholder name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterView {
    pub anonymous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl VoterView {
    pub fn anonymous() -> Self {
        Self {
            anonymous: true,
            user_id: None,
            name: "Anonymous".to_string(),
            email: None,
            avatar: None,
        }
    }
}
