//! HTTP handlers for poll listing, creation, and voting.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::{info, warn};

use crate::database::models::views::PollView;
use crate::database::models::PollInsertion;
use crate::error::ApiError;
use crate::ledger;
use crate::metrics;
use crate::query;
use crate::realtime;
use crate::state::AppState;
use crate::types::{CreatePollRequest, VoteRequest, VoteResponse};
use crate::utils::{now_timestamp, parse_expiry, store_timestamp, valid_scope};

/// GET /polls
pub async fn handle_list_polls(
    State(state): State<AppState>,
) -> Result<Json<Vec<PollView>>, ApiError> {
    let polls = query::list_active_polls(&state.pool).await?;
    Ok(Json(polls))
}

/// GET /polls/expired
pub async fn handle_list_expired(
    State(state): State<AppState>,
) -> Result<Json<Vec<PollView>>, ApiError> {
    let polls = query::list_archived_polls(&state.pool).await?;
    Ok(Json(polls))
}

/// POST /polls
pub async fn handle_create_poll(
    State(state): State<AppState>,
    Json(request): Json<CreatePollRequest>,
) -> Result<(StatusCode, Json<PollView>), ApiError> {
    let labels = validate_create(&request)?;
    let expires_at = parse_expiry(&request.expires_at).map_err(|_| {
        ApiError::BadRequest(format!(
            "expiresAt must look like YYYY-MM-DD HH:MM:SS, got {:?}",
            request.expires_at
        ))
    })?;

    let insertion = PollInsertion {
        question: request.question.trim().to_string(),
        creator_id: request.creator_id,
        scope: request.scope.trim().to_string(),
        creator_avatar: request.creator_avatar.clone(),
        created_at: now_timestamp(),
        expires_at: store_timestamp(expires_at),
    };
    let poll_id = insertion.insert_with_options(&state.pool, &labels).await?;
    metrics::record_poll_created();
    info!(
        "Created poll {} with {} options (scope {})",
        poll_id,
        labels.len(),
        insertion.scope
    );

    let view = query::view_for_poll(&state.pool, poll_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("poll {} was archived right after creation", poll_id))
        })?;

    if let Err(err) = realtime::broadcast_polls(&state).await {
        warn!("Post-create broadcast failed: {:#}", err);
    }

    Ok((StatusCode::CREATED, Json(view)))
}

/// POST /polls/vote
pub async fn handle_vote(
    State(state): State<AppState>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, ApiError> {
    let outcome = ledger::submit_vote(
        &state.pool,
        request.option_id,
        request.user_id,
        request.anonymous,
    )
    .await?;

    // One viewer's vote becomes visible to every other without polling.
    if let Err(err) = realtime::broadcast_polls(&state).await {
        warn!("Post-vote broadcast failed: {:#}", err);
    }

    Ok(Json(VoteResponse { status: outcome }))
}

fn validate_create(request: &CreatePollRequest) -> Result<Vec<String>, ApiError> {
    if request.question.trim().is_empty() {
        return Err(ApiError::BadRequest("question must not be blank".to_string()));
    }
    let labels: Vec<String> = request
        .options
        .iter()
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .collect();
    if labels.len() < 2 {
        return Err(ApiError::BadRequest(
            "a poll needs at least two non-blank options".to_string(),
        ));
    }
    if !valid_scope(request.scope.trim()) {
        return Err(ApiError::BadRequest(format!(
            "invalid scope tag {:?}",
            request.scope
        )));
    }
    Ok(labels)
}
