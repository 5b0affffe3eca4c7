//! Realtime fan-out of poll state over WebSockets.
//!
//! Every connected viewer receives a full `pollsUpdated` snapshot on
//! connect and after every state change, so no client-side reconciliation
//! or replay is needed. Clients may also cast votes over the socket;
//! malformed or rejected events are answered with an `error` event on that
//! socket only.

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::database::models::views::PollView;
use crate::ledger::{self, LedgerError};
use crate::metrics;
use crate::query;
use crate::state::AppState;
use crate::types::VoteRequest;

/// Client-to-server events.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Vote(VoteRequest),
}

/// Server-to-client events.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    PollsUpdated(Vec<PollView>),
    Error(String),
}

/// GET /ws
pub async fn handle_socket_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

async fn client_session(socket: WebSocket, state: AppState) {
    metrics::realtime_session_opened();
    info!("Realtime viewer connected");

    let (mut sink, mut stream) = socket.split();
    let mut updates = state.updates.subscribe();
    let (direct_tx, mut direct_rx) = mpsc::channel::<String>(8);

    // Snapshot on connect, so a (re)connecting viewer starts current.
    match current_snapshot(&state).await {
        Ok(snapshot) => {
            let _ = direct_tx.send(snapshot).await;
        }
        Err(err) => warn!("Could not build connect snapshot: {:#}", err),
    }

    // Writer half: merges the shared broadcast with this socket's own
    // error events. Broadcast lag is survivable because each update
    // supersedes the previous one.
    let mut send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                direct = direct_rx.recv() => match direct {
                    Some(text) => text,
                    None => break,
                },
                update = updates.recv() => match update {
                    Ok(text) => text,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Viewer lagged, skipped {} updates", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if sink.send(Message::Text(Utf8Bytes::from(text))).await.is_err() {
                break;
            }
        }
    });

    // Reader half: vote events come in here.
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    handle_client_event(&recv_state, text.as_str(), &direct_tx).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    metrics::realtime_session_closed();
    info!("Realtime viewer disconnected");
}

async fn handle_client_event(state: &AppState, raw: &str, direct: &mpsc::Sender<String>) {
    let event: ClientEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(err) => {
            debug!("Unparseable realtime message: {}", err);
            send_error(
                direct,
                "malformed event; expected {\"event\":\"vote\",\"data\":{...}}",
            )
            .await;
            return;
        }
    };

    match event {
        ClientEvent::Vote(vote) => {
            match ledger::submit_vote(&state.pool, vote.option_id, vote.user_id, vote.anonymous)
                .await
            {
                // A repeat vote still broadcasts: the caster's UI refreshes
                // to the authoritative state either way.
                Ok(_) => {
                    if let Err(err) = broadcast_polls(state).await {
                        warn!("Post-vote broadcast failed: {:#}", err);
                    }
                }
                Err(LedgerError::OptionNotFound(option_id)) => {
                    send_error(
                        direct,
                        &format!(
                            "option {} not found; the poll may have just been archived",
                            option_id
                        ),
                    )
                    .await;
                }
                Err(LedgerError::Storage(err)) => {
                    warn!("Realtime vote failed to persist: {}", err);
                    send_error(direct, "vote could not be stored, please retry").await;
                }
            }
        }
    }
}

async fn send_error(direct: &mpsc::Sender<String>, message: &str) {
    match serde_json::to_string(&ServerEvent::Error(message.to_string())) {
        Ok(text) => {
            let _ = direct.send(text).await;
        }
        Err(err) => warn!("Could not encode error event: {}", err),
    }
}

async fn current_snapshot(state: &AppState) -> anyhow::Result<String> {
    let polls = query::list_active_polls(&state.pool).await?;
    Ok(serde_json::to_string(&ServerEvent::PollsUpdated(polls))?)
}

/// Push the refreshed active poll set to every connected viewer. Called
/// after every successful mutation, from the HTTP and socket paths alike.
pub async fn broadcast_polls(state: &AppState) -> anyhow::Result<()> {
    let text = current_snapshot(state).await?;
    // send() errs only when no viewer is subscribed, which is fine.
    let viewers = state.updates.send(text).unwrap_or(0);
    metrics::record_broadcast();
    debug!("Broadcast poll state to {} viewer(s)", viewers);
    Ok(())
}
