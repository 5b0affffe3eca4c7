//! Shared application state

use sqlx::SqlitePool;
use tokio::sync::broadcast;

/// Capacity of the poll-update fan-out channel. A viewer that falls
/// further behind than this skips ahead to the newest snapshot, which is
/// fine because every update carries the full poll set.
pub const UPDATE_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    /// Serialized `pollsUpdated` events, fanned out to every socket.
    pub updates: broadcast::Sender<String>,
    /// Bearer token required by /admin/stats; `None` refuses all requests.
    pub metrics_token: Option<String>,
}

impl AppState {
    pub fn new(pool: SqlitePool, metrics_token: Option<String>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            pool,
            updates,
            metrics_token,
        }
    }
}
