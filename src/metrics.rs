//! Process-wide counters and the /admin/stats endpoint.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use sysinfo::Disks;

use crate::database::constants::DEFAULT_DB_PATH;
use crate::lifecycle::SweepReport;
use crate::state::AppState;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum VoteOutcomeKind {
    Accepted,
    AlreadyVoted,
    OptionNotFound,
    StorageError,
}

impl VoteOutcomeKind {
    fn label(&self) -> &'static str {
        match self {
            VoteOutcomeKind::Accepted => "accepted",
            VoteOutcomeKind::AlreadyVoted => "already_voted",
            VoteOutcomeKind::OptionNotFound => "option_not_found",
            VoteOutcomeKind::StorageError => "storage_error",
        }
    }
}

#[derive(Default)]
struct Metrics {
    votes_total: HashMap<VoteOutcomeKind, u64>,
    polls_created_total: u64,
    sweep_scanned_total: u64,
    sweep_migrated_total: u64,
    sweep_failed_total: u64,
    broadcasts_total: u64,
    realtime_sessions_total: u64,
    realtime_connected: i64,
}

static METRICS: OnceCell<Mutex<Metrics>> = OnceCell::new();

fn registry() -> &'static Mutex<Metrics> {
    METRICS.get_or_init(|| Mutex::new(Metrics::default()))
}

pub fn record_vote_outcome(kind: VoteOutcomeKind) {
    let mut metrics = registry().lock().expect("metrics mutex poisoned");
    *metrics.votes_total.entry(kind).or_insert(0) += 1;
}

pub fn record_poll_created() {
    registry().lock().expect("metrics mutex poisoned").polls_created_total += 1;
}

pub fn record_sweep(report: &SweepReport) {
    let mut metrics = registry().lock().expect("metrics mutex poisoned");
    metrics.sweep_scanned_total += report.scanned as u64;
    metrics.sweep_migrated_total += report.migrated as u64;
    metrics.sweep_failed_total += report.failed as u64;
}

pub fn record_broadcast() {
    registry().lock().expect("metrics mutex poisoned").broadcasts_total += 1;
}

pub fn realtime_session_opened() {
    let mut metrics = registry().lock().expect("metrics mutex poisoned");
    metrics.realtime_sessions_total += 1;
    metrics.realtime_connected += 1;
}

pub fn realtime_session_closed() {
    registry().lock().expect("metrics mutex poisoned").realtime_connected -= 1;
}

pub fn snapshot_as_json() -> Value {
    let metrics = registry().lock().expect("metrics mutex poisoned");
    let votes: Vec<Value> = metrics
        .votes_total
        .iter()
        .map(|(kind, count)| json!({ "outcome": kind.label(), "count": count }))
        .collect();

    json!({
        "votes_total": votes,
        "polls_created_total": metrics.polls_created_total,
        "sweep": {
            "scanned_total": metrics.sweep_scanned_total,
            "migrated_total": metrics.sweep_migrated_total,
            "failed_total": metrics.sweep_failed_total,
        },
        "realtime": {
            "connected": metrics.realtime_connected,
            "sessions_total": metrics.realtime_sessions_total,
            "broadcasts_total": metrics.broadcasts_total,
        },
        "storage": storage_snapshot(),
        "build": {
            "git_hash": option_env!("POLLS_BUILD_GIT_HASH"),
            "built_at_unix": option_env!("POLLS_BUILD_TIME_UNIX"),
        },
    })
}

fn storage_snapshot() -> Value {
    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let db_size_mb = std::fs::metadata(&db_path)
        .ok()
        .map(|meta| round2(meta.len() as f64 / BYTES_PER_MB));
    json!({
        "db_path": db_path,
        "db_size_mb": db_size_mb,
        "disk_free_mb": filesystem_free_mb(&db_path),
    })
}

/// Free space on the filesystem holding the database, by longest matching
/// mount point.
fn filesystem_free_mb(db_path: &str) -> Option<f64> {
    let target = std::fs::canonicalize(db_path).ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| round2(disk.available_space() as f64 / BYTES_PER_MB))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// GET /admin/stats, guarded by the x-metrics-token header. With no token
/// configured every request is refused.
pub async fn handle_admin_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let presented = headers
        .get("x-metrics-token")
        .and_then(|value| value.to_str().ok());
    match (&state.metrics_token, presented) {
        (Some(expected), Some(got)) if got == expected => Ok(Json(snapshot_as_json())),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
