//! Archival of expired polls.
//!
//! A background sweeper moves polls past their expiry out of the active
//! store into the archive mirror tables, freezing each option's ledger as
//! comma-joined voter and anonymity strings. One poll moves per
//! transaction: the archive copy and the active delete land together or
//! not at all, so a crashed sweep leaves the poll active and the next
//! sweep picks it up again. The sweeper is the only writer that deletes
//! rows from the active store.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::database::codec;
use crate::database::models::{
    ArchivedPollOptionRecord, ArchivedPollRecord, PollOptionRecord, PollRecord, VoteRecord,
};
use crate::metrics;
use crate::utils::now_timestamp;

/// Upper bound on polls migrated per sweep, keeping each cycle short even
/// after downtime left a large backlog.
pub const SWEEP_BATCH_SIZE: i64 = 10;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Cap on the per-poll retry backoff, in sweep cycles.
const MAX_BACKOFF_CYCLES: u64 = 64;

/// Consecutive failures after which a poll's migration is logged at error
/// level instead of warn.
const ESCALATE_AFTER_FAILURES: u32 = 8;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub migrated: usize,
    pub failed: usize,
    pub deferred: usize,
}

/// Per-poll failure bookkeeping. A poll that keeps failing is retried
/// forever, but at exponentially stretched intervals so one poisoned row
/// cannot dominate the sweep log.
#[derive(Debug, Default)]
pub struct RetryTracker {
    state: HashMap<i64, RetryState>,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    failures: u32,
    eligible_at: u64,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_eligible(&self, poll_id: i64, cycle: u64) -> bool {
        self.state
            .get(&poll_id)
            .map(|s| cycle >= s.eligible_at)
            .unwrap_or(true)
    }

    /// Returns the consecutive failure count after recording this one.
    fn note_failure(&mut self, poll_id: i64, cycle: u64) -> u32 {
        let entry = self
            .state
            .entry(poll_id)
            .or_insert(RetryState { failures: 0, eligible_at: 0 });
        entry.failures += 1;
        let shift = (entry.failures - 1).min(32) as u64;
        let delay = (1u64 << shift.min(63)).min(MAX_BACKOFF_CYCLES);
        entry.eligible_at = cycle + delay;
        entry.failures
    }

    fn clear(&mut self, poll_id: i64) {
        self.state.remove(&poll_id);
    }
}

/// One sweep pass: scan for polls expired as of `now` and migrate each
/// eligible one in its own transaction. Failures are reported, never
/// propagated, so one bad poll does not stall the rest of the batch.
pub async fn sweep_expired(
    pool: &SqlitePool,
    now: &str,
    cycle: u64,
    tracker: &mut RetryTracker,
) -> Result<SweepReport> {
    let candidates = PollRecord::select_expired(pool, now, SWEEP_BATCH_SIZE).await?;
    let mut report = SweepReport {
        scanned: candidates.len(),
        ..Default::default()
    };

    for poll in candidates {
        if !tracker.is_eligible(poll.id, cycle) {
            report.deferred += 1;
            continue;
        }
        match migrate_poll(pool, &poll).await {
            Ok(()) => {
                tracker.clear(poll.id);
                report.migrated += 1;
                info!("Archived poll {} ({:?})", poll.id, poll.question);
            }
            Err(err) => {
                report.failed += 1;
                let failures = tracker.note_failure(poll.id, cycle);
                if failures >= ESCALATE_AFTER_FAILURES {
                    error!(
                        "Migration of poll {} failing persistently ({} attempts): {:#}",
                        poll.id, failures, err
                    );
                } else {
                    warn!(
                        "Migration of poll {} failed (attempt {}), will retry: {:#}",
                        poll.id, failures, err
                    );
                }
            }
        }
    }

    Ok(report)
}

/// Copy one poll into the archive and delete it from the active store,
/// all inside a single transaction. Tallies and ledgers are read inside
/// the transaction, so the frozen strings always match the final counts.
async fn migrate_poll(pool: &SqlitePool, poll: &PollRecord) -> Result<()> {
    let mut tx = pool.begin().await?;

    let options = PollOptionRecord::list_for_poll(&mut *tx, poll.id).await?;
    let votes = VoteRecord::list_for_poll(&mut *tx, poll.id).await?;

    let mut by_option: HashMap<i64, (Vec<i64>, Vec<bool>)> = HashMap::new();
    for vote in votes {
        let entry = by_option.entry(vote.option_id).or_default();
        entry.0.push(vote.user_id);
        entry.1.push(vote.anonymous);
    }

    ArchivedPollRecord {
        id: poll.id,
        question: poll.question.clone(),
        creator_id: poll.creator_id,
        scope: poll.scope.clone(),
        creator_avatar: poll.creator_avatar.clone(),
        created_at: poll.created_at.clone(),
        expires_at: poll.expires_at.clone(),
        archived_at: now_timestamp(),
    }
    .insert(&mut *tx)
    .await?;

    for option in &options {
        let (voter_ids, flags) = by_option.remove(&option.id).unwrap_or_default();
        ArchivedPollOptionRecord {
            id: option.id,
            poll_id: option.poll_id,
            ordinal: option.ordinal,
            label: option.label.clone(),
            vote_count: option.vote_count,
            voters: codec::encode_voters(&voter_ids),
            anonymity: codec::encode_flags(&flags),
        }
        .insert(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM poll_votes WHERE poll_id = ?")
        .bind(poll.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM poll_options WHERE poll_id = ?")
        .bind(poll.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(poll.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Background sweep loop. Ticks immediately on startup, then every
/// `interval_secs`; a tick that overruns delays the next one instead of
/// bunching.
pub async fn run(pool: SqlitePool, interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = RetryTracker::new();
    let mut cycle: u64 = 0;

    info!(
        "Lifecycle sweeper running every {}s (batch size {})",
        interval_secs, SWEEP_BATCH_SIZE
    );
    loop {
        ticker.tick().await;
        cycle += 1;
        match sweep_expired(&pool, &now_timestamp(), cycle, &mut tracker).await {
            Ok(report) => {
                metrics::record_sweep(&report);
                if report.scanned > 0 {
                    info!(
                        "Sweep {}: scanned={} migrated={} failed={} deferred={}",
                        cycle, report.scanned, report.migrated, report.failed, report.deferred
                    );
                }
            }
            Err(err) => warn!("Sweep {} could not scan for expired polls: {:#}", cycle, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::PollInsertion;
    use crate::database::{run_migrations, sql};
    use crate::ledger::record_vote;
    use sqlx::sqlite::SqlitePoolOptions;

    const NOW: &str = "2026-06-01T00:00:00Z";

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_poll(pool: &SqlitePool, question: &str, expires_at: &str) -> (i64, Vec<i64>) {
        let labels: Vec<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let poll_id = PollInsertion {
            question: question.to_string(),
            creator_id: 1,
            scope: "10B".to_string(),
            creator_avatar: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            expires_at: expires_at.to_string(),
        }
        .insert_with_options(pool, &labels)
        .await
        .unwrap();
        let options = PollOptionRecord::list_for_poll(pool, poll_id)
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        (poll_id, options)
    }

    async fn count(pool: &SqlitePool, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
    }

    #[tokio::test]
    async fn future_polls_are_not_selected() {
        let pool = test_pool().await;
        seed_poll(&pool, "Still open", "2099-01-01T00:00:00Z").await;

        let mut tracker = RetryTracker::new();
        let report = sweep_expired(&pool, NOW, 1, &mut tracker).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM polls").await, 1);
    }

    #[tokio::test]
    async fn expired_poll_moves_to_archive_with_frozen_ledger() {
        let pool = test_pool().await;
        let (poll_id, options) = seed_poll(&pool, "Lunch spot?", "2026-05-01T00:00:00Z").await;
        record_vote(&pool, options[0], 5, false).await.unwrap();
        record_vote(&pool, options[0], 19, true).await.unwrap();
        record_vote(&pool, options[1], 7, false).await.unwrap();

        let mut tracker = RetryTracker::new();
        let report = sweep_expired(&pool, NOW, 1, &mut tracker).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 0);

        // Active store is clean.
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM polls").await, 0);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM poll_options").await, 0);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM poll_votes").await, 0);

        // Archive holds the poll with its final tallies and ledgers.
        let archived = ArchivedPollRecord::list_all(&pool).await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, poll_id);
        assert_eq!(archived[0].question, "Lunch spot?");
        assert!(!archived[0].archived_at.is_empty());

        let frozen = ArchivedPollOptionRecord::list_for_poll(&pool, poll_id)
            .await
            .unwrap();
        assert_eq!(frozen.len(), 2);
        assert_eq!(frozen[0].vote_count, 2);
        assert_eq!(frozen[0].voters, "5,19");
        assert_eq!(frozen[0].anonymity, "0,1");
        assert_eq!(frozen[1].vote_count, 1);
        assert_eq!(frozen[1].voters, "7");
        assert_eq!(frozen[1].anonymity, "0");
    }

    #[tokio::test]
    async fn options_without_votes_freeze_as_empty_strings() {
        let pool = test_pool().await;
        let (poll_id, _) = seed_poll(&pool, "Nobody voted", "2026-05-01T00:00:00Z").await;

        let mut tracker = RetryTracker::new();
        sweep_expired(&pool, NOW, 1, &mut tracker).await.unwrap();

        let frozen = ArchivedPollOptionRecord::list_for_poll(&pool, poll_id)
            .await
            .unwrap();
        assert_eq!(frozen.len(), 2);
        assert!(frozen.iter().all(|o| o.voters.is_empty()));
        assert!(frozen.iter().all(|o| o.anonymity.is_empty()));
        assert!(frozen.iter().all(|o| o.vote_count == 0));
    }

    #[tokio::test]
    async fn failed_migration_rolls_back_and_retries_later() {
        let pool = test_pool().await;
        let (_, options) = seed_poll(&pool, "Sticky poll", "2026-05-01T00:00:00Z").await;
        record_vote(&pool, options[0], 5, false).await.unwrap();

        // Break the archive side so the copy cannot land.
        sqlx::query("DROP TABLE archived_poll_options")
            .execute(&pool)
            .await
            .unwrap();

        let mut tracker = RetryTracker::new();
        let report = sweep_expired(&pool, NOW, 1, &mut tracker).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.migrated, 0);

        // Rollback left the poll fully active and nothing half-archived.
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM polls").await, 1);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM poll_options").await, 2);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM poll_votes").await, 1);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM archived_polls").await, 0);

        // Next cycle it is deferred by backoff, not retried.
        let report = sweep_expired(&pool, NOW, 1, &mut tracker).await.unwrap();
        assert_eq!(report.deferred, 1);

        // Repair the archive; the eligible retry succeeds.
        sqlx::query(sql::CREATE_ARCHIVED_POLL_OPTIONS_TABLE_SQL)
            .execute(&pool)
            .await
            .unwrap();
        let report = sweep_expired(&pool, NOW, 2, &mut tracker).await.unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM polls").await, 0);
        assert_eq!(
            count(&pool, "SELECT COUNT(*) FROM archived_polls").await,
            1
        );
    }

    #[tokio::test]
    async fn sweep_is_bounded_by_batch_size() {
        let pool = test_pool().await;
        for i in 0..12 {
            seed_poll(&pool, &format!("Old {}", i), "2026-05-01T00:00:00Z").await;
        }

        let mut tracker = RetryTracker::new();
        let report = sweep_expired(&pool, NOW, 1, &mut tracker).await.unwrap();
        assert_eq!(report.scanned, 10);
        assert_eq!(report.migrated, 10);

        let report = sweep_expired(&pool, NOW, 2, &mut tracker).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.migrated, 2);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM polls").await, 0);
    }

    #[test]
    fn retry_backoff_doubles_and_caps() {
        let mut tracker = RetryTracker::new();
        let mut cycle = 0u64;
        let mut expected_delays = vec![1u64, 2, 4, 8, 16, 32, 64, 64, 64];
        expected_delays.reverse();

        for attempt in 1..=9u32 {
            let failures = tracker.note_failure(77, cycle);
            assert_eq!(failures, attempt);
            let delay = expected_delays.pop().unwrap();
            let state = tracker.state[&77];
            assert_eq!(state.eligible_at, cycle + delay);
            assert!(!tracker.is_eligible(77, cycle + delay - 1));
            assert!(tracker.is_eligible(77, cycle + delay));
            cycle = state.eligible_at;
        }

        tracker.clear(77);
        assert!(tracker.is_eligible(77, 0));
    }
}
