//! The vote ledger: single write path for ballots.
//!
//! A user gets at most one vote per poll, enforced by the unique
//! `(poll_id, user_id)` pair in `poll_votes`. The write happens first and
//! carries the conflict handling, so two concurrent votes can never both
//! observe a pre-vote state; the loser of the race is reported as a repeat
//! vote, same as a deliberate double click.

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::{self, VoteOutcomeKind};
use crate::utils::now_timestamp;

/// Outcome of a vote submission. A repeat vote is a normal outcome, not an
/// error; clients render both the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VoteOutcome {
    Accepted,
    AlreadyVoted,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The option is not in the active store. Typically the poll was
    /// archived between the client's last refresh and its vote.
    #[error("poll option {0} not found in the active store")]
    OptionNotFound(i64),
    #[error("vote storage failure")]
    Storage(#[from] sqlx::Error),
}

/// Resolves the owning poll and claims the (poll, user) slot in one
/// statement. A conflicting claim makes this a no-op; an unknown option
/// inserts nothing because the SELECT yields no row.
const INSERT_VOTE_SQL: &str =
    "INSERT INTO poll_votes (poll_id, option_id, user_id, anonymous, cast_at) \
     SELECT poll_id, id, ?, ?, ? FROM poll_options WHERE id = ? \
     ON CONFLICT (poll_id, user_id) DO NOTHING";

/// Record one ballot. On success the option's `vote_count` is bumped in
/// the same transaction, keeping the tally equal to the ballot count.
pub async fn record_vote(
    pool: &SqlitePool,
    option_id: i64,
    user_id: i64,
    anonymous: bool,
) -> Result<VoteOutcome, LedgerError> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(INSERT_VOTE_SQL)
        .bind(user_id)
        .bind(anonymous)
        .bind(now_timestamp())
        .bind(option_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if inserted == 1 {
        sqlx::query("UPDATE poll_options SET vote_count = vote_count + 1 WHERE id = ?")
            .bind(option_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        return Ok(VoteOutcome::Accepted);
    }

    // Nothing was written: either the user already holds this poll's slot
    // or the option is gone. A read inside the same transaction tells the
    // two apart.
    let option_exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM poll_options WHERE id = ?")
        .bind(option_id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    if option_exists == 0 {
        return Err(LedgerError::OptionNotFound(option_id));
    }
    Ok(VoteOutcome::AlreadyVoted)
}

/// `record_vote` plus the logging and counters every caller wants.
pub async fn submit_vote(
    pool: &SqlitePool,
    option_id: i64,
    user_id: i64,
    anonymous: bool,
) -> Result<VoteOutcome, LedgerError> {
    match record_vote(pool, option_id, user_id, anonymous).await {
        Ok(VoteOutcome::Accepted) => {
            metrics::record_vote_outcome(VoteOutcomeKind::Accepted);
            info!("Vote accepted: option={} user={}", option_id, user_id);
            Ok(VoteOutcome::Accepted)
        }
        Ok(VoteOutcome::AlreadyVoted) => {
            metrics::record_vote_outcome(VoteOutcomeKind::AlreadyVoted);
            debug!("Repeat vote ignored: option={} user={}", option_id, user_id);
            Ok(VoteOutcome::AlreadyVoted)
        }
        Err(err @ LedgerError::OptionNotFound(_)) => {
            metrics::record_vote_outcome(VoteOutcomeKind::OptionNotFound);
            info!(
                "Vote for unknown option {} from user {} (poll archived?)",
                option_id, user_id
            );
            Err(err)
        }
        Err(err) => {
            metrics::record_vote_outcome(VoteOutcomeKind::StorageError);
            warn!(
                "Vote failed to persist: option={} user={} error={}",
                option_id, user_id, err
            );
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{PollInsertion, PollOptionRecord, VoteRecord};
    use crate::database::{cleanup_db_files, run_migrations, temp_db_path, Database};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_poll(pool: &SqlitePool, labels: &[&str]) -> Vec<i64> {
        let labels: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        let poll_id = PollInsertion {
            question: "Lunch spot?".to_string(),
            creator_id: 1,
            scope: "10B".to_string(),
            creator_avatar: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            expires_at: "2099-01-01T00:00:00Z".to_string(),
        }
        .insert_with_options(pool, &labels)
        .await
        .unwrap();

        PollOptionRecord::list_for_poll(pool, poll_id)
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect()
    }

    async fn option_count(pool: &SqlitePool, option_id: i64) -> i64 {
        sqlx::query_scalar("SELECT vote_count FROM poll_options WHERE id = ?")
            .bind(option_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_vote_is_accepted_and_counted() {
        let pool = memory_pool().await;
        let options = seed_poll(&pool, &["A", "B"]).await;

        let outcome = record_vote(&pool, options[0], 42, false).await.unwrap();
        assert_eq!(outcome, VoteOutcome::Accepted);
        assert_eq!(option_count(&pool, options[0]).await, 1);
        assert_eq!(option_count(&pool, options[1]).await, 0);
    }

    #[tokio::test]
    async fn second_vote_same_option_is_a_noop() {
        let pool = memory_pool().await;
        let options = seed_poll(&pool, &["A", "B"]).await;

        record_vote(&pool, options[0], 42, false).await.unwrap();
        let outcome = record_vote(&pool, options[0], 42, false).await.unwrap();
        assert_eq!(outcome, VoteOutcome::AlreadyVoted);
        assert_eq!(option_count(&pool, options[0]).await, 1);
    }

    #[tokio::test]
    async fn vote_on_another_option_of_the_same_poll_is_a_noop() {
        let pool = memory_pool().await;
        let options = seed_poll(&pool, &["A", "B"]).await;

        record_vote(&pool, options[0], 42, false).await.unwrap();
        let outcome = record_vote(&pool, options[1], 42, false).await.unwrap();
        assert_eq!(outcome, VoteOutcome::AlreadyVoted);
        assert_eq!(option_count(&pool, options[0]).await, 1);
        assert_eq!(option_count(&pool, options[1]).await, 0);
    }

    #[tokio::test]
    async fn same_user_may_vote_in_different_polls() {
        let pool = memory_pool().await;
        let first = seed_poll(&pool, &["A", "B"]).await;
        let second = seed_poll(&pool, &["X", "Y"]).await;

        assert_eq!(
            record_vote(&pool, first[0], 42, false).await.unwrap(),
            VoteOutcome::Accepted
        );
        assert_eq!(
            record_vote(&pool, second[1], 42, true).await.unwrap(),
            VoteOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn unknown_option_is_reported_not_recorded() {
        let pool = memory_pool().await;
        seed_poll(&pool, &["A", "B"]).await;

        let err = record_vote(&pool, 999_999, 42, false).await.unwrap_err();
        assert!(matches!(err, LedgerError::OptionNotFound(999_999)));

        let ballots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM poll_votes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(ballots, 0);
    }

    #[tokio::test]
    async fn anonymous_flag_is_stored_per_ballot() {
        let pool = memory_pool().await;
        let options = seed_poll(&pool, &["A", "B"]).await;

        record_vote(&pool, options[0], 42, true).await.unwrap();
        record_vote(&pool, options[0], 43, false).await.unwrap();

        let poll_id: i64 = sqlx::query_scalar("SELECT poll_id FROM poll_options WHERE id = ?")
            .bind(options[0])
            .fetch_one(&pool)
            .await
            .unwrap();
        let votes = VoteRecord::list_for_poll(&pool, poll_id).await.unwrap();
        assert_eq!(votes.len(), 2);
        assert!(votes[0].anonymous);
        assert!(!votes[1].anonymous);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_votes_from_distinct_users_all_count() {
        let path = temp_db_path("poll-ledger-concurrent");
        let db = Database::connect(&path).await.unwrap();
        let options = seed_poll(db.pool(), &["A", "B"]).await;

        let mut handles = Vec::new();
        for user_id in 1..=16 {
            let pool = db.pool().clone();
            let option_id = options[(user_id % 2) as usize];
            handles.push(tokio::spawn(async move {
                record_vote(&pool, option_id, user_id, false).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), VoteOutcome::Accepted);
        }

        let total: i64 = option_count(db.pool(), options[0]).await
            + option_count(db.pool(), options[1]).await;
        assert_eq!(total, 16);
        let ballots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM poll_votes")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(ballots, 16);

        db.pool().close().await;
        cleanup_db_files(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_votes_from_one_user_accept_exactly_one() {
        let path = temp_db_path("poll-ledger-race");
        let db = Database::connect(&path).await.unwrap();
        let options = seed_poll(db.pool(), &["A", "B"]).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = db.pool().clone();
            let option_id = options[i % 2];
            handles.push(tokio::spawn(async move {
                record_vote(&pool, option_id, 42, false).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                VoteOutcome::Accepted => accepted += 1,
                VoteOutcome::AlreadyVoted => {}
            }
        }
        assert_eq!(accepted, 1);

        let total = option_count(db.pool(), options[0]).await
            + option_count(db.pool(), options[1]).await;
        assert_eq!(total, 1);

        db.pool().close().await;
        cleanup_db_files(&path);
    }
}
