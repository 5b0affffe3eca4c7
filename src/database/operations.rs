//! Database operations for poll records

use std::collections::HashMap;

use anyhow::Result;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use super::models::{
    ArchivedPollOptionRecord, ArchivedPollRecord, PollInsertion, PollOptionRecord, PollRecord,
    UserRecord, VoteRecord,
};

impl PollInsertion {
    /// Insert the poll and its options in one transaction; returns the new
    /// poll id. Options keep the caller's order via `ordinal`.
    pub async fn insert_with_options(&self, pool: &SqlitePool, labels: &[String]) -> Result<i64> {
        let mut tx = pool.begin().await?;

        let poll_id = sqlx::query(
            "INSERT INTO polls (question, creator_id, scope, creator_avatar, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.question)
        .bind(self.creator_id)
        .bind(&self.scope)
        .bind(&self.creator_avatar)
        .bind(&self.created_at)
        .bind(&self.expires_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (ordinal, label) in labels.iter().enumerate() {
            sqlx::query("INSERT INTO poll_options (poll_id, ordinal, label) VALUES (?, ?, ?)")
                .bind(poll_id)
                .bind(ordinal as i64)
                .bind(label)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!("Inserted poll {} with {} options", poll_id, labels.len());
        Ok(poll_id)
    }
}

impl PollRecord {
    pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<PollRecord>> {
        let poll = sqlx::query_as::<_, PollRecord>("SELECT * FROM polls WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(poll)
    }

    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<PollRecord>> {
        let polls = sqlx::query_as::<_, PollRecord>("SELECT * FROM polls ORDER BY id")
            .fetch_all(pool)
            .await?;
        Ok(polls)
    }

    /// Polls whose expiry is at or before `now`, in id order. `limit`
    /// keeps a single sweep bounded.
    pub async fn select_expired(pool: &SqlitePool, now: &str, limit: i64) -> Result<Vec<PollRecord>> {
        let polls = sqlx::query_as::<_, PollRecord>(
            "SELECT * FROM polls WHERE expires_at <= ? ORDER BY id LIMIT ?",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(polls)
    }
}

impl PollOptionRecord {
    /// Options of a poll in creation order. Generic over the executor so
    /// it can run against the pool or inside an open transaction.
    pub async fn list_for_poll<'e, E>(executor: E, poll_id: i64) -> Result<Vec<PollOptionRecord>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let options = sqlx::query_as::<_, PollOptionRecord>(
            "SELECT * FROM poll_options WHERE poll_id = ? ORDER BY ordinal",
        )
        .bind(poll_id)
        .fetch_all(executor)
        .await?;
        Ok(options)
    }
}

impl VoteRecord {
    /// Ballots of a poll in the order they were cast.
    pub async fn list_for_poll<'e, E>(executor: E, poll_id: i64) -> Result<Vec<VoteRecord>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let votes = sqlx::query_as::<_, VoteRecord>(
            "SELECT * FROM poll_votes WHERE poll_id = ? ORDER BY id",
        )
        .bind(poll_id)
        .fetch_all(executor)
        .await?;
        Ok(votes)
    }
}

impl UserRecord {
    /// Fetch a set of directory rows keyed by id. Ids without a row are
    /// simply absent from the map; callers decide what a gap means.
    pub async fn get_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<HashMap<i64, UserRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, email, avatar FROM users WHERE id IN ({})",
            placeholders
        );
        let mut query = sqlx::query_as::<_, UserRecord>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(pool).await?;
        Ok(rows.into_iter().map(|user| (user.id, user)).collect())
    }
}

impl ArchivedPollRecord {
    /// Runs on a plain connection so the caller can hold it inside the
    /// archival transaction.
    pub async fn insert(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            "INSERT INTO archived_polls \
             (id, question, creator_id, scope, creator_avatar, created_at, expires_at, archived_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.id)
        .bind(&self.question)
        .bind(self.creator_id)
        .bind(&self.scope)
        .bind(&self.creator_avatar)
        .bind(&self.created_at)
        .bind(&self.expires_at)
        .bind(&self.archived_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<ArchivedPollRecord>> {
        let polls = sqlx::query_as::<_, ArchivedPollRecord>("SELECT * FROM archived_polls ORDER BY id")
            .fetch_all(pool)
            .await?;
        Ok(polls)
    }
}

impl ArchivedPollOptionRecord {
    pub async fn insert(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            "INSERT INTO archived_poll_options \
             (id, poll_id, ordinal, label, vote_count, voters, anonymity) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.id)
        .bind(self.poll_id)
        .bind(self.ordinal)
        .bind(&self.label)
        .bind(self.vote_count)
        .bind(&self.voters)
        .bind(&self.anonymity)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn list_for_poll(pool: &SqlitePool, poll_id: i64) -> Result<Vec<ArchivedPollOptionRecord>> {
        let options = sqlx::query_as::<_, ArchivedPollOptionRecord>(
            "SELECT * FROM archived_poll_options WHERE poll_id = ? ORDER BY ordinal",
        )
        .bind(poll_id)
        .fetch_all(pool)
        .await?;
        Ok(options)
    }
}
