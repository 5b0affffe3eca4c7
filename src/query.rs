//! Read-side assembly of poll views.
//!
//! Joins polls with their options, ballots, and the user directory, and
//! resolves voter identity: anonymous ballots get a placeholder, known
//! voters get a display name derived from their directory email.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::database::codec;
use crate::database::models::views::{CreatorView, PollOptionView, PollView, VoterView};
use crate::database::models::{
    ArchivedPollOptionRecord, ArchivedPollRecord, PollOptionRecord, PollRecord, UserRecord,
    VoteRecord,
};
use crate::utils::display_name_from_email;

/// All active polls, fully assembled.
pub async fn list_active_polls(pool: &SqlitePool) -> Result<Vec<PollView>> {
    let polls = PollRecord::list_active(pool).await?;
    let mut views = Vec::with_capacity(polls.len());
    for poll in polls {
        views.push(assemble_active(pool, poll).await?);
    }
    Ok(views)
}

/// A single active poll, or `None` when it is not in the active store.
pub async fn view_for_poll(pool: &SqlitePool, poll_id: i64) -> Result<Option<PollView>> {
    match PollRecord::get(pool, poll_id).await? {
        Some(poll) => Ok(Some(assemble_active(pool, poll).await?)),
        None => Ok(None),
    }
}

/// All archived polls. Votes come out of the frozen ledger strings; voter
/// identities are still resolved against the live directory.
pub async fn list_archived_polls(pool: &SqlitePool) -> Result<Vec<PollView>> {
    let polls = ArchivedPollRecord::list_all(pool).await?;
    let mut views = Vec::with_capacity(polls.len());
    for poll in polls {
        views.push(assemble_archived(pool, poll).await?);
    }
    Ok(views)
}

async fn assemble_active(pool: &SqlitePool, poll: PollRecord) -> Result<PollView> {
    let options = PollOptionRecord::list_for_poll(pool, poll.id).await?;
    let votes = VoteRecord::list_for_poll(pool, poll.id).await?;

    // Ballots grouped per option, preserving cast order.
    let mut by_option: HashMap<i64, Vec<(i64, bool)>> = HashMap::new();
    for vote in &votes {
        by_option
            .entry(vote.option_id)
            .or_default()
            .push((vote.user_id, vote.anonymous));
    }

    let public_voters: Vec<i64> = votes
        .iter()
        .filter(|v| !v.anonymous)
        .map(|v| v.user_id)
        .collect();
    let users = resolve_directory(pool, poll.creator_id, &public_voters).await?;

    let option_views = options
        .into_iter()
        .map(|option| {
            let ledger = by_option.remove(&option.id).unwrap_or_default();
            PollOptionView {
                id: option.id,
                ordinal: option.ordinal,
                label: option.label,
                vote_count: option.vote_count,
                voters: voter_views(&ledger, &users),
            }
        })
        .collect();

    Ok(PollView {
        id: poll.id,
        question: poll.question,
        scope: poll.scope,
        creator: creator_view(poll.creator_id, poll.creator_avatar, &users),
        created_at: poll.created_at,
        expires_at: poll.expires_at,
        archived_at: None,
        options: option_views,
    })
}

async fn assemble_archived(pool: &SqlitePool, poll: ArchivedPollRecord) -> Result<PollView> {
    let options = ArchivedPollOptionRecord::list_for_poll(pool, poll.id).await?;

    let decoded: Vec<(i64, Vec<(i64, bool)>)> = options
        .iter()
        .map(|option| (option.id, codec::decode_ledger(&option.voters, &option.anonymity)))
        .collect();

    let public_voters: Vec<i64> = decoded
        .iter()
        .flat_map(|(_, ledger)| ledger.iter())
        .filter(|(_, anonymous)| !anonymous)
        .map(|(user_id, _)| *user_id)
        .collect();
    let users = resolve_directory(pool, poll.creator_id, &public_voters).await?;

    let option_views = options
        .iter()
        .zip(decoded.iter())
        .map(|(option, (_, ledger))| PollOptionView {
            id: option.id,
            ordinal: option.ordinal,
            label: option.label.clone(),
            vote_count: option.vote_count,
            voters: voter_views(ledger, &users),
        })
        .collect();

    Ok(PollView {
        id: poll.id,
        question: poll.question,
        scope: poll.scope,
        creator: creator_view(poll.creator_id, poll.creator_avatar, &users),
        created_at: poll.created_at,
        expires_at: poll.expires_at,
        archived_at: Some(poll.archived_at),
        options: option_views,
    })
}

/// One directory round trip per poll: the creator plus every public voter.
async fn resolve_directory(
    pool: &SqlitePool,
    creator_id: i64,
    public_voters: &[i64],
) -> Result<HashMap<i64, UserRecord>> {
    let mut ids: Vec<i64> = Vec::with_capacity(public_voters.len() + 1);
    ids.push(creator_id);
    ids.extend_from_slice(public_voters);
    ids.sort_unstable();
    ids.dedup();
    UserRecord::get_by_ids(pool, &ids).await
}

fn voter_views(ledger: &[(i64, bool)], users: &HashMap<i64, UserRecord>) -> Vec<VoterView> {
    ledger
        .iter()
        .map(|(user_id, anonymous)| {
            if *anonymous {
                return VoterView::anonymous();
            }
            match users.get(user_id) {
                Some(user) => VoterView {
                    anonymous: false,
                    user_id: Some(user.id),
                    name: display_name_from_email(&user.email),
                    email: Some(user.email.clone()),
                    avatar: user.avatar.clone(),
                },
                // Directory row gone: keep the ballot visible, identity blank.
                None => VoterView {
                    anonymous: false,
                    user_id: Some(*user_id),
                    name: String::new(),
                    email: None,
                    avatar: None,
                },
            }
        })
        .collect()
}

fn creator_view(
    creator_id: i64,
    stored_avatar: Option<String>,
    users: &HashMap<i64, UserRecord>,
) -> CreatorView {
    let user = users.get(&creator_id);
    CreatorView {
        id: creator_id,
        name: user
            .map(|u| display_name_from_email(&u.email))
            .unwrap_or_default(),
        avatar: stored_avatar.or_else(|| user.and_then(|u| u.avatar.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::PollInsertion;
    use crate::database::run_migrations;
    use crate::ledger::record_vote;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_user(pool: &SqlitePool, id: i64, email: &str, avatar: Option<&str>) {
        sqlx::query("INSERT INTO users (id, email, avatar) VALUES (?, ?, ?)")
            .bind(id)
            .bind(email)
            .bind(avatar)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn seed_poll(pool: &SqlitePool, creator_id: i64) -> (i64, Vec<i64>) {
        let labels: Vec<String> = ["Riverside park", "Old gym"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let poll_id = PollInsertion {
            question: "Where should sports day go?".to_string(),
            creator_id,
            scope: "10B".to_string(),
            creator_avatar: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            expires_at: "2099-01-01T00:00:00Z".to_string(),
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

    #[tokio::test]
    async fn active_view_resolves_creator_and_voters() {
        let pool = test_pool().await;
        seed_user(&pool, 7, "arlo@school.org", Some("arlo.png")).await;
        seed_user(&pool, 42, "jane.doe@school.org", None).await;
        let (_, options) = seed_poll(&pool, 7).await;

        record_vote(&pool, options[0], 42, false).await.unwrap();
        record_vote(&pool, options[1], 99, true).await.unwrap();

        let views = list_active_polls(&pool).await.unwrap();
        assert_eq!(views.len(), 1);
        let poll = &views[0];
        assert_eq!(poll.creator.name, "Arlo");
        assert_eq!(poll.creator.avatar.as_deref(), Some("arlo.png"));
        assert!(poll.archived_at.is_none());

        let first = &poll.options[0];
        assert_eq!(first.vote_count, 1);
        assert_eq!(first.voters.len(), 1);
        assert_eq!(first.voters[0].name, "Jane Doe");
        assert_eq!(first.voters[0].user_id, Some(42));
        assert_eq!(first.voters[0].email.as_deref(), Some("jane.doe@school.org"));

        let second = &poll.options[1];
        assert_eq!(second.voters.len(), 1);
        assert!(second.voters[0].anonymous);
        assert_eq!(second.voters[0].name, "Anonymous");
        assert_eq!(second.voters[0].user_id, None);
        assert_eq!(second.voters[0].email, None);
    }

    #[tokio::test]
    async fn tallies_match_voter_lists() {
        let pool = test_pool().await;
        let (_, options) = seed_poll(&pool, 7).await;
        for user_id in 1..=5 {
            record_vote(&pool, options[0], user_id, user_id % 2 == 0)
                .await
                .unwrap();
        }

        let views = list_active_polls(&pool).await.unwrap();
        let option = &views[0].options[0];
        assert_eq!(option.vote_count, 5);
        assert_eq!(option.voters.len(), 5);
    }

    #[tokio::test]
    async fn missing_directory_row_keeps_ballot_with_blank_identity() {
        let pool = test_pool().await;
        let (_, options) = seed_poll(&pool, 7).await;
        record_vote(&pool, options[0], 123, false).await.unwrap();

        let views = list_active_polls(&pool).await.unwrap();
        let voter = &views[0].options[0].voters[0];
        assert!(!voter.anonymous);
        assert_eq!(voter.user_id, Some(123));
        assert_eq!(voter.name, "");
        assert_eq!(voter.email, None);

        // Unknown creator also degrades to a blank name, never an error.
        assert_eq!(views[0].creator.name, "");
    }

    #[tokio::test]
    async fn view_for_poll_is_none_for_unknown_id() {
        let pool = test_pool().await;
        assert!(view_for_poll(&pool, 999).await.unwrap().is_none());
    }
}
