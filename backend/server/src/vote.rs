//! # Vote Transaction
//!
//! One canonical path for casting a vote.
//!
//! ## Preconditions
//! Checked in order, first failure wins:
//! 1. voter exists
//! 2. voter is not an admin
//! 3. voter has not voted
//! 4. candidate exists
//!
//! ## Commit
//! - **Latch**: conditional commit on the voter, only applied while `has_voted` is still false.
//!   Exactly one concurrent caller gets an affected count of 1.
//! - **Tally**: idempotent increment of the candidate count for this ballot.
//!
//! Anything failing between the two undoes our own latch, unless the reconciler already counted the
//! ballot, in which case the vote stands and the receipt is returned. A latch written by a competing
//! transaction is never ours: that attempt reports `already voted`. If the undo itself fails the
//! reconciler completes the vote on its next pass.
use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::{
    error::{Missing, Rejection, StoreError, VoteError},
    models::{CandidateId, Role, VoteReceipt, VoteStatus, VoterId},
    store::{RollbackOutcome, VoteStore},
    utils::now,
};

#[derive(Clone)]
pub struct VoteManager {
    store: Arc<dyn VoteStore>,
    store_timeout: Duration,
}

impl VoteManager {
    pub fn new(store: Arc<dyn VoteStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    pub async fn cast_vote(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
    ) -> Result<VoteReceipt, VoteError> {
        let voter = self
            .bounded("find_voter_by_id", self.store.find_voter_by_id(voter_id))
            .await?
            .ok_or(VoteError::NotFound(Missing::Voter))?;

        if voter.role == Role::Admin {
            return Err(VoteError::Forbidden(Rejection::AdminCannotVote));
        }

        if voter.has_voted() {
            return Err(VoteError::Forbidden(Rejection::AlreadyVoted));
        }

        self.bounded(
            "find_candidate_by_id",
            self.store.find_candidate_by_id(candidate_id),
        )
        .await?
        .ok_or(VoteError::NotFound(Missing::Candidate))?;

        let voted_at = now();

        let affected = match self
            .bounded(
                "apply_conditional_voter_commit",
                self.store
                    .apply_conditional_voter_commit(voter_id, candidate_id, voted_at),
            )
            .await
        {
            Ok(affected) => affected,
            Err(e) => {
                return self
                    .abandon(voter_id, candidate_id, voted_at, VoteError::Internal(e))
                    .await;
            }
        };

        if affected != 1 {
            return Err(self.lost_race(voter_id).await);
        }

        #[cfg(feature = "verbose")]
        info!(%voter_id, %candidate_id, "Voter latched, incrementing tally");

        let cause = match self
            .bounded(
                "increment_candidate_tally",
                self.store.increment_candidate_tally(candidate_id, voter_id),
            )
            .await
        {
            Ok(Some(vote_count)) => {
                info!(%voter_id, %candidate_id, vote_count, "Vote committed");

                return Ok(VoteReceipt {
                    voter_id,
                    candidate_id,
                    vote_count,
                    voted_at,
                });
            }
            Ok(None) => VoteError::NotFound(Missing::Candidate),
            Err(e) => VoteError::Internal(e),
        };

        self.abandon(voter_id, candidate_id, voted_at, cause).await
    }

    pub async fn vote_status(&self, voter_id: VoterId) -> Result<VoteStatus, VoteError> {
        let voter = self
            .bounded("find_voter_by_id", self.store.find_voter_by_id(voter_id))
            .await?
            .ok_or(VoteError::NotFound(Missing::Voter))?;

        Ok(VoteStatus::from(&voter))
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        timeout(self.store_timeout, future)
            .await
            .map_err(|_| StoreError::Timeout(operation))?
    }

    /// Our latch did not land. Re-read to tell a lost race apart from a vanished voter.
    async fn lost_race(&self, voter_id: VoterId) -> VoteError {
        match self
            .bounded("find_voter_by_id", self.store.find_voter_by_id(voter_id))
            .await
        {
            Ok(Some(voter)) if voter.has_voted() => VoteError::Forbidden(Rejection::AlreadyVoted),
            Ok(_) => VoteError::Conflict,
            Err(e) => VoteError::Internal(e),
        }
    }

    async fn abandon(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        voted_at: DateTime<Utc>,
        cause: VoteError,
    ) -> Result<VoteReceipt, VoteError> {
        let outcome = self
            .bounded(
                "rollback_voter_commit",
                self.store
                    .rollback_voter_commit(voter_id, candidate_id, voted_at),
            )
            .await;

        match outcome {
            Ok(RollbackOutcome::Reverted) => {
                warn!(%voter_id, %candidate_id, error = %cause, "Vote rolled back");
                Err(cause)
            }
            // the latch, if any, belongs to another transaction
            Ok(RollbackOutcome::NotApplied) => match self.lost_race(voter_id).await {
                rejected @ VoteError::Forbidden(_) => Err(rejected),
                _ => Err(cause),
            },
            Ok(RollbackOutcome::AlreadyTallied) => {
                let candidate = self
                    .bounded(
                        "find_candidate_by_id",
                        self.store.find_candidate_by_id(candidate_id),
                    )
                    .await?
                    .ok_or(cause)?;

                info!(%voter_id, %candidate_id, "Vote completed by reconciliation");

                Ok(VoteReceipt {
                    voter_id,
                    candidate_id,
                    vote_count: candidate.vote_count,
                    voted_at,
                })
            }
            Err(e) => {
                error!(
                    %voter_id,
                    %candidate_id,
                    error = %e,
                    "Rollback failed, reconciler will complete the vote"
                );
                Err(cause)
            }
        }
    }
}
