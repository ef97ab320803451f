//! # Store
//!
//! Storage contract shared by the Redis and in-memory backends.
//!
//! The vote path only ever goes through four calls:
//! - [`VoteStore::apply_conditional_voter_commit`] sets the vote latch and records the ballot, but only
//!   while `has_voted` is still false at write time. Returns the affected count (0 or 1).
//! - [`VoteStore::increment_candidate_tally`] counts one ballot into the candidate tally. Idempotent per
//!   (candidate, voter), so the reconciler and a late transaction can both attempt it safely.
//! - [`VoteStore::rollback_voter_commit`] undoes this transaction's own latch, matched on candidate and
//!   `voted_at`, as long as it has not been tallied yet. Another transaction's latch is never touched.
//! - [`VoteStore::reconcile_candidate`] tallies every ballot that was latched but never counted.
//!
//! Nothing else writes the latch, ballots or tallies.
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::StoreError,
    models::{Candidate, CandidateDetails, CandidateId, NewVoter, Voter, VoterId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Latch and ballot removed, both records are back to their previous state.
    Reverted,
    /// The ballot was already counted, so the commit stands.
    AlreadyTallied,
    /// The stored latch, if any, belongs to another transaction. Nothing was touched.
    NotApplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateRemoval {
    Removed,
    Missing,
    /// At least one ballot points at the candidate, so removing it would orphan the tally.
    HasBallots,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub candidate_id: CandidateId,
    /// Ballots that were latched but had never been counted.
    pub repaired: u64,
    pub previous: u64,
    pub current: u64,
}

#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn find_voter_by_id(&self, voter_id: VoterId) -> Result<Option<Voter>, StoreError>;

    async fn find_candidate_by_id(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Option<Candidate>, StoreError>;

    /// All candidates in insertion order.
    async fn list_candidates(&self) -> Result<Vec<Candidate>, StoreError>;

    async fn apply_conditional_voter_commit(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        voted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Returns the tally after counting this voter's ballot, or `None` if the candidate is gone.
    async fn increment_candidate_tally(
        &self,
        candidate_id: CandidateId,
        voter_id: VoterId,
    ) -> Result<Option<u64>, StoreError>;

    async fn rollback_voter_commit(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        voted_at: DateTime<Utc>,
    ) -> Result<RollbackOutcome, StoreError>;

    async fn reconcile_candidate(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Option<Reconciliation>, StoreError>;

    async fn insert_voter(&self, voter: NewVoter) -> Result<Voter, StoreError>;

    async fn insert_candidate(&self, details: CandidateDetails) -> Result<Candidate, StoreError>;

    /// Edits descriptive fields only. The tally is never touched.
    async fn update_candidate(
        &self,
        candidate_id: CandidateId,
        details: CandidateDetails,
    ) -> Result<Option<Candidate>, StoreError>;

    /// Removes a candidate that no ballot points at, together with its index entry.
    async fn delete_candidate(
        &self,
        candidate_id: CandidateId,
    ) -> Result<CandidateRemoval, StoreError>;
}
