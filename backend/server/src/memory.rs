//! # In-memory store
//!
//! [`VoteStore`] backed by sharded maps, used by tests and local development.
//!
//! Lock order is voters, then candidates, then ballot boxes. A guard on one map is never
//! held while taking a second guard on the same map.
use std::{
    collections::HashSet,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;

use crate::{
    error::StoreError,
    models::{Ballot, Candidate, CandidateDetails, CandidateId, NewVoter, Voter, VoterId},
    store::{CandidateRemoval, Reconciliation, RollbackOutcome, VoteStore},
    utils::now,
};

#[derive(Default)]
struct BallotBox {
    ballots: HashSet<VoterId>,
    tallied: HashSet<VoterId>,
}

#[derive(Default)]
struct UniqueIndex {
    national_ids: HashSet<String>,
    usernames: HashSet<String>,
    emails: HashSet<String>,
    mobiles: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    voters: DashMap<VoterId, Voter>,
    candidates: DashMap<CandidateId, Candidate>,
    boxes: DashMap<CandidateId, BallotBox>,
    unique: Mutex<UniqueIndex>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoteStore for MemoryStore {
    async fn find_voter_by_id(&self, voter_id: VoterId) -> Result<Option<Voter>, StoreError> {
        Ok(self.voters.get(&voter_id).map(|voter| voter.clone()))
    }

    async fn find_candidate_by_id(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Option<Candidate>, StoreError> {
        Ok(self
            .candidates
            .get(&candidate_id)
            .map(|candidate| candidate.clone()))
    }

    async fn list_candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        let mut candidates: Vec<Candidate> = self
            .candidates
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        candidates.sort_by_key(|candidate| candidate.seq);

        Ok(candidates)
    }

    async fn apply_conditional_voter_commit(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        voted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let Some(mut voter) = self.voters.get_mut(&voter_id) else {
            return Ok(0);
        };

        if voter.has_voted() {
            return Ok(0);
        }

        // ballot recorded under the voter guard so the latch and ballot land together
        self.boxes
            .entry(candidate_id)
            .or_default()
            .ballots
            .insert(voter_id);
        voter.ballot = Some(Ballot {
            candidate_id,
            voted_at,
        });

        Ok(1)
    }

    async fn increment_candidate_tally(
        &self,
        candidate_id: CandidateId,
        voter_id: VoterId,
    ) -> Result<Option<u64>, StoreError> {
        let Some(mut candidate) = self.candidates.get_mut(&candidate_id) else {
            return Ok(None);
        };

        let mut ballot_box = self.boxes.entry(candidate_id).or_default();
        if ballot_box.ballots.contains(&voter_id) && ballot_box.tallied.insert(voter_id) {
            candidate.vote_count += 1;
        }

        Ok(Some(candidate.vote_count))
    }

    async fn rollback_voter_commit(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        voted_at: DateTime<Utc>,
    ) -> Result<RollbackOutcome, StoreError> {
        let Some(mut voter) = self.voters.get_mut(&voter_id) else {
            return Ok(RollbackOutcome::NotApplied);
        };

        // a latch written by another transaction is never ours to judge
        let ours = Ballot {
            candidate_id,
            voted_at,
        };
        if voter.ballot != Some(ours) {
            return Ok(RollbackOutcome::NotApplied);
        }

        let mut ballot_box = self.boxes.entry(candidate_id).or_default();
        if ballot_box.tallied.contains(&voter_id) {
            return Ok(RollbackOutcome::AlreadyTallied);
        }

        voter.ballot = None;
        ballot_box.ballots.remove(&voter_id);

        Ok(RollbackOutcome::Reverted)
    }

    async fn reconcile_candidate(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Option<Reconciliation>, StoreError> {
        let Some(mut candidate) = self.candidates.get_mut(&candidate_id) else {
            return Ok(None);
        };

        let mut ballot_box = self.boxes.entry(candidate_id).or_default();
        let BallotBox { ballots, tallied } = &mut *ballot_box;

        let missing: Vec<VoterId> = ballots.difference(tallied).copied().collect();
        tallied.extend(missing.iter().copied());

        let previous = candidate.vote_count;
        let current = tallied.len() as u64;
        candidate.vote_count = current;

        Ok(Some(Reconciliation {
            candidate_id,
            repaired: missing.len() as u64,
            previous,
            current,
        }))
    }

    async fn insert_voter(&self, voter: NewVoter) -> Result<Voter, StoreError> {
        let mut unique = self.unique.lock();

        if unique.national_ids.contains(&voter.national_id) {
            return Err(StoreError::Duplicate("nationalId"));
        }
        if unique.usernames.contains(&voter.username) {
            return Err(StoreError::Duplicate("username"));
        }
        if unique.emails.contains(&voter.email) {
            return Err(StoreError::Duplicate("email"));
        }
        if unique.mobiles.contains(&voter.mobile) {
            return Err(StoreError::Duplicate("mobile"));
        }

        unique.national_ids.insert(voter.national_id.clone());
        unique.usernames.insert(voter.username.clone());
        unique.emails.insert(voter.email.clone());
        unique.mobiles.insert(voter.mobile.clone());

        let record = Voter {
            id: VoterId::new(),
            national_id: voter.national_id,
            username: voter.username,
            email: voter.email,
            mobile: voter.mobile,
            age: voter.age,
            address: voter.address,
            role: voter.role,
            ballot: None,
        };
        self.voters.insert(record.id, record.clone());

        Ok(record)
    }

    async fn insert_candidate(&self, details: CandidateDetails) -> Result<Candidate, StoreError> {
        let candidate = Candidate {
            id: CandidateId::new(),
            seq: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            name: details.name,
            party: details.party,
            age: details.age,
            vote_count: 0,
            created_at: now(),
        };
        self.candidates.insert(candidate.id, candidate.clone());

        Ok(candidate)
    }

    async fn update_candidate(
        &self,
        candidate_id: CandidateId,
        details: CandidateDetails,
    ) -> Result<Option<Candidate>, StoreError> {
        let Some(mut candidate) = self.candidates.get_mut(&candidate_id) else {
            return Ok(None);
        };

        candidate.name = details.name;
        candidate.party = details.party;
        candidate.age = details.age;

        Ok(Some(candidate.clone()))
    }

    async fn delete_candidate(
        &self,
        candidate_id: CandidateId,
    ) -> Result<CandidateRemoval, StoreError> {
        let Entry::Occupied(candidate) = self.candidates.entry(candidate_id) else {
            return Ok(CandidateRemoval::Missing);
        };

        match self.boxes.entry(candidate_id) {
            Entry::Occupied(ballot_box) if !ballot_box.get().ballots.is_empty() => {
                return Ok(CandidateRemoval::HasBallots);
            }
            Entry::Occupied(ballot_box) => {
                ballot_box.remove();
            }
            Entry::Vacant(_) => {}
        }
        candidate.remove();

        Ok(CandidateRemoval::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn new_voter(suffix: u32) -> NewVoter {
        NewVoter {
            national_id: format!("{:012}", suffix),
            username: format!("voter{suffix}"),
            email: format!("voter{suffix}@example.com"),
            mobile: format!("555{suffix:04}"),
            age: 30,
            address: "1 Main Street".to_string(),
            role: Role::Voter,
        }
    }

    fn details(name: &str) -> CandidateDetails {
        CandidateDetails {
            name: name.to_string(),
            party: "Independent".to_string(),
            age: 45,
        }
    }

    #[tokio::test]
    async fn test_conditional_commit_applies_once() {
        let store = MemoryStore::new();
        let voter = store.insert_voter(new_voter(1)).await.unwrap();
        let candidate = store.insert_candidate(details("Ada")).await.unwrap();
        let voted_at = now();

        let first = store
            .apply_conditional_voter_commit(voter.id, candidate.id, voted_at)
            .await
            .unwrap();
        let second = store
            .apply_conditional_voter_commit(voter.id, candidate.id, now())
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let stored = store.find_voter_by_id(voter.id).await.unwrap().unwrap();
        assert_eq!(
            stored.ballot,
            Some(Ballot {
                candidate_id: candidate.id,
                voted_at
            })
        );
    }

    #[tokio::test]
    async fn test_commit_for_unknown_voter_affects_nothing() {
        let store = MemoryStore::new();
        let candidate = store.insert_candidate(details("Ada")).await.unwrap();

        let affected = store
            .apply_conditional_voter_commit(VoterId::new(), candidate.id, now())
            .await
            .unwrap();

        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn test_increment_is_idempotent_per_ballot() {
        let store = MemoryStore::new();
        let voter = store.insert_voter(new_voter(1)).await.unwrap();
        let candidate = store.insert_candidate(details("Ada")).await.unwrap();

        // no ballot yet, nothing to count
        let count = store
            .increment_candidate_tally(candidate.id, voter.id)
            .await
            .unwrap();
        assert_eq!(count, Some(0));

        store
            .apply_conditional_voter_commit(voter.id, candidate.id, now())
            .await
            .unwrap();

        for _ in 0..3 {
            let count = store
                .increment_candidate_tally(candidate.id, voter.id)
                .await
                .unwrap();
            assert_eq!(count, Some(1));
        }

        let missing = store
            .increment_candidate_tally(CandidateId::new(), voter.id)
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_rollback_only_reverts_untallied_latch() {
        let store = MemoryStore::new();
        let voter = store.insert_voter(new_voter(1)).await.unwrap();
        let candidate = store.insert_candidate(details("Ada")).await.unwrap();
        let voted_at = now();

        store
            .apply_conditional_voter_commit(voter.id, candidate.id, voted_at)
            .await
            .unwrap();

        let foreign = store
            .rollback_voter_commit(voter.id, candidate.id, voted_at + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(foreign, RollbackOutcome::NotApplied);

        let reverted = store
            .rollback_voter_commit(voter.id, candidate.id, voted_at)
            .await
            .unwrap();
        assert_eq!(reverted, RollbackOutcome::Reverted);
        assert!(!store.find_voter_by_id(voter.id).await.unwrap().unwrap().has_voted());

        store
            .apply_conditional_voter_commit(voter.id, candidate.id, voted_at)
            .await
            .unwrap();
        store
            .increment_candidate_tally(candidate.id, voter.id)
            .await
            .unwrap();

        let tallied = store
            .rollback_voter_commit(voter.id, candidate.id, voted_at)
            .await
            .unwrap();
        assert_eq!(tallied, RollbackOutcome::AlreadyTallied);
        assert!(store.find_voter_by_id(voter.id).await.unwrap().unwrap().has_voted());
    }

    #[tokio::test]
    async fn test_rollback_of_unlanded_commit_ignores_tallied_winner() {
        let store = MemoryStore::new();
        let voter = store.insert_voter(new_voter(1)).await.unwrap();
        let candidate = store.insert_candidate(details("Ada")).await.unwrap();
        let winner_at = now();

        store
            .apply_conditional_voter_commit(voter.id, candidate.id, winner_at)
            .await
            .unwrap();
        store
            .increment_candidate_tally(candidate.id, voter.id)
            .await
            .unwrap();

        // same voter and candidate, but this attempt never latched
        let outcome = store
            .rollback_voter_commit(voter.id, candidate.id, winner_at + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(outcome, RollbackOutcome::NotApplied);

        let stored = store.find_voter_by_id(voter.id).await.unwrap().unwrap();
        assert_eq!(stored.ballot.map(|ballot| ballot.voted_at), Some(winner_at));
    }

    #[tokio::test]
    async fn test_reconcile_counts_untallied_ballots() {
        let store = MemoryStore::new();
        let candidate = store.insert_candidate(details("Ada")).await.unwrap();

        for suffix in 0..3 {
            let voter = store.insert_voter(new_voter(suffix)).await.unwrap();
            store
                .apply_conditional_voter_commit(voter.id, candidate.id, now())
                .await
                .unwrap();

            if suffix == 0 {
                store
                    .increment_candidate_tally(candidate.id, voter.id)
                    .await
                    .unwrap();
            }
        }

        let report = store.reconcile_candidate(candidate.id).await.unwrap().unwrap();
        assert_eq!(report.repaired, 2);
        assert_eq!(report.previous, 1);
        assert_eq!(report.current, 3);

        let again = store.reconcile_candidate(candidate.id).await.unwrap().unwrap();
        assert_eq!(again.repaired, 0);
        assert_eq!(again.current, 3);
    }

    #[tokio::test]
    async fn test_insert_voter_rejects_duplicates() {
        let store = MemoryStore::new();
        store.insert_voter(new_voter(1)).await.unwrap();

        let mut duplicate = new_voter(2);
        duplicate.email = "voter1@example.com".to_string();

        assert!(matches!(
            store.insert_voter(duplicate).await,
            Err(StoreError::Duplicate("email"))
        ));
        assert!(matches!(
            store.insert_voter(new_voter(1)).await,
            Err(StoreError::Duplicate("nationalId"))
        ));
    }

    #[tokio::test]
    async fn test_candidates_listed_in_insertion_order() {
        let store = MemoryStore::new();
        let first = store.insert_candidate(details("Ada")).await.unwrap();
        let second = store.insert_candidate(details("Grace")).await.unwrap();

        let updated = store
            .update_candidate(second.id, details("Grace Hopper"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Grace Hopper");
        assert_eq!(updated.seq, second.seq);

        let listed = store.list_candidates().await.unwrap();
        let ids: Vec<CandidateId> = listed.iter().map(|candidate| candidate.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        assert!(
            store
                .update_candidate(CandidateId::new(), details("Nobody"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_delete_candidate_only_without_ballots() {
        let store = MemoryStore::new();
        let voter = store.insert_voter(new_voter(1)).await.unwrap();
        let voted = store.insert_candidate(details("Ada")).await.unwrap();
        let empty = store.insert_candidate(details("Grace")).await.unwrap();

        store
            .apply_conditional_voter_commit(voter.id, voted.id, now())
            .await
            .unwrap();

        assert_eq!(
            store.delete_candidate(voted.id).await.unwrap(),
            CandidateRemoval::HasBallots
        );
        assert_eq!(
            store.delete_candidate(empty.id).await.unwrap(),
            CandidateRemoval::Removed
        );
        assert_eq!(
            store.delete_candidate(empty.id).await.unwrap(),
            CandidateRemoval::Missing
        );

        let ids: Vec<CandidateId> = store
            .list_candidates()
            .await
            .unwrap()
            .iter()
            .map(|candidate| candidate.id)
            .collect();
        assert_eq!(ids, vec![voted.id]);
    }
}
