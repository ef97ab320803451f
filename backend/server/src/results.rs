//! # Results
//!
//! Read-only projection over candidates. A snapshot may trail in-flight votes slightly.
//!
//! Ordering: vote count descending, ties by insertion order, then by id.
//! Percentages are rounded half away from zero to one decimal and are 0 when nobody has voted.
use std::cmp::Reverse;

use crate::{
    error::StoreError,
    models::{Candidate, CandidateResult},
    store::VoteStore,
    utils::percentage,
};

pub async fn get_results(store: &dyn VoteStore) -> Result<Vec<CandidateResult>, StoreError> {
    let candidates = store.list_candidates().await?;

    Ok(rank(candidates))
}

pub fn rank(mut candidates: Vec<Candidate>) -> Vec<CandidateResult> {
    let total_votes: u64 = candidates.iter().map(|candidate| candidate.vote_count).sum();

    candidates.sort_by_key(|candidate| (Reverse(candidate.vote_count), candidate.seq, candidate.id));

    candidates
        .into_iter()
        .map(|candidate| CandidateResult {
            candidate_id: candidate.id,
            percentage: percentage(candidate.vote_count, total_votes),
            name: candidate.name,
            party: candidate.party,
            vote_count: candidate.vote_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::CandidateId, utils::now};

    fn candidate(seq: u64, name: &str, vote_count: u64) -> Candidate {
        Candidate {
            id: CandidateId::new(),
            seq,
            name: name.to_string(),
            party: "Independent".to_string(),
            age: 45,
            vote_count,
            created_at: now(),
        }
    }

    #[test]
    fn test_rank_orders_and_computes_percentages() {
        let results = rank(vec![
            candidate(1, "Barbara", 0),
            candidate(2, "Ada", 10),
            candidate(3, "Grace", 5),
        ]);

        let counts: Vec<u64> = results.iter().map(|result| result.vote_count).collect();
        let percentages: Vec<f64> = results.iter().map(|result| result.percentage).collect();
        let names: Vec<&str> = results.iter().map(|result| result.name.as_str()).collect();

        assert_eq!(counts, vec![10, 5, 0]);
        assert_eq!(percentages, vec![66.7, 33.3, 0.0]);
        assert_eq!(names, vec!["Ada", "Grace", "Barbara"]);
    }

    #[test]
    fn test_rank_breaks_ties_by_insertion_order() {
        let results = rank(vec![
            candidate(3, "Third", 2),
            candidate(1, "First", 2),
            candidate(2, "Second", 2),
        ]);

        let names: Vec<&str> = results.iter().map(|result| result.name.as_str()).collect();
        assert_eq!(names, vec!["First", "Second", "Third"]);
    }

    #[test]
    fn test_rank_without_votes() {
        let results = rank(vec![candidate(1, "Ada", 0), candidate(2, "Grace", 0)]);

        assert!(results.iter().all(|result| result.percentage == 0.0));
        assert_eq!(results[0].name, "Ada");
    }

    #[test]
    fn test_rank_empty() {
        assert!(rank(Vec::new()).is_empty());
    }
}
