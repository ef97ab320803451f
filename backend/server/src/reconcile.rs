//! # Reconciler
//!
//! Repairs the only partial state a vote can leave behind: a voter latched to a candidate whose
//! tally was never incremented (crash, timeout, failed rollback).
//!
//! Ballots are the source of truth. Each pass counts every ballot that is not yet tallied and
//! resets the stored count if it drifted. Runs once at start-up, then on a fixed interval.
use std::{sync::Arc, time::Duration};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::{error::StoreError, store::VoteStore};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub candidates: usize,
    /// Ballots counted by this pass.
    pub repaired: u64,
    /// Candidates whose stored count differed from their tallied ballots.
    pub drifted: usize,
}

pub async fn reconcile_tallies(store: &dyn VoteStore) -> Result<ReconcileReport, StoreError> {
    let mut report = ReconcileReport::default();

    for candidate in store.list_candidates().await? {
        let Some(reconciliation) = store.reconcile_candidate(candidate.id).await? else {
            continue;
        };

        report.candidates += 1;
        report.repaired += reconciliation.repaired;

        if reconciliation.previous != reconciliation.current {
            report.drifted += 1;
            warn!(
                candidate_id = %reconciliation.candidate_id,
                previous = reconciliation.previous,
                current = reconciliation.current,
                repaired = reconciliation.repaired,
                "Tally reconciled"
            );
        }
    }

    Ok(report)
}

pub async fn run_reconciler(store: Arc<dyn VoteStore>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(period_secs = period.as_secs(), "Starting tally reconciler");

    loop {
        ticker.tick().await;

        match reconcile_tallies(store.as_ref()).await {
            Ok(report) if report.drifted > 0 => {
                info!(?report, "Reconciliation pass repaired tallies");
            }
            Ok(report) => debug!(?report, "Reconciliation pass clean"),
            Err(e) => error!(error = %e, "Reconciliation pass failed"),
        }
    }
}
