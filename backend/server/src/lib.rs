//! Documentation of an online voting backend.
//!
//!
//!
//! # Vote Transaction
//!
//! **Goal**: every voter votes at most once, and every candidate's tally equals the number of voters
//! latched to it, even under concurrent requests, client disconnects and store failures.
//!
//! - Load the voter, reject admins and voters who already voted
//! - Load the candidate
//! - Conditional commit: latch `hasVoted` and record the ballot in one step, only if not latched yet
//! - If nothing was affected, someone else won the race, so re-read and report `already voted` or a conflict
//! - Increment the candidate's tally, idempotent per ballot
//! - If the increment fails, roll the latch back, but only if it still points at our ballot
//! - Every store call is bounded by `STORE_TIMEOUT_MS`
//! - The transaction runs in its own task, so a dropped connection never cancels it half way
//!
//!
//!
//! # Reconciliation
//!
//! Ballots are the source of truth, tallies are a cache of them. A crash between latch and increment
//! leaves a ballot without a tally. The reconciler counts such ballots and fixes drifted tallies, once at
//! start-up and then every `RECONCILE_INTERVAL_SECS`.
//!
//!
//!
//! # Notes
//!
//! ## Redis
//! Every multi-key mutation is a Lua script, which Redis runs atomically. No WATCH/MULTI retries are
//! needed and a script either fully applies or not at all.
//!
//! ## Memory Store
//! `MemoryStore` implements the same contract on `DashMap`s. Used by the test suites and handy for
//! local runs without Redis.
//!
//!
//!
//! # Setup
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
//!
//! Provision the first admin and print its token.
//! ```sh
//! cargo run -p tester -- --national-id 123456789012 --username admin \
//!     --email admin@example.com --mobile 5550000 --age 40 --address "1 Main Street"
//! ```
//!
//! Run the server.
//! ```sh
//! RUST_LOG=info JWT_SECRET=change-me cargo run -p ballot-backend
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod memory;
pub mod models;
pub mod reconcile;
pub mod results;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod vote;

use config::Config;
use reconcile::run_reconciler;
use routes::{
    cast_vote_handler, create_candidate_handler, delete_candidate_handler, get_candidate_handler,
    list_candidates_handler, profile_handler, provision_voter_handler, results_handler,
    update_candidate_handler, vote_count_handler, vote_status_handler,
};
use state::State;

pub fn app(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(state.config.cors_origin.clone())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route(
            "/candidates",
            get(list_candidates_handler).post(create_candidate_handler),
        )
        .route("/candidates/results", get(results_handler))
        .route("/candidates/vote/count", get(vote_count_handler))
        .route(
            "/candidates/{candidate_id}",
            get(get_candidate_handler)
                .put(update_candidate_handler)
                .delete(delete_candidate_handler),
        )
        .route("/candidates/{candidate_id}/vote", post(cast_vote_handler))
        .route("/user/vote/status", get(vote_status_handler))
        .route("/user/profile", get(profile_handler))
        .route("/admin/voters", post(provision_voter_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let config = Config::load()?;
    let state = State::new(config).await?;

    let reconciler = tokio::spawn(run_reconciler(
        state.store.clone(),
        state.config.reconcile_interval,
    ));

    info!("Starting server...");
    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reconciler.abort();
    if let Err(e) = &served {
        error!(error = %e, "Server stopped with error");
    }

    info!("Server shut down");
    Ok(served?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
