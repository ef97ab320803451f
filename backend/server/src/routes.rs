use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{self, Path},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    auth::CurrentVoter,
    error::{AppError, AuthError, Missing},
    models::{CandidateDetails, CandidateId, CandidateTally, NewVoter, Role, Voter, VoterId},
    results::get_results,
    state::State,
    store::CandidateRemoval,
    utils::{parse_body, parse_id},
};

type AppState = extract::State<Arc<State>>;

pub async fn cast_vote_handler(
    extract::State(state): AppState,
    CurrentVoter(voter_id): CurrentVoter,
    Path(candidate_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let candidate_id: CandidateId = parse_id(&candidate_id)?;

    // runs to completion even if the client disconnects
    let votes = state.votes.clone();
    let receipt = tokio::spawn(async move { votes.cast_vote(voter_id, candidate_id).await })
        .await
        .map_err(|e| AppError::InternalError(Box::new(e)))??;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": "vote recorded",
            "candidateId": receipt.candidate_id,
            "voteCount": receipt.vote_count,
        })),
    ))
}

pub async fn vote_count_handler(
    extract::State(state): AppState,
) -> Result<impl IntoResponse, AppError> {
    let tallies: Vec<CandidateTally> = get_results(state.store.as_ref())
        .await?
        .into_iter()
        .map(CandidateTally::from)
        .collect();

    Ok(Json(tallies))
}

pub async fn results_handler(
    extract::State(state): AppState,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(get_results(state.store.as_ref()).await?))
}

pub async fn vote_status_handler(
    extract::State(state): AppState,
    CurrentVoter(voter_id): CurrentVoter,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.votes.vote_status(voter_id).await?))
}

pub async fn profile_handler(
    extract::State(state): AppState,
    CurrentVoter(voter_id): CurrentVoter,
) -> Result<impl IntoResponse, AppError> {
    let voter = state
        .store
        .find_voter_by_id(voter_id)
        .await?
        .ok_or(AppError::NotFound(Missing::Voter))?;

    Ok(Json(voter))
}

pub async fn list_candidates_handler(
    extract::State(state): AppState,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.store.list_candidates().await?))
}

pub async fn get_candidate_handler(
    extract::State(state): AppState,
    Path(candidate_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let candidate_id: CandidateId = parse_id(&candidate_id)?;

    let candidate = state
        .store
        .find_candidate_by_id(candidate_id)
        .await?
        .ok_or(AppError::NotFound(Missing::Candidate))?;

    Ok(Json(candidate))
}

pub async fn create_candidate_handler(
    extract::State(state): AppState,
    CurrentVoter(voter_id): CurrentVoter,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, voter_id).await?;

    let details = parse_body::<CandidateDetails>(&body)?.validate()?;
    let candidate = state.store.insert_candidate(details).await?;
    info!(candidate_id = %candidate.id, name = %candidate.name, "Candidate created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "candidate created",
            "candidate": candidate,
        })),
    ))
}

pub async fn update_candidate_handler(
    extract::State(state): AppState,
    CurrentVoter(voter_id): CurrentVoter,
    Path(candidate_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let candidate_id: CandidateId = parse_id(&candidate_id)?;
    require_admin(&state, voter_id).await?;

    let details = parse_body::<CandidateDetails>(&body)?.validate()?;
    let candidate = state
        .store
        .update_candidate(candidate_id, details)
        .await?
        .ok_or(AppError::NotFound(Missing::Candidate))?;
    info!(%candidate_id, "Candidate updated");

    Ok(Json(json!({
        "message": "candidate updated",
        "candidate": candidate,
    })))
}

pub async fn delete_candidate_handler(
    extract::State(state): AppState,
    CurrentVoter(voter_id): CurrentVoter,
    Path(candidate_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let candidate_id: CandidateId = parse_id(&candidate_id)?;
    require_admin(&state, voter_id).await?;

    match state.store.delete_candidate(candidate_id).await? {
        CandidateRemoval::Removed => {
            info!(%candidate_id, "Candidate deleted");

            Ok(Json(json!({ "message": "candidate deleted" })))
        }
        CandidateRemoval::Missing => Err(AppError::NotFound(Missing::Candidate)),
        CandidateRemoval::HasBallots => Err(AppError::CandidateHasBallots),
    }
}

pub async fn provision_voter_handler(
    extract::State(state): AppState,
    CurrentVoter(voter_id): CurrentVoter,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, voter_id).await?;

    let new_voter = parse_body::<NewVoter>(&body)?.validate()?;
    let voter = state.store.insert_voter(new_voter).await?;
    let token = state.auth.issue_token(voter.id)?;
    info!(voter_id = %voter.id, role = voter.role.as_str(), "Voter provisioned");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "voter": voter,
            "token": token,
        })),
    ))
}

async fn require_admin(state: &State, voter_id: VoterId) -> Result<Voter, AppError> {
    let Some(voter) = state.store.find_voter_by_id(voter_id).await? else {
        warn!(%voter_id, "Token for unknown voter");
        return Err(AuthError::Invalid.into());
    };

    if voter.role != Role::Admin {
        return Err(AppError::AdminRequired);
    }

    Ok(voter)
}
