use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Secret {0} not found in /run/secrets or the environment")]
    MissingSecret(&'static str),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store operation timed out: {0}")]
    Timeout(&'static str),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("{0} already exists")]
    Duplicate(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Voter,
    Candidate,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Voter => f.write_str("voter"),
            Missing::Candidate => f.write_str("candidate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AdminCannotVote,
    AlreadyVoted,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AdminCannotVote => f.write_str("admins cannot vote"),
            Rejection::AlreadyVoted => f.write_str("already voted"),
        }
    }
}

/// Classified outcome of a failed vote transaction.
#[derive(Error, Debug)]
pub enum VoteError {
    #[error("{0} not found")]
    NotFound(Missing),

    #[error("{0}")]
    Forbidden(Rejection),

    /// Lost the commit race but the latch was not observed on re-read. Safe to retry.
    #[error("vote conflict, retry")]
    Conflict,

    #[error("Internal error: {0}")]
    Internal(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("authentication required")]
    MissingToken,

    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,

    #[error("token signing failed: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("{0}")]
    InvalidField(String),

    #[error("admin access required")]
    AdminRequired,

    #[error("{0} not found")]
    NotFound(Missing),

    #[error("candidate has votes and cannot be deleted")]
    CandidateHasBallots,

    #[error(transparent)]
    Vote(#[from] VoteError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload | AppError::InvalidField(_) => StatusCode::BAD_REQUEST,
            AppError::AdminRequired => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CandidateHasBallots => StatusCode::CONFLICT,
            AppError::Vote(VoteError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Vote(VoteError::Forbidden(_)) => StatusCode::FORBIDDEN,
            AppError::Vote(VoteError::Conflict) => StatusCode::CONFLICT,
            AppError::Auth(AuthError::Signing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Store(StoreError::Duplicate(_)) => StatusCode::BAD_REQUEST,
            AppError::Vote(VoteError::Internal(_))
            | AppError::Store(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}
