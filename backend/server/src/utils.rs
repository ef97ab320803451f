use std::str::FromStr;

use axum::body::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use serde::de::DeserializeOwned;

use crate::error::AppError::{self, MalformedPayload};

/// Current time at microsecond precision, the resolution the stores keep.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|_| MalformedPayload)
}

pub fn parse_id<T: FromStr>(raw: &str) -> Result<T, AppError> {
    raw.trim().parse().map_err(|_| MalformedPayload)
}

/// Share of `total`, in percent, rounded half away from zero to one decimal.
pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }

    (count as f64 * 1000.0 / total as f64).round() / 10.0
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::models::CandidateId;

    #[derive(Deserialize)]
    struct Payload {
        name: String,
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(10, 15), 66.7);
        assert_eq!(percentage(5, 15), 33.3);
        assert_eq!(percentage(0, 15), 0.0);
        assert_eq!(percentage(1, 8), 12.5);
        assert_eq!(percentage(1, 3), 33.3);
    }

    #[test]
    fn test_percentage_without_votes() {
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn test_parse_id() {
        let id = CandidateId::new();
        assert_eq!(parse_id::<CandidateId>(&id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_id::<CandidateId>("not-an-id"),
            Err(MalformedPayload)
        ));
    }

    #[test]
    fn test_parse_body() {
        let payload: Payload = parse_body(&Bytes::from_static(br#"{"name":"Ada"}"#)).unwrap();
        assert_eq!(payload.name, "Ada");

        assert!(matches!(
            parse_body::<Payload>(&Bytes::from_static(b"{")),
            Err(MalformedPayload)
        ));
    }

    #[test]
    fn test_now_is_truncated_to_micros() {
        assert_eq!(now().timestamp_subsec_nanos() % 1_000, 0);
    }
}
