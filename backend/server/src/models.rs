use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::error::AppError;

const NATIONAL_ID_DIGITS: usize = 12;
const MAX_ADDRESS_LEN: usize = 500;
const MIN_VOTER_AGE: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(pub Uuid);

impl VoterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VoterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for VoterId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub Uuid);

impl CandidateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CandidateId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Voter,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Voter => "voter",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voter" => Ok(Role::Voter),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role {other}")),
        }
    }
}

/// The one-shot vote latch. Present iff the voter has voted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ballot {
    pub candidate_id: CandidateId,
    pub voted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voter {
    pub id: VoterId,
    pub national_id: String,
    pub username: String,
    pub email: String,
    pub mobile: String,
    pub age: u32,
    pub address: String,
    pub role: Role,
    pub ballot: Option<Ballot>,
}

impl Voter {
    pub fn has_voted(&self) -> bool {
        self.ballot.is_some()
    }
}

/// Wire shape of a voter: the latch is exposed as flat `hasVoted`, `votedFor` and `votedAt` fields.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoterView<'a> {
    id: VoterId,
    national_id: &'a str,
    username: &'a str,
    email: &'a str,
    mobile: &'a str,
    age: u32,
    address: &'a str,
    role: Role,
    #[serde(flatten)]
    status: VoteStatus,
}

impl Serialize for Voter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        VoterView {
            id: self.id,
            national_id: &self.national_id,
            username: &self.username,
            email: &self.email,
            mobile: &self.mobile,
            age: self.age,
            address: &self.address,
            role: self.role,
            status: VoteStatus::from(self),
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatus {
    pub has_voted: bool,
    pub voted_for: Option<CandidateId>,
    pub voted_at: Option<DateTime<Utc>>,
}

impl From<&Voter> for VoteStatus {
    fn from(voter: &Voter) -> Self {
        Self {
            has_voted: voter.has_voted(),
            voted_for: voter.ballot.map(|ballot| ballot.candidate_id),
            voted_at: voter.ballot.map(|ballot| ballot.voted_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: CandidateId,
    /// Insertion order, used to break ties between equal tallies.
    pub seq: u64,
    pub name: String,
    pub party: String,
    pub age: u32,
    pub vote_count: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub voter_id: VoterId,
    pub candidate_id: CandidateId,
    pub vote_count: u64,
    pub voted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateResult {
    pub candidate_id: CandidateId,
    pub name: String,
    pub party: String,
    pub vote_count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTally {
    pub candidate_id: CandidateId,
    pub name: String,
    pub party: String,
    pub vote_count: u64,
}

impl From<CandidateResult> for CandidateTally {
    fn from(result: CandidateResult) -> Self {
        Self {
            candidate_id: result.candidate_id,
            name: result.name,
            party: result.party,
            vote_count: result.vote_count,
        }
    }
}

/// Descriptive candidate fields, used for both creation and admin edits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CandidateDetails {
    pub name: String,
    pub party: String,
    pub age: u32,
}

impl CandidateDetails {
    pub fn validate(self) -> Result<Self, AppError> {
        let name = required("name", &self.name)?;
        let party = required("party", &self.party)?;

        if self.age == 0 {
            return Err(AppError::InvalidField("age must be positive".to_string()));
        }

        Ok(Self {
            name,
            party,
            age: self.age,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVoter {
    pub national_id: String,
    pub username: String,
    pub email: String,
    pub mobile: String,
    pub age: u32,
    pub address: String,
    #[serde(default)]
    pub role: Role,
}

impl NewVoter {
    pub fn validate(self) -> Result<Self, AppError> {
        let national_id = required("nationalId", &self.national_id)?;
        if national_id.len() != NATIONAL_ID_DIGITS
            || !national_id.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AppError::InvalidField(format!(
                "nationalId must be {NATIONAL_ID_DIGITS} digits"
            )));
        }

        let address = required("address", &self.address)?;
        if address.chars().count() > MAX_ADDRESS_LEN {
            return Err(AppError::InvalidField(format!(
                "address too long (max {MAX_ADDRESS_LEN} characters)"
            )));
        }

        if self.age < MIN_VOTER_AGE {
            return Err(AppError::InvalidField(format!(
                "age must be at least {MIN_VOTER_AGE}"
            )));
        }

        Ok(Self {
            national_id,
            username: required("username", &self.username)?,
            email: required("email", &self.email)?,
            mobile: required("mobile", &self.mobile)?,
            age: self.age,
            address,
            role: self.role,
        })
    }
}

fn required(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();

    if trimmed.is_empty() {
        return Err(AppError::InvalidField(format!("{field} is required")));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_voter() -> NewVoter {
        NewVoter {
            national_id: "123456789012".to_string(),
            username: " alice ".to_string(),
            email: "alice@example.com".to_string(),
            mobile: "5550100".to_string(),
            age: 30,
            address: "1 Main Street".to_string(),
            role: Role::Voter,
        }
    }

    #[test]
    fn test_vote_status_follows_ballot() {
        let voter = new_voter().validate().unwrap();
        let mut record = Voter {
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

        let status = VoteStatus::from(&record);
        assert!(!status.has_voted);
        assert_eq!(status.voted_for, None);
        assert_eq!(status.voted_at, None);

        let candidate_id = CandidateId::new();
        let voted_at = Utc::now();
        record.ballot = Some(Ballot {
            candidate_id,
            voted_at,
        });

        let status = VoteStatus::from(&record);
        assert!(status.has_voted);
        assert_eq!(status.voted_for, Some(candidate_id));
        assert_eq!(status.voted_at, Some(voted_at));
    }

    #[test]
    fn test_new_voter_trims_fields() {
        let voter = new_voter().validate().unwrap();
        assert_eq!(voter.username, "alice");
    }

    #[test]
    fn test_new_voter_rejects_bad_national_id() {
        let mut voter = new_voter();
        voter.national_id = "12345".to_string();
        assert!(matches!(voter.validate(), Err(AppError::InvalidField(_))));

        let mut voter = new_voter();
        voter.national_id = "12345678901a".to_string();
        assert!(matches!(voter.validate(), Err(AppError::InvalidField(_))));
    }

    #[test]
    fn test_new_voter_rejects_long_address_and_minors() {
        let mut voter = new_voter();
        voter.address = "x".repeat(501);
        assert!(matches!(voter.validate(), Err(AppError::InvalidField(_))));

        let mut voter = new_voter();
        voter.age = 17;
        assert!(matches!(voter.validate(), Err(AppError::InvalidField(_))));
    }

    #[test]
    fn test_candidate_details_required_fields() {
        let details = CandidateDetails {
            name: "  ".to_string(),
            party: "Green".to_string(),
            age: 40,
        };
        assert!(matches!(details.validate(), Err(AppError::InvalidField(_))));

        let details = CandidateDetails {
            name: " Ada ".to_string(),
            party: "Green".to_string(),
            age: 0,
        };
        assert!(matches!(details.validate(), Err(AppError::InvalidField(_))));
    }

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert_eq!(Role::Voter.as_str(), "voter");
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_voter_serializes_flat_vote_status() {
        let voter = new_voter().validate().unwrap();
        let candidate_id = CandidateId::new();
        let mut record = Voter {
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

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["nationalId"], "123456789012");
        assert_eq!(json["role"], "voter");
        assert_eq!(json["hasVoted"], false);
        assert!(json["votedFor"].is_null());
        assert!(json.get("ballot").is_none());

        record.ballot = Some(Ballot {
            candidate_id,
            voted_at: Utc::now(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["hasVoted"], true);
        assert_eq!(json["votedFor"], candidate_id.to_string());
        assert!(json["votedAt"].is_string());
    }
}
