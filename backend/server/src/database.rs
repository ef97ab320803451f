//! # Redis
//!
//! RAM database, and the system of record for voters, candidates and ballots.
//!
//! ## Layout
//!
//! - `voter:{id}`: hash with the identity fields, `role`, and the vote latch (`has_voted`, `voted_for`, `voted_at`)
//! - `voters:{field}`: unique indexes for `national_id`, `username`, `email` and `mobile`, value to voter id
//! - `candidate:{id}`: hash with `name`, `party`, `age`, `seq`, `created_at` and the **vote_count** int
//! - `candidates`: sorted set of candidate ids scored by `seq`, so listing keeps insertion order
//! - `ballots:{candidate}`: set of voter ids whose latch points at this candidate
//! - `tallied:{candidate}`: set of voter ids already counted into **vote_count**
//!
//! A candidate can only be deleted while `ballots:{candidate}` is empty.
//!
//! ## Atomicity
//!
//! Every multi-key mutation is a Lua script. Redis runs a script to completion before serving
//! any other command, which gives us the conditional commit (`has_voted` is checked and set in
//! one step) without any lock on our side.
//!
//! The tally increment adds the voter to `tallied:{candidate}` first and only bumps the counter
//! when that add is new. A crash between latch and increment leaves a ballot that is not in
//! `tallied`, which the reconciler counts later. Counting it twice is impossible.
//!
//! ## Commands
//!
//! Inspect a voter.
//! ```sh
//! redis-cli HGETALL voter:<id>
//! ```
//!
//! Compare ballots with the stored tally.
//! ```sh
//! redis-cli SCARD ballots:<candidate>
//! redis-cli HGET candidate:<candidate> vote_count
//! ```
use std::{collections::HashMap, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::{
    AsyncCommands, Client, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::{
    error::StoreError,
    models::{Ballot, Candidate, CandidateDetails, CandidateId, NewVoter, Role, Voter, VoterId},
    store::{CandidateRemoval, Reconciliation, RollbackOutcome, VoteStore},
    utils::now,
};

const CANDIDATE_INDEX: &str = "candidates";
const CANDIDATE_SEQUENCE: &str = "candidates:seq";
const UNIQUE_FIELDS: [(&str, &str); 4] = [
    ("voters:national_id", "nationalId"),
    ("voters:username", "username"),
    ("voters:email", "email"),
    ("voters:mobile", "mobile"),
];

const COMMIT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
if redis.call('HGET', KEYS[1], 'has_voted') == '1' then
    return 0
end
redis.call('HSET', KEYS[1], 'has_voted', '1', 'voted_for', ARGV[2], 'voted_at', ARGV[3])
redis.call('SADD', KEYS[2], ARGV[1])
return 1
";

const TALLY_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return false
end
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 and redis.call('SADD', KEYS[3], ARGV[1]) == 1 then
    return redis.call('HINCRBY', KEYS[1], 'vote_count', 1)
end
return tonumber(redis.call('HGET', KEYS[1], 'vote_count') or '0')
";

const ROLLBACK_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'voted_for') ~= ARGV[2] or redis.call('HGET', KEYS[1], 'voted_at') ~= ARGV[3] then
    return 0
end
if redis.call('SISMEMBER', KEYS[3], ARGV[1]) == 1 then
    return 2
end
redis.call('HSET', KEYS[1], 'has_voted', '0')
redis.call('HDEL', KEYS[1], 'voted_for', 'voted_at')
redis.call('SREM', KEYS[2], ARGV[1])
return 1
";

const RECONCILE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return false
end
local previous = tonumber(redis.call('HGET', KEYS[1], 'vote_count') or '0')
local missing = redis.call('SDIFF', KEYS[2], KEYS[3])
for _, voter in ipairs(missing) do
    redis.call('SADD', KEYS[3], voter)
end
local current = redis.call('SCARD', KEYS[3])
if current ~= previous then
    redis.call('HSET', KEYS[1], 'vote_count', current)
end
return {#missing, previous, current}
";

const INSERT_VOTER_SCRIPT: &str = r"
for i = 2, 5 do
    if redis.call('HEXISTS', KEYS[i], ARGV[i]) == 1 then
        return i - 1
    end
end
for i = 2, 5 do
    redis.call('HSET', KEYS[i], ARGV[i], ARGV[1])
end
redis.call('HSET', KEYS[1],
    'national_id', ARGV[2], 'username', ARGV[3], 'email', ARGV[4], 'mobile', ARGV[5],
    'age', ARGV[6], 'address', ARGV[7], 'role', ARGV[8], 'has_voted', '0')
return 0
";

const INSERT_CANDIDATE_SCRIPT: &str = r"
local seq = redis.call('INCR', KEYS[3])
redis.call('HSET', KEYS[1],
    'name', ARGV[2], 'party', ARGV[3], 'age', ARGV[4],
    'seq', seq, 'vote_count', 0, 'created_at', ARGV[5])
redis.call('ZADD', KEYS[2], seq, ARGV[1])
return seq
";

const UPDATE_CANDIDATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'name', ARGV[1], 'party', ARGV[2], 'age', ARGV[3])
return 1
";

const DELETE_CANDIDATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
if redis.call('SCARD', KEYS[2]) > 0 then
    return 2
end
redis.call('DEL', KEYS[1], KEYS[2], KEYS[3])
redis.call('ZREM', KEYS[4], ARGV[1])
return 1
";

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new().set_number_of_retries(1);

    let client = Client::open(redis_url)?;
    client.get_connection_manager_with_config(config).await
}

fn voter_key(voter_id: VoterId) -> String {
    format!("voter:{voter_id}")
}

fn candidate_key(candidate_id: CandidateId) -> String {
    format!("candidate:{candidate_id}")
}

fn ballots_key(candidate_id: CandidateId) -> String {
    format!("ballots:{candidate_id}")
}

fn tallied_key(candidate_id: CandidateId) -> String {
    format!("tallied:{candidate_id}")
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct Scripts {
    commit: Script,
    tally: Script,
    rollback: Script,
    reconcile: Script,
    insert_voter: Script,
    insert_candidate: Script,
    update_candidate: Script,
    delete_candidate: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            commit: Script::new(COMMIT_SCRIPT),
            tally: Script::new(TALLY_SCRIPT),
            rollback: Script::new(ROLLBACK_SCRIPT),
            reconcile: Script::new(RECONCILE_SCRIPT),
            insert_voter: Script::new(INSERT_VOTER_SCRIPT),
            insert_candidate: Script::new(INSERT_CANDIDATE_SCRIPT),
            update_candidate: Script::new(UPDATE_CANDIDATE_SCRIPT),
            delete_candidate: Script::new(DELETE_CANDIDATE_SCRIPT),
        }
    }
}

pub struct RedisStore {
    connection: ConnectionManager,
    scripts: Scripts,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            scripts: Scripts::load(),
        }
    }
}

#[async_trait]
impl VoteStore for RedisStore {
    async fn find_voter_by_id(&self, voter_id: VoterId) -> Result<Option<Voter>, StoreError> {
        let mut connection = self.connection.clone();
        let key = voter_key(voter_id);

        let fields: HashMap<String, String> = connection.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        parse_voter(voter_id, &key, &fields).map(Some)
    }

    async fn find_candidate_by_id(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Option<Candidate>, StoreError> {
        let mut connection = self.connection.clone();
        let key = candidate_key(candidate_id);

        let fields: HashMap<String, String> = connection.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        parse_candidate(candidate_id, &key, &fields).map(Some)
    }

    async fn list_candidates(&self) -> Result<Vec<Candidate>, StoreError> {
        let mut connection = self.connection.clone();

        let raw_ids: Vec<String> = connection.zrange(CANDIDATE_INDEX, 0, -1).await?;
        let ids = raw_ids
            .iter()
            .map(|raw| {
                CandidateId::from_str(raw).map_err(|e| StoreError::Corrupt {
                    key: CANDIDATE_INDEX.to_string(),
                    reason: format!("bad candidate id {raw}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for candidate_id in &ids {
            pipe.hgetall(candidate_key(*candidate_id));
        }
        let records: Vec<HashMap<String, String>> = pipe.query_async(&mut connection).await?;

        ids.into_iter()
            .zip(records)
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(candidate_id, fields)| {
                parse_candidate(candidate_id, &candidate_key(candidate_id), &fields)
            })
            .collect()
    }

    async fn apply_conditional_voter_commit(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        voted_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut connection = self.connection.clone();

        let affected: u64 = self
            .scripts
            .commit
            .key(voter_key(voter_id))
            .key(ballots_key(candidate_id))
            .arg(voter_id.to_string())
            .arg(candidate_id.to_string())
            .arg(timestamp(voted_at))
            .invoke_async(&mut connection)
            .await?;

        Ok(affected)
    }

    async fn increment_candidate_tally(
        &self,
        candidate_id: CandidateId,
        voter_id: VoterId,
    ) -> Result<Option<u64>, StoreError> {
        let mut connection = self.connection.clone();

        let count: Option<u64> = self
            .scripts
            .tally
            .key(candidate_key(candidate_id))
            .key(ballots_key(candidate_id))
            .key(tallied_key(candidate_id))
            .arg(voter_id.to_string())
            .invoke_async(&mut connection)
            .await?;

        Ok(count)
    }

    async fn rollback_voter_commit(
        &self,
        voter_id: VoterId,
        candidate_id: CandidateId,
        voted_at: DateTime<Utc>,
    ) -> Result<RollbackOutcome, StoreError> {
        let mut connection = self.connection.clone();

        let outcome: u8 = self
            .scripts
            .rollback
            .key(voter_key(voter_id))
            .key(ballots_key(candidate_id))
            .key(tallied_key(candidate_id))
            .arg(voter_id.to_string())
            .arg(candidate_id.to_string())
            .arg(timestamp(voted_at))
            .invoke_async(&mut connection)
            .await?;

        Ok(match outcome {
            1 => RollbackOutcome::Reverted,
            2 => RollbackOutcome::AlreadyTallied,
            _ => RollbackOutcome::NotApplied,
        })
    }

    async fn reconcile_candidate(
        &self,
        candidate_id: CandidateId,
    ) -> Result<Option<Reconciliation>, StoreError> {
        let mut connection = self.connection.clone();

        let counts: Option<Vec<u64>> = self
            .scripts
            .reconcile
            .key(candidate_key(candidate_id))
            .key(ballots_key(candidate_id))
            .key(tallied_key(candidate_id))
            .invoke_async(&mut connection)
            .await?;

        let Some(counts) = counts else {
            return Ok(None);
        };

        let &[repaired, previous, current] = counts.as_slice() else {
            return Err(StoreError::Corrupt {
                key: candidate_key(candidate_id),
                reason: format!("unexpected reconcile reply {counts:?}"),
            });
        };

        Ok(Some(Reconciliation {
            candidate_id,
            repaired,
            previous,
            current,
        }))
    }

    async fn insert_voter(&self, voter: NewVoter) -> Result<Voter, StoreError> {
        let mut connection = self.connection.clone();
        let voter_id = VoterId::new();

        let mut invocation = self.scripts.insert_voter.key(voter_key(voter_id));
        for (index, _) in UNIQUE_FIELDS {
            invocation.key(index);
        }

        let duplicate: usize = invocation
            .arg(voter_id.to_string())
            .arg(&voter.national_id)
            .arg(&voter.username)
            .arg(&voter.email)
            .arg(&voter.mobile)
            .arg(voter.age)
            .arg(&voter.address)
            .arg(voter.role.as_str())
            .invoke_async(&mut connection)
            .await?;

        if let Some(&(_, field)) = duplicate.checked_sub(1).and_then(|i| UNIQUE_FIELDS.get(i)) {
            return Err(StoreError::Duplicate(field));
        }

        Ok(Voter {
            id: voter_id,
            national_id: voter.national_id,
            username: voter.username,
            email: voter.email,
            mobile: voter.mobile,
            age: voter.age,
            address: voter.address,
            role: voter.role,
            ballot: None,
        })
    }

    async fn insert_candidate(&self, details: CandidateDetails) -> Result<Candidate, StoreError> {
        let mut connection = self.connection.clone();
        let candidate_id = CandidateId::new();
        let created_at = now();

        let seq: u64 = self
            .scripts
            .insert_candidate
            .key(candidate_key(candidate_id))
            .key(CANDIDATE_INDEX)
            .key(CANDIDATE_SEQUENCE)
            .arg(candidate_id.to_string())
            .arg(&details.name)
            .arg(&details.party)
            .arg(details.age)
            .arg(timestamp(created_at))
            .invoke_async(&mut connection)
            .await?;

        Ok(Candidate {
            id: candidate_id,
            seq,
            name: details.name,
            party: details.party,
            age: details.age,
            vote_count: 0,
            created_at,
        })
    }

    async fn update_candidate(
        &self,
        candidate_id: CandidateId,
        details: CandidateDetails,
    ) -> Result<Option<Candidate>, StoreError> {
        let mut connection = self.connection.clone();

        let updated: u8 = self
            .scripts
            .update_candidate
            .key(candidate_key(candidate_id))
            .arg(&details.name)
            .arg(&details.party)
            .arg(details.age)
            .invoke_async(&mut connection)
            .await?;

        if updated == 0 {
            return Ok(None);
        }

        self.find_candidate_by_id(candidate_id).await
    }

    async fn delete_candidate(
        &self,
        candidate_id: CandidateId,
    ) -> Result<CandidateRemoval, StoreError> {
        let mut connection = self.connection.clone();

        let outcome: u8 = self
            .scripts
            .delete_candidate
            .key(candidate_key(candidate_id))
            .key(ballots_key(candidate_id))
            .key(tallied_key(candidate_id))
            .key(CANDIDATE_INDEX)
            .arg(candidate_id.to_string())
            .invoke_async(&mut connection)
            .await?;

        Ok(match outcome {
            1 => CandidateRemoval::Removed,
            2 => CandidateRemoval::HasBallots,
            _ => CandidateRemoval::Missing,
        })
    }
}

fn field<'a>(
    key: &str,
    fields: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, StoreError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("missing field {name}"),
        })
}

fn parse_field<T>(key: &str, fields: &HashMap<String, String>, name: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    field(key, fields, name)?
        .parse()
        .map_err(|e: T::Err| StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("bad {name}: {e}"),
        })
}

fn parse_voter(
    voter_id: VoterId,
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<Voter, StoreError> {
    let ballot = match fields.get("has_voted").map(String::as_str) {
        Some("1") => Some(Ballot {
            candidate_id: parse_field(key, fields, "voted_for")?,
            voted_at: parse_field(key, fields, "voted_at")?,
        }),
        _ => None,
    };

    Ok(Voter {
        id: voter_id,
        national_id: field(key, fields, "national_id")?.to_string(),
        username: field(key, fields, "username")?.to_string(),
        email: field(key, fields, "email")?.to_string(),
        mobile: field(key, fields, "mobile")?.to_string(),
        age: parse_field(key, fields, "age")?,
        address: field(key, fields, "address")?.to_string(),
        role: parse_field::<Role>(key, fields, "role")?,
        ballot,
    })
}

fn parse_candidate(
    candidate_id: CandidateId,
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<Candidate, StoreError> {
    Ok(Candidate {
        id: candidate_id,
        seq: parse_field(key, fields, "seq")?,
        name: field(key, fields, "name")?.to_string(),
        party: field(key, fields, "party")?.to_string(),
        age: parse_field(key, fields, "age")?,
        vote_count: parse_field(key, fields, "vote_count")?,
        created_at: parse_field(key, fields, "created_at")?,
    })
}
