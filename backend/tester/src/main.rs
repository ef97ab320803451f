use anyhow::Context;
use ballot::{
    auth::AuthGate,
    config::Config,
    database::{RedisStore, init_redis},
    models::{NewVoter, Role},
    store::VoteStore,
};
use clap::Parser;

/// Provisions an admin account in the configured Redis store and prints its bearer token.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long)]
    national_id: String,

    #[arg(long)]
    username: String,

    #[arg(long)]
    email: String,

    #[arg(long)]
    mobile: String,

    #[arg(long)]
    age: u32,

    #[arg(long)]
    address: String,

    /// Provision a regular voter instead of an admin.
    #[arg(long)]
    voter: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load()?;
    let connection = init_redis(&config.redis_url)
        .await
        .with_context(|| format!("connecting to {}", config.redis_url))?;
    let store = RedisStore::new(connection);

    let new_voter = NewVoter {
        national_id: args.national_id,
        username: args.username,
        email: args.email,
        mobile: args.mobile,
        age: args.age,
        address: args.address,
        role: if args.voter { Role::Voter } else { Role::Admin },
    }
    .validate()?;

    let voter = store.insert_voter(new_voter).await?;
    let token = AuthGate::new(config.jwt_secret.as_bytes(), config.token_ttl).issue_token(voter.id)?;

    println!("{} {} ({})", voter.role.as_str(), voter.username, voter.id);
    println!("{token}");

    Ok(())
}
