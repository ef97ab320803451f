use std::sync::Arc;

use tracing::info;

use super::{
    auth::AuthGate,
    config::Config,
    database::{RedisStore, init_redis},
    error::StoreError,
    store::VoteStore,
    vote::VoteManager,
};

pub struct State {
    pub config: Config,
    pub store: Arc<dyn VoteStore>,
    pub votes: VoteManager,
    pub auth: AuthGate,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>, StoreError> {
        let redis_connection = init_redis(&config.redis_url).await?;
        info!("Connected to Redis");

        Ok(Self::with_store(config, Arc::new(RedisStore::new(redis_connection))))
    }

    pub fn with_store(config: Config, store: Arc<dyn VoteStore>) -> Arc<Self> {
        let votes = VoteManager::new(store.clone(), config.store_timeout);
        let auth = AuthGate::new(config.jwt_secret.as_bytes(), config.token_ttl);

        Arc::new(Self {
            config,
            store,
            votes,
            auth,
        })
    }
}
