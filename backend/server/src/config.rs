use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use axum::http::HeaderValue;
use tower_http::cors::AllowOrigin;
use tracing::{info, warn};

use crate::error::ConfigError;

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub jwt_secret: String,
    pub store_timeout: Duration,
    pub reconcile_interval: Duration,
    pub token_ttl: Duration,
    pub cors_origin: AllowOrigin,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Same as [`Config::load`] with variables looked up through `source` instead of the process
    /// environment. Secrets under `/run/secrets` still take precedence.
    pub fn from_source(source: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let store_timeout_ms: u64 = try_load(&source, "STORE_TIMEOUT_MS", "2000")?;
        let reconcile_secs: u64 = try_load(&source, "RECONCILE_INTERVAL_SECS", "60")?;
        let token_ttl_hours: u64 = try_load(&source, "TOKEN_TTL_HOURS", "24")?;

        if store_timeout_ms == 0 {
            return Err(invalid("STORE_TIMEOUT_MS", "must be positive"));
        }
        if reconcile_secs == 0 {
            return Err(invalid("RECONCILE_INTERVAL_SECS", "must be positive"));
        }

        // token expiry is an i64 unix timestamp
        let token_ttl_secs = token_ttl_hours
            .checked_mul(60 * 60)
            .filter(|secs| i64::try_from(*secs).is_ok())
            .ok_or_else(|| invalid("TOKEN_TTL_HOURS", "too large"))?;

        Ok(Self {
            port: try_load(&source, "RUST_PORT", "1111")?,
            redis_url: try_load(&source, "REDIS_URL", "redis://127.0.0.1:6379")?,
            jwt_secret: read_secret(&source, "JWT_SECRET")?,
            store_timeout: Duration::from_millis(store_timeout_ms),
            reconcile_interval: Duration::from_secs(reconcile_secs),
            token_ttl: Duration::from_secs(token_ttl_secs),
            cors_origin: cors_origin(try_load::<String>(&source, "CORS_ORIGIN", "*")?)?,
        })
    }
}

fn invalid(key: &'static str, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

fn try_load<T: FromStr>(
    source: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    source(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            invalid(key, e)
        })
}

fn read_secret(
    source: &impl Fn(&str) -> Option<String>,
    secret_name: &'static str,
) -> Result<String, ConfigError> {
    let path = format!("/run/secrets/{secret_name}");

    let secret = read_to_string(&path)
        .map(|s| s.trim().to_string())
        .or_else(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
            source(secret_name).ok_or(ConfigError::MissingSecret(secret_name))
        })?;

    if secret.is_empty() {
        return Err(ConfigError::MissingSecret(secret_name));
    }

    Ok(secret)
}

fn cors_origin(origin: String) -> Result<AllowOrigin, ConfigError> {
    if origin == "*" {
        return Ok(AllowOrigin::any());
    }

    HeaderValue::from_str(&origin)
        .map(AllowOrigin::exact)
        .map_err(|e| invalid("CORS_ORIGIN", e))
}
