use std::env;
use std::net::SocketAddr;

const DEFAULT_JWT_ISSUER: &str = "grantdesk";
const DEFAULT_JWT_AUDIENCE: &str = "grantdesk-app";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
}

impl std::fmt::Debug for StripeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeSettings")
            .field("secret_key", &"***")
            .field("webhook_secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub period_ms: u64,
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        // ~5 req/sec with room for short client bursts
        Self {
            period_ms: 200,
            burst: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub stripe: StripeSettings,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub bind_addr: SocketAddr,
    pub rate_limit: RateLimitSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let optional = |name: &str, default: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let bind_addr = parse_var("BIND_ADDR", &optional("BIND_ADDR", DEFAULT_BIND_ADDR))?;

        let defaults = RateLimitSettings::default();
        let rate_limit = RateLimitSettings {
            period_ms: match lookup("RATE_LIMITER_MILLISECONDS") {
                Some(raw) => parse_var("RATE_LIMITER_MILLISECONDS", &raw)?,
                None => defaults.period_ms,
            },
            burst: match lookup("RATE_LIMITER_BURST") {
                Some(raw) => parse_var("RATE_LIMITER_BURST", &raw)?,
                None => defaults.burst,
            },
        };

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            frontend_origin: required("FRONTEND_ORIGIN")?,
            stripe: StripeSettings {
                secret_key: required("STRIPE_SECRET_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            },
            jwt_issuer: optional("JWT_ISSUER", DEFAULT_JWT_ISSUER),
            jwt_audience: optional("JWT_AUDIENCE", DEFAULT_JWT_AUDIENCE),
            bind_addr,
            rate_limit,
        })
    }
}

fn parse_var<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}
