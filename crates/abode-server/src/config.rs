use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use abode_engine::{EngineConfig, FallbackPolicy};

const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// `None` selects the log-only deliverer.
    pub push: Option<PushConfig>,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key -> value source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("ABODE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("ABODE_JWT_SECRET is unset or still a placeholder");
        }

        let host = get("ABODE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&get, "ABODE_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;

        let secs = |key: &str, default: u64| -> Result<Duration> {
            let value: u64 = parse_or(&get, key, default)?;
            if value == 0 {
                bail!("{key} must be greater than zero");
            }
            Ok(Duration::from_secs(value))
        };

        let chat_fallback = match get("ABODE_CHAT_FALLBACK") {
            Some(raw) => raw
                .parse::<FallbackPolicy>()
                .map_err(|e| anyhow::anyhow!("ABODE_CHAT_FALLBACK: {e}"))?,
            None => FallbackPolicy::default(),
        };

        let push = get("ABODE_PUSH_ENDPOINT").map(|endpoint| PushConfig {
            endpoint,
            api_key: get("ABODE_PUSH_API_KEY"),
        });

        Ok(Self {
            addr,
            db_path: get("ABODE_DB_PATH").unwrap_or_else(|| "abode.db".into()).into(),
            jwt_secret,
            push,
            engine: EngineConfig {
                dispatch_interval: secs("ABODE_DISPATCH_INTERVAL_SECS", 300)?,
                dispatch_tolerance: secs("ABODE_DISPATCH_TOLERANCE_SECS", 300)?,
                push_timeout: secs("ABODE_PUSH_TIMEOUT_SECS", 10)?,
                chat_fallback,
            },
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?} is invalid: {e}")),
        None => Ok(default),
    }
}
