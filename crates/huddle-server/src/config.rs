use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

/// Server configuration, read from `HUDDLE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Upper bound on every chat store call.
    pub store_timeout: Duration,
    pub heartbeat: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("HUDDLE_JWT_SECRET").unwrap_or_else(|| {
            warn!("HUDDLE_JWT_SECRET not set, using the development secret");
            DEFAULT_JWT_SECRET.into()
        });
        let db_path = get("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into());
        let host = get("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = get("HUDDLE_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("HUDDLE_PORT must be a port number")?;
        let store_timeout_ms: u64 = get("HUDDLE_STORE_TIMEOUT_MS")
            .unwrap_or_else(|| "5000".into())
            .parse()
            .context("HUDDLE_STORE_TIMEOUT_MS must be an integer")?;
        let heartbeat_secs: u64 = get("HUDDLE_HEARTBEAT_SECS")
            .unwrap_or_else(|| "15".into())
            .parse()
            .context("HUDDLE_HEARTBEAT_SECS must be an integer")?;

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            host,
            port,
            store_timeout: Duration::from_millis(store_timeout_ms),
            heartbeat: Duration::from_secs(heartbeat_secs.max(1)),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("invalid listen address")
    }
}
