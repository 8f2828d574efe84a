use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;

use nightlife_api::provider::DEFAULT_SEARCH_URL;

/// Server settings, read once from the environment at startup.
///
/// No `Debug`: it holds the provider API key.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub client_origin: String,
    pub session_ttl_hours: i64,
    pub session_sweep_secs: u64,
    pub cookie_secure: bool,
    pub yelp_api_key: String,
    pub yelp_api_url: String,
    pub search_limit: u32,
    pub upstream_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let yelp_api_key = lookup("YELP_API_KEY").unwrap_or_default();
        if yelp_api_key.trim().is_empty() {
            bail!("YELP_API_KEY is not set; venue search cannot work without it");
        }

        let session_ttl_hours: i64 = parse(&lookup, "NIGHTLIFE_SESSION_TTL_HOURS", "24")?;
        if session_ttl_hours <= 0 {
            bail!("NIGHTLIFE_SESSION_TTL_HOURS must be positive");
        }

        let limit: u32 = parse(&lookup, "NIGHTLIFE_SEARCH_LIMIT", "20")?;
        if !(1..=50).contains(&limit) {
            bail!("NIGHTLIFE_SEARCH_LIMIT must be between 1 and 50");
        }

        Ok(Self {
            host: lookup("NIGHTLIFE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&lookup, "NIGHTLIFE_PORT", "5000")?,
            db_path: lookup("NIGHTLIFE_DB_PATH")
                .unwrap_or_else(|| "nightlife.db".into())
                .into(),
            client_origin: lookup("NIGHTLIFE_CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:5173".into()),
            session_ttl_hours,
            session_sweep_secs: parse(&lookup, "NIGHTLIFE_SESSION_SWEEP_SECS", "600")?,
            cookie_secure: parse(&lookup, "NIGHTLIFE_COOKIE_SECURE", "false")?,
            yelp_api_key,
            yelp_api_url: lookup("YELP_API_URL").unwrap_or_else(|| DEFAULT_SEARCH_URL.into()),
            search_limit: limit,
            upstream_timeout: Duration::from_secs(parse(&lookup, "NIGHTLIFE_UPSTREAM_TIMEOUT_SECS", "10")?),
        })
    }

    pub fn log_summary(&self) {
        info!("Database: {}", self.db_path.display());
        info!("Client origin: {}", self.client_origin);
        info!(
            "Sessions: {}h lifetime, swept every {}s, secure cookie: {}",
            self.session_ttl_hours, self.session_sweep_secs, self.cookie_secure
        );
        info!(
            "Venue search: {} (limit {}, timeout {:?})",
            self.yelp_api_url, self.search_limit, self.upstream_timeout
        );
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value for {}: {:?}", key, raw))
}
