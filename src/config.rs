use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use reqwest::Url;

use crate::event::DEFAULT_FEED_LIMIT;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_millis(500);

/// Endpoints and credentials of the cost-tracking backend
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: Url,
    pub token: Option<String>,
    pub recent_endpoint: String,
    pub stream_endpoint: String,
    pub export_endpoint: String,
    pub timezone: Tz,
    pub feed: FeedConfig,
}

/// Knobs of the live feed session
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub limit: usize,
    pub reconnect_delay: Duration,
    pub startup_delay: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_FEED_LIMIT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            startup_delay: DEFAULT_STARTUP_DELAY,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_base(None)
    }

    /// Like [`AppConfig::from_env`], with the base URL taken from the command
    /// line when given.
    pub fn from_env_with_base(base_url: Option<&str>) -> Result<Self> {
        let base_url = match base_url {
            Some(base_url) => base_url.to_string(),
            None => env::var("COSTWATCH_BASE_URL").context("COSTWATCH_BASE_URL is not set")?,
        };
        let token = match env::var("COSTWATCH_TOKEN") {
            Ok(token) => Some(token),
            Err(_) => match env::var("COSTWATCH_TOKEN_FILE") {
                Ok(path) => Some(read_token_file(&PathBuf::from(path))?),
                Err(_) => None,
            },
        };
        let recent_endpoint = env::var("COSTWATCH_RECENT_ENDPOINT")
            .unwrap_or_else(|_| "/api/activity/recent".to_string());
        let stream_endpoint = env::var("COSTWATCH_STREAM_ENDPOINT")
            .unwrap_or_else(|_| "/api/activity/stream".to_string());
        let export_endpoint = env::var("COSTWATCH_EXPORT_ENDPOINT")
            .unwrap_or_else(|_| "/api/reports/export".to_string());
        let timezone = env::var("COSTWATCH_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());

        let feed = FeedConfig {
            limit: parse_var("COSTWATCH_FEED_LIMIT")?.unwrap_or(DEFAULT_FEED_LIMIT),
            reconnect_delay: parse_var("COSTWATCH_RECONNECT_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RECONNECT_DELAY),
            startup_delay: parse_var("COSTWATCH_STARTUP_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_STARTUP_DELAY),
        };

        Ok(Self {
            base_url: Url::parse(&base_url).context("invalid base URL")?,
            token: token.filter(|t| !t.is_empty()),
            recent_endpoint,
            stream_endpoint,
            export_endpoint,
            timezone: timezone
                .parse()
                .map_err(|_| anyhow!("unknown COSTWATCH_TIMEZONE: {timezone}"))?,
            feed,
        })
    }

    pub fn recent_url(&self) -> Result<Url> {
        self.endpoint_url(&self.recent_endpoint, "COSTWATCH_RECENT_ENDPOINT")
    }

    pub fn stream_url(&self) -> Result<Url> {
        self.endpoint_url(&self.stream_endpoint, "COSTWATCH_STREAM_ENDPOINT")
    }

    pub fn export_url(&self) -> Result<Url> {
        self.endpoint_url(&self.export_endpoint, "COSTWATCH_EXPORT_ENDPOINT")
    }

    fn endpoint_url(&self, endpoint: &str, var: &str) -> Result<Url> {
        if endpoint.starts_with("http") {
            Url::parse(endpoint).with_context(|| format!("invalid {var} URL"))
        } else {
            self.base_url
                .join(endpoint.trim_start_matches('/'))
                .with_context(|| format!("failed to join {var} onto base URL"))
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {name}: {raw}")),
        Err(_) => Ok(None),
    }
}

fn read_token_file(path: &PathBuf) -> Result<String> {
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read token file: {}", path.display()))?;
    Ok(token.trim().to_string())
}
