use super::error::AppError;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

/// How the watchlist poller groups instruments into LTP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LtpBatching {
    /// One request carrying every exchange partition.
    Combined,
    /// One request per non-empty exchange partition, issued concurrently.
    PerExchange,
}

impl LtpBatching {
    fn parse(v: &str) -> Option<Self> {
        match v.trim().to_ascii_lowercase().as_str() {
            "combined" => Some(Self::Combined),
            "per_exchange" | "per-exchange" => Some(Self::PerExchange),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Gateway origin, without a trailing slash.
    pub api_base_url: String,
    pub session_cookie: Option<String>,
    pub http_timeout: Duration,

    pub watchlist_dir: PathBuf,

    pub ltp_poll_interval: Duration,
    pub quote_poll_interval: Duration,
    pub ltp_batching: LtpBatching,

    pub server_addr: String,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            session_cookie: None,
            http_timeout: Duration::from_millis(15_000),
            watchlist_dir: PathBuf::from(".angeltwo"),
            ltp_poll_interval: Duration::from_millis(1_000),
            quote_poll_interval: Duration::from_millis(1_000),
            ltp_batching: LtpBatching::Combined,
            server_addr: "127.0.0.1:3000".to_string(),
            log_json: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let api_base_url = match env_string("API_BASE_URL") {
            Some(raw) => {
                Url::parse(&raw)
                    .map_err(|e| AppError::Config(format!("Invalid API_BASE_URL {raw:?}: {e}")))?;
                raw.trim_end_matches('/').to_string()
            }
            None => defaults.api_base_url,
        };

        // Raw `Cookie` header value, e.g. "session=abc; csrf=def".
        // The gateway owns authentication; we only forward the cookie.
        let session_cookie = env_string("SESSION_COOKIE");

        let http_timeout = env_millis("HTTP_TIMEOUT_MS").unwrap_or(defaults.http_timeout);
        let watchlist_dir = env_string("WATCHLIST_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.watchlist_dir);

        let ltp_poll_interval =
            env_millis("LTP_POLL_INTERVAL_MS").unwrap_or(defaults.ltp_poll_interval);
        let quote_poll_interval =
            env_millis("QUOTE_POLL_INTERVAL_MS").unwrap_or(defaults.quote_poll_interval);
        let ltp_batching = env_string("LTP_BATCHING")
            .and_then(|v| LtpBatching::parse(&v))
            .unwrap_or(defaults.ltp_batching);

        let server_addr = env_string("SERVER_ADDR").unwrap_or(defaults.server_addr);
        let log_json = env_string("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            api_base_url,
            session_cookie,
            http_timeout,
            watchlist_dir,
            ltp_poll_interval,
            quote_poll_interval,
            ltp_batching,
            server_addr,
            log_json,
        })
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Positive millisecond durations only; anything else falls back to the default.
fn env_millis(key: &str) -> Option<Duration> {
    env_string(key)
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_millis)
}
