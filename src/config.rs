use crate::error::{AppError, Result};

pub const AUCTION_API_URL: &str = "https://eapi.stalcraft.net/ru";

/// Page size for both the lots and history endpoints. A page of exactly this many
/// entries means there may be more; anything shorter is the last page.
pub const PAGE_LIMIT: usize = 200;

/// Per-request timeout (seconds). Exceeding it is a recoverable fetch error.
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Delay used when a 429 response carries no usable Retry-After header.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Newest records kept per item in `price_history`.
pub const HISTORY_RETENTION: i64 = 1000;

/// Bounds for the periodic scan interval (seconds).
pub const MIN_SCAN_INTERVAL_SECS: u64 = 10;
pub const MAX_SCAN_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;

/// Lots shown per page in the in-game auction UI; used to tell the user which
/// page a profitable stack sits on.
pub const LISTING_PAGE_SIZE: usize = 50;

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Keys in the `config` table.
pub mod config_keys {
    pub const TOKEN: &str = "token";
    pub const INTERVAL: &str = "interval";
}

/// How long a seen profitable-stack token suppresses repeat notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackDedupScope {
    /// Tokens survive across cycles until an explicit clear.
    Session,
    /// Tokens are dropped at the start of every cycle.
    Cycle,
}

impl std::str::FromStr for StackDedupScope {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "session" => Ok(StackDedupScope::Session),
            "cycle" => Ok(StackDedupScope::Cycle),
            other => Err(AppError::Config(format!(
                "STACK_DEDUP_SCOPE must be `session` or `cycle`, got `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    /// Bearer token (AUCTION_TOKEN). Falls back to the `config` table when unset.
    pub auth_token: Option<String>,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Periodic cycle interval (SCAN_INTERVAL_SECS). None = use the stored value or default.
    pub scan_interval_secs: Option<u64>,
    /// Max page tasks running at once (SCAN_MAX_CONCURRENCY). 0 = unbounded.
    pub scan_max_concurrency: usize,
    pub stack_dedup_scope: StackDedupScope,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: std::env::var("AUCTION_API_URL")
                .unwrap_or_else(|_| AUCTION_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            auth_token: std::env::var("AUCTION_TOKEN")
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "tracker.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            scan_interval_secs: std::env::var("SCAN_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(clamp_interval),
            scan_max_concurrency: std::env::var("SCAN_MAX_CONCURRENCY")
                .unwrap_or_else(|_| "16".to_string())
                .parse::<usize>()
                .unwrap_or(16),
            stack_dedup_scope: std::env::var("STACK_DEDUP_SCOPE")
                .unwrap_or_else(|_| "session".to_string())
                .parse()?,
        })
    }
}

pub fn clamp_interval(secs: u64) -> u64 {
    secs.clamp(MIN_SCAN_INTERVAL_SECS, MAX_SCAN_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_clamped_to_bounds() {
        assert_eq!(clamp_interval(1), MIN_SCAN_INTERVAL_SECS);
        assert_eq!(clamp_interval(90), 90);
        assert_eq!(clamp_interval(100_000), MAX_SCAN_INTERVAL_SECS);
    }

    #[test]
    fn dedup_scope_parses_case_insensitively() {
        assert_eq!("Session".parse::<StackDedupScope>().unwrap(), StackDedupScope::Session);
        assert_eq!(" cycle ".parse::<StackDedupScope>().unwrap(), StackDedupScope::Cycle);
        assert!("forever".parse::<StackDedupScope>().is_err());
    }
}
