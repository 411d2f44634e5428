use sqlx::SqlitePool;
use tracing::warn;

use crate::config::{clamp_interval, config_keys, DEFAULT_SCAN_INTERVAL_SECS};
use crate::error::Result;

/// Persistent key/value settings in the `config` table.
#[derive(Clone)]
pub struct Settings {
    pool: SqlitePool,
}

impl Settings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM config WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.flatten())
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Environment wins over the stored `token` key. Blank values count as unset.
    pub async fn resolve_token(&self, env: Option<&str>) -> Result<Option<String>> {
        if let Some(t) = env.map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(Some(t.to_string()));
        }
        Ok(self
            .get(config_keys::TOKEN)
            .await?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    /// Scan interval in seconds: environment, then the stored `interval` key, then the default.
    /// Always clamped to the allowed range.
    pub async fn resolve_interval(&self, env: Option<u64>) -> Result<u64> {
        if let Some(secs) = env {
            return Ok(clamp_interval(secs));
        }
        let stored = self.get(config_keys::INTERVAL).await?;
        let secs = match stored.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_SCAN_INTERVAL_SECS,
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                warn!("Stored scan interval {raw:?} is not a number, using default");
                DEFAULT_SCAN_INTERVAL_SECS
            }),
        };
        Ok(clamp_interval(secs))
    }
}
