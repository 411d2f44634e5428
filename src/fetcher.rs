use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{DEFAULT_RETRY_AFTER_SECS, REQUEST_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::{HistoryEntry, Lot, LotsPage};

/// Read side of the auction API. The scan engine and the history pager only see
/// this trait, so tests can script pages without a network.
#[async_trait]
pub trait AuctionApi: Send + Sync {
    /// One page of live lots for `item_id`, cheapest first.
    async fn fetch_lots_page(
        &self,
        item_id: &str,
        token: &str,
        offset: usize,
        limit: usize,
    ) -> Result<LotsPage>;

    /// One page of completed sales for `item_id`.
    async fn fetch_history_page(
        &self,
        item_id: &str,
        token: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>>;
}

/// reqwest-backed client. On HTTP 429 it sleeps for the server's Retry-After
/// (default 5s) and retries the same request once.
#[derive(Clone)]
pub struct AuctionClient {
    http: reqwest::Client,
    base_url: String,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
}

impl AuctionClient {
    pub fn new(
        base_url: &str,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            health,
            latency,
        })
    }

    async fn send(
        &self,
        url: &str,
        token: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response> {
        let started = Instant::now();
        let resp = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .query(query)
            .send()
            .await;
        self.latency.record(started.elapsed());
        Ok(resp?)
    }

    /// GET with the single rate-limit retry, returning the decoded JSON body.
    async fn get_json(
        &self,
        item_id: &str,
        url: &str,
        token: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let mut resp = self.send(url, token, query).await?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after_secs(resp.headers());
            self.health.inc_rate_limit_hits();
            warn!(item_id = %item_id, retry_after = wait, "Rate limited, pausing {wait}s before retry");
            tokio::time::sleep(Duration::from_secs(wait)).await;

            resp = self.send(url, token, query).await?;
            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                self.health.inc_rate_limit_hits();
                return Err(AppError::RateLimited {
                    item_id: item_id.to_string(),
                    retry_after_secs: retry_after_secs(resp.headers()),
                });
            }
        }

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(resp.json::<serde_json::Value>().await?)
    }
}

#[async_trait]
impl AuctionApi for AuctionClient {
    async fn fetch_lots_page(
        &self,
        item_id: &str,
        token: &str,
        offset: usize,
        limit: usize,
    ) -> Result<LotsPage> {
        let url = format!("{}/auction/{}/lots", self.base_url, item_id);
        let query = [
            ("sort", "buyout_price".to_string()),
            ("order", "asc".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("additional", "true".to_string()),
        ];
        let body = self.get_json(item_id, &url, token, &query).await?;
        Ok(parse_lots_page(item_id, &body, limit))
    }

    async fn fetch_history_page(
        &self,
        item_id: &str,
        token: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let url = format!("{}/auction/{}/history", self.base_url, item_id);
        let query = [
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("additional", "true".to_string()),
        ];
        let body = self.get_json(item_id, &url, token, &query).await?;
        Ok(parse_history_page(item_id, &body))
    }
}

/// Retry-After in whole seconds; missing or non-numeric values fall back to the default.
pub fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Decode a `{"lots": [...]}` body. Lots missing a required field are skipped;
/// `has_more` follows the raw page length so a skipped lot never ends pagination early.
pub fn parse_lots_page(item_id: &str, body: &serde_json::Value, limit: usize) -> LotsPage {
    let raw = body
        .get("lots")
        .and_then(|l| l.as_array())
        .map(|a| a.as_slice())
        .unwrap_or_default();

    let lots: Vec<Lot> = raw
        .iter()
        .filter_map(|v| match serde_json::from_value::<Lot>(v.clone()) {
            Ok(lot) => Some(lot),
            Err(e) => {
                debug!(item_id = %item_id, "skipping malformed lot: {e}");
                None
            }
        })
        .collect();

    LotsPage {
        lots,
        has_more: raw.len() == limit,
    }
}

/// Decode a `{"prices": [...]}` body, skipping entries missing a required field.
pub fn parse_history_page(item_id: &str, body: &serde_json::Value) -> Vec<HistoryEntry> {
    body.get("prices")
        .and_then(|p| p.as_array())
        .map(|a| a.as_slice())
        .unwrap_or_default()
        .iter()
        .filter_map(|v| match serde_json::from_value::<HistoryEntry>(v.clone()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(item_id = %item_id, "skipping malformed history entry: {e}");
                None
            }
        })
        .collect()
}
