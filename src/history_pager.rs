use std::sync::Arc;

use tracing::info;

use crate::config::PAGE_LIMIT;
use crate::db::history::{normalize_time, HistoryStore};
use crate::error::Result;
use crate::fetcher::AuctionApi;
use crate::types::{HistoryEntry, PriceHistoryRecord};

/// Fetch one page of sales at `offset`, merge it into the store and return the
/// page's well-formed records, newest first.
pub async fn load_next_page(
    api: &dyn AuctionApi,
    store: &HistoryStore,
    item_id: &str,
    token: &str,
    offset: usize,
    limit: usize,
) -> Result<(Vec<PriceHistoryRecord>, usize)> {
    let entries = api.fetch_history_page(item_id, token, offset, limit).await?;
    let inserted = store.append_history(item_id, &entries).await?;
    let records = to_records(item_id, &entries);

    info!(
        item_id = %item_id,
        offset,
        received = entries.len(),
        inserted,
        "History page merged"
    );
    Ok((records, entries.len()))
}

fn to_records(item_id: &str, entries: &[HistoryEntry]) -> Vec<PriceHistoryRecord> {
    let mut records: Vec<PriceHistoryRecord> = entries
        .iter()
        .filter_map(|e| {
            Some(PriceHistoryRecord {
                item_id: item_id.to_string(),
                time: normalize_time(&e.time)?,
                price: e.price,
                amount: e.amount,
                quality: e.additional.qlt,
            })
        })
        .collect();
    records.sort_by(|a, b| b.time.cmp(&a.time));
    records
}

/// "Load more" state for one item's sale history: the next offset, whether the
/// server has run out, and every record loaded so far for re-filtering by tier.
pub struct HistoryPager {
    api: Arc<dyn AuctionApi>,
    store: HistoryStore,
    item_id: String,
    offset: usize,
    exhausted: bool,
    accumulated: Vec<PriceHistoryRecord>,
}

impl HistoryPager {
    pub fn new(api: Arc<dyn AuctionApi>, store: HistoryStore, item_id: impl Into<String>) -> Self {
        Self {
            api,
            store,
            item_id: item_id.into(),
            offset: 0,
            exhausted: false,
            accumulated: Vec::new(),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Start over from the newest sale, dropping the accumulated view. Sales
    /// that arrived since the last load show up on the next `load_more`.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.exhausted = false;
        self.accumulated.clear();
    }

    /// Load the page after the last one. A short page marks the pager exhausted;
    /// further calls return nothing without touching the network.
    pub async fn load_more(&mut self, token: &str) -> Result<Vec<PriceHistoryRecord>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let (records, received) = load_next_page(
            self.api.as_ref(),
            &self.store,
            &self.item_id,
            token,
            self.offset,
            PAGE_LIMIT,
        )
        .await?;

        self.offset += received;
        self.exhausted = received < PAGE_LIMIT;
        self.accumulated.extend(records.iter().cloned());
        Ok(records)
    }

    /// Everything loaded so far, optionally restricted to one quality tier.
    pub fn filtered(&self, quality: Option<i64>) -> Vec<PriceHistoryRecord> {
        self.accumulated
            .iter()
            .filter(|r| quality.map_or(true, |q| r.quality == q))
            .cloned()
            .collect()
    }
}
