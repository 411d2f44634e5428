use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LISTING_PAGE_SIZE;

/// Stable identifier of one tracked instance (the `tracked_items` primary key).
pub type RowId = i64;

// ---------------------------------------------------------------------------
// Tracked items
// ---------------------------------------------------------------------------

/// One tracked instance. The same `item_id` may be tracked more than once, each
/// row with its own target price and quality tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackedItem {
    pub row_id: RowId,
    pub item_id: String,
    /// 0 = no target set.
    pub target_price: i64,
    /// Quality tier 0..=5 that lots must match.
    pub target_rarity: i64,
}

pub const MAX_RARITY: i64 = 5;

const RARITY_NAMES: [&str; 6] = [
    "Common",
    "Uncommon",
    "Special",
    "Rare",
    "Exceptional",
    "Legendary",
];

pub fn rarity_name(tier: i64) -> String {
    usize::try_from(tier)
        .ok()
        .and_then(|i| RARITY_NAMES.get(i))
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("qlt={tier}"))
}

// ---------------------------------------------------------------------------
// Wire types (auction API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Additional {
    #[serde(default)]
    pub qlt: i64,
}

fn one() -> i64 {
    1
}

/// One listing in the auction. Transient: only derived minima and stack events
/// outlive the page it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub buyout_price: i64,
    #[serde(default = "one")]
    pub amount: i64,
    #[serde(default)]
    pub additional: Additional,
    pub start_time: String,
    pub end_time: String,
}

impl Lot {
    pub fn quality(&self) -> i64 {
        self.additional.qlt
    }
}

#[derive(Debug, Clone, Default)]
pub struct LotsPage {
    pub lots: Vec<Lot>,
    /// True iff the page came back full.
    pub has_more: bool,
}

/// One sale from the history endpoint, as received. `time` is either an
/// ISO-8601 string or a numeric epoch and is normalized on the way into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub time: serde_json::Value,
    pub price: i64,
    pub amount: i64,
    #[serde(default)]
    pub additional: Additional,
}

/// A normalized row of `price_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceHistoryRecord {
    pub item_id: String,
    /// Unix seconds.
    pub time: i64,
    pub price: i64,
    pub amount: i64,
    pub quality: i64,
}

impl PriceHistoryRecord {
    pub fn unit_price(&self) -> i64 {
        if self.amount > 1 {
            self.price / self.amount
        } else {
            self.price
        }
    }
}

// ---------------------------------------------------------------------------
// Profitable stacks
// ---------------------------------------------------------------------------

/// Identity of one physical lot, used to suppress repeat notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackToken {
    pub item_id: String,
    pub buyout_price: i64,
    pub amount: i64,
    pub start_time: String,
}

/// A multi-unit lot whose per-unit price is at or below the row's target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfitableStack {
    pub item_id: String,
    pub buyout_price: i64,
    pub amount: i64,
    pub unit_price: i64,
    /// Absolute index in the price-sorted listing (`offset + index_within_page`).
    pub position: usize,
    pub target_price: i64,
    pub start_time: String,
    pub end_time: String,
}

impl ProfitableStack {
    pub fn token(&self) -> StackToken {
        StackToken {
            item_id: self.item_id.clone(),
            buyout_price: self.buyout_price,
            amount: self.amount,
            start_time: self.start_time.clone(),
        }
    }

    /// What buying the stack saves versus paying the target price per unit.
    /// Saturates at the i64 bounds.
    pub fn profit(&self) -> i64 {
        self.amount
            .saturating_mul(self.target_price)
            .saturating_sub(self.buyout_price)
    }

    /// 1-based page in the in-game listing.
    pub fn page(&self) -> usize {
        self.position / LISTING_PAGE_SIZE + 1
    }
}

// ---------------------------------------------------------------------------
// Scan events (engine -> consumer)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemMinimum {
    pub row_id: RowId,
    pub item_id: String,
    pub price: i64,
}

/// A row whose cycle minimum came in at or below its target price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetHit {
    pub row_id: RowId,
    pub item_id: String,
    pub price: i64,
    pub target_price: i64,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub minima: Vec<ItemMinimum>,
    pub pages_fetched: u64,
    pub failed_chains: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A stack that passed deduplication.
    ProfitableStack(ProfitableStack),
    /// A pagination chain stopped on an error.
    FetchError {
        item_id: String,
        offset: usize,
        message: String,
    },
    CycleComplete(CycleReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(position: usize) -> ProfitableStack {
        ProfitableStack {
            item_id: "y1q9".to_string(),
            buyout_price: 900,
            amount: 10,
            unit_price: 90,
            position,
            target_price: 100,
            start_time: "2024-05-01T10:00:00Z".to_string(),
            end_time: "2024-05-03T10:00:00Z".to_string(),
        }
    }

    #[test]
    fn stack_profit_and_page() {
        assert_eq!(stack(0).profit(), 100);
        assert_eq!(stack(0).page(), 1);
        assert_eq!(stack(49).page(), 1);
        assert_eq!(stack(50).page(), 2);
        assert_eq!(stack(230).page(), 5);
    }

    #[test]
    fn profit_saturates_on_huge_targets() {
        let mut s = stack(0);
        s.target_price = i64::MAX / 5;
        assert_eq!(s.profit(), i64::MAX - 900);

        s.amount = i64::MAX;
        s.target_price = i64::MAX;
        s.buyout_price = 0;
        assert_eq!(s.profit(), i64::MAX);
    }

    #[test]
    fn lot_defaults_missing_amount_and_quality() {
        let lot: Lot = serde_json::from_value(serde_json::json!({
            "buyoutPrice": 1500,
            "startTime": "2024-05-01T10:00:00Z",
            "endTime": "2024-05-03T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(lot.amount, 1);
        assert_eq!(lot.quality(), 0);
    }

    #[test]
    fn unit_price_uses_floor_division() {
        let rec = PriceHistoryRecord {
            item_id: "a".to_string(),
            time: 1,
            price: 1001,
            amount: 10,
            quality: 0,
        };
        assert_eq!(rec.unit_price(), 100);
    }

    #[test]
    fn rarity_names_fall_back_for_unknown_tiers() {
        assert_eq!(rarity_name(0), "Common");
        assert_eq!(rarity_name(5), "Legendary");
        assert_eq!(rarity_name(7), "qlt=7");
        assert_eq!(rarity_name(-1), "qlt=-1");
    }
}
