use std::sync::Arc;

use dashmap::DashMap;

use crate::types::{ItemMinimum, RowId, TargetHit, TrackedItem};

// ---------------------------------------------------------------------------
// ItemStore
// ---------------------------------------------------------------------------

/// In-memory mirror of `tracked_items`, keyed by row id. Page tasks read the
/// quality tier from here at task start, so edits made mid-cycle take effect on
/// the next page fetched.
pub struct ItemStore {
    /// row_id -> tracked item
    items: DashMap<RowId, TrackedItem>,
    /// row_id -> minimum from the last completed cycle
    latest_min: DashMap<RowId, i64>,
}

impl ItemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_item(&self, item: TrackedItem) {
        self.items.insert(item.row_id, item);
    }

    pub fn add_items(&self, items: Vec<TrackedItem>) {
        for item in items {
            self.add_item(item);
        }
    }

    pub fn remove_item(&self, row_id: RowId) -> Option<TrackedItem> {
        self.latest_min.remove(&row_id);
        self.items.remove(&row_id).map(|(_, item)| item)
    }

    pub fn get(&self, row_id: RowId) -> Option<TrackedItem> {
        self.items.get(&row_id).map(|i| i.clone())
    }

    /// Current quality tier for a row. None once the row is gone.
    pub fn rarity(&self, row_id: RowId) -> Option<i64> {
        self.items.get(&row_id).map(|i| i.target_rarity)
    }

    pub fn set_target_price(&self, row_id: RowId, price: i64) -> bool {
        match self.items.get_mut(&row_id) {
            Some(mut item) => {
                item.target_price = price;
                true
            }
            None => false,
        }
    }

    pub fn set_target_rarity(&self, row_id: RowId, rarity: i64) -> bool {
        match self.items.get_mut(&row_id) {
            Some(mut item) => {
                item.target_rarity = rarity;
                true
            }
            None => false,
        }
    }

    /// All rows, ordered by row id (insertion order of the table).
    pub fn snapshot(&self) -> Vec<TrackedItem> {
        let mut items: Vec<TrackedItem> = self.items.iter().map(|e| e.value().clone()).collect();
        items.sort_by_key(|i| i.row_id);
        items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn latest_min(&self, row_id: RowId) -> Option<i64> {
        self.latest_min.get(&row_id).map(|p| *p)
    }

    /// Record a finished cycle's minima and return the rows whose minimum is at or
    /// below their target price. Rows removed during the cycle are ignored.
    pub fn apply_cycle_minima(&self, minima: &[ItemMinimum]) -> Vec<TargetHit> {
        let mut hits = Vec::new();
        for m in minima {
            let Some(item) = self.get(m.row_id) else { continue };
            self.latest_min.insert(m.row_id, m.price);
            if item.target_price > 0 && m.price > 0 && m.price <= item.target_price {
                hits.push(TargetHit {
                    row_id: m.row_id,
                    item_id: m.item_id.clone(),
                    price: m.price,
                    target_price: item.target_price,
                });
            }
        }
        hits
    }
}

impl Default for ItemStore {
    fn default() -> Self {
        Self {
            items: DashMap::new(),
            latest_min: DashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn item(row_id: RowId, target_price: i64) -> TrackedItem {
        TrackedItem {
            row_id,
            item_id: "y1q9".to_string(),
            target_price,
            target_rarity: 0,
        }
    }

    fn min(row_id: RowId, price: i64) -> ItemMinimum {
        ItemMinimum {
            row_id,
            item_id: "y1q9".to_string(),
            price,
        }
    }

    #[test]
    fn rarity_edits_are_visible_immediately() {
        let store = ItemStore::new();
        store.add_item(item(1, 0));
        assert_eq!(store.rarity(1), Some(0));
        assert!(store.set_target_rarity(1, 4));
        assert_eq!(store.rarity(1), Some(4));
        assert!(!store.set_target_rarity(99, 4));
    }

    #[test]
    fn removed_row_has_no_rarity() {
        let store = ItemStore::new();
        store.add_item(item(1, 0));
        assert!(store.remove_item(1).is_some());
        assert!(store.rarity(1).is_none());
    }

    #[test]
    fn cycle_minima_produce_target_hits() {
        let store = ItemStore::new();
        store.add_items(vec![item(1, 1000), item(2, 1000), item(3, 0)]);

        let hits = store.apply_cycle_minima(&[min(1, 900), min(2, 1100), min(3, 5), min(42, 1)]);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row_id, 1);
        assert_eq!(store.latest_min(2), Some(1100));
        assert_eq!(store.latest_min(42), None, "unknown rows are ignored");
    }

    #[test]
    fn snapshot_is_ordered_by_row_id() {
        let store = ItemStore::new();
        store.add_items(vec![item(3, 0), item(1, 0), item(2, 0)]);
        let ids: Vec<_> = store.snapshot().iter().map(|i| i.row_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
