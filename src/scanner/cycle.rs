use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::types::{CycleReport, ItemMinimum, RowId};

/// Shared state of one scan cycle. Created by the orchestrator, handed to every
/// page task by `Arc`, and dropped once the last task has finished and the
/// report has been taken.
pub struct ScanCycleState {
    cycle_id: u64,
    token: String,
    started_at: Instant,
    /// row_id -> lowest qualifying buyout seen so far this cycle.
    minima: DashMap<RowId, ItemMinimum>,
    in_flight: AtomicUsize,
    pages_fetched: AtomicU64,
    failed_chains: AtomicU64,
    drained: Notify,
}

impl ScanCycleState {
    pub fn new(cycle_id: u64, token: &str) -> Arc<Self> {
        Arc::new(Self {
            cycle_id,
            token: token.to_string(),
            started_at: Instant::now(),
            minima: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            pages_fetched: AtomicU64::new(0),
            failed_chains: AtomicU64::new(0),
            drained: Notify::new(),
        })
    }

    pub fn cycle_id(&self) -> u64 {
        self.cycle_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Count a task as in flight. Must be called before the task is spawned; the
    /// returned guard gives the count back when dropped, on every exit path.
    pub fn register_task(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            cycle: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn task_finished(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            // notify_one stores a permit, so a waiter that arrives late still wakes.
            self.drained.notify_one();
        }
    }

    /// Resolves once the in-flight count has reached zero.
    pub async fn wait_drained(&self) {
        while self.in_flight() > 0 {
            self.drained.notified().await;
        }
    }

    /// Merge a page minimum. The stored value only ever decreases.
    pub fn record_minimum(&self, row_id: RowId, item_id: &str, price: i64) {
        self.minima
            .entry(row_id)
            .and_modify(|m| {
                if price < m.price {
                    m.price = price;
                }
            })
            .or_insert_with(|| ItemMinimum {
                row_id,
                item_id: item_id.to_string(),
                price,
            });
    }

    #[cfg(test)]
    pub fn minimum(&self, row_id: RowId) -> Option<i64> {
        self.minima.get(&row_id).map(|m| m.price)
    }

    pub fn record_page(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_chain(&self) {
        self.failed_chains.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain the minima into a report, ordered by row id.
    pub fn take_report(&self) -> CycleReport {
        let mut minima: Vec<ItemMinimum> = self.minima.iter().map(|e| e.value().clone()).collect();
        self.minima.clear();
        minima.sort_by_key(|m| m.row_id);

        CycleReport {
            cycle_id: self.cycle_id,
            minima,
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            failed_chains: self.failed_chains.load(Ordering::Relaxed),
            elapsed: self.started_at.elapsed(),
        }
    }
}

/// One unit of the in-flight count. Dropping it (task returned, failed, panicked
/// or was aborted) decrements the count exactly once.
pub struct InFlightGuard {
    cycle: Arc<ScanCycleState>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.cycle.task_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn minimum_never_increases() {
        let cycle = ScanCycleState::new(1, "tok");
        cycle.record_minimum(7, "y1q9", 500);
        cycle.record_minimum(7, "y1q9", 800);
        assert_eq!(cycle.minimum(7), Some(500));
        cycle.record_minimum(7, "y1q9", 300);
        assert_eq!(cycle.minimum(7), Some(300));
    }

    #[test]
    fn rows_sharing_an_item_id_are_independent() {
        let cycle = ScanCycleState::new(1, "tok");
        cycle.record_minimum(1, "y1q9", 500);
        cycle.record_minimum(2, "y1q9", 900);
        let report = cycle.take_report();
        assert_eq!(report.minima.len(), 2);
        assert_eq!(report.minima[0].price, 500);
        assert_eq!(report.minima[1].price, 900);
        assert!(cycle.minimum(1).is_none(), "report takes the minima");
    }

    #[test]
    fn guards_track_in_flight_count() {
        let cycle = ScanCycleState::new(1, "tok");
        let a = cycle.register_task();
        let b = cycle.register_task();
        assert_eq!(cycle.in_flight(), 2);
        drop(a);
        assert_eq!(cycle.in_flight(), 1);
        drop(b);
        assert_eq!(cycle.in_flight(), 0);
    }

    #[tokio::test]
    async fn wait_drained_wakes_when_last_guard_drops() {
        let cycle = ScanCycleState::new(1, "tok");
        let guard = cycle.register_task();

        let waiter = {
            let cycle = Arc::clone(&cycle);
            tokio::spawn(async move { cycle.wait_drained().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn aborted_task_still_releases_its_count() {
        let cycle = ScanCycleState::new(1, "tok");
        let guard = cycle.register_task();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        handle.abort();
        let _ = handle.await;
        assert_eq!(cycle.in_flight(), 0);
    }
}
