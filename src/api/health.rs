//! Shared health state for the /health endpoint.
//! Updated by the scan orchestrator, page tasks and the fetch client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Shared health metrics. Updated by scanner components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// True while a scan cycle is draining.
    pub cycle_running: AtomicBool,
    pub cycles_completed: AtomicU64,
    /// Unix seconds of the last completed cycle (0 = none).
    pub last_cycle_at: AtomicU64,
    pub pages_fetched: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub rate_limit_hits: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub cycle_running: bool,
    pub cycles_completed: u64,
    pub last_cycle_at: u64,
    pub pages_fetched: u64,
    pub fetch_errors: u64,
    pub rate_limit_hits: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cycle_running(&self, v: bool) {
        self.cycle_running.store(v, Ordering::Relaxed);
    }

    pub fn record_cycle_complete(&self, at_secs: u64, pages: u64) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_at.store(at_secs, Ordering::Relaxed);
        self.pages_fetched.fetch_add(pages, Ordering::Relaxed);
    }

    pub fn inc_fetch_errors(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rate_limit_hits(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            cycle_running: self.cycle_running(),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            last_cycle_at: self.last_cycle_at.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
        }
    }
}
