use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::config::StackDedupScope;
use crate::error::{AppError, Result};
use crate::scanner::cycle::ScanCycleState;
use crate::scanner::page_task::{spawn_registered, PageTask, ScanContext};
use crate::types::{ScanEvent, TrackedItem};

/// Result of asking for a new cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStart {
    Started { cycle_id: u64, scheduled: usize },
    /// The previous cycle has not finished yet; nothing was scheduled.
    Skipped { cycle_id: u64, in_flight: usize },
}

/// Runs scan cycles one at a time: fans out one page task per tracked row, then
/// waits for every pagination chain to end and emits the cycle's minima.
pub struct ScanOrchestrator {
    ctx: Arc<ScanContext>,
    dedup_scope: StackDedupScope,
    next_cycle_id: AtomicU64,
    /// The cycle currently draining. Cleared only after its report is sent.
    active: Mutex<Option<Arc<ScanCycleState>>>,
}

impl ScanOrchestrator {
    pub fn new(ctx: ScanContext, dedup_scope: StackDedupScope) -> Arc<Self> {
        Arc::new(Self {
            ctx: Arc::new(ctx),
            dedup_scope,
            next_cycle_id: AtomicU64::new(1),
            active: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Stack tokens currently suppressing repeat notifications.
    pub fn seen_stacks(&self) -> usize {
        self.ctx.dedup.len()
    }

    /// Explicit clear of the stack deduplicator (user dismissed notifications).
    pub fn clear_notifications(&self) {
        self.ctx.dedup.clear();
    }

    /// Start a cycle over `items`. A missing token is rejected here, before any
    /// work is scheduled. Must be called from within a tokio runtime.
    pub fn start_cycle(self: &Arc<Self>, items: &[TrackedItem], token: &str) -> Result<CycleStart> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::MissingAuthToken);
        }

        let mut active = self
            .active
            .lock()
            .map_err(|_| AppError::Config("scan state lock poisoned".to_string()))?;
        if let Some(running) = active.as_ref() {
            return Ok(CycleStart::Skipped {
                cycle_id: running.cycle_id(),
                in_flight: running.in_flight(),
            });
        }

        let tasks: Vec<PageTask> = items
            .iter()
            .filter(|i| !i.item_id.trim().is_empty())
            .map(|i| PageTask {
                row_id: i.row_id,
                item_id: i.item_id.clone(),
                target_price: i.target_price,
                offset: 0,
            })
            .collect();

        if self.dedup_scope == StackDedupScope::Cycle || tasks.is_empty() {
            self.ctx.dedup.clear();
        }

        let cycle_id = self.next_cycle_id.fetch_add(1, Ordering::Relaxed);
        let cycle = ScanCycleState::new(cycle_id, token);
        *active = Some(Arc::clone(&cycle));
        drop(active);
        self.ctx.health.set_cycle_running(true);

        // Count every initial task before spawning any, so a fast first task
        // cannot drive the count to zero while the rest are still being scheduled.
        let registered: Vec<_> = tasks.into_iter().map(|t| (cycle.register_task(), t)).collect();
        let scheduled = registered.len();
        for (guard, task) in registered {
            spawn_registered(Arc::clone(&self.ctx), Arc::clone(&cycle), guard, task);
        }
        info!(cycle_id, scheduled, "Scan cycle started");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            cycle.wait_drained().await;
            this.finish_cycle(&cycle).await;
        });

        Ok(CycleStart::Started { cycle_id, scheduled })
    }

    async fn finish_cycle(&self, cycle: &ScanCycleState) {
        let report = cycle.take_report();
        info!(
            cycle_id = report.cycle_id,
            items = report.minima.len(),
            pages = report.pages_fetched,
            failed_chains = report.failed_chains,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Scan cycle complete"
        );

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.ctx.health.record_cycle_complete(now, report.pages_fetched);

        if self.ctx.events.send(ScanEvent::CycleComplete(report)).await.is_err() {
            debug!("scan event consumer gone, dropping cycle report");
        }

        match self.active.lock() {
            Ok(mut active) => *active = None,
            Err(_) => warn!("scan state lock poisoned while finishing cycle"),
        }
        self.ctx.health.set_cycle_running(false);
    }
}
