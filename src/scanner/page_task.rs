use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::config::PAGE_LIMIT;
use crate::fetcher::AuctionApi;
use crate::scanner::cycle::{InFlightGuard, ScanCycleState};
use crate::scanner::dedup::StackDeduplicator;
use crate::state::ItemStore;
use crate::types::{Lot, ProfitableStack, RowId, ScanEvent};

/// Everything a page task needs besides its own cycle. Shared by all cycles.
pub struct ScanContext {
    pub api: Arc<dyn AuctionApi>,
    pub items: Arc<ItemStore>,
    pub dedup: Arc<StackDeduplicator>,
    pub events: mpsc::Sender<ScanEvent>,
    pub health: Arc<HealthState>,
    /// Caps simultaneously running page fetches. None = unbounded.
    pub limiter: Option<Arc<Semaphore>>,
}

/// One page of one tracked row's pagination chain.
#[derive(Debug, Clone)]
pub struct PageTask {
    pub row_id: RowId,
    pub item_id: String,
    /// 0 = stack detection off.
    pub target_price: i64,
    pub offset: usize,
}

/// What one page contributed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub minimum: Option<i64>,
    pub stacks: Vec<ProfitableStack>,
}

/// Filter a page to the tracked tier and pull out its minimum and profitable stacks.
///
/// Lots with a non-positive buyout or another quality tier are ignored entirely.
/// A stack is profitable when `buyout / amount` (floored) is at or below a non-zero target.
pub fn evaluate_page(
    item_id: &str,
    lots: &[Lot],
    offset: usize,
    rarity: i64,
    target_price: i64,
) -> PageOutcome {
    let mut outcome = PageOutcome::default();

    for (index, lot) in lots.iter().enumerate() {
        if lot.buyout_price <= 0 || lot.quality() != rarity {
            continue;
        }

        outcome.minimum = Some(match outcome.minimum {
            Some(m) => m.min(lot.buyout_price),
            None => lot.buyout_price,
        });

        if lot.amount > 1 && target_price > 0 {
            let unit_price = lot.buyout_price / lot.amount;
            if unit_price <= target_price {
                outcome.stacks.push(ProfitableStack {
                    item_id: item_id.to_string(),
                    buyout_price: lot.buyout_price,
                    amount: lot.amount,
                    unit_price,
                    position: offset + index,
                    target_price,
                    start_time: lot.start_time.clone(),
                    end_time: lot.end_time.clone(),
                });
            }
        }
    }

    outcome
}

/// Count `task` against the cycle and spawn it.
pub fn spawn_page_task(ctx: Arc<ScanContext>, cycle: Arc<ScanCycleState>, task: PageTask) {
    let guard = cycle.register_task();
    spawn_registered(ctx, cycle, guard, task);
}

/// Spawn a task whose in-flight unit was already taken by the caller.
pub fn spawn_registered(
    ctx: Arc<ScanContext>,
    cycle: Arc<ScanCycleState>,
    guard: InFlightGuard,
    task: PageTask,
) {
    tokio::spawn(async move {
        let _guard = guard;
        run_page_task(ctx, cycle, task).await;
    });
}

// Boxed so the spawned future type does not depend on itself through the
// continuation spawn.
fn run_page_task(
    ctx: Arc<ScanContext>,
    cycle: Arc<ScanCycleState>,
    task: PageTask,
) -> BoxFuture<'static, ()> {
    async move {
        let _permit = match &ctx.limiter {
            Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
            None => None,
        };

        // Read the tier now, not at cycle start: the user may have changed it.
        let Some(rarity) = ctx.items.rarity(task.row_id) else {
            debug!(row_id = task.row_id, item_id = %task.item_id, "row removed mid-cycle, dropping page");
            return;
        };

        let page = match ctx
            .api
            .fetch_lots_page(&task.item_id, cycle.token(), task.offset, PAGE_LIMIT)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                cycle.record_failed_chain();
                ctx.health.inc_fetch_errors();
                warn!(item_id = %task.item_id, offset = task.offset, "Lot fetch failed: {e}");
                let _ = ctx
                    .events
                    .send(ScanEvent::FetchError {
                        item_id: task.item_id.clone(),
                        offset: task.offset,
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };
        cycle.record_page();

        let outcome = evaluate_page(&task.item_id, &page.lots, task.offset, rarity, task.target_price);

        if let Some(min) = outcome.minimum {
            cycle.record_minimum(task.row_id, &task.item_id, min);
        }

        // Take the continuation's in-flight unit while this task still holds its own.
        if page.has_more {
            spawn_page_task(
                Arc::clone(&ctx),
                Arc::clone(&cycle),
                PageTask {
                    offset: task.offset + PAGE_LIMIT,
                    ..task.clone()
                },
            );
        }

        for stack in outcome.stacks {
            if !ctx.dedup.should_notify(stack.token()) {
                continue;
            }
            info!(
                item_id = %stack.item_id,
                amount = stack.amount,
                unit_price = stack.unit_price,
                position = stack.position,
                "Profitable stack found"
            );
            let _ = ctx.events.send(ScanEvent::ProfitableStack(stack)).await;
        }
    }
    .boxed()
}
