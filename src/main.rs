mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod history_pager;
mod scanner;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY};
use crate::db::{HistoryStore, Settings, TrackedItemRepo};
use crate::error::Result;
use crate::fetcher::{AuctionApi, AuctionClient};
use crate::scanner::{
    ScanContext, ScanOrchestrator, ScanScheduler, ScanTrigger, SchedulerControl, StackDeduplicator,
};
use crate::state::ItemStore;
use crate::types::{rarity_name, CycleReport, ProfitableStack, ScanEvent};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    let repo = TrackedItemRepo::new(pool.clone());
    let settings = Settings::new(pool.clone());
    let history = HistoryStore::new(pool.clone());

    // --- In-memory item store ---
    let items = ItemStore::new();
    items.add_items(repo.list().await?);
    info!("Loaded {} tracked items", items.item_count());

    if cfg.auth_token.is_none() && settings.resolve_token(None).await?.is_none() {
        warn!("No auth token set (AUCTION_TOKEN or config key `token`); scans will be skipped until one is configured");
    }

    // --- Shared metrics ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());

    // --- Scan engine ---
    let client = AuctionClient::new(&cfg.api_url, Arc::clone(&health), Arc::clone(&latency))?;
    let api: Arc<dyn AuctionApi> = Arc::new(client);

    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let limiter = match cfg.scan_max_concurrency {
        0 => None,
        n => Some(Arc::new(Semaphore::new(n))),
    };
    let ctx = ScanContext {
        api: Arc::clone(&api),
        items: Arc::clone(&items),
        dedup: Arc::new(StackDeduplicator::new()),
        events: event_tx,
        health: Arc::clone(&health),
        limiter,
    };
    let orchestrator = ScanOrchestrator::new(ctx, cfg.stack_dedup_scope);
    let trigger = ScanTrigger::new(
        orchestrator,
        Arc::clone(&items),
        settings.clone(),
        cfg.auth_token.clone(),
    );

    // --- Spawn tasks ---

    // Periodic scan scheduler
    let interval_secs = settings.resolve_interval(cfg.scan_interval_secs).await?;
    let scheduler_control = SchedulerControl::new(Duration::from_secs(interval_secs));
    let scheduler = ScanScheduler::new(trigger.clone(), &scheduler_control);
    tokio::spawn(async move { scheduler.run().await });

    // Scan event consumer: notifications + latest minima
    let consumer_items = Arc::clone(&items);
    tokio::spawn(async move {
        scan_consumer(event_rx, consumer_items).await;
    });

    // HTTP API server
    let api_state = ApiState {
        repo,
        items,
        history,
        settings,
        trigger,
        scheduler: scheduler_control,
        health,
        latency,
        api,
        env_token: cfg.auth_token.clone(),
        pagers: Arc::new(DashMap::new()),
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Single owner of everything that follows from scan results: stack
/// notifications, per-row latest minima and target-price hits.
async fn scan_consumer(mut rx: mpsc::Receiver<ScanEvent>, items: Arc<ItemStore>) {
    while let Some(event) = rx.recv().await {
        match event {
            ScanEvent::ProfitableStack(stack) => log_profitable_stack(&stack),
            ScanEvent::FetchError { item_id, offset, message } => {
                warn!(event = "FETCH_ERROR", item_id = %item_id, offset, "chain stopped: {message}");
            }
            ScanEvent::CycleComplete(report) => apply_cycle_report(&items, &report),
        }
    }
}

fn log_profitable_stack(s: &ProfitableStack) {
    info!(
        event = "PROFITABLE_STACK",
        item_id = %s.item_id,
        amount = s.amount,
        unit_price = s.unit_price,
        profit = s.profit(),
        page = s.page(),
        "STACK | {} x{} for {} ({} each, target {}) | profit: {} | page {}",
        s.item_id, s.amount, s.buyout_price, s.unit_price, s.target_price, s.profit(), s.page(),
    );
}

fn apply_cycle_report(items: &ItemStore, report: &CycleReport) {
    for hit in items.apply_cycle_minima(&report.minima) {
        let rarity = items
            .rarity(hit.row_id)
            .map(rarity_name)
            .unwrap_or_else(|| "?".to_string());
        info!(
            event = "TARGET_HIT",
            row_id = hit.row_id,
            item_id = %hit.item_id,
            price = hit.price,
            target = hit.target_price,
            "TARGET HIT | {} [{}] listed at {} (target {})",
            hit.item_id, rarity, hit.price, hit.target_price,
        );
    }
    if report.failed_chains > 0 {
        warn!(
            cycle_id = report.cycle_id,
            failed_chains = report.failed_chains,
            "Cycle finished with failed chains; their minima may be partial"
        );
    }
}
