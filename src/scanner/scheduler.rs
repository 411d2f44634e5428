use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::db::settings::Settings;
use crate::error::{AppError, Result};
use crate::scanner::orchestrator::{CycleStart, ScanOrchestrator};
use crate::state::ItemStore;

/// Starts cycles on demand: resolves the token, snapshots the tracked rows and
/// hands them to the orchestrator. Shared by the periodic scheduler and the API.
#[derive(Clone)]
pub struct ScanTrigger {
    orchestrator: Arc<ScanOrchestrator>,
    items: Arc<ItemStore>,
    settings: Settings,
    env_token: Option<String>,
}

impl ScanTrigger {
    pub fn new(
        orchestrator: Arc<ScanOrchestrator>,
        items: Arc<ItemStore>,
        settings: Settings,
        env_token: Option<String>,
    ) -> Self {
        Self { orchestrator, items, settings, env_token }
    }

    pub fn orchestrator(&self) -> &Arc<ScanOrchestrator> {
        &self.orchestrator
    }

    pub async fn trigger(&self) -> Result<CycleStart> {
        let token = self
            .settings
            .resolve_token(self.env_token.as_deref())
            .await?
            .ok_or(AppError::MissingAuthToken)?;
        self.orchestrator.start_cycle(&self.items.snapshot(), &token)
    }
}

/// Live scheduler settings. Changes take effect without a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub paused: bool,
}

/// Handle used by the API to retime, pause and resume the periodic scan.
#[derive(Clone)]
pub struct SchedulerControl {
    tx: Arc<watch::Sender<SchedulerSettings>>,
}

impl SchedulerControl {
    pub fn new(interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(SchedulerSettings { interval, paused: false });
        Self { tx: Arc::new(tx) }
    }

    pub fn settings(&self) -> SchedulerSettings {
        *self.tx.borrow()
    }

    /// Restart the timer with a new period. The next tick comes one full period from now.
    pub fn set_interval(&self, interval: Duration) {
        self.tx.send_modify(|s| s.interval = interval);
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    /// Resume periodic scanning. The first tick after a resume fires immediately.
    pub fn resume(&self) {
        self.set_paused(false);
    }

    fn set_paused(&self, paused: bool) {
        self.tx.send_if_modified(|s| {
            if s.paused == paused {
                return false;
            }
            s.paused = paused;
            true
        });
    }

    fn subscribe(&self) -> watch::Receiver<SchedulerSettings> {
        self.tx.subscribe()
    }
}

/// Fires a scan cycle every interval, starting immediately. Ticks that land
/// while the previous cycle is still draining are skipped. Interval changes
/// and pause/resume arrive over the control channel.
pub struct ScanScheduler {
    trigger: ScanTrigger,
    control: watch::Receiver<SchedulerSettings>,
}

impl ScanScheduler {
    pub fn new(trigger: ScanTrigger, control: &SchedulerControl) -> Self {
        Self {
            trigger,
            control: control.subscribe(),
        }
    }

    pub async fn run(self) {
        let ScanScheduler { trigger, mut control } = self;
        let mut current = *control.borrow_and_update();
        let mut fire_now = true;

        loop {
            if current.paused {
                info!("Periodic scanning paused");
                if control.changed().await.is_err() {
                    return;
                }
                current = *control.borrow_and_update();
                fire_now = true;
                continue;
            }

            let first = if fire_now {
                Instant::now()
            } else {
                Instant::now() + current.interval
            };
            let mut ticker = interval_at(first, current.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Scan scheduler running every {}s", current.interval.as_secs());

            loop {
                tokio::select! {
                    _ = ticker.tick() => fire(&trigger).await,
                    changed = control.changed() => {
                        if changed.is_err() {
                            debug!("scheduler control dropped, stopping");
                            return;
                        }
                        current = *control.borrow_and_update();
                        fire_now = false;
                        break;
                    }
                }
            }
        }
    }
}

async fn fire(trigger: &ScanTrigger) {
    match trigger.trigger().await {
        Ok(CycleStart::Started { cycle_id, scheduled }) => {
            debug!(cycle_id, scheduled, "scheduled tick started a cycle");
        }
        Ok(CycleStart::Skipped { cycle_id, in_flight }) => {
            info!(cycle_id, in_flight, "Previous cycle still draining, skipping tick");
        }
        Err(AppError::MissingAuthToken) => {
            warn!("No auth token configured (AUCTION_TOKEN or config key `token`), skipping tick");
        }
        Err(e) => error!("Scan tick failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::health::HealthState;
    use crate::config::{config_keys, StackDedupScope};
    use crate::db::memory_pool;
    use crate::fetcher::AuctionApi;
    use crate::scanner::page_task::ScanContext;
    use crate::scanner::StackDeduplicator;
    use crate::types::{HistoryEntry, LotsPage, TrackedItem};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct CountingAuction {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuctionApi for CountingAuction {
        async fn fetch_lots_page(&self, _: &str, _: &str, _: usize, _: usize) -> Result<LotsPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LotsPage::default())
        }

        async fn fetch_history_page(&self, _: &str, _: &str, _: usize, _: usize) -> Result<Vec<HistoryEntry>> {
            Ok(Vec::new())
        }
    }

    /// Spawns a scheduler over one tracked row; every cycle is one lots fetch.
    async fn spawn_scheduler(interval: Duration) -> (SchedulerControl, Arc<CountingAuction>) {
        let api = Arc::new(CountingAuction::default());
        let items = ItemStore::new();
        items.add_item(TrackedItem {
            row_id: 1,
            item_id: "y1q9".to_string(),
            target_price: 0,
            target_rarity: 0,
        });
        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let ctx = ScanContext {
            api: Arc::clone(&api) as Arc<dyn AuctionApi>,
            items: Arc::clone(&items),
            dedup: Arc::new(StackDeduplicator::new()),
            events: tx,
            health: Arc::new(HealthState::new()),
            limiter: None,
        };
        let settings = Settings::new(memory_pool().await);
        settings.set(config_keys::TOKEN, "tok").await.unwrap();
        let orchestrator = ScanOrchestrator::new(ctx, StackDedupScope::Session);
        let trigger = ScanTrigger::new(orchestrator, items, settings, None);

        let control = SchedulerControl::new(interval);
        let scheduler = ScanScheduler::new(trigger, &control);
        tokio::spawn(async move { scheduler.run().await });
        (control, api)
    }

    fn calls(api: &CountingAuction) -> usize {
        api.calls.load(Ordering::SeqCst)
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test]
    async fn pause_stops_ticks_and_resume_fires_at_once() {
        let (control, api) = spawn_scheduler(Duration::from_millis(50)).await;

        sleep_ms(30).await;
        assert_eq!(calls(&api), 1, "first tick is immediate");
        sleep_ms(200).await;
        assert!(calls(&api) >= 3);

        control.pause();
        assert!(control.settings().paused);
        sleep_ms(40).await;
        let frozen = calls(&api);
        sleep_ms(200).await;
        assert_eq!(calls(&api), frozen, "no ticks while paused");

        control.resume();
        sleep_ms(30).await;
        assert_eq!(calls(&api), frozen + 1, "resume fires immediately");
    }

    #[tokio::test]
    async fn interval_change_takes_effect_while_running() {
        let (control, api) = spawn_scheduler(Duration::from_secs(3600)).await;

        sleep_ms(30).await;
        assert_eq!(calls(&api), 1);
        sleep_ms(150).await;
        assert_eq!(calls(&api), 1, "next tick is an hour away");

        control.set_interval(Duration::from_millis(40));
        sleep_ms(250).await;
        assert!(calls(&api) >= 3, "shorter interval applied, got {}", calls(&api));

        control.set_interval(Duration::from_secs(3600));
        sleep_ms(40).await;
        let settled = calls(&api);
        sleep_ms(150).await;
        assert_eq!(calls(&api), settled);
        assert_eq!(control.settings().interval, Duration::from_secs(3600));
    }
}
