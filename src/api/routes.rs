use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::LatencyStats;
use crate::config::{clamp_interval, config_keys};
use crate::db::{HistoryStore, Settings, TrackedItemRepo};
use crate::error::AppError;
use crate::fetcher::AuctionApi;
use crate::history_pager::HistoryPager;
use crate::scanner::{CycleStart, ScanTrigger, SchedulerControl};
use crate::state::ItemStore;
use crate::types::{rarity_name, PriceHistoryRecord, RowId};

#[derive(Clone)]
pub struct ApiState {
    pub repo: TrackedItemRepo,
    pub items: Arc<ItemStore>,
    pub history: HistoryStore,
    pub settings: Settings,
    pub trigger: ScanTrigger,
    pub scheduler: SchedulerControl,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub api: Arc<dyn AuctionApi>,
    pub env_token: Option<String>,
    /// One "load more" pager per item id, kept across requests.
    pub pagers: Arc<DashMap<String, Arc<Mutex<HistoryPager>>>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/items", get(list_items).post(add_item))
        .route("/items/:row_id", delete(remove_item).patch(update_item))
        .route("/scan", post(trigger_scan))
        .route("/scheduler", get(get_scheduler))
        .route("/scheduler/pause", post(pause_scheduler))
        .route("/scheduler/resume", post(resume_scheduler))
        .route("/notifications/clear", post(clear_notifications))
        .route("/config/:key", get(get_config).put(set_config))
        .route("/history/:item_id", get(get_history).delete(delete_history))
        .route("/history/:item_id/next", post(next_history_page))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / query structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub item_id: String,
    pub target_price: Option<i64>,
    pub target_rarity: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpdateItemRequest {
    pub target_price: Option<i64>,
    pub target_rarity: Option<i64>,
}

#[derive(Deserialize)]
pub struct SetConfigRequest {
    pub value: String,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub quality: Option<i64>,
}

#[derive(Deserialize)]
pub struct NextPageQuery {
    pub quality: Option<i64>,
    /// Start again from the newest sale instead of continuing.
    #[serde(default)]
    pub reset: bool,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ItemResponse {
    pub row_id: RowId,
    pub item_id: String,
    pub target_price: i64,
    pub target_rarity: i64,
    pub rarity_name: String,
    /// Minimum from the last completed cycle, if any.
    pub latest_min: Option<i64>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub counters: HealthSnapshot,
    pub cycle_active: bool,
    pub seen_stacks: usize,
    pub scheduler: SchedulerResponse,
}

#[derive(Serialize)]
pub struct SchedulerResponse {
    pub interval_secs: u64,
    pub paused: bool,
}

#[derive(Serialize)]
pub struct HistoryRecordResponse {
    #[serde(flatten)]
    pub record: PriceHistoryRecord,
    pub unit_price: i64,
}

impl From<PriceHistoryRecord> for HistoryRecordResponse {
    fn from(record: PriceHistoryRecord) -> Self {
        Self {
            unit_price: record.unit_price(),
            record,
        }
    }
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

#[derive(Serialize)]
pub struct ScanResponse {
    pub status: &'static str,
    pub cycle_id: u64,
    pub scheduled: Option<usize>,
    pub in_flight: Option<usize>,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Serialize)]
pub struct DeletedResponse {
    pub removed: u64,
}

#[derive(Serialize)]
pub struct HistoryPageResponse {
    pub item_id: String,
    pub offset: usize,
    pub exhausted: bool,
    pub loaded: usize,
    pub records: Vec<HistoryRecordResponse>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let orchestrator = state.trigger.orchestrator();
    Json(HealthResponse {
        counters: state.health.snapshot(),
        cycle_active: orchestrator.is_running(),
        seen_stacks: orchestrator.seen_stacks(),
        scheduler: scheduler_response(&state.scheduler),
    })
}

fn scheduler_response(control: &SchedulerControl) -> SchedulerResponse {
    let s = control.settings();
    SchedulerResponse {
        interval_secs: s.interval.as_secs(),
        paused: s.paused,
    }
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50, p95, p99) = state.latency.percentiles();
    let ms = |us: Option<u64>| us.map(|v| v as f64 / 1000.0);
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms: ms(p50),
        p95_ms: ms(p95),
        p99_ms: ms(p99),
    })
}

async fn list_items(State(state): State<ApiState>) -> Json<Vec<ItemResponse>> {
    let items = state
        .items
        .snapshot()
        .into_iter()
        .map(|i| ItemResponse {
            latest_min: state.items.latest_min(i.row_id),
            rarity_name: rarity_name(i.target_rarity),
            row_id: i.row_id,
            item_id: i.item_id,
            target_price: i.target_price,
            target_rarity: i.target_rarity,
        })
        .collect();
    Json(items)
}

async fn add_item(
    State(state): State<ApiState>,
    Json(req): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<ItemResponse>), AppError> {
    let item = state
        .repo
        .add(
            &req.item_id,
            req.target_price.unwrap_or(0),
            req.target_rarity.unwrap_or(0),
        )
        .await?;
    state.items.add_item(item.clone());

    Ok((
        StatusCode::CREATED,
        Json(ItemResponse {
            rarity_name: rarity_name(item.target_rarity),
            latest_min: None,
            row_id: item.row_id,
            item_id: item.item_id,
            target_price: item.target_price,
            target_rarity: item.target_rarity,
        }),
    ))
}

async fn remove_item(
    State(state): State<ApiState>,
    Path(row_id): Path<RowId>,
) -> Result<StatusCode, AppError> {
    if !state.repo.remove(row_id).await? {
        return Err(AppError::NotFound(format!("tracked row {row_id}")));
    }
    state.items.remove_item(row_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn update_item(
    State(state): State<ApiState>,
    Path(row_id): Path<RowId>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<ItemResponse>, AppError> {
    state
        .repo
        .update_targets(row_id, req.target_price, req.target_rarity)
        .await?;
    if let Some(price) = req.target_price {
        state.items.set_target_price(row_id, price);
    }
    if let Some(rarity) = req.target_rarity {
        state.items.set_target_rarity(row_id, rarity);
    }

    let item = state
        .items
        .get(row_id)
        .ok_or_else(|| AppError::NotFound(format!("tracked row {row_id}")))?;
    Ok(Json(ItemResponse {
        latest_min: state.items.latest_min(row_id),
        rarity_name: rarity_name(item.target_rarity),
        row_id: item.row_id,
        item_id: item.item_id,
        target_price: item.target_price,
        target_rarity: item.target_rarity,
    }))
}

async fn trigger_scan(
    State(state): State<ApiState>,
) -> Result<(StatusCode, Json<ScanResponse>), AppError> {
    let resp = match state.trigger.trigger().await? {
        CycleStart::Started { cycle_id, scheduled } => (
            StatusCode::ACCEPTED,
            Json(ScanResponse {
                status: "started",
                cycle_id,
                scheduled: Some(scheduled),
                in_flight: None,
            }),
        ),
        CycleStart::Skipped { cycle_id, in_flight } => (
            StatusCode::CONFLICT,
            Json(ScanResponse {
                status: "skipped",
                cycle_id,
                scheduled: None,
                in_flight: Some(in_flight),
            }),
        ),
    };
    Ok(resp)
}

async fn get_scheduler(State(state): State<ApiState>) -> Json<SchedulerResponse> {
    Json(scheduler_response(&state.scheduler))
}

async fn pause_scheduler(State(state): State<ApiState>) -> Json<SchedulerResponse> {
    state.scheduler.pause();
    Json(scheduler_response(&state.scheduler))
}

async fn resume_scheduler(State(state): State<ApiState>) -> Json<SchedulerResponse> {
    state.scheduler.resume();
    Json(scheduler_response(&state.scheduler))
}

async fn clear_notifications(State(state): State<ApiState>) -> StatusCode {
    state.trigger.orchestrator().clear_notifications();
    StatusCode::NO_CONTENT
}

async fn get_config(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<Json<ConfigResponse>, AppError> {
    let value = state.settings.get(&key).await?;
    Ok(Json(ConfigResponse { key, value }))
}

async fn set_config(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(req): Json<SetConfigRequest>,
) -> Result<StatusCode, AppError> {
    if key == config_keys::INTERVAL {
        // Stored clamped; the running scheduler picks it up at once.
        let secs = req.value.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("interval must be whole seconds, got {:?}", req.value))
        })?;
        let secs = clamp_interval(secs);
        state.settings.set(&key, &secs.to_string()).await?;
        state.scheduler.set_interval(Duration::from_secs(secs));
        return Ok(StatusCode::NO_CONTENT);
    }
    state.settings.set(&key, &req.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_history(
    State(state): State<ApiState>,
    Path(item_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryRecordResponse>>, AppError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let rows = state.history.read_history(&item_id, limit, params.quality).await?;
    Ok(Json(rows.into_iter().map(HistoryRecordResponse::from).collect()))
}

async fn delete_history(
    State(state): State<ApiState>,
    Path(item_id): Path<String>,
) -> Result<Json<DeletedResponse>, AppError> {
    let removed = state.history.delete_history(&item_id).await?;
    state.pagers.remove(&item_id);
    Ok(Json(DeletedResponse { removed }))
}

async fn next_history_page(
    State(state): State<ApiState>,
    Path(item_id): Path<String>,
    Query(params): Query<NextPageQuery>,
) -> Result<Json<HistoryPageResponse>, AppError> {
    let token = state
        .settings
        .resolve_token(state.env_token.as_deref())
        .await?
        .ok_or(AppError::MissingAuthToken)?;

    let pager = state
        .pagers
        .entry(item_id.clone())
        .or_insert_with(|| {
            Arc::new(Mutex::new(HistoryPager::new(
                Arc::clone(&state.api),
                state.history.clone(),
                item_id.clone(),
            )))
        })
        .clone();

    let mut pager = pager.lock().await;
    if params.reset {
        pager.reset();
    }
    let loaded = pager.load_more(&token).await?.len();

    Ok(Json(HistoryPageResponse {
        item_id,
        offset: pager.offset(),
        exhausted: pager.is_exhausted(),
        loaded,
        records: pager
            .filtered(params.quality)
            .into_iter()
            .map(HistoryRecordResponse::from)
            .collect(),
    }))
}
