//! Axum router and all HTTP handlers for kassa-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Tests compose the bare router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use futures_util::{Stream, StreamExt};
use kassa_ledger::LedgerError;
use kassa_schemas::{ItemKind, ReportKey};
use kassa_sources::SourceError;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        AddItemRequest, AddItemResponse, ErrorResponse, HealthResponse, IsEditableResponse, ItemSplitResponse,
        RemoveItemRequest, ReportQuery, ReportRef, ReviewRequest, SubmitRequest, UpdateItemRequest,
    },
    engine::{EngineError, ReportView},
    state::{AppState, BusMsg},
};

/// Header carrying the acting user; authentication happens upstream.
pub const ACTOR_HEADER: &str = "x-kassa-user";
const ANONYMOUS: &str = "anonymous";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/reports/is_editable", get(is_editable))
        .route("/v1/reports/editable-incomes", post(editable_incomes))
        .route("/v1/reports/editable-expenses", post(editable_expenses))
        .route("/v1/reports/items/add", post(add_item))
        .route("/v1/reports/items/update", post(update_item))
        .route("/v1/reports/items/remove", post(remove_item))
        .route("/v1/reports/submit", post(submit))
        .route("/v1/reports/review", post(review))
        .route("/v1/reports/reopen", post(reopen))
        .route("/v1/reports/:terminal_id/:date", get(fetch_report))
        .route("/v1/reports/:terminal_id/:date/history", get(history))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Option<i64>) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            ApiError::Engine(EngineError::Ledger(e)) => {
                let status = match e {
                    LedgerError::NotEditable { .. } | LedgerError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    LedgerError::RequiresConfirmation { .. } => StatusCode::PRECONDITION_REQUIRED,
                    LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
                    LedgerError::NotFound(_) | LedgerError::ItemNotFound(_) => StatusCode::NOT_FOUND,
                    LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let balance = match e {
                    LedgerError::RequiresConfirmation { balance } => Some(*balance),
                    _ => None,
                };
                (status, e.code(), balance)
            }
            ApiError::Engine(EngineError::Source(e)) => match e {
                SourceError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
                SourceError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", None),
                _ => (StatusCode::SERVICE_UNAVAILABLE, "DIRECTORY_UNAVAILABLE", None),
            },
            ApiError::Engine(EngineError::Settings(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SETTINGS_UNAVAILABLE", None)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, balance) = self.parts();
        let error = match &self {
            ApiError::Engine(e) => e.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
        };
        if status.is_server_error() {
            warn!(code, error = %error, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
                balance,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

fn parse_cutoff(raw: Option<&str>) -> ApiResult<Option<NaiveTime>> {
    raw.map(|s| {
        NaiveTime::parse_from_str(s, "%H:%M")
            .map_err(|_| ApiError::BadRequest(format!("cutoff '{s}' is not HH:MM")))
    })
    .transpose()
}

fn publish_changed(st: &AppState, view: &ReportView, actor: &str) {
    st.publish(BusMsg::report_changed(view, actor));
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            store: st.build.store.to_string(),
            sources: st.sources.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/reports/:terminal_id/:date
// ---------------------------------------------------------------------------

pub(crate) async fn fetch_report(
    State(st): State<Arc<AppState>>,
    Path((terminal_id, date)): Path<(String, NaiveDate)>,
    Query(q): Query<ReportQuery>,
) -> ApiResult<Json<ReportView>> {
    let cutoff = parse_cutoff(q.cutoff.as_deref())?;
    let (view, changed) = st.engine.fetch_report(&terminal_id, date, cutoff).await?;
    if !view.source_errors.is_empty() {
        let failed: Vec<_> = view.source_errors.iter().map(|f| f.source.as_str()).collect();
        st.publish(BusMsg::LogLine {
            level: "WARN".to_string(),
            msg: format!("{terminal_id}@{date}: sources unavailable: {}", failed.join(", ")),
        });
    }
    if changed {
        publish_changed(&st, &view, kassa_ledger::SYSTEM_ACTOR);
    }
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// POST /v1/reports/editable-incomes  /editable-expenses
// ---------------------------------------------------------------------------

async fn current_or_fetched(st: &AppState, r: &ReportRef) -> ApiResult<ReportView> {
    match st.engine.view(&r.key()).await {
        Ok(view) => Ok(view),
        Err(EngineError::Ledger(LedgerError::NotFound(_))) => {
            let (view, changed) = st.engine.fetch_report(&r.terminal_id, r.date, None).await?;
            if changed {
                publish_changed(st, &view, kassa_ledger::SYSTEM_ACTOR);
            }
            Ok(view)
        }
        Err(e) => Err(e.into()),
    }
}

fn split(view: &ReportView, kinds: &[ItemKind]) -> ItemSplitResponse {
    let (readonly, editable): (Vec<_>, Vec<_>) = view
        .report
        .items
        .iter()
        .filter(|i| kinds.contains(&i.kind))
        .cloned()
        .partition(|i| i.readonly);
    ItemSplitResponse { readonly, editable }
}

pub(crate) async fn editable_incomes(
    State(st): State<Arc<AppState>>,
    Json(r): Json<ReportRef>,
) -> ApiResult<Json<ItemSplitResponse>> {
    let view = current_or_fetched(&st, &r).await?;
    Ok(Json(split(&view, &[ItemKind::Income])))
}

pub(crate) async fn editable_expenses(
    State(st): State<Arc<AppState>>,
    Json(r): Json<ReportRef>,
) -> ApiResult<Json<ItemSplitResponse>> {
    let view = current_or_fetched(&st, &r).await?;
    Ok(Json(split(&view, &[ItemKind::Expense, ItemKind::Withdraw])))
}

// ---------------------------------------------------------------------------
// POST /v1/reports/items/*
// ---------------------------------------------------------------------------

pub(crate) async fn add_item(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AddItemRequest>,
) -> ApiResult<Json<AddItemResponse>> {
    let actor = actor(&headers);
    let key = ReportKey::new(req.terminal_id.clone(), req.date);
    let (view, item_id) = st.engine.add_item(&key, &req.draft(), &actor).await?;
    publish_changed(&st, &view, &actor);
    let report = serde_json::to_value(&view)
        .map_err(|e| ApiError::Engine(EngineError::Ledger(LedgerError::Store(e.to_string()))))?;
    Ok(Json(AddItemResponse { item_id, report }))
}

pub(crate) async fn update_item(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<UpdateItemRequest>,
) -> ApiResult<Json<ReportView>> {
    let actor = actor(&headers);
    let key = ReportKey::new(req.terminal_id.clone(), req.date);
    let view = st.engine.update_item(&key, req.item_id, &req.patch(), &actor).await?;
    publish_changed(&st, &view, &actor);
    Ok(Json(view))
}

pub(crate) async fn remove_item(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RemoveItemRequest>,
) -> ApiResult<Json<ReportView>> {
    let actor = actor(&headers);
    let key = ReportKey::new(req.terminal_id.clone(), req.date);
    let view = st.engine.remove_item(&key, req.item_id, &actor).await?;
    publish_changed(&st, &view, &actor);
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// POST /v1/reports/submit  /review  /reopen
// ---------------------------------------------------------------------------

pub(crate) async fn submit(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<Json<ReportView>> {
    let actor = actor(&headers);
    let key = ReportKey::new(req.terminal_id.clone(), req.date);
    let view = st.engine.submit(&key, &req.input(), &actor).await?;
    info!(terminal_id = %key.terminal_id, date = %key.date, actor = %actor, "submit accepted");
    publish_changed(&st, &view, &actor);
    Ok(Json(view))
}

pub(crate) async fn review(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<Json<ReportView>> {
    let actor = actor(&headers);
    let key = ReportKey::new(req.terminal_id.clone(), req.date);
    let view = st.engine.review(&key, req.decision, &actor).await?;
    publish_changed(&st, &view, &actor);
    Ok(Json(view))
}

pub(crate) async fn reopen(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(r): Json<ReportRef>,
) -> ApiResult<Json<ReportView>> {
    let actor = actor(&headers);
    let view = st.engine.reopen(&r.key(), &actor).await?;
    publish_changed(&st, &view, &actor);
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// GET /v1/reports/is_editable  /:terminal_id/:date/history
// ---------------------------------------------------------------------------

pub(crate) async fn is_editable(
    State(st): State<Arc<AppState>>,
    Query(r): Query<ReportRef>,
) -> ApiResult<Json<IsEditableResponse>> {
    let is_editable = st.engine.is_editable(&r.key()).await?;
    Ok(Json(IsEditableResponse { is_editable }))
}

pub(crate) async fn history(
    State(st): State<Arc<AppState>>,
    Path((terminal_id, date)): Path<(String, NaiveDate)>,
) -> ApiResult<Json<Vec<kassa_audit::AuditEntry>>> {
    let entries = st.engine.history(&ReportKey::new(terminal_id, date)).await?;
    Ok(Json(entries))
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::ReportChanged { .. } => "report_changed",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
