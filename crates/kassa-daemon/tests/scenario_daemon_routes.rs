//! In-process scenario tests for kassa-daemon HTTP endpoints.
//!
//! The router is driven via `tower::ServiceExt::oneshot` over an in-memory
//! ledger and scripted sources; no socket and no upstream system.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use kassa_config::WorkDay;
use kassa_daemon::{
    engine::{Engine, StaticWorkDay},
    routes::{self, ACTOR_HEADER},
    state::{self, BusMsg},
};
use kassa_schemas::SourceKind;
use kassa_sources::SourceAdapter;
use kassa_testkit::*;
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_router(adapters: &[Arc<ScriptedAdapter>]) -> axum::Router {
    routes::build_router(make_state(adapters))
}

fn make_state(adapters: &[Arc<ScriptedAdapter>]) -> Arc<state::AppState> {
    let (ledger, _store) = in_memory_ledger();
    let engine = Engine::new(
        aggregator_over(adapters),
        ledger,
        Arc::new(StaticWorkDay(WorkDay::default())),
    );
    let sources = adapters.iter().map(|a| a.kind().as_str().to_string()).collect();
    Arc::new(state::AppState::new(engine, "memory", sources))
}

async fn call(router: &axum::Router, req: Request<axum::body::Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("body is not valid JSON")
    };
    (status, json)
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post(uri: &str, actor: &str, body: Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(ACTOR_HEADER, actor)
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

const REPORT_URI: &str = "/v1/reports/T1/2026-04-02";

fn report_ref() -> Value {
    json!({"terminal_id": TERMINAL_ID, "date": "2026-04-02"})
}

fn with_ref(extra: Value) -> Value {
    let mut body = report_ref();
    if let (Some(obj), Some(more)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in more {
            obj.insert(k.clone(), v.clone());
        }
    }
    body
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_lists_store_and_sources() {
    let router = make_router(&reference_day_adapters());
    let (status, json) = call(&router, get("/v1/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "kassa-daemon");
    assert_eq!(json["store"], "memory");
    assert_eq!(json["sources"].as_array().map(|a| a.len()), Some(5));
    assert_eq!(json["sources"][0], SourceKind::Pos.as_str());
}

// ---------------------------------------------------------------------------
// Reference day over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reference_day_balances_submits_and_confirms() {
    let adapters = reference_day_adapters();
    let router = make_router(&adapters);

    let (status, report) = call(&router, get(REPORT_URI)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "draft");
    assert_eq!(report["pos_total"], 10_000_000);
    assert_eq!(report["total_income"], 6_500_000);
    assert_eq!(report["balance"], 3_500_000);
    assert_eq!(report["is_editable"], true);
    assert_eq!(report["source_errors"], json!([]));

    let (status, added) = call(
        &router,
        post(
            "/v1/reports/items/add",
            "cashier",
            with_ref(json!({"type": "income", "label": "Cash", "amount": 3_500_000})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(added["item_id"].is_string());
    assert_eq!(added["report"]["balance"], 0);

    let (status, submitted) = call(&router, post("/v1/reports/submit", "cashier", report_ref())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["status"], "checking");
    assert_eq!(submitted["difference"], 0);
    assert_eq!(submitted["total_manager_price"], 3_500_000);
    assert_eq!(submitted["arryt_income"], 500_000);

    let (status, reviewed) = call(
        &router,
        post("/v1/reports/review", "manager", with_ref(json!({"decision": "confirm"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviewed["status"], "confirmed");
    assert_eq!(reviewed["is_editable"], false);

    // Confirmed ledgers are served as stored.
    let (status, again) = call(&router, get(REPORT_URI)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "confirmed");
    assert!(adapters.iter().all(|a| a.calls() == 1));

    let (status, err) = call(
        &router,
        post(
            "/v1/reports/items/add",
            "cashier",
            with_ref(json!({"type": "expense", "label": "Late", "amount": 1})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "NOT_EDITABLE");

    let (status, editable) = call(
        &router,
        get("/v1/reports/is_editable?terminal_id=T1&date=2026-04-02"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(editable["is_editable"], false);

    let (status, history) = call(&router, get(&format!("{REPORT_URI}/history"))).await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"item_added"));
    assert_eq!(actions.iter().rev().take(2).copied().collect::<Vec<_>>(), vec!["reviewed", "submitted"]);
    let added_entry = history
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["action"] == "item_added")
        .unwrap();
    assert_eq!(added_entry["actor"], "cashier");
}

#[tokio::test]
async fn unchanged_refetch_publishes_no_second_change() {
    let st = make_state(&reference_day_adapters());
    let mut rx = st.bus.subscribe();
    let router = routes::build_router(Arc::clone(&st));

    for _ in 0..2 {
        let (status, _) = call(&router, get(REPORT_URI)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let mut changed = 0;
    while let Ok(msg) = rx.try_recv() {
        if matches!(msg, BusMsg::ReportChanged { .. }) {
            changed += 1;
        }
    }
    assert_eq!(changed, 1);
}

// ---------------------------------------------------------------------------
// Shortfall confirmation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shortfall_needs_force_confirm() {
    let router = make_router(&reference_day_adapters());
    let (status, _) = call(&router, get(REPORT_URI)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, err) = call(&router, post("/v1/reports/submit", "cashier", report_ref())).await;
    assert_eq!(status, StatusCode::PRECONDITION_REQUIRED);
    assert_eq!(err["code"], "REQUIRES_CONFIRMATION");
    assert_eq!(err["balance"], 3_500_000);

    let (status, editable) = call(
        &router,
        get("/v1/reports/is_editable?terminal_id=T1&date=2026-04-02"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(editable["is_editable"], true);

    let (status, submitted) = call(
        &router,
        post("/v1/reports/submit", "cashier", with_ref(json!({"force_confirm": true}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["status"], "checking");
    assert_eq!(submitted["difference"], 3_500_000);

    let (status, reopened) = call(&router, post("/v1/reports/reopen", "manager", report_ref())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reopened["status"], "draft");
}

#[tokio::test]
async fn submit_with_only_incomes_keeps_stored_expenses() {
    let router = make_router(&reference_day_adapters());
    let (status, _) = call(&router, get(REPORT_URI)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &router,
        post(
            "/v1/reports/items/add",
            "cashier",
            with_ref(json!({"type": "expense", "label": "taxi", "amount": 60})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, submitted) = call(
        &router,
        post(
            "/v1/reports/submit",
            "cashier",
            with_ref(json!({"incomes": [{"label": "cash", "amount": 40}], "forceConfirm": true})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["status"], "checking");

    let (status, expenses) = call(&router, post("/v1/reports/editable-expenses", "cashier", report_ref())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(expenses["editable"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(expenses["editable"][0]["label"], "taxi");
    assert_eq!(expenses["editable"][0]["amount"], 60);
}

// ---------------------------------------------------------------------------
// Editable splits and item edits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn editable_splits_separate_readonly_rows() {
    let adapters = vec![
        Arc::new(ScriptedAdapter::pos(1_000_000, &["shift-1"])),
        Arc::new(ScriptedAdapter::income(SourceKind::CardGateway, 400_000)),
        Arc::new(ScriptedAdapter::courier(100_000, &[("Courier A", 50_000)])),
    ];
    let router = make_router(&adapters);

    // No ledger yet: the split fetches one.
    let (status, incomes) = call(&router, post("/v1/reports/editable-incomes", "cashier", report_ref())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(incomes["readonly"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(incomes["editable"], json!([]));

    let (_, added) = call(
        &router,
        post(
            "/v1/reports/items/add",
            "cashier",
            with_ref(json!({"type": "expense", "label": "Bread", "amount": 12_000})),
        ),
    )
    .await;
    let item_id = added["item_id"].as_str().unwrap().to_string();

    let (status, expenses) = call(&router, post("/v1/reports/editable-expenses", "cashier", report_ref())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(expenses["readonly"][0]["kind"], "withdraw");
    assert_eq!(expenses["readonly"][0]["amount"], 50_000);
    assert_eq!(expenses["editable"][0]["label"], "Bread");

    let (status, updated) = call(
        &router,
        post(
            "/v1/reports/items/update",
            "cashier",
            with_ref(json!({"item_id": item_id, "amount": 15_000})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["total_expenses"], 65_000);

    let readonly_id = incomes["readonly"][0]["id"].as_str().unwrap().to_string();
    let (status, err) = call(
        &router,
        post(
            "/v1/reports/items/remove",
            "cashier",
            with_ref(json!({"item_id": readonly_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], "FORBIDDEN");

    let (status, removed) = call(
        &router,
        post("/v1/reports/items/remove", "cashier", with_ref(json!({"item_id": item_id}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed["total_expenses"], 50_000);
}

// ---------------------------------------------------------------------------
// Request errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_cutoff_and_unknown_terminal_are_rejected() {
    let adapters = reference_day_adapters();
    let router = make_router(&adapters);

    let (status, err) = call(&router, get(&format!("{REPORT_URI}?cutoff=25h"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "BAD_REQUEST");

    let (status, err) = call(&router, get("/v1/reports/NOPE/2026-04-02")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "NOT_FOUND");
    assert!(adapters.iter().all(|a| a.calls() == 0));

    // No ledger yet is still editable, and asking does not create one.
    let (status, editable) = call(
        &router,
        get("/v1/reports/is_editable?terminal_id=T1&date=2026-04-02"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(editable["is_editable"], true);

    let (status, err) = call(&router, post("/v1/reports/submit", "cashier", report_ref())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "NOT_FOUND");
}

#[tokio::test]
async fn cutoff_narrows_the_window() {
    let router = make_router(&reference_day_adapters());
    let (status, report) = call(&router, get(&format!("{REPORT_URI}?cutoff=14:30"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["pos_total"], 10_000_000);
}
