use std::collections::BTreeMap;

use chrono::NaiveDate;
use httpmock::prelude::*;
use kassa_config::{GatewaySettings, WorkDay};
use kassa_schemas::{ItemKind, SourceKind, Terminal};
use kassa_sources::*;
use serde_json::json;

fn request(terminal: &[(&str, &str)], organization: &[(&str, &str)]) -> SourceRequest {
    let date = NaiveDate::from_ymd_opt(2026, 4, 2).unwrap();
    let keys = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    };
    SourceRequest {
        terminal: Terminal {
            id: "T1".into(),
            organization_id: "O1".into(),
            name: "Main".into(),
            pos_group_id: None,
            timezone: None,
        },
        credentials: Credentials {
            terminal: keys(terminal),
            organization: keys(organization),
        },
        date,
        window: BusinessWindow::for_day(&WorkDay::default(), None, date, None).unwrap(),
    }
}

fn settings(base_url: String) -> GatewaySettings {
    GatewaySettings {
        enabled: true,
        base_url,
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn scenario_card_gateway_returns_single_income_item() {
    let server = MockServer::start_async().await;
    let report = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/reports/merchant-7")
                .header("authorization", "Bearer org-token")
                .query_param("from", "2026-04-02T06:00:00")
                .query_param("to", "2026-04-03T04:00:00");
            then.status(200).json_body(json!({"total": 2_000_000}));
        })
        .await;

    let adapter = BearerReportAdapter::card_gateway(&settings(server.base_url())).unwrap();
    let out = adapter
        .fetch(&request(
            &[("payme_terminal_id", "merchant-7")],
            &[("payme_token", "org-token")],
        ))
        .await
        .unwrap();

    report.assert_async().await;
    assert_eq!(out.items.len(), 1);
    let item = &out.items[0];
    assert_eq!((item.kind, item.amount, item.readonly), (ItemKind::Income, 2_000_000, true));
    assert_eq!(item.source, SourceKind::CardGateway.as_str());
}

#[tokio::test]
async fn scenario_courier_report_itemizes_withdraws() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/reports/courier-3");
            then.status(200).json_body(json!({
                "total": 500_000,
                "withdraws": [
                    {"name": "Courier A", "amount": 120_000},
                    {"name": "Courier B", "amount": 30_000}
                ]
            }));
        })
        .await;

    let adapter = BearerReportAdapter::courier(&settings(server.base_url())).unwrap();
    let out = adapter
        .fetch(&request(
            &[("arryt_terminal_id", "courier-3")],
            &[("arryt_token", "tok")],
        ))
        .await
        .unwrap();

    let withdraws: Vec<_> = out
        .items
        .iter()
        .filter(|i| i.kind == ItemKind::Withdraw)
        .map(|i| (i.label.as_str(), i.amount))
        .collect();
    assert_eq!(withdraws, vec![("Courier A", 120_000), ("Courier B", 30_000)]);
    assert_eq!(out.items[0].kind, ItemKind::Income);
    assert_eq!(out.items[0].amount, 500_000);
}

#[tokio::test]
async fn scenario_bearer_rejected_token_and_missing_credentials() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/reports/merchant-7");
            then.status(401);
        })
        .await;
    let adapter = BearerReportAdapter::card_gateway(&settings(server.base_url())).unwrap();

    let err = adapter
        .fetch(&request(&[("payme_terminal_id", "merchant-7")], &[("payme_token", "stale")]))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Auth(_)), "{err}");

    let err = adapter
        .fetch(&request(&[("payme_terminal_id", "merchant-7")], &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Config(ref m) if m.contains("payme_token")), "{err}");
}

#[tokio::test]
async fn scenario_bearer_malformed_body_is_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/reports/merchant-7");
            then.status(200).json_body(json!({"sum": 5}));
        })
        .await;
    let adapter = BearerReportAdapter::card_gateway(&settings(server.base_url())).unwrap();
    let err = adapter
        .fetch(&request(&[("payme_terminal_id", "merchant-7")], &[("payme_token", "t")]))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Decode(_)), "{err}");
}
