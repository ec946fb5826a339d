use std::sync::Arc;

use chrono::NaiveDate;
use kassa_audit::{verify_entries, VerifyResult};
use kassa_ledger::*;
use kassa_schemas::{ItemKind, ReportKey};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_concurrent_adds_on_one_key_all_land_in_one_chain() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let svc = Arc::new(LedgerService::new(store.clone()));
    let key = ReportKey::new("T1", NaiveDate::from_ymd_opt(2026, 4, 2).unwrap());
    svc.get_or_create(&key).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..32i64 {
        let svc = svc.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            svc.add_editable(&key, &EditableDraft::new(ItemKind::Income, "cash", n), "alice")
                .await
                .unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let day = svc.get(&key).await.unwrap();
    assert_eq!(day.items.len(), 32);
    assert_eq!(day.total_income(), (0..32).sum::<i64>());

    let history = svc.history(&key).await.unwrap();
    assert_eq!(history.len(), 32);
    assert_eq!(verify_entries(&history).unwrap(), VerifyResult::Valid { entries: 32 });
}

#[tokio::test]
async fn scenario_different_days_are_independent() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let svc = LedgerService::new(store.clone());
    let d1 = ReportKey::new("T1", NaiveDate::from_ymd_opt(2026, 4, 2).unwrap());
    let d2 = ReportKey::new("T1", NaiveDate::from_ymd_opt(2026, 4, 3).unwrap());

    svc.get_or_create(&d1).await.unwrap();
    svc.get_or_create(&d2).await.unwrap();
    svc.submit(&d1, &SubmitInput::default(), "alice").await.unwrap();

    assert_eq!(store.len(), 2);
    assert!(svc.get(&d2).await.unwrap().status.is_mutable());
    assert!(svc.history(&d2).await.unwrap().is_empty());
}
