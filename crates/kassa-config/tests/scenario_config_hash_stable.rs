//! scenario_config_hash_stable
//!
//! The config hash depends on the merged content only, not on key order in
//! the source documents, and unused keys are surfaced.

use kassa_config::{load_layered_yaml_from_strings, report_unused_keys, UnusedKeyPolicy};

#[test]
fn key_order_does_not_change_hash() {
    let a = "workday:\n  work_start_hour: 6\n  work_end_hour: 4\naudit:\n  hash_chain: true\n";
    let b = "audit:\n  hash_chain: true\nworkday:\n  work_end_hour: 4\n  work_start_hour: 6\n";
    let ha = load_layered_yaml_from_strings(&[a]).unwrap().config_hash;
    let hb = load_layered_yaml_from_strings(&[b]).unwrap().config_hash;
    assert_eq!(ha, hb);
}

#[test]
fn overlay_changes_hash() {
    let base = "workday:\n  work_start_hour: 6\n";
    let overlay = "workday:\n  work_start_hour: 7\n";
    let h1 = load_layered_yaml_from_strings(&[base]).unwrap().config_hash;
    let h2 = load_layered_yaml_from_strings(&[base, overlay]).unwrap().config_hash;
    assert_ne!(h1, h2);
}

#[test]
fn unused_keys_warn_lists_them() {
    let loaded = load_layered_yaml_from_strings(&[
        "workday:\n  work_start_hour: 6\nlegacy:\n  report_page_size: 50\n",
    ])
    .unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(report.unused_leaf_pointers, vec!["/legacy/report_page_size".to_string()]);
}

#[test]
fn unused_keys_fail_policy_errors() {
    let loaded = load_layered_yaml_from_strings(&["legacy:\n  x: 1\n"]).unwrap();
    let err = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err()
        .to_string();
    assert!(err.contains("CONFIG_UNUSED_KEYS"), "{err}");
}

#[test]
fn clean_config_has_no_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[
        "daemon:\n  addr: \"0.0.0.0:8899\"\nsources:\n  pos:\n    enabled: false\n",
    ])
    .unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean());
}

#[test]
fn shipped_base_config_is_clean_and_valid() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/base.yaml");
    let path = path.to_string_lossy().to_string();
    let loaded = kassa_config::load_layered_yaml(&[path.as_str()]).unwrap();

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean());

    let cfg = loaded.settings().unwrap();
    assert_eq!(cfg.daemon.addr, "127.0.0.1:8899");
    assert_eq!(cfg.daemon.directory_cache_secs, 30);
    assert!(!cfg.sources.marketplace.enabled);
    assert_eq!(cfg.audit.jsonl_path.as_deref(), Some("var/audit/audit.jsonl"));
}
