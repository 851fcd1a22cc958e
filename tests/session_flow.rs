use hawkeye::state::{FileKvStore, FallbackStore, Position};
use hawkeye::{Backends, ExecutionContext, GatingReason, HawkeyeConfig, OverlayStateRecord, Session, StoreBackend};

fn config_for(dir: &std::path::Path) -> HawkeyeConfig {
    let json = r#"{
        "enabled": true,
        "domains": {"prod.example.com": false, "example.com": true},
        "urlPatterns": ["/g/*"],
        "pms": {
            "enabled": true,
            "domain": "pms.example.com",
            "branches": {"master": false, "release/*": true}
        },
        "storage": {"debounceMs": 20}
    }"#;
    let mut config = HawkeyeConfig::from_json(json).unwrap();
    config.storage.data_dir = Some(dir.to_path_buf());
    config
}

#[tokio::test]
async fn test_gate_outcomes_from_json_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());

    let cases = [
        ("https://prod.example.com/g/x", None),
        ("https://qa.example.com/other", None),
        ("https://pms.example.com/g/p/files/master/index.html", None),
        ("https://pms.example.com/g/p/files/release%2F1.2/index.html", Some(GatingReason::Allowed)),
        ("http://prod.example.com:8080/anything", Some(GatingReason::Allowed)),
    ];

    for (url, expected) in cases {
        let ctx = ExecutionContext::from_url(url).unwrap();
        let session = Session::start(&config, &ctx, Backends::filesystem(&config.storage))
            .await
            .unwrap();
        assert_eq!(session.as_ref().map(|s| s.decision().reason), expected, "url {url}");
        if let Some(session) = session {
            session.shutdown().await;
        }
    }
}

#[tokio::test]
async fn test_state_persists_across_sessions_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let ctx = ExecutionContext::from_url("https://pms.example.com/g/p/files/release%2F1/a.html").unwrap();

    let session = Session::start(&config, &ctx, Backends::filesystem(&config.storage))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.store().backend().await, StoreBackend::Primary);

    let record = OverlayStateRecord {
        position: Position::new(-3.0, 7.5),
        scale: 0.8,
        opacity: 0.9,
        is_hidden: true,
        image_base64: Some("data:image/png;base64,iVBORw0KGgo=".to_string()),
        original_width: 800.0,
        original_height: 600.0,
        ..OverlayStateRecord::default()
    };
    session.store().save(record.clone()).await.unwrap();
    session.shutdown().await;

    let restored = Session::start(&config, &ctx, Backends::filesystem(&config.storage))
        .await
        .unwrap()
        .unwrap();
    let state = restored.restored_state().cloned().unwrap();
    assert_eq!(state.position, record.position);
    assert_eq!(state.image_base64, record.image_base64);
    assert!(state.is_hidden);
    assert!(state.timestamp > 0);

    restored.store().clear().await.unwrap();
    assert_eq!(restored.store().get().await, None);
    restored.shutdown().await;
}

#[tokio::test]
async fn test_fallback_record_is_restored_and_resynced() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let ctx = ExecutionContext::from_url("https://qa.example.com/g/page.html").unwrap();

    // Left behind by an earlier run whose primary was unavailable
    let fallback = FileKvStore::new(dir.path().join("fallback"));
    let stored = serde_json::json!({
        "position": {"x": 1, "y": 2},
        "scale": 1.0,
        "opacity": 0.5,
        "isLocked": false,
        "isInverted": false,
        "isHidden": false,
        "timestamp": 99
    });
    fallback.set_item("hawkeye_/g/page.html", &stored.to_string()).unwrap();

    let session = Session::start(&config, &ctx, Backends::filesystem(&config.storage))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.restored_state().map(|r| r.timestamp), Some(99));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let collection = std::fs::read_to_string(dir.path().join("hawkeyeDB").join("states.json")).unwrap();
    assert!(collection.contains("hawkeye_/g/page.html"));
    session.shutdown().await;
}
