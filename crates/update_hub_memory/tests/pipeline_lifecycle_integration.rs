//! Full-pipeline lifecycle: submission through watchdog registration, the
//! ordering invariant over status history, submit idempotency, listing and
//! stats.

mod support;

use serde_json::json;
use update_hub_core::canonical;
use update_hub_core::codes;
use update_hub_core::types::{ListFilter, RiskLevel, UpdateKind, UpdateStatus};

use support::{config_descriptor, default_hub, descriptor, SETTLE};

/// The canonical stage order every successful run must walk, in full.
const CANONICAL_ORDER: [UpdateStatus; 9] = [
    UpdateStatus::Submitted,
    UpdateStatus::GovernanceChecked,
    UpdateStatus::Signed,
    UpdateStatus::LoggedProposed,
    UpdateStatus::Validated,
    UpdateStatus::Packaged,
    UpdateStatus::Distributed,
    UpdateStatus::LoggedComplete,
    UpdateStatus::Watched,
];

#[tokio::test]
async fn low_risk_config_update_reaches_watched() {
    let hub = default_hub();
    let payload = json!({"max_connections": 50});
    let id = hub
        .pipeline
        .submit(config_descriptor(payload.clone(), &["api-gateway"]))
        .await
        .unwrap();

    let view = hub.pipeline.await_settled(id, SETTLE).await.unwrap();
    assert_eq!(view.status, UpdateStatus::Watched);

    // Checksum law: package checksum is the hash of the payload, nothing else.
    let package = view.package.expect("packaged");
    assert_eq!(package.checksum, canonical::payload_checksum(&payload));
    assert_eq!(package.checksum, view.payload_checksum);

    // Every stage committed, in order.
    let observed: Vec<UpdateStatus> = view.status_history.iter().map(|e| e.status).collect();
    assert_eq!(observed, CANONICAL_ORDER.to_vec());

    // Audit trail: proposal before completion, sequence numbers ascending.
    assert_eq!(view.audit_sequence_numbers.len(), 2);
    assert!(view.audit_sequence_numbers[0] < view.audit_sequence_numbers[1]);
    let events = hub.audit.events_for(id).await;
    assert_eq!(events[0].event_type, codes::EVENT_PROPOSED);
    assert_eq!(events[1].event_type, codes::EVENT_DISTRIBUTED);
    assert!(hub.audit.verify_chain().await);

    // Distributed exactly once, on the kind topic.
    let published = hub.bus.published_on("update.config").await;
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].payload["update_id"],
        json!(id.to_string()),
    );

    // Watchdog holds the registration.
    assert!(hub.watchdog.registered(id).await);

    // Independent verification passes against persisted state alone.
    assert!(hub.pipeline.verify_package(id).await.unwrap());
}

#[tokio::test]
async fn status_history_timestamps_are_monotonic() {
    let hub = default_hub();
    let id = hub
        .pipeline
        .submit(config_descriptor(json!({"retries": 3}), &["worker"]))
        .await
        .unwrap();
    let view = hub.pipeline.await_settled(id, SETTLE).await.unwrap();

    for window in view.status_history.windows(2) {
        assert!(window[0].at <= window[1].at);
    }
}

#[tokio::test]
async fn every_kind_flows_end_to_end() {
    let hub = default_hub();
    let cases = vec![
        descriptor(
            UpdateKind::Schema,
            json!({"current": null, "proposed": {"orders": {"columns": ["id"]}}}),
            &["orders-db"],
            RiskLevel::Low,
        ),
        descriptor(
            UpdateKind::CodeModule,
            json!({"scoring/rank.py": "def rank(x):\n    return x\n"}),
            &["scorer"],
            RiskLevel::Medium,
        ),
        descriptor(
            UpdateKind::Playbook,
            json!({"name": "restart-cache", "steps": [{"action": "flush"}]}),
            &["cache-runner"],
            RiskLevel::Low,
        ),
        descriptor(
            UpdateKind::MetricDefinition,
            json!({"name": "p99_latency", "expression": "quantile(0.99, latency)"}),
            &["metrics-store"],
            RiskLevel::Medium,
        ),
    ];

    for case in cases {
        let kind = case.kind;
        let id = hub.pipeline.submit(case).await.unwrap();
        let view = hub.pipeline.await_settled(id, SETTLE).await.unwrap();
        assert_eq!(view.status, UpdateStatus::Watched, "kind {kind} failed");
        assert_eq!(hub.bus.published_on(kind.topic()).await.len(), 1);
    }
}

#[tokio::test]
async fn resubmitting_identical_payload_returns_existing_update() {
    let hub = default_hub();
    let payload = json!({"feature_flags": {"dark_mode": true}});

    let first = hub
        .pipeline
        .submit(config_descriptor(payload.clone(), &["api"]))
        .await
        .unwrap();
    hub.pipeline.await_settled(first, SETTLE).await.unwrap();

    let second = hub
        .pipeline
        .submit(config_descriptor(payload.clone(), &["api"]))
        .await
        .unwrap();
    assert_eq!(first, second, "live records dedupe by content");

    // Same payload under a different kind is a different update.
    let other_kind = hub
        .pipeline
        .submit(descriptor(
            UpdateKind::MetricDefinition,
            json!({"name": "x", "expression": "1"}),
            &["m"],
            RiskLevel::Low,
        ))
        .await
        .unwrap();
    assert_ne!(first, other_kind);
}

#[tokio::test]
async fn submit_rejects_malformed_descriptors() {
    let hub = default_hub();

    let mut no_targets = config_descriptor(json!({"k": 1}), &[]);
    no_targets.component_targets.clear();
    assert!(hub.pipeline.submit(no_targets).await.is_err());

    let mut anonymous = config_descriptor(json!({"k": 1}), &["t"]);
    anonymous.created_by = "  ".into();
    assert!(hub.pipeline.submit(anonymous).await.is_err());

    let null_payload = config_descriptor(json!(null), &["t"]);
    assert!(hub.pipeline.submit(null_payload).await.is_err());
}

#[tokio::test]
async fn list_filters_by_kind_and_status_with_pagination() {
    let hub = default_hub();
    for i in 0..3 {
        let id = hub
            .pipeline
            .submit(config_descriptor(json!({"n": i}), &["api"]))
            .await
            .unwrap();
        hub.pipeline.await_settled(id, SETTLE).await.unwrap();
    }
    let schema_id = hub
        .pipeline
        .submit(descriptor(
            UpdateKind::Schema,
            json!({"proposed": {"t": {}}}),
            &["db"],
            RiskLevel::Low,
        ))
        .await
        .unwrap();
    hub.pipeline.await_settled(schema_id, SETTLE).await.unwrap();

    let configs = hub
        .pipeline
        .list_updates(&ListFilter {
            kind: Some(UpdateKind::Config),
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(configs.len(), 3);

    let watched = hub
        .pipeline
        .list_updates(&ListFilter {
            status: Some(UpdateStatus::Watched),
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(watched.len(), 4);

    let page = hub
        .pipeline
        .list_updates(&ListFilter {
            limit: 2,
            offset: 2,
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn stats_counts_by_kind_and_status() {
    let hub = default_hub();
    let ok = hub
        .pipeline
        .submit(config_descriptor(json!({"a": 1}), &["api"]))
        .await
        .unwrap();
    hub.pipeline.await_settled(ok, SETTLE).await.unwrap();

    // An update that fails validation settles as Rejected.
    let bad = hub
        .pipeline
        .submit(descriptor(
            UpdateKind::Playbook,
            json!({"name": "", "steps": []}),
            &["runner"],
            RiskLevel::Low,
        ))
        .await
        .unwrap();
    hub.pipeline.await_settled(bad, SETTLE).await.unwrap();

    let stats = hub.pipeline.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_kind["config"], 1);
    assert_eq!(stats.by_kind["playbook"], 1);
    assert_eq!(stats.by_status["watched"], 1);
    assert_eq!(stats.by_status["rejected"], 1);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn concurrent_updates_proceed_independently() {
    let hub = default_hub();
    let mut ids = Vec::new();
    for i in 0..8 {
        let id = hub
            .pipeline
            .submit(config_descriptor(json!({"n": i}), &["api"]))
            .await
            .unwrap();
        ids.push(id);
    }

    for id in ids {
        let view = hub.pipeline.await_settled(id, SETTLE).await.unwrap();
        assert_eq!(view.status, UpdateStatus::Watched);
        let observed: Vec<UpdateStatus> = view.status_history.iter().map(|e| e.status).collect();
        assert_eq!(observed, CANONICAL_ORDER.to_vec());
    }

    assert!(hub.audit.verify_chain().await, "global audit order intact");
}
