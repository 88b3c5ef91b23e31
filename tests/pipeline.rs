//! End-to-end pipeline tests: authentication through audit, detection,
//! and incident escalation.

use aegis_core::{
    AlertStatus, AlertType, AuditQuery, AuditTrail, ClearanceLevel, EventType, FileAuditStore,
    IncidentStatus, MemoryAuditStore, MemoryRbacResolver, SecurityConfig, SecurityEvent,
    SecurityManager, Severity, StaticCredentialVerifier, VerifiedIdentity,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn identity(actor: &str, clearance: ClearanceLevel) -> VerifiedIdentity {
    VerifiedIdentity {
        actor_id: actor.to_string(),
        capabilities: BTreeSet::new(),
        clearance_level: clearance,
    }
}

async fn build_manager(config: SecurityConfig) -> SecurityManager {
    let verifier = StaticCredentialVerifier::new().with_identity(
        "alice:correct-horse-battery",
        identity("alice", ClearanceLevel::Confidential),
    );
    let rbac = MemoryRbacResolver::new()
        .grant("alice", "read")
        .with_clearance("alice", ClearanceLevel::Confidential);

    SecurityManager::new(
        config,
        Arc::new(MemoryAuditStore::new()),
        Arc::new(verifier),
        Arc::new(rbac),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn failed_login_storm_escalates_to_incident() {
    // Generous rate limit so every failed attempt reaches the verifier
    let config = SecurityConfig {
        rate_limit_max_per_minute: 100,
        ..Default::default()
    };
    let mgr = build_manager(config).await;

    // Four failures: no alert yet
    for _ in 0..4 {
        let _ = mgr
            .authenticate("eve:wrong-password", "6.6.6.6", "firefox")
            .await;
    }
    assert!(mgr.alerts().list_alerts(None, None).await.is_empty());

    // Fifth failure crosses the threshold at medium severity
    let _ = mgr
        .authenticate("eve:wrong-password", "6.6.6.6", "firefox")
        .await;
    let alerts = mgr.alerts().list_alerts(None, None).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::MultipleFailedLogins);
    assert_eq!(alerts[0].severity, Severity::Medium);
    assert!(mgr.alerts().list_incidents().await.is_empty());

    // Sixth failure merges into the active alert, bumps it to high, and
    // opens exactly one incident
    let _ = mgr
        .authenticate("eve:wrong-password", "6.6.6.6", "firefox")
        .await;
    let alerts = mgr.alerts().list_alerts(None, None).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(alerts[0].occurrences, 2);

    let incidents = mgr.alerts().list_incidents().await;
    assert_eq!(incidents.len(), 1);
    assert!(incidents[0]
        .related_alert_ids
        .contains(&alerts[0].alert_id));

    // Continued failures never open a second incident
    let _ = mgr
        .authenticate("eve:wrong-password", "6.6.6.6", "firefox")
        .await;
    assert_eq!(mgr.alerts().list_incidents().await.len(), 1);

    // And the audit trail recorded the escalation
    let opened = mgr
        .audit()
        .query(&AuditQuery {
            event_type: Some(EventType::IncidentOpened),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(opened.len(), 1);
}

#[tokio::test]
async fn incident_lifecycle_after_auto_escalation() {
    let config = SecurityConfig {
        rate_limit_max_per_minute: 100,
        ..Default::default()
    };
    let mgr = build_manager(config).await;

    for _ in 0..6 {
        let _ = mgr
            .authenticate("eve:wrong-password", "6.6.6.6", "firefox")
            .await;
    }
    let incident_id = mgr.alerts().list_incidents().await[0].incident_id.clone();

    let alerts = mgr.alerts();
    alerts
        .update_incident_status(&incident_id, IncidentStatus::Investigating, None)
        .await
        .unwrap();
    alerts
        .update_incident_status(
            &incident_id,
            IncidentStatus::Contained,
            Some("source blocked at the edge".to_string()),
        )
        .await
        .unwrap();
    alerts
        .update_incident_status(&incident_id, IncidentStatus::Closed, None)
        .await
        .unwrap();

    // Closed is final except for an explicit reopen
    assert!(alerts
        .update_incident_status(&incident_id, IncidentStatus::Investigating, None)
        .await
        .is_err());
    alerts
        .reopen_incident(&incident_id, Some("attacker returned".to_string()))
        .await
        .unwrap();
    let incident = alerts.get_incident(&incident_id).await.unwrap();
    assert_eq!(incident.status, IncidentStatus::Investigating);
}

#[tokio::test]
async fn alert_false_positive_closes_the_loop() {
    let config = SecurityConfig {
        rate_limit_max_per_minute: 100,
        ..Default::default()
    };
    let mgr = build_manager(config).await;

    for _ in 0..5 {
        let _ = mgr
            .authenticate("eve:wrong-password", "6.6.6.6", "firefox")
            .await;
    }
    let alert_id = mgr.alerts().list_alerts(None, None).await[0].alert_id.clone();

    mgr.alerts().mark_false_positive(&alert_id).await.unwrap();
    let alert = mgr.alerts().get_alert(&alert_id).await.unwrap();
    assert_eq!(alert.status, AlertStatus::FalsePositive);

    // Terminal: no further transitions
    assert!(mgr.alerts().acknowledge(&alert_id, "analyst").await.is_err());
}

#[tokio::test]
async fn hundred_events_flush_and_verify() {
    let mgr = build_manager(SecurityConfig::default()).await;

    for i in 0..100 {
        mgr.record_event(
            SecurityEvent::new(EventType::DataAccess, Severity::Info)
                .with_actor("alice")
                .with_source("10.0.0.1")
                .with_resource(format!("doc/{}", i)),
        )
        .await
        .unwrap();
    }
    mgr.audit().flush().await.unwrap();
    assert_eq!(mgr.audit().buffered().await, 0);

    let report = mgr.audit().verify_integrity(None).await.unwrap();
    assert!(report.verified);
    assert_eq!(report.total_entries, 100);
    assert!(report.violations.is_empty());
}

#[tokio::test]
async fn concurrent_recording_keeps_sequence_gapless() {
    let mgr = Arc::new(build_manager(SecurityConfig::default()).await);

    let mut handles = Vec::new();
    for task in 0..8 {
        let mgr = mgr.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                mgr.record_event(
                    SecurityEvent::new(EventType::DataAccess, Severity::Info)
                        .with_actor(format!("worker-{}", task))
                        .with_source("10.0.0.1")
                        .with_resource(format!("doc/{}", i)),
                )
                .await
                .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    mgr.audit().flush().await.unwrap();

    let entries = mgr.audit().query(&AuditQuery::default()).await.unwrap();
    assert_eq!(entries.len(), 200);

    let mut sequences: Vec<u64> = entries.iter().map(|e| e.sequence_number).collect();
    sequences.sort_unstable();
    let expected: Vec<u64> = (0..200).collect();
    assert_eq!(sequences, expected);

    let report = mgr.audit().verify_integrity(None).await.unwrap();
    assert!(report.verified);
}

#[tokio::test]
async fn tampering_is_detected_and_raises_critical_alert() {
    let store = Arc::new(MemoryAuditStore::new());
    let verifier = StaticCredentialVerifier::new();
    let rbac = MemoryRbacResolver::new();
    let mgr = SecurityManager::new(
        SecurityConfig::default(),
        store.clone(),
        Arc::new(verifier),
        Arc::new(rbac),
    )
    .await
    .unwrap();

    for _ in 0..10 {
        mgr.record_event(
            SecurityEvent::new(EventType::DataAccess, Severity::Info)
                .with_actor("alice")
                .with_source("10.0.0.1"),
        )
        .await
        .unwrap();
    }
    mgr.audit().flush().await.unwrap();

    store
        .tamper(4, |entry| {
            entry
                .event
                .details
                .insert("injected".to_string(), serde_json::json!(true));
        })
        .await;

    let report = mgr.run_integrity_check().await.unwrap();
    assert!(!report.verified);

    let critical = mgr
        .alerts()
        .list_alerts(Some(Severity::Critical), None)
        .await;
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].alert_type, AlertType::IntegrityViolation);
}

#[tokio::test]
async fn chain_survives_restart_on_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = SecurityConfig::default();

    {
        let store = Arc::new(FileAuditStore::new(dir.path()).unwrap());
        let trail = AuditTrail::new(store, &config).await.unwrap();
        for i in 0..10 {
            trail
                .append(
                    SecurityEvent::new(EventType::DataAccess, Severity::Info)
                        .with_resource(format!("doc/{}", i)),
                )
                .await
                .unwrap();
        }
        trail.flush().await.unwrap();
    }

    // A fresh trail over the same directory continues the chain
    let store = Arc::new(FileAuditStore::new(dir.path()).unwrap());
    let trail = AuditTrail::new(store, &config).await.unwrap();
    for i in 10..20 {
        trail
            .append(
                SecurityEvent::new(EventType::DataAccess, Severity::Info)
                    .with_resource(format!("doc/{}", i)),
            )
            .await
            .unwrap();
    }
    trail.flush().await.unwrap();

    let report = trail.verify_integrity(None).await.unwrap();
    assert!(report.verified);
    assert_eq!(report.total_entries, 20);
}

#[tokio::test]
async fn compliance_export_groups_by_tag() {
    let config = SecurityConfig {
        rate_limit_max_per_minute: 100,
        ..Default::default()
    };
    let mgr = build_manager(config).await;

    let ctx = mgr
        .authenticate("alice:correct-horse-battery", "10.0.0.1", "firefox")
        .await
        .unwrap();
    mgr.authorize(&ctx, "read", None, None).await.unwrap();
    mgr.record_event(
        SecurityEvent::new(EventType::DataAccess, Severity::Info).with_actor("alice"),
    )
    .await
    .unwrap();
    mgr.audit().flush().await.unwrap();

    let from = chrono::Utc::now() - chrono::Duration::hours(1);
    let to = chrono::Utc::now() + chrono::Duration::hours(1);
    let report = mgr
        .audit()
        .export_compliance_report("gdpr", from, to, Some("alice"))
        .await
        .unwrap();

    assert_eq!(report.regulation, "gdpr");
    assert_eq!(report.subject.as_deref(), Some("alice"));
    assert!(report.total_events >= 3);
    assert!(report.events_by_tag.contains_key("authentication"));
    assert!(report.events_by_tag.contains_key("authorization"));
    assert!(report.events_by_tag.contains_key("data_access"));

    // The export is a read-side projection: the chain is untouched
    let integrity = mgr.audit().verify_integrity(None).await.unwrap();
    assert!(integrity.verified);
}

#[tokio::test]
async fn background_loops_flush_buffered_events() {
    let config = SecurityConfig {
        flush_interval_secs: 1,
        ..Default::default()
    };
    let mgr = build_manager(config).await;
    mgr.start().await.unwrap();

    mgr.record_event(
        SecurityEvent::new(EventType::DataAccess, Severity::Info).with_actor("alice"),
    )
    .await
    .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert_eq!(mgr.audit().buffered().await, 0);

    mgr.stop().await.unwrap();
}
