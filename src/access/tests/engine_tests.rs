//! Engine wiring tests
//!
//! Configuration flows from TOML into the workflow, invalid configuration
//! is rejected up front, and settlements reach the ledger with the
//! configured account names.

mod common;

use common::*;
use cretoai_access::workflow::{settlement_key, RequestStatus, SettlementState};
use cretoai_access::{AccessConfig, AccessEngine, AccessError, Collaborators, InMemoryDirectory, ReviewCommand};
use std::sync::Arc;

const CONFIG: &str = r#"
[cache]
ttl_secs = 60
capacity = 128

[workflow]
auto_approval_threshold = 1000
treasury_account_prefix = "treasury"
escalation_target = { type = "role", id = "admin" }

[[chain.tiers]]
min_amount = 0
approvers = [{ type = "role", id = "manager" }]

[[chain.tiers]]
min_amount = 50000
approvers = [{ type = "role", id = "manager" }, { type = "role", id = "owner" }]
"#;

#[tokio::test]
async fn test_engine_from_toml_config() {
    let config = AccessConfig::from_toml_str(CONFIG).unwrap();
    let fx = Fixture::with_config(config).await;
    assert_eq!(fx.engine.config().cache.ttl_secs, 60);

    // below the configured threshold
    let small = fx
        .engine
        .create_token_request(TEAM, REQUESTER, 900, "license", "software")
        .await
        .unwrap();
    assert_eq!(small.status, RequestStatus::Approved);
    assert!(small.auto_approved);

    let medium = fx
        .engine
        .create_token_request(TEAM, REQUESTER, 5_000, "GPU hours", "compute")
        .await
        .unwrap();
    assert_eq!(medium.stages.len(), 1);

    let large = fx
        .engine
        .create_token_request(TEAM, REQUESTER, 60_000, "cluster", "compute")
        .await
        .unwrap();
    let approvers: Vec<_> = large.stages.iter().map(|s| s.approver.to_string()).collect();
    assert_eq!(approvers, vec!["role:manager", "role:owner"]);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let err = AccessConfig::from_toml_str("[cache]\ncapacity = 0\n").unwrap_err();
    assert!(matches!(err, AccessError::InvalidConfig(_)));

    let err = AccessConfig::from_toml_str("[[chain.tiers]]\nmin_amount = 10\napprovers = [{ type = \"role\", id = \"manager\" }]\n")
        .unwrap_err();
    assert!(matches!(err, AccessError::InvalidConfig(_)));

    // configs built in code are validated by the engine too
    let mut config = AccessConfig::default();
    config.workflow.treasury_account_prefix.clear();
    let directory = Arc::new(InMemoryDirectory::new());
    let ledger = Arc::new(RecordingLedger::default());
    let result = AccessEngine::new(config, Collaborators::new(directory, ledger));
    assert!(matches!(result, Err(AccessError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_config_round_trips_through_file() {
    let config = AccessConfig::from_toml_str(CONFIG).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("access.toml");
    std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

    let loaded = AccessConfig::load(&path).unwrap();
    assert_eq!(loaded.workflow.auto_approval_threshold, 1000);
    assert_eq!(loaded.chain.tiers.len(), 2);
    assert_eq!(loaded.workflow.escalation_target.to_string(), "role:admin");
}

#[tokio::test]
async fn test_settlement_uses_configured_accounts() {
    let config = AccessConfig::from_toml_str(CONFIG).unwrap();
    let fx = Fixture::with_config(config).await;

    let request = fx
        .engine
        .create_token_request(TEAM, REQUESTER, 5_000, "GPU hours", "compute")
        .await
        .unwrap();
    assert!(fx.engine.settlement(&request.id).is_none());

    fx.engine
        .review_token_request(ReviewCommand::approve(&request.id, MANAGER))
        .await
        .unwrap();

    let transfers = fx.ledger.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].from_account, format!("treasury:{}", TEAM));
    assert_eq!(transfers[0].to_account, format!("user:{}", REQUESTER));
    assert_eq!(transfers[0].amount, 5_000);
    assert_eq!(transfers[0].idempotency_key, settlement_key(&request.id));

    match fx.engine.settlement(&request.id) {
        Some(SettlementState::Settled { attempts, transfer_id, .. }) => {
            assert_eq!(attempts, 1);
            assert!(transfer_id.starts_with("tx-"));
        }
        other => panic!("expected settled, got {:?}", other),
    }

    let report = fx.engine.reconcile_settlements().await.unwrap();
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn test_cache_stats_track_lookups() {
    let fx = Fixture::new().await;
    for _ in 0..4 {
        fx.engine.resolve_permissions(MANAGER, TEAM).await.unwrap();
    }
    let stats = fx.engine.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.entries, 1);
    assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
}

#[test]
fn test_version_is_set() {
    assert!(!cretoai_access::VERSION.is_empty());
}
