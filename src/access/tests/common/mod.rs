//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use cretoai_access::audit::{AuditEventType, AuditQuery, AuditRecord, AuditSink, InMemoryAuditSink, TargetType};
use cretoai_access::workflow::{ApproverSpec, LedgerService, NotificationDispatcher, TransferResult};
use cretoai_access::{
    AccessConfig, AccessEngine, AccessError, Collaborators, DirectoryStore, InMemoryDirectory, ManualClock,
    Member, PermissionKey, PermissionSet, Result, Role,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

pub const TEAM: &str = "team-1";

pub const OWNER: &str = "olivia";
pub const ADMIN: &str = "adam";
pub const MANAGER: &str = "mia";
pub const MANAGER_2: &str = "max";
pub const REQUESTER: &str = "alice";
pub const MEMBER: &str = "bob";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn flags(keys: &[PermissionKey]) -> PermissionSet {
    let mut set = PermissionSet::new();
    for key in keys {
        set.insert(*key, true).unwrap();
    }
    set
}

/// owner > admin > manager > member, plus one member per role
pub async fn seed_team(directory: &InMemoryDirectory) {
    use PermissionKey::*;

    let roles = vec![
        Role::new("owner", TEAM, "Owner").system().with_permissions(flags(&[
            CanRequestTokens,
            CanApproveTokens,
            CanManageTokenRequests,
            CanManageMembers,
            CanManageRoles,
            CanManageDepartments,
            CanViewAuditLog,
        ])),
        Role::new("admin", TEAM, "Admin").with_permissions(flags(&[
            CanRequestTokens,
            CanApproveTokens,
            CanManageTokenRequests,
            CanManageMembers,
            CanManageRoles,
            CanManageDepartments,
            CanViewAuditLog,
        ])),
        Role::new("manager", TEAM, "Manager").with_permissions(flags(&[CanRequestTokens, CanApproveTokens])),
        Role::new("member", TEAM, "Member")
            .system()
            .with_permissions(flags(&[CanRequestTokens])),
    ];
    for role in roles {
        directory.put_role(role).await.unwrap();
    }

    for (user, role) in [
        (OWNER, "owner"),
        (ADMIN, "admin"),
        (MANAGER, "manager"),
        (MANAGER_2, "manager"),
        (REQUESTER, "member"),
        (MEMBER, "member"),
    ] {
        directory.put_member(Member::new(TEAM, user, role)).await.unwrap();
    }
}

// ============================================================================
// TEST DOUBLES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
    pub from_account: String,
    pub to_account: String,
    pub amount: u64,
    pub idempotency_key: String,
}

/// Ledger that records transfers and can be switched into failure
#[derive(Default)]
pub struct RecordingLedger {
    attempts: Mutex<Vec<TransferCall>>,
    transfers: Mutex<Vec<TransferCall>>,
    failing: AtomicBool,
}

impl RecordingLedger {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<TransferCall> {
        self.attempts.lock().clone()
    }

    pub fn transfers(&self) -> Vec<TransferCall> {
        self.transfers.lock().clone()
    }
}

#[async_trait]
impl LedgerService for RecordingLedger {
    async fn transfer(
        &self,
        from_account: &str,
        to_account: &str,
        amount: u64,
        idempotency_key: &str,
    ) -> Result<TransferResult> {
        let call = TransferCall {
            from_account: from_account.to_string(),
            to_account: to_account.to_string(),
            amount,
            idempotency_key: idempotency_key.to_string(),
        };
        self.attempts.lock().push(call.clone());

        if self.failing.load(Ordering::SeqCst) {
            return Err(AccessError::Upstream("ledger unavailable".to_string()));
        }

        let mut transfers = self.transfers.lock();
        if !transfers.iter().any(|t| t.idempotency_key == idempotency_key) {
            transfers.push(call);
        }
        Ok(TransferResult {
            transfer_id: format!("tx-{}", &idempotency_key[..12]),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub event_type: AuditEventType,
    pub recipients: Vec<ApproverSpec>,
    pub payload: AuditRecord,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Notifications are dispatched on spawned tasks
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        for _ in 0..200 {
            if self.sent.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(
        &self,
        event_type: AuditEventType,
        recipients: &[ApproverSpec],
        payload: &AuditRecord,
    ) -> Result<()> {
        self.sent.lock().push(Notification {
            event_type,
            recipients: recipients.to_vec(),
            payload: payload.clone(),
        });
        if self.failing.load(Ordering::SeqCst) {
            return Err(AccessError::Upstream("mail relay down".to_string()));
        }
        Ok(())
    }
}

/// Chained in-memory sink whose appends can be made to fail
#[derive(Default)]
pub struct FlakyAuditSink {
    inner: InMemoryAuditSink,
    failing: AtomicBool,
}

impl FlakyAuditSink {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryAuditSink {
        &self.inner
    }
}

#[async_trait]
impl AuditSink for FlakyAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AccessError::Audit("audit store unavailable".to_string()));
        }
        self.inner.append(record).await
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        self.inner.query(query).await
    }
}

// ============================================================================
// ENGINE FIXTURE
// ============================================================================

pub struct Fixture {
    pub engine: AccessEngine,
    pub directory: Arc<InMemoryDirectory>,
    pub audit_sink: Arc<FlakyAuditSink>,
    pub ledger: Arc<RecordingLedger>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(AccessConfig::default()).await
    }

    pub async fn with_config(config: AccessConfig) -> Self {
        init_tracing();

        let directory = Arc::new(InMemoryDirectory::new());
        seed_team(&directory).await;

        let audit_sink = Arc::new(FlakyAuditSink::default());
        let ledger = Arc::new(RecordingLedger::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let collaborators = Collaborators::new(directory.clone(), ledger.clone())
            .with_audit_sink(audit_sink.clone())
            .with_notifier(notifier.clone())
            .with_clock(clock.clone());
        let engine = AccessEngine::new(config, collaborators).unwrap();

        Self {
            engine,
            directory,
            audit_sink,
            ledger,
            notifier,
            clock,
        }
    }

    /// Audit records of one type for one target
    pub async fn audit_count(&self, event_type: AuditEventType, target_type: TargetType, target_id: &str) -> usize {
        self.engine
            .audit()
            .query(&AuditQuery::target(target_type, target_id).with_event_type(event_type))
            .await
            .unwrap()
            .len()
    }

    pub async fn total_audit_records(&self) -> usize {
        self.audit_sink.inner().len().await
    }
}
