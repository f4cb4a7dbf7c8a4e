//! Access engine facade
//!
//! Wires the resolver, cache, directory writer, audit recorder, and approval
//! workflow from an [`AccessConfig`] and the injected collaborators, and
//! exposes the operations the routing layer calls.

use crate::audit::{AuditQuery, AuditRecord, AuditRecorder, AuditSink, InMemoryAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::AccessConfig;
use crate::directory::{DepartmentStore, DirectoryStore, MemberStore, RoleStore, TeamAdmin};
use crate::error::{AccessError, Result};
use crate::permissions::{CacheStats, PermissionCache, PermissionResolver};
use crate::types::{PermissionKey, PermissionSet};
use crate::workflow::{
    ApprovalWorkflow, InMemoryRequestStore, LedgerService, NoopNotifier, NotificationDispatcher,
    ReconcileReport, RequestStore, ReviewCommand, SettlementState, SweepReport, TieredChainPolicy,
    TokenRequest, WorkflowServices,
};
use std::sync::Arc;
use tracing::{debug, info};

/// External collaborators of the engine
///
/// Only the directory and the ledger are required. Requests and audit records
/// default to in-memory storage, notifications are dropped, and time comes
/// from the system clock.
#[derive(Clone)]
pub struct Collaborators {
    roles: Arc<dyn RoleStore>,
    members: Arc<dyn MemberStore>,
    departments: Arc<dyn DepartmentStore>,
    directory: Arc<dyn DirectoryStore>,
    requests: Arc<dyn RequestStore>,
    audit_sink: Arc<dyn AuditSink>,
    ledger: Arc<dyn LedgerService>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new<D>(directory: Arc<D>, ledger: Arc<dyn LedgerService>) -> Self
    where
        D: DirectoryStore + 'static,
    {
        Self {
            roles: directory.clone(),
            members: directory.clone(),
            departments: directory.clone(),
            directory,
            requests: Arc::new(InMemoryRequestStore::new()),
            audit_sink: Arc::new(InMemoryAuditSink::new()),
            ledger,
            notifier: Arc::new(NoopNotifier),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_requests(mut self, requests: Arc<dyn RequestStore>) -> Self {
        self.requests = requests;
        self
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Team access control and token approval engine
pub struct AccessEngine {
    config: AccessConfig,
    cache: Arc<PermissionCache>,
    audit: Arc<AuditRecorder>,
    admin: TeamAdmin,
    workflow: ApprovalWorkflow,
}

impl AccessEngine {
    /// Create a new engine
    ///
    /// # Arguments
    ///
    /// * `config` - Engine configuration, validated here
    /// * `collaborators` - Stores, ledger, notifier, and clock
    ///
    /// # Returns
    ///
    /// Engine ready to serve requests, or `InvalidConfig`
    pub fn new(config: AccessConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let audit = Arc::new(AuditRecorder::new(
            collaborators.audit_sink,
            collaborators.clock.clone(),
        ));
        let resolver = Arc::new(PermissionResolver::new(
            collaborators.roles,
            collaborators.members.clone(),
            collaborators.departments,
            audit.clone(),
        ));
        let cache = Arc::new(PermissionCache::new(resolver, config.cache.clone()));
        let admin = TeamAdmin::new(
            collaborators.directory,
            cache.clone(),
            audit.clone(),
            collaborators.clock.clone(),
        );

        let policy = Arc::new(TieredChainPolicy::new(config.chain.clone())?);
        let workflow = ApprovalWorkflow::new(
            config.workflow.clone(),
            policy,
            WorkflowServices {
                store: collaborators.requests,
                members: collaborators.members,
                cache: cache.clone(),
                audit: audit.clone(),
                ledger: collaborators.ledger,
                notifier: collaborators.notifier,
                clock: collaborators.clock,
            },
        )?;

        info!(
            "AccessEngine initialized with cache ttl={}s capacity={}, auto-approval below {}",
            config.cache.ttl_secs, config.cache.capacity, config.workflow.auto_approval_threshold
        );

        Ok(Self {
            config,
            cache,
            audit,
            admin,
            workflow,
        })
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Effective permissions of a member, served from the cache
    ///
    /// # Errors
    ///
    /// `NotFound` if the user is not a member of the team.
    pub async fn resolve_permissions(&self, user_id: &str, team_id: &str) -> Result<PermissionSet> {
        self.cache.get_or_resolve(user_id, team_id).await
    }

    pub async fn create_token_request(
        &self,
        team_id: &str,
        requester_id: &str,
        amount: u64,
        reason: &str,
        category: &str,
    ) -> Result<TokenRequest> {
        self.workflow
            .create_request(team_id, requester_id, amount, reason, category)
            .await
    }

    pub async fn review_token_request(&self, command: ReviewCommand) -> Result<TokenRequest> {
        self.workflow.review(command).await
    }

    pub async fn cancel_token_request(&self, request_id: &str, actor_id: &str) -> Result<TokenRequest> {
        self.workflow.cancel(request_id, actor_id).await
    }

    pub async fn get_request(&self, request_id: &str) -> Result<TokenRequest> {
        self.workflow.get_request(request_id).await
    }

    pub async fn pending_for_approver(&self, team_id: &str, actor_id: &str) -> Result<Vec<TokenRequest>> {
        self.workflow.pending_for_approver(team_id, actor_id).await
    }

    /// Scheduler tick: escalate or expire overdue stages
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.workflow.sweep().await
    }

    /// Reconciler tick: retry failed settlements
    pub async fn reconcile_settlements(&self) -> Result<ReconcileReport> {
        self.workflow.reconcile_settlements().await
    }

    pub fn settlement(&self, request_id: &str) -> Option<SettlementState> {
        self.workflow.settlement(request_id)
    }

    /// Team audit log for a member holding `can_view_audit_log`
    ///
    /// The query is always narrowed to `team_id`.
    pub async fn audit_log(&self, team_id: &str, actor_id: &str, query: AuditQuery) -> Result<Vec<AuditRecord>> {
        let allowed = match self.cache.get_or_resolve(actor_id, team_id).await {
            Ok(permissions) => permissions.allows(PermissionKey::CanViewAuditLog),
            Err(AccessError::NotFound { .. }) => false,
            Err(e) => return Err(e),
        };
        if !allowed {
            debug!("Actor {} may not read the audit log of team {}", actor_id, team_id);
            return Err(AccessError::PermissionDenied);
        }

        let query = AuditQuery {
            team_id: Some(team_id.to_string()),
            ..query
        };
        self.audit.query(&query).await
    }

    pub fn admin(&self) -> &TeamAdmin {
        &self.admin
    }

    pub fn workflow(&self) -> &ApprovalWorkflow {
        &self.workflow
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
