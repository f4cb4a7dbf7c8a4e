//! Token request approval workflow
//!
//! ```text
//!                 approve (not last)
//!              ┌──────────────────┐
//!              ▼                  │
//! create ─► PENDING(stage=i) ─────┘
//!   │          │ approve (last) ──► APPROVED ──► ledger settlement
//!   │          │ deny ────────────► DENIED
//!   │          │ escalate ────────► PENDING(stage=i, new approver)
//!   │          │ timeout exhausted ► EXPIRED
//!   │          │ cancel ──────────► CANCELLED
//!   └─ amount < threshold ────────► APPROVED (auto, zero stages)
//! ```
//!
//! Every transition is a compare-and-swap on the request version followed by
//! exactly one audit record, both under the request's lock. If the audit write
//! fails the transition is reverted before the lock is released, so no other
//! writer can build on an unaudited state. Notifications go out after commit
//! and never affect the outcome.
//!
//! Creates are serialized per requester so the daily limit check and the
//! insert it guards cannot interleave.

pub mod ledger;
mod locks;
pub mod notify;
pub mod policy;
pub mod request;
pub mod store;

pub use ledger::{settlement_key, LedgerService, SettlementState, SettlementTracker, TransferResult};
pub use notify::{NoopNotifier, NotificationDispatcher};
pub use policy::{ChainPolicy, ChainPolicyConfig, ChainTier, TieredChainPolicy};
pub use request::{ApprovalStage, ApproverSpec, RequestStatus, ReviewDecision, StageStatus, TokenRequest};
pub use store::{InMemoryRequestStore, RequestFilter, RequestStore};

use locks::KeyedLocks;

use crate::audit::{AuditEvent, AuditEventType, AuditRecord, AuditRecorder, TargetType, SYSTEM_ACTOR};
use crate::clock::Clock;
use crate::directory::MemberStore;
use crate::error::{AccessError, Result};
use crate::permissions::PermissionCache;
use crate::types::{Member, PermissionKey, PermissionSet};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Requests strictly below this amount are approved at creation
    #[serde(default = "default_auto_approval_threshold")]
    pub auto_approval_threshold: u64,

    /// Hard cap on a single request
    #[serde(default = "default_max_amount")]
    pub max_amount: u64,

    #[serde(default = "default_escalation_timeout_secs")]
    pub escalation_timeout_secs: u64,

    /// Escalations per stage before the request expires
    #[serde(default = "default_max_escalations")]
    pub max_escalations: u32,

    #[serde(default = "default_treasury_account_prefix")]
    pub treasury_account_prefix: String,

    #[serde(default = "default_recipient_account_prefix")]
    pub recipient_account_prefix: String,

    /// Who takes over a timed-out stage
    #[serde(default = "default_escalation_target")]
    pub escalation_target: ApproverSpec,
}

fn default_auto_approval_threshold() -> u64 {
    100
}

fn default_max_amount() -> u64 {
    1_000_000
}

fn default_escalation_timeout_secs() -> u64 {
    86_400
}

fn default_max_escalations() -> u32 {
    2
}

fn default_escalation_target() -> ApproverSpec {
    ApproverSpec::role("owner")
}

fn default_treasury_account_prefix() -> String {
    "team".to_string()
}

fn default_recipient_account_prefix() -> String {
    "user".to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_approval_threshold: default_auto_approval_threshold(),
            max_amount: default_max_amount(),
            escalation_timeout_secs: default_escalation_timeout_secs(),
            max_escalations: default_max_escalations(),
            treasury_account_prefix: default_treasury_account_prefix(),
            recipient_account_prefix: default_recipient_account_prefix(),
            escalation_target: default_escalation_target(),
        }
    }
}

impl WorkflowConfig {
    pub fn escalation_timeout(&self) -> Duration {
        Duration::seconds(i64::try_from(self.escalation_timeout_secs).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> Result<()> {
        if self.auto_approval_threshold > self.max_amount {
            return Err(AccessError::InvalidConfig(
                "auto_approval_threshold must not exceed max_amount".to_string(),
            ));
        }
        if self.escalation_timeout_secs == 0 {
            return Err(AccessError::InvalidConfig(
                "escalation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_escalations == 0 {
            return Err(AccessError::InvalidConfig(
                "max_escalations must be at least 1".to_string(),
            ));
        }
        if self.treasury_account_prefix.is_empty() || self.recipient_account_prefix.is_empty() {
            return Err(AccessError::InvalidConfig(
                "ledger account prefixes must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// A reviewer's decision on the current stage
#[derive(Debug, Clone)]
pub struct ReviewCommand {
    pub request_id: String,
    pub actor_id: String,
    pub decision: ReviewDecision,
    pub comments: Option<String>,
    /// Stage the reviewer saw; a mismatch is a `Conflict`
    pub expected_stage: Option<usize>,
}

impl ReviewCommand {
    pub fn approve(request_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::new(request_id, actor_id, ReviewDecision::Approve)
    }

    pub fn deny(request_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::new(request_id, actor_id, ReviewDecision::Deny)
    }

    fn new(request_id: impl Into<String>, actor_id: impl Into<String>, decision: ReviewDecision) -> Self {
        Self {
            request_id: request_id.into(),
            actor_id: actor_id.into(),
            decision,
            comments: None,
            expected_stage: None,
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn at_stage(mut self, stage: usize) -> Self {
        self.expected_stage = Some(stage);
        self
    }
}

/// Outcome of one escalation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub escalated: usize,
    pub expired: usize,
    /// Lost a race with a concurrent transition
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of one settlement reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub settled: usize,
    pub failed: usize,
}

/// Collaborators injected into [`ApprovalWorkflow`]
#[derive(Clone)]
pub struct WorkflowServices {
    pub store: Arc<dyn RequestStore>,
    pub members: Arc<dyn MemberStore>,
    pub cache: Arc<PermissionCache>,
    pub audit: Arc<AuditRecorder>,
    pub ledger: Arc<dyn LedgerService>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub clock: Arc<dyn Clock>,
}

/// Multi-stage approval state machine for token requests
pub struct ApprovalWorkflow {
    config: WorkflowConfig,
    policy: Arc<dyn ChainPolicy>,
    store: Arc<dyn RequestStore>,
    members: Arc<dyn MemberStore>,
    cache: Arc<PermissionCache>,
    audit: Arc<AuditRecorder>,
    ledger: Arc<dyn LedgerService>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    settlements: SettlementTracker,
    /// Held from store write through audit write
    request_locks: KeyedLocks,
    /// Held from quota check through insert
    requester_locks: KeyedLocks,
}

impl ApprovalWorkflow {
    pub fn new(config: WorkflowConfig, policy: Arc<dyn ChainPolicy>, services: WorkflowServices) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            policy,
            store: services.store,
            members: services.members,
            cache: services.cache,
            audit: services.audit,
            ledger: services.ledger,
            notifier: services.notifier,
            clock: services.clock,
            settlements: SettlementTracker::new(),
            request_locks: KeyedLocks::new(),
            requester_locks: KeyedLocks::new(),
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Create a token request
    ///
    /// Amounts below the auto-approval threshold are approved immediately with
    /// no stages; everything else starts at stage 0 of the policy's chain.
    pub async fn create_request(
        &self,
        team_id: &str,
        requester_id: &str,
        amount: u64,
        reason: &str,
        category: &str,
    ) -> Result<TokenRequest> {
        if amount == 0 {
            return Err(AccessError::InvalidInput("amount must be greater than 0".to_string()));
        }

        let permissions = self.permissions_of(requester_id, team_id).await?;
        if !permissions.allows(PermissionKey::CanRequestTokens) {
            debug!("{} may not request tokens in team {}", requester_id, team_id);
            return Err(AccessError::PermissionDenied);
        }

        let requester_guard = self
            .requester_locks
            .lock(&format!("{}/{}", team_id, requester_id))
            .await;
        let now = self.clock.now();
        self.check_quota(team_id, requester_id, amount, &permissions, now).await?;

        let mut request = TokenRequest {
            id: Uuid::new_v4().to_string(),
            team_id: team_id.to_string(),
            requester_id: requester_id.to_string(),
            amount,
            reason: reason.to_string(),
            category: category.to_string(),
            status: RequestStatus::Pending,
            stages: Vec::new(),
            current_stage: 0,
            auto_approved: false,
            created_at: now,
            terminal_at: None,
            version: 0,
        };

        let event_type = if amount < self.config.auto_approval_threshold {
            request.auto_approved = true;
            request.finish(RequestStatus::Approved, now);
            AuditEventType::TokenRequestAutoApproved
        } else {
            let chain = self.policy.chain(amount, category);
            if chain.is_empty() {
                return Err(AccessError::InvalidConfig(format!(
                    "no approval chain for amount {} in category '{}'",
                    amount, category
                )));
            }
            request.stages = chain
                .into_iter()
                .enumerate()
                .map(|(index, approver)| ApprovalStage::new(index, approver))
                .collect();
            request.stages[0].started_at = Some(now);
            AuditEventType::TokenRequestCreated
        };

        let request_guard = self.request_locks.lock(&request.id).await;
        self.store.insert(request.clone()).await?;

        let event = AuditEvent::new(
            event_type,
            requester_id,
            team_id,
            TargetType::TokenRequest,
            &request.id,
        )
        .after(&request);

        let record = match self.audit.record(event).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Audit write failed for new request {}; discarding: {}", request.id, e);
                if let Err(discard_err) = self.store.discard(&request.id).await {
                    warn!("Failed to discard request {}: {}", request.id, discard_err);
                }
                return Err(e);
            }
        };
        drop(request_guard);
        drop(requester_guard);

        info!(
            "Token request {} for {} by {} in team {}: {}",
            request.id, amount, requester_id, team_id, event_type
        );

        self.notify(&request, record);
        if request.status == RequestStatus::Approved {
            self.settle(&request).await;
        }

        Ok(request)
    }

    /// Apply a reviewer's decision to the current stage
    ///
    /// Guards run in order: request still pending, actor holds
    /// `can_approve_tokens`, actor is not the requester, expected stage is
    /// current, actor matches the stage approver. Authorization failures all
    /// surface as the same `PermissionDenied`.
    pub async fn review(&self, command: ReviewCommand) -> Result<TokenRequest> {
        let request = self.load(&command.request_id).await?;
        if request.is_terminal() {
            return Err(AccessError::InvalidTransition(format!(
                "request {} is already {}",
                request.id, request.status
            )));
        }

        let permissions = self.permissions_of(&command.actor_id, &request.team_id).await?;
        if !permissions.allows(PermissionKey::CanApproveTokens) {
            debug!("Review of {} by {}: lacks can_approve_tokens", request.id, command.actor_id);
            return Err(AccessError::PermissionDenied);
        }
        if command.actor_id == request.requester_id {
            debug!("Review of {} by {}: self-approval", request.id, command.actor_id);
            return Err(AccessError::PermissionDenied);
        }

        if let Some(expected) = command.expected_stage {
            if expected != request.current_stage {
                return Err(AccessError::Conflict(format!(
                    "request {} is at stage {}, not {}",
                    request.id, request.current_stage, expected
                )));
            }
        }

        let stage = request
            .current()
            .ok_or_else(|| AccessError::Internal(format!("pending request {} has no current stage", request.id)))?;
        let member = self.members.get_member(&request.team_id, &command.actor_id).await?;
        if !approver_matches(&stage.approver, &command.actor_id, member.as_ref()) {
            debug!(
                "Review of {} by {}: not the stage {} approver ({})",
                request.id, command.actor_id, stage.index, stage.approver
            );
            return Err(AccessError::PermissionDenied);
        }

        let now = self.clock.now();
        let mut updated = request.clone();
        let event_type = match command.decision {
            ReviewDecision::Approve => {
                updated.approve_current(&command.actor_id, command.comments.clone(), now);
                if updated.status == RequestStatus::Approved {
                    AuditEventType::TokenRequestApproved
                } else {
                    AuditEventType::TokenStageApproved
                }
            }
            ReviewDecision::Deny => {
                updated.deny_current(&command.actor_id, command.comments.clone(), now);
                AuditEventType::TokenRequestDenied
            }
        };

        let event = AuditEvent::new(
            event_type,
            &command.actor_id,
            &request.team_id,
            TargetType::TokenRequest,
            &request.id,
        );
        let (committed, record) = self.commit(&request, updated, event).await?;

        info!(
            "Request {} stage {} {} by {} (status {})",
            committed.id, request.current_stage, event_type, command.actor_id, committed.status
        );

        self.notify(&committed, record);
        if committed.status == RequestStatus::Approved {
            self.settle(&committed).await;
        }

        Ok(committed)
    }

    /// Hand a timed-out stage to the escalation target, or expire the request
    /// once the stage has used up its escalations
    pub async fn escalate(&self, request_id: &str) -> Result<TokenRequest> {
        let request = self.load(request_id).await?;
        let stage = request.current().ok_or_else(|| {
            AccessError::InvalidTransition(format!("request {} is already {}", request.id, request.status))
        })?;

        let now = self.clock.now();
        if !self.is_overdue(&request, now) {
            return Err(AccessError::InvalidTransition(format!(
                "stage {} of request {} has not timed out",
                stage.index, request.id
            )));
        }

        if stage.escalations >= self.config.max_escalations {
            return self.expire_at(request, now).await;
        }

        let mut updated = request.clone();
        let index = updated.current_stage;
        let stage = &mut updated.stages[index];
        let previous_approver = std::mem::replace(&mut stage.approver, self.config.escalation_target.clone());
        stage.escalations += 1;
        stage.started_at = Some(now);

        let event = AuditEvent::new(
            AuditEventType::TokenStageEscalated,
            SYSTEM_ACTOR,
            &request.team_id,
            TargetType::TokenRequest,
            &request.id,
        );
        let (committed, record) = self.commit(&request, updated, event).await?;

        info!(
            "Escalated stage {} of request {} from {} to {}",
            index, committed.id, previous_approver, self.config.escalation_target
        );

        self.notify(&committed, record);
        Ok(committed)
    }

    /// Move a pending request to `EXPIRED`
    pub async fn expire(&self, request_id: &str) -> Result<TokenRequest> {
        let request = self.load(request_id).await?;
        let now = self.clock.now();
        self.expire_at(request, now).await
    }

    /// Cancel a pending request before any stage is approved
    ///
    /// Allowed for the requester or a holder of `can_manage_token_requests`.
    /// Cancelling a cancelled request returns it unchanged with no new audit.
    pub async fn cancel(&self, request_id: &str, actor_id: &str) -> Result<TokenRequest> {
        let request = self.load(request_id).await?;

        if actor_id != request.requester_id {
            let permissions = self.permissions_of(actor_id, &request.team_id).await?;
            if !permissions.allows(PermissionKey::CanManageTokenRequests) {
                debug!("Cancel of {} by {}: not requester or manager", request.id, actor_id);
                return Err(AccessError::PermissionDenied);
            }
        }

        let status = request.status;
        match status {
            RequestStatus::Cancelled => return Ok(request),
            RequestStatus::Pending => {}
            status => {
                return Err(AccessError::InvalidTransition(format!(
                    "cannot cancel a {} request",
                    status
                )))
            }
        }
        if request.any_stage_approved() {
            return Err(AccessError::InvalidTransition(format!(
                "request {} has an approved stage and can no longer be cancelled",
                request.id
            )));
        }

        let mut updated = request.clone();
        updated.finish(RequestStatus::Cancelled, self.clock.now());

        let event = AuditEvent::new(
            AuditEventType::TokenRequestCancelled,
            actor_id,
            &request.team_id,
            TargetType::TokenRequest,
            &request.id,
        );

        match self.commit(&request, updated, event).await {
            Ok((committed, record)) => {
                info!("Request {} cancelled by {}", committed.id, actor_id);
                self.notify(&committed, record);
                Ok(committed)
            }
            Err(AccessError::Conflict(reason)) => match self.store.get(request_id).await? {
                // a concurrent cancel already landed
                Some(current) if current.status == RequestStatus::Cancelled => Ok(current),
                _ => Err(AccessError::Conflict(reason)),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn get_request(&self, request_id: &str) -> Result<TokenRequest> {
        self.load(request_id).await
    }

    /// Pending requests in a team whose current stage the actor may decide
    pub async fn pending_for_approver(&self, team_id: &str, actor_id: &str) -> Result<Vec<TokenRequest>> {
        let permissions = match self.cache.get_or_resolve(actor_id, team_id).await {
            Ok(permissions) => permissions,
            Err(AccessError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        if !permissions.allows(PermissionKey::CanApproveTokens) {
            return Ok(Vec::new());
        }

        let member = self.members.get_member(team_id, actor_id).await?;
        let pending = self
            .store
            .list(&RequestFilter::team(team_id).with_status(RequestStatus::Pending))
            .await?;

        Ok(pending
            .into_iter()
            .filter(|request| request.requester_id != actor_id)
            .filter(|request| {
                request
                    .current()
                    .map_or(false, |stage| approver_matches(&stage.approver, actor_id, member.as_ref()))
            })
            .collect())
    }

    /// Escalate or expire every pending request whose current stage timed out
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let pending = self.store.list(&RequestFilter::pending()).await?;
        let mut report = SweepReport::default();

        for request in pending {
            report.examined += 1;
            if !self.is_overdue(&request, now) {
                continue;
            }

            match self.escalate(&request.id).await {
                Ok(updated) if updated.status == RequestStatus::Expired => report.expired += 1,
                Ok(_) => report.escalated += 1,
                Err(AccessError::Conflict(_)) | Err(AccessError::InvalidTransition(_)) => {
                    debug!("Sweep skipped request {}: changed concurrently", request.id);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Sweep failed on request {}: {}", request.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.escalated + report.expired + report.failed > 0 {
            info!(
                "Sweep: {} escalated, {} expired, {} skipped, {} failed of {} pending",
                report.escalated, report.expired, report.skipped, report.failed, report.examined
            );
        }

        Ok(report)
    }

    /// Retry settlements whose ledger transfer failed
    pub async fn reconcile_settlements(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for request_id in self.settlements.pending() {
            if !self.settlements.retry(&request_id) {
                continue;
            }
            report.attempted += 1;

            let request = match self.load(&request_id).await {
                Ok(request) => request,
                Err(e) => {
                    self.settlements.fail(&request_id, e.to_string());
                    report.failed += 1;
                    continue;
                }
            };

            if self.attempt_settlement(&request).await {
                report.settled += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Settlement state of an approved request
    pub fn settlement(&self, request_id: &str) -> Option<SettlementState> {
        self.settlements.get(request_id)
    }

    async fn load(&self, request_id: &str) -> Result<TokenRequest> {
        self.store
            .get(request_id)
            .await?
            .ok_or_else(|| AccessError::not_found("token request", request_id))
    }

    /// Permissions of an actor; non-members are simply denied
    async fn permissions_of(&self, actor_id: &str, team_id: &str) -> Result<PermissionSet> {
        match self.cache.get_or_resolve(actor_id, team_id).await {
            Err(AccessError::NotFound { .. }) => {
                debug!("{} is not a member of team {}", actor_id, team_id);
                Err(AccessError::PermissionDenied)
            }
            other => other,
        }
    }

    async fn check_quota(
        &self,
        team_id: &str,
        requester_id: &str,
        amount: u64,
        permissions: &PermissionSet,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if amount > self.config.max_amount {
            return Err(AccessError::QuotaExceeded(format!(
                "amount {} exceeds the maximum of {}",
                amount, self.config.max_amount
            )));
        }

        if let Some(limit) = permissions.limit(PermissionKey::MaxRequestAmount) {
            if amount > limit {
                return Err(AccessError::QuotaExceeded(format!(
                    "amount {} exceeds the per-request limit of {}",
                    amount, limit
                )));
            }
        }

        if let Some(limit) = permissions.limit(PermissionKey::DailyRequestLimit) {
            let since = now - Duration::hours(24);
            let requested: u64 = self
                .store
                .list(&RequestFilter::team(team_id).with_requester(requester_id))
                .await?
                .iter()
                .filter(|r| r.created_at > since)
                .filter(|r| matches!(r.status, RequestStatus::Pending | RequestStatus::Approved))
                .map(|r| r.amount)
                .fold(0u64, u64::saturating_add);

            if requested.saturating_add(amount) > limit {
                return Err(AccessError::QuotaExceeded(format!(
                    "daily request limit of {} would be exceeded ({} already requested)",
                    limit, requested
                )));
            }
        }

        Ok(())
    }

    fn is_overdue(&self, request: &TokenRequest, now: DateTime<Utc>) -> bool {
        match request.current() {
            Some(stage) => {
                let started = stage.started_at.unwrap_or(request.created_at);
                now - started >= self.config.escalation_timeout()
            }
            None => false,
        }
    }

    async fn expire_at(&self, request: TokenRequest, now: DateTime<Utc>) -> Result<TokenRequest> {
        if request.is_terminal() {
            return Err(AccessError::InvalidTransition(format!(
                "request {} is already {}",
                request.id, request.status
            )));
        }

        let mut updated = request.clone();
        updated.finish(RequestStatus::Expired, now);

        let event = AuditEvent::new(
            AuditEventType::TokenRequestExpired,
            SYSTEM_ACTOR,
            &request.team_id,
            TargetType::TokenRequest,
            &request.id,
        );
        let (committed, record) = self.commit(&request, updated, event).await?;

        info!("Request {} expired at stage {}", committed.id, committed.current_stage);
        self.notify(&committed, record);
        Ok(committed)
    }

    /// Compare-and-swap the transition, then audit it; revert if the audit fails.
    /// The request lock covers all three steps.
    async fn commit(
        &self,
        previous: &TokenRequest,
        updated: TokenRequest,
        event: AuditEvent,
    ) -> Result<(TokenRequest, AuditRecord)> {
        let _guard = self.request_locks.lock(&previous.id).await;
        let committed = self.store.update(updated, previous.version).await.map_err(|e| {
            if let AccessError::Conflict(reason) = &e {
                debug!("Transition on {} lost a race: {}", previous.id, reason);
            }
            e
        })?;

        match self.audit.record(event.before(previous).after(&committed)).await {
            Ok(record) => Ok((committed, record)),
            Err(e) => {
                warn!("Audit write failed for request {}; reverting: {}", previous.id, e);
                if let Err(revert_err) = self.store.update(previous.clone(), committed.version).await {
                    warn!("Failed to revert request {}: {}", previous.id, revert_err);
                }
                Err(e)
            }
        }
    }

    fn notify(&self, request: &TokenRequest, record: AuditRecord) {
        let recipients = match request.current() {
            Some(stage) => vec![stage.approver.clone()],
            None => vec![ApproverSpec::User(request.requester_id.clone())],
        };
        notify::dispatch(&self.notifier, recipients, record);
    }

    async fn settle(&self, request: &TokenRequest) {
        if self.settlements.begin(&request.id) {
            self.attempt_settlement(request).await;
        }
    }

    async fn attempt_settlement(&self, request: &TokenRequest) -> bool {
        let from_account = format!("{}:{}", self.config.treasury_account_prefix, request.team_id);
        let to_account = format!("{}:{}", self.config.recipient_account_prefix, request.requester_id);
        let idempotency_key = settlement_key(&request.id);

        match self
            .ledger
            .transfer(&from_account, &to_account, request.amount, &idempotency_key)
            .await
        {
            Ok(result) => {
                self.settlements
                    .succeed(&request.id, result.transfer_id.clone(), self.clock.now());
                info!("Request {} settled as transfer {}", request.id, result.transfer_id);

                let event = AuditEvent::new(
                    AuditEventType::TokenRequestSettled,
                    SYSTEM_ACTOR,
                    &request.team_id,
                    TargetType::TokenRequest,
                    &request.id,
                )
                .after(&serde_json::json!({
                    "transfer_id": result.transfer_id,
                    "from_account": from_account,
                    "to_account": to_account,
                    "amount": request.amount,
                    "idempotency_key": idempotency_key,
                }));
                if let Err(e) = self.audit.record(event).await {
                    warn!("Failed to audit settlement of request {}: {}", request.id, e);
                }
                true
            }
            Err(e) => {
                warn!("Settlement of request {} failed, left pending: {}", request.id, e);
                self.settlements.fail(&request.id, e.to_string());
                false
            }
        }
    }
}

/// Whether the actor satisfies a stage's approver spec
fn approver_matches(approver: &ApproverSpec, actor_id: &str, member: Option<&Member>) -> bool {
    match approver {
        ApproverSpec::User(user_id) => user_id == actor_id,
        ApproverSpec::Role(role_id) => member.map_or(false, |m| m.holds_role(role_id)),
    }
}
