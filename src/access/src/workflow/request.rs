//! Token request and approval stage model

use crate::error::{AccessError, Result};
use crate::types::{RequestId, RoleId, TeamId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Denied => "DENIED",
            RequestStatus::Expired => "EXPIRED",
            RequestStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Stage status. Moves from `Pending` at most once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,
    Approved,
    Denied,
}

/// Who may decide a stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ApproverSpec {
    /// One specific user
    User(UserId),
    /// Any member holding the role, as base or custom role
    Role(RoleId),
}

impl ApproverSpec {
    pub fn user(id: impl Into<String>) -> Self {
        ApproverSpec::User(id.into())
    }

    pub fn role(id: impl Into<String>) -> Self {
        ApproverSpec::Role(id.into())
    }
}

impl fmt::Display for ApproverSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApproverSpec::User(id) => write!(f, "user:{}", id),
            ApproverSpec::Role(id) => write!(f, "role:{}", id),
        }
    }
}

/// Reviewer verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Deny,
}

/// One step of an approval chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStage {
    pub index: usize,
    pub approver: ApproverSpec,
    pub status: StageStatus,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    /// When the stage became current; `None` while not yet reached
    pub started_at: Option<DateTime<Utc>>,
    /// Times this stage was handed to the escalation target
    pub escalations: u32,
}

impl ApprovalStage {
    pub fn new(index: usize, approver: ApproverSpec) -> Self {
        Self {
            index,
            approver,
            status: StageStatus::Pending,
            decided_by: None,
            decided_at: None,
            comments: None,
            started_at: None,
            escalations: 0,
        }
    }

    fn decide(&mut self, status: StageStatus, actor_id: &str, comments: Option<String>, at: DateTime<Utc>) {
        self.status = status;
        self.decided_by = Some(actor_id.to_string());
        self.decided_at = Some(at);
        self.comments = comments;
    }
}

/// Token request moving through its approval chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub id: RequestId,
    pub team_id: TeamId,
    pub requester_id: UserId,
    pub amount: u64,
    pub reason: String,
    pub category: String,
    pub status: RequestStatus,
    pub stages: Vec<ApprovalStage>,
    pub current_stage: usize,
    pub auto_approved: bool,
    pub created_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped on every committed change
    pub version: u64,
}

impl TokenRequest {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn current(&self) -> Option<&ApprovalStage> {
        if self.is_terminal() {
            return None;
        }
        self.stages.get(self.current_stage)
    }

    pub fn any_stage_approved(&self) -> bool {
        self.stages.iter().any(|s| s.status == StageStatus::Approved)
    }

    /// Status implied by the stage statuses alone
    ///
    /// Any denial means `Denied`, all approvals mean `Approved`, otherwise `Pending`.
    /// Expiry and cancellation are explicit transitions on top of this.
    pub fn stage_outcome(&self) -> RequestStatus {
        if self.stages.iter().any(|s| s.status == StageStatus::Denied) {
            RequestStatus::Denied
        } else if self.stages.iter().all(|s| s.status == StageStatus::Approved) {
            RequestStatus::Approved
        } else {
            RequestStatus::Pending
        }
    }

    /// Check the structural invariants of a stored request
    pub fn check_invariants(&self) -> Result<()> {
        let violation = |msg: String| Err(AccessError::Internal(format!("request {}: {}", self.id, msg)));

        match self.status {
            RequestStatus::Pending => {
                if self.current_stage >= self.stages.len() {
                    return violation("pending without a current stage".to_string());
                }
                for stage in &self.stages[..self.current_stage] {
                    if stage.status != StageStatus::Approved {
                        return violation(format!("stage {} before current is not approved", stage.index));
                    }
                }
                for stage in &self.stages[self.current_stage..] {
                    if stage.status != StageStatus::Pending {
                        return violation(format!("stage {} at or after current is decided", stage.index));
                    }
                }
                for stage in &self.stages[self.current_stage + 1..] {
                    if stage.started_at.is_some() {
                        return violation(format!("stage {} started before being reached", stage.index));
                    }
                }
                if self.terminal_at.is_some() {
                    return violation("pending with terminal timestamp".to_string());
                }
            }
            RequestStatus::Approved | RequestStatus::Denied => {
                if self.stage_outcome() != self.status {
                    return violation(format!("status {} disagrees with stages", self.status));
                }
                if self.auto_approved && !self.stages.is_empty() {
                    return violation("auto-approved request has stages".to_string());
                }
            }
            RequestStatus::Expired | RequestStatus::Cancelled => {
                if self.stages.iter().any(|s| s.status == StageStatus::Denied) {
                    return violation(format!("{} request has a denied stage", self.status));
                }
            }
        }

        if self.is_terminal() && self.terminal_at.is_none() {
            return violation("terminal without timestamp".to_string());
        }

        Ok(())
    }

    /// Approve the current stage, advancing or finishing the chain
    pub(crate) fn approve_current(&mut self, actor_id: &str, comments: Option<String>, at: DateTime<Utc>) {
        let index = self.current_stage;
        self.stages[index].decide(StageStatus::Approved, actor_id, comments, at);

        if index + 1 < self.stages.len() {
            self.current_stage = index + 1;
            self.stages[index + 1].started_at = Some(at);
        } else {
            self.status = RequestStatus::Approved;
            self.terminal_at = Some(at);
        }
    }

    /// Deny the current stage, ending the request
    pub(crate) fn deny_current(&mut self, actor_id: &str, comments: Option<String>, at: DateTime<Utc>) {
        let index = self.current_stage;
        self.stages[index].decide(StageStatus::Denied, actor_id, comments, at);
        self.status = RequestStatus::Denied;
        self.terminal_at = Some(at);
    }

    pub(crate) fn finish(&mut self, status: RequestStatus, at: DateTime<Utc>) {
        self.status = status;
        self.terminal_at = Some(at);
    }
}
