//! Append-only audit trail for permission mutations and workflow transitions
//!
//! Every record uses the canonical shape
//! `{event_type, actor_id, team_id, target_type, target_id, before, after, timestamp}`.
//! The same shape is handed to the notification dispatcher.
//!
//! There is no update or delete path: [`AuditRecorder`] only appends, and
//! records handed back from queries are copies.

pub mod sink;

pub use sink::{AuditSink, ChainedEntry, InMemoryAuditSink};

use crate::clock::Clock;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Actor recorded for engine-initiated transitions (escalation, expiry, settlement)
pub const SYSTEM_ACTOR: &str = "system";

/// Auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Directory events
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    MemberAdded,
    MemberRoleChanged,
    MemberCustomRoleChanged,
    MemberOverridesChanged,
    MemberDepartmentChanged,
    MemberRemoved,
    DepartmentCreated,
    DepartmentUpdated,
    DepartmentDeleted,
    PermissionInconsistency,

    // Token request events
    TokenRequestCreated,
    TokenRequestAutoApproved,
    TokenStageApproved,
    TokenRequestApproved,
    TokenRequestDenied,
    TokenStageEscalated,
    TokenRequestExpired,
    TokenRequestCancelled,
    TokenRequestSettled,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditEventType::RoleCreated => "role_created",
            AuditEventType::RoleUpdated => "role_updated",
            AuditEventType::RoleDeleted => "role_deleted",
            AuditEventType::MemberAdded => "member_added",
            AuditEventType::MemberRoleChanged => "member_role_changed",
            AuditEventType::MemberCustomRoleChanged => "member_custom_role_changed",
            AuditEventType::MemberOverridesChanged => "member_overrides_changed",
            AuditEventType::MemberDepartmentChanged => "member_department_changed",
            AuditEventType::MemberRemoved => "member_removed",
            AuditEventType::DepartmentCreated => "department_created",
            AuditEventType::DepartmentUpdated => "department_updated",
            AuditEventType::DepartmentDeleted => "department_deleted",
            AuditEventType::PermissionInconsistency => "permission_inconsistency",
            AuditEventType::TokenRequestCreated => "token_request_created",
            AuditEventType::TokenRequestAutoApproved => "token_request_auto_approved",
            AuditEventType::TokenStageApproved => "token_stage_approved",
            AuditEventType::TokenRequestApproved => "token_request_approved",
            AuditEventType::TokenRequestDenied => "token_request_denied",
            AuditEventType::TokenStageEscalated => "token_stage_escalated",
            AuditEventType::TokenRequestExpired => "token_request_expired",
            AuditEventType::TokenRequestCancelled => "token_request_cancelled",
            AuditEventType::TokenRequestSettled => "token_request_settled",
        };
        f.write_str(s)
    }
}

/// Kind of object an audit record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Role,
    Member,
    Department,
    TokenRequest,
}

/// Immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub actor_id: String,
    pub team_id: String,
    pub target_type: TargetType,
    pub target_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Audit record before it is stamped and appended
#[derive(Debug, Clone)]
pub struct AuditEvent {
    event_type: AuditEventType,
    actor_id: String,
    team_id: String,
    target_type: TargetType,
    target_id: String,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        actor_id: impl Into<String>,
        team_id: impl Into<String>,
        target_type: TargetType,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            actor_id: actor_id.into(),
            team_id: team_id.into(),
            target_type,
            target_id: target_id.into(),
            before: None,
            after: None,
        }
    }

    /// Snapshot of the target before the mutation. Serialization failures
    /// degrade to `null` rather than dropping the record.
    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = Some(serde_json::to_value(value).unwrap_or_default());
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = Some(serde_json::to_value(value).unwrap_or_default());
        self
    }

    pub fn event_type(&self) -> AuditEventType {
        self.event_type
    }

    fn stamp(self, timestamp: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            event_type: self.event_type,
            actor_id: self.actor_id,
            team_id: self.team_id,
            target_type: self.target_type,
            target_id: self.target_id,
            before: self.before,
            after: self.after,
            timestamp,
        }
    }
}

/// Filter for audit queries; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub team_id: Option<String>,
    pub actor_id: Option<String>,
    pub target: Option<(TargetType, String)>,
    pub event_type: Option<AuditEventType>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn team(team_id: impl Into<String>) -> Self {
        Self {
            team_id: Some(team_id.into()),
            ..Default::default()
        }
    }

    pub fn target(target_type: TargetType, target_id: impl Into<String>) -> Self {
        Self {
            target: Some((target_type, target_id.into())),
            ..Default::default()
        }
    }

    pub fn actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Default::default()
        }
    }

    pub fn with_event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(team_id) = &self.team_id {
            if &record.team_id != team_id {
                return false;
            }
        }
        if let Some(actor_id) = &self.actor_id {
            if &record.actor_id != actor_id {
                return false;
            }
        }
        if let Some((target_type, target_id)) = &self.target {
            if record.target_type != *target_type || &record.target_id != target_id {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if record.event_type != event_type {
                return false;
            }
        }
        true
    }
}

/// Audit statistics
#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    pub total_records: usize,
    pub by_event_type: HashMap<AuditEventType, usize>,
}

impl AuditStats {
    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.by_event_type.get(&event_type).copied().unwrap_or(0)
    }
}

/// Append-only recorder in front of an [`AuditSink`]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl AuditRecorder {
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Stamp and append a record. A failed append is returned to the caller,
    /// which must not report its mutation as successful.
    pub async fn record(&self, event: AuditEvent) -> Result<AuditRecord> {
        let record = event.stamp(self.clock.now());
        self.sink.append(record.clone()).await?;

        debug!(
            "Audit: {} by {} on {:?}:{}",
            record.event_type, record.actor_id, record.target_type, record.target_id
        );

        Ok(record)
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        self.sink.query(query).await
    }

    /// Records for one target, oldest first
    pub async fn history(&self, target_type: TargetType, target_id: &str) -> Result<Vec<AuditRecord>> {
        self.sink.query(&AuditQuery::target(target_type, target_id)).await
    }

    pub async fn stats(&self) -> Result<AuditStats> {
        let records = self.sink.query(&AuditQuery::default()).await?;
        let mut stats = AuditStats {
            total_records: records.len(),
            ..Default::default()
        };
        for record in &records {
            *stats.by_event_type.entry(record.event_type).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn recorder() -> AuditRecorder {
        AuditRecorder::new(Arc::new(InMemoryAuditSink::new()), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_record_and_history() {
        let audit = recorder();

        audit
            .record(
                AuditEvent::new(AuditEventType::RoleCreated, "alice", "team-1", TargetType::Role, "admin")
                    .after(&serde_json::json!({"name": "Admin"})),
            )
            .await
            .unwrap();
        audit
            .record(AuditEvent::new(
                AuditEventType::RoleDeleted,
                "alice",
                "team-1",
                TargetType::Role,
                "viewer",
            ))
            .await
            .unwrap();

        let history = audit.history(TargetType::Role, "admin").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, AuditEventType::RoleCreated);
        assert!(history[0].before.is_none());
        assert_eq!(history[0].after, Some(serde_json::json!({"name": "Admin"})));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let audit = recorder();
        for (actor, team) in [("alice", "team-1"), ("bob", "team-1"), ("alice", "team-2")] {
            audit
                .record(AuditEvent::new(
                    AuditEventType::MemberAdded,
                    actor,
                    team,
                    TargetType::Member,
                    format!("{}:{}", team, actor),
                ))
                .await
                .unwrap();
        }

        assert_eq!(audit.query(&AuditQuery::team("team-1")).await.unwrap().len(), 2);
        assert_eq!(audit.query(&AuditQuery::actor("alice")).await.unwrap().len(), 2);
        assert_eq!(
            audit
                .query(&AuditQuery::actor("alice").with_limit(1))
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(audit
            .query(&AuditQuery::team("team-1").with_event_type(AuditEventType::MemberRemoved))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stats_by_event_type() {
        let audit = recorder();
        for _ in 0..3 {
            audit
                .record(AuditEvent::new(
                    AuditEventType::TokenRequestCreated,
                    "alice",
                    "team-1",
                    TargetType::TokenRequest,
                    "req",
                ))
                .await
                .unwrap();
        }

        let stats = audit.stats().await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.count(AuditEventType::TokenRequestCreated), 3);
        assert_eq!(stats.count(AuditEventType::TokenRequestDenied), 0);
    }

    #[test]
    fn test_event_type_display_matches_serde() {
        let json = serde_json::to_string(&AuditEventType::TokenStageEscalated).unwrap();
        assert_eq!(json, format!("\"{}\"", AuditEventType::TokenStageEscalated));
    }
}
