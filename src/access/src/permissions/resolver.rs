//! Stateless permission resolver
//!
//! Reads the member, their roles, and their department from the injected stores
//! and merges them by precedence. Identical directory state always yields an
//! identical [`PermissionSet`].

use crate::audit::{AuditEvent, AuditEventType, AuditRecorder, TargetType, SYSTEM_ACTOR};
use crate::directory::{DepartmentStore, MemberStore, RoleStore};
use crate::error::{AccessError, Result};
use crate::types::{Member, PermissionSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Merge permission layers, least specific first
///
/// Precedence: member override > custom role > department > role default.
pub fn merge_layers(
    role_default: &PermissionSet,
    department: Option<&PermissionSet>,
    custom_role: Option<&PermissionSet>,
    member_override: &PermissionSet,
) -> PermissionSet {
    let mut effective = role_default.clone();
    if let Some(layer) = department {
        effective.overlay(layer);
    }
    if let Some(layer) = custom_role {
        effective.overlay(layer);
    }
    effective.overlay(member_override);
    effective
}

/// Computes effective permissions for a (user, team) pair
pub struct PermissionResolver {
    roles: Arc<dyn RoleStore>,
    members: Arc<dyn MemberStore>,
    departments: Arc<dyn DepartmentStore>,
    audit: Arc<AuditRecorder>,
}

impl PermissionResolver {
    pub fn new(
        roles: Arc<dyn RoleStore>,
        members: Arc<dyn MemberStore>,
        departments: Arc<dyn DepartmentStore>,
        audit: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            roles,
            members,
            departments,
            audit,
        }
    }

    /// Resolve the effective permission set
    ///
    /// # Errors
    ///
    /// `NotFound` if the user is not a member of the team. A member whose role,
    /// custom role, or department is missing gets an empty set instead, and the
    /// inconsistency is written to the audit log.
    pub async fn resolve(&self, user_id: &str, team_id: &str) -> Result<PermissionSet> {
        let member = self
            .members
            .get_member(team_id, user_id)
            .await?
            .ok_or_else(|| AccessError::not_found("member", format!("{}/{}", team_id, user_id)))?;

        let Some(role) = self.roles.get_role(team_id, &member.role_id).await? else {
            return self.inconsistent(&member, "role", &member.role_id).await;
        };

        let custom_role = match &member.custom_role_id {
            Some(id) => match self.roles.get_role(team_id, id).await? {
                Some(role) => Some(role),
                None => return self.inconsistent(&member, "custom_role", id).await,
            },
            None => None,
        };

        let department = match &member.department_id {
            Some(id) => match self.departments.get_department(team_id, id).await? {
                Some(department) => Some(department),
                None => return self.inconsistent(&member, "department", id).await,
            },
            None => None,
        };

        let effective = merge_layers(
            &role.permissions,
            department.as_ref().map(|d| &d.overrides),
            custom_role.as_ref().map(|r| &r.permissions),
            &member.overrides,
        );

        debug!(
            "Resolved {} permissions for {} in team {}",
            effective.len(),
            user_id,
            team_id
        );

        Ok(effective)
    }

    /// Deny by default on a dangling reference
    async fn inconsistent(&self, member: &Member, missing: &str, id: &str) -> Result<PermissionSet> {
        warn!(
            "Member {} in team {} references missing {} '{}'; resolving to no permissions",
            member.user_id, member.team_id, missing, id
        );

        let event = AuditEvent::new(
            AuditEventType::PermissionInconsistency,
            SYSTEM_ACTOR,
            &member.team_id,
            TargetType::Member,
            &member.user_id,
        )
        .after(&serde_json::json!({ "missing": missing, "id": id }));

        if let Err(e) = self.audit.record(event).await {
            warn!("Failed to record permission inconsistency: {}", e);
        }

        Ok(PermissionSet::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditQuery, InMemoryAuditSink};
    use crate::clock::SystemClock;
    use crate::directory::{DirectoryStore, InMemoryDirectory};
    use crate::types::{Department, Member, PermissionKey, Role};

    fn flags(entries: &[(PermissionKey, bool)]) -> PermissionSet {
        let mut set = PermissionSet::new();
        for (key, value) in entries {
            set.insert(*key, *value).unwrap();
        }
        set
    }

    async fn setup() -> (Arc<InMemoryDirectory>, Arc<AuditRecorder>, PermissionResolver) {
        let directory = Arc::new(InMemoryDirectory::new());
        let audit = Arc::new(AuditRecorder::new(
            Arc::new(InMemoryAuditSink::new()),
            Arc::new(SystemClock),
        ));
        let resolver = PermissionResolver::new(
            directory.clone(),
            directory.clone(),
            directory.clone(),
            audit.clone(),
        );
        (directory, audit, resolver)
    }

    #[test]
    fn test_merge_precedence() {
        let role = flags(&[
            (PermissionKey::CanApproveTokens, true),
            (PermissionKey::CanRequestTokens, true),
            (PermissionKey::CanViewAuditLog, false),
        ]);
        let department = flags(&[(PermissionKey::CanApproveTokens, false)]);
        let custom = flags(&[
            (PermissionKey::CanApproveTokens, true),
            (PermissionKey::CanViewAuditLog, true),
        ]);
        let member = flags(&[(PermissionKey::CanViewAuditLog, false)]);

        let effective = merge_layers(&role, Some(&department), Some(&custom), &member);

        // custom role beats department
        assert!(effective.allows(PermissionKey::CanApproveTokens));
        // member override beats custom role
        assert!(!effective.allows(PermissionKey::CanViewAuditLog));
        // untouched role default survives
        assert!(effective.allows(PermissionKey::CanRequestTokens));
    }

    #[tokio::test]
    async fn test_resolve_missing_member_is_not_found() {
        let (_directory, _audit, resolver) = setup().await;
        let err = resolver.resolve("ghost", "team-1").await.unwrap_err();
        assert!(matches!(err, AccessError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_missing_role_denies_and_audits() {
        let (directory, audit, resolver) = setup().await;
        directory
            .put_member(
                Member::new("team-1", "alice", "vanished")
                    .with_overrides(flags(&[(PermissionKey::CanApproveTokens, true)])),
            )
            .await
            .unwrap();

        let effective = resolver.resolve("alice", "team-1").await.unwrap();
        assert!(effective.is_empty());

        let warnings = audit
            .query(&AuditQuery::team("team-1").with_event_type(AuditEventType::PermissionInconsistency))
            .await
            .unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].target_id, "alice");
    }

    #[tokio::test]
    async fn test_resolve_missing_department_denies() {
        let (directory, _audit, resolver) = setup().await;
        directory
            .put_role(
                Role::new("member", "team-1", "Member")
                    .with_permissions(flags(&[(PermissionKey::CanRequestTokens, true)])),
            )
            .await
            .unwrap();
        directory
            .put_member(Member::new("team-1", "alice", "member").with_department("gone"))
            .await
            .unwrap();

        let effective = resolver.resolve("alice", "team-1").await.unwrap();
        assert!(!effective.allows(PermissionKey::CanRequestTokens));
    }

    #[tokio::test]
    async fn test_resolve_all_layers() {
        let (directory, _audit, resolver) = setup().await;
        directory
            .put_role(
                Role::new("member", "team-1", "Member")
                    .system()
                    .with_permissions(flags(&[
                        (PermissionKey::CanRequestTokens, true),
                        (PermissionKey::CanApproveTokens, false),
                    ])),
            )
            .await
            .unwrap();
        directory
            .put_role(
                Role::new("approver", "team-1", "Approver")
                    .with_permissions(flags(&[(PermissionKey::CanApproveTokens, true)])),
            )
            .await
            .unwrap();
        directory
            .put_department(
                Department::new("finance", "team-1", "Finance")
                    .with_overrides(flags(&[(PermissionKey::CanRequestTokens, false)])),
            )
            .await
            .unwrap();
        directory
            .put_member(
                Member::new("team-1", "alice", "member")
                    .with_custom_role("approver")
                    .with_department("finance"),
            )
            .await
            .unwrap();

        let effective = resolver.resolve("alice", "team-1").await.unwrap();
        assert!(effective.allows(PermissionKey::CanApproveTokens));
        assert!(!effective.allows(PermissionKey::CanRequestTokens));
    }
}
