//! Audited mutation entry points for the team directory
//!
//! Every successful mutation writes exactly one audit record and invalidates the
//! permission cache before returning, so the writer's next read is fresh. When
//! the audit write fails the store change is rolled back and the error surfaces.

use super::DirectoryStore;
use crate::audit::{AuditEvent, AuditEventType, AuditRecorder, TargetType};
use crate::clock::Clock;
use crate::error::{AccessError, Result};
use crate::permissions::PermissionCache;
use crate::types::{Department, Member, PermissionKey, PermissionValue, Role};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Writer for roles, members, and departments
pub struct TeamAdmin {
    store: Arc<dyn DirectoryStore>,
    cache: Arc<PermissionCache>,
    audit: Arc<AuditRecorder>,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write sequences so before/after snapshots are exact
    write_lock: Mutex<()>,
}

impl TeamAdmin {
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        cache: Arc<PermissionCache>,
        audit: Arc<AuditRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache,
            audit,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    // Roles

    /// Create or replace a role. Affects every member of the team.
    pub async fn save_role(&self, actor_id: &str, role: Role) -> Result<Role> {
        self.require(actor_id, &role.team_id, PermissionKey::CanManageRoles).await?;
        let _guard = self.write_lock.lock().await;

        let before = self.store.get_role(&role.team_id, &role.id).await?;
        if let Some(existing) = &before {
            if existing.is_system && !role.is_system {
                debug!("Refusing to demote system role {}", role.id);
                return Err(AccessError::PermissionDenied);
            }
        }
        let event_type = if before.is_some() {
            AuditEventType::RoleUpdated
        } else {
            AuditEventType::RoleCreated
        };

        self.commit_role(actor_id, event_type, &role.team_id, &role.id, before, Some(role.clone()))
            .await?;
        Ok(role)
    }

    /// Delete a custom role that no member references
    pub async fn delete_role(&self, actor_id: &str, team_id: &str, role_id: &str) -> Result<()> {
        self.require(actor_id, team_id, PermissionKey::CanManageRoles).await?;
        let _guard = self.write_lock.lock().await;

        let role = self
            .store
            .get_role(team_id, role_id)
            .await?
            .ok_or_else(|| AccessError::not_found("role", role_id))?;
        if role.is_system {
            debug!("Refusing to delete system role {}", role_id);
            return Err(AccessError::PermissionDenied);
        }

        let in_use = self
            .store
            .list_members(team_id)
            .await?
            .iter()
            .any(|m| m.holds_role(role_id));
        if in_use {
            return Err(AccessError::Conflict(format!(
                "role '{}' is still assigned to members",
                role_id
            )));
        }

        self.commit_role(actor_id, AuditEventType::RoleDeleted, team_id, role_id, Some(role), None)
            .await
    }

    // Members

    pub async fn add_member(&self, actor_id: &str, mut member: Member) -> Result<Member> {
        self.require(actor_id, &member.team_id, PermissionKey::CanManageMembers).await?;
        let _guard = self.write_lock.lock().await;

        if self.store.get_member(&member.team_id, &member.user_id).await?.is_some() {
            return Err(AccessError::Conflict(format!(
                "user '{}' is already a member of team '{}'",
                member.user_id, member.team_id
            )));
        }
        self.check_references(&member).await?;
        member.joined_at = Some(self.clock.now());

        self.commit_member(actor_id, AuditEventType::MemberAdded, None, Some(member.clone()))
            .await?;
        Ok(member)
    }

    pub async fn update_member_role(
        &self,
        actor_id: &str,
        team_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<Member> {
        self.update_member(actor_id, team_id, user_id, AuditEventType::MemberRoleChanged, |m| {
            m.role_id = role_id.to_string();
            Ok(())
        })
        .await
    }

    /// Assign or clear (`None`) the member's custom role
    pub async fn set_custom_role(
        &self,
        actor_id: &str,
        team_id: &str,
        user_id: &str,
        custom_role_id: Option<&str>,
    ) -> Result<Member> {
        self.update_member(actor_id, team_id, user_id, AuditEventType::MemberCustomRoleChanged, |m| {
            m.custom_role_id = custom_role_id.map(str::to_string);
            Ok(())
        })
        .await
    }

    pub async fn set_department(
        &self,
        actor_id: &str,
        team_id: &str,
        user_id: &str,
        department_id: Option<&str>,
    ) -> Result<Member> {
        self.update_member(actor_id, team_id, user_id, AuditEventType::MemberDepartmentChanged, |m| {
            m.department_id = department_id.map(str::to_string);
            Ok(())
        })
        .await
    }

    pub async fn set_member_override(
        &self,
        actor_id: &str,
        team_id: &str,
        user_id: &str,
        key: PermissionKey,
        value: impl Into<PermissionValue>,
    ) -> Result<Member> {
        let value = value.into();
        self.update_member(actor_id, team_id, user_id, AuditEventType::MemberOverridesChanged, |m| {
            m.overrides.insert(key, value)
        })
        .await
    }

    pub async fn clear_member_override(
        &self,
        actor_id: &str,
        team_id: &str,
        user_id: &str,
        key: PermissionKey,
    ) -> Result<Member> {
        self.update_member(actor_id, team_id, user_id, AuditEventType::MemberOverridesChanged, |m| {
            m.overrides.remove(key);
            Ok(())
        })
        .await
    }

    pub async fn remove_member(&self, actor_id: &str, team_id: &str, user_id: &str) -> Result<()> {
        self.require(actor_id, team_id, PermissionKey::CanManageMembers).await?;
        let _guard = self.write_lock.lock().await;

        let before = self
            .store
            .get_member(team_id, user_id)
            .await?
            .ok_or_else(|| AccessError::not_found("member", format!("{}/{}", team_id, user_id)))?;

        self.commit_member(actor_id, AuditEventType::MemberRemoved, Some(before), None)
            .await
    }

    // Departments

    pub async fn save_department(&self, actor_id: &str, department: Department) -> Result<Department> {
        self.require(actor_id, &department.team_id, PermissionKey::CanManageDepartments)
            .await?;
        let _guard = self.write_lock.lock().await;

        let before = self
            .store
            .get_department(&department.team_id, &department.id)
            .await?;
        let event_type = if before.is_some() {
            AuditEventType::DepartmentUpdated
        } else {
            AuditEventType::DepartmentCreated
        };

        self.commit_department(actor_id, event_type, before, Some(department.clone()))
            .await?;
        Ok(department)
    }

    pub async fn delete_department(&self, actor_id: &str, team_id: &str, department_id: &str) -> Result<()> {
        self.require(actor_id, team_id, PermissionKey::CanManageDepartments).await?;
        let _guard = self.write_lock.lock().await;

        let before = self
            .store
            .get_department(team_id, department_id)
            .await?
            .ok_or_else(|| AccessError::not_found("department", department_id))?;

        let in_use = self
            .store
            .list_members(team_id)
            .await?
            .iter()
            .any(|m| m.department_id.as_deref() == Some(department_id));
        if in_use {
            return Err(AccessError::Conflict(format!(
                "department '{}' still has members",
                department_id
            )));
        }

        self.commit_department(actor_id, AuditEventType::DepartmentDeleted, Some(before), None)
            .await
    }

    // Private helpers

    /// Actor must hold `key` in the team. Unknown actors are denied, not reported missing.
    async fn require(&self, actor_id: &str, team_id: &str, key: PermissionKey) -> Result<()> {
        match self.cache.get_or_resolve(actor_id, team_id).await {
            Ok(permissions) if permissions.allows(key) => Ok(()),
            Ok(_) => {
                debug!("Actor {} lacks {} in team {}", actor_id, key, team_id);
                Err(AccessError::PermissionDenied)
            }
            Err(AccessError::NotFound { .. }) => {
                debug!("Actor {} is not a member of team {}", actor_id, team_id);
                Err(AccessError::PermissionDenied)
            }
            Err(e) => Err(e),
        }
    }

    async fn check_references(&self, member: &Member) -> Result<()> {
        if self.store.get_role(&member.team_id, &member.role_id).await?.is_none() {
            return Err(AccessError::not_found("role", member.role_id.clone()));
        }
        if let Some(custom) = &member.custom_role_id {
            if self.store.get_role(&member.team_id, custom).await?.is_none() {
                return Err(AccessError::not_found("role", custom.clone()));
            }
        }
        if let Some(department) = &member.department_id {
            if self
                .store
                .get_department(&member.team_id, department)
                .await?
                .is_none()
            {
                return Err(AccessError::not_found("department", department.clone()));
            }
        }
        Ok(())
    }

    async fn update_member<F>(
        &self,
        actor_id: &str,
        team_id: &str,
        user_id: &str,
        event_type: AuditEventType,
        mutate: F,
    ) -> Result<Member>
    where
        F: FnOnce(&mut Member) -> Result<()>,
    {
        self.require(actor_id, team_id, PermissionKey::CanManageMembers).await?;
        let _guard = self.write_lock.lock().await;

        let before = self
            .store
            .get_member(team_id, user_id)
            .await?
            .ok_or_else(|| AccessError::not_found("member", format!("{}/{}", team_id, user_id)))?;

        let mut after = before.clone();
        mutate(&mut after)?;
        self.check_references(&after).await?;

        self.commit_member(actor_id, event_type, Some(before), Some(after.clone()))
            .await?;
        Ok(after)
    }

    async fn commit_role(
        &self,
        actor_id: &str,
        event_type: AuditEventType,
        team_id: &str,
        role_id: &str,
        before: Option<Role>,
        after: Option<Role>,
    ) -> Result<()> {
        match &after {
            Some(role) => self.store.put_role(role.clone()).await?,
            None => self.store.remove_role(team_id, role_id).await?,
        };

        let mut event = AuditEvent::new(event_type, actor_id, team_id, TargetType::Role, role_id);
        if let Some(role) = &before {
            event = event.before(role);
        }
        if let Some(role) = &after {
            event = event.after(role);
        }

        if let Err(e) = self.audit.record(event).await {
            warn!("Audit write failed for {} on role {}, rolling back: {}", event_type, role_id, e);
            let restored = match before {
                Some(role) => self.store.put_role(role).await.map(|_| ()),
                None => self.store.remove_role(team_id, role_id).await.map(|_| ()),
            };
            if let Err(restore_err) = restored {
                warn!("Rollback of role {} failed: {}", role_id, restore_err);
            }
            self.cache.invalidate_team(team_id);
            return Err(e);
        }

        self.cache.invalidate_team(team_id);
        info!("{} {} in team {} by {}", event_type, role_id, team_id, actor_id);
        Ok(())
    }

    async fn commit_member(
        &self,
        actor_id: &str,
        event_type: AuditEventType,
        before: Option<Member>,
        after: Option<Member>,
    ) -> Result<()> {
        let Some(subject) = after.as_ref().or(before.as_ref()) else {
            return Err(AccessError::Internal("member change without a subject".to_string()));
        };
        let team_id = subject.team_id.clone();
        let user_id = subject.user_id.clone();

        match &after {
            Some(member) => self.store.put_member(member.clone()).await?,
            None => self.store.remove_member(&team_id, &user_id).await?,
        };

        let mut event = AuditEvent::new(event_type, actor_id, &team_id, TargetType::Member, &user_id);
        if let Some(member) = &before {
            event = event.before(member);
        }
        if let Some(member) = &after {
            event = event.after(member);
        }

        if let Err(e) = self.audit.record(event).await {
            warn!("Audit write failed for {} on member {}, rolling back: {}", event_type, user_id, e);
            let restored = match before {
                Some(member) => self.store.put_member(member).await.map(|_| ()),
                None => self.store.remove_member(&team_id, &user_id).await.map(|_| ()),
            };
            if let Err(restore_err) = restored {
                warn!("Rollback of member {} failed: {}", user_id, restore_err);
            }
            self.cache.invalidate_member(&user_id, &team_id);
            return Err(e);
        }

        self.cache.invalidate_member(&user_id, &team_id);
        info!("{} {} in team {} by {}", event_type, user_id, team_id, actor_id);
        Ok(())
    }

    async fn commit_department(
        &self,
        actor_id: &str,
        event_type: AuditEventType,
        before: Option<Department>,
        after: Option<Department>,
    ) -> Result<()> {
        let Some(subject) = after.as_ref().or(before.as_ref()) else {
            return Err(AccessError::Internal("department change without a subject".to_string()));
        };
        let team_id = subject.team_id.clone();
        let department_id = subject.id.clone();

        match &after {
            Some(department) => self.store.put_department(department.clone()).await?,
            None => self.store.remove_department(&team_id, &department_id).await?,
        };

        let mut event = AuditEvent::new(
            event_type,
            actor_id,
            &team_id,
            TargetType::Department,
            &department_id,
        );
        if let Some(department) = &before {
            event = event.before(department);
        }
        if let Some(department) = &after {
            event = event.after(department);
        }

        if let Err(e) = self.audit.record(event).await {
            warn!(
                "Audit write failed for {} on department {}, rolling back: {}",
                event_type, department_id, e
            );
            let restored = match before {
                Some(department) => self.store.put_department(department).await.map(|_| ()),
                None => self
                    .store
                    .remove_department(&team_id, &department_id)
                    .await
                    .map(|_| ()),
            };
            if let Err(restore_err) = restored {
                warn!("Rollback of department {} failed: {}", department_id, restore_err);
            }
            self.cache.invalidate_team(&team_id);
            return Err(e);
        }

        self.cache.invalidate_team(&team_id);
        info!("{} {} in team {} by {}", event_type, department_id, team_id, actor_id);
        Ok(())
    }
}
