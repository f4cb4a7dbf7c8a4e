//! Team directory: roles, members, and departments
//!
//! The read traits ([`RoleStore`], [`MemberStore`], [`DepartmentStore`]) are what
//! the permission resolver and the approval workflow consume. [`DirectoryStore`]
//! adds raw storage primitives; audited, cache-invalidating mutations go through
//! [`TeamAdmin`].

pub mod admin;

pub use admin::TeamAdmin;

use crate::error::Result;
use crate::types::{Department, Member, Role, TeamId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Role definitions
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_role(&self, team_id: &str, role_id: &str) -> Result<Option<Role>>;
}

/// Team memberships
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn get_member(&self, team_id: &str, user_id: &str) -> Result<Option<Member>>;

    async fn list_members(&self, team_id: &str) -> Result<Vec<Member>>;
}

/// Department definitions
#[async_trait]
pub trait DepartmentStore: Send + Sync {
    async fn get_department(&self, team_id: &str, department_id: &str) -> Result<Option<Department>>;
}

/// Storage primitives behind [`TeamAdmin`]
///
/// Writes here are neither audited nor cache-invalidating. Each returns the
/// previous value so a failed audit write can be rolled back.
#[async_trait]
pub trait DirectoryStore: RoleStore + MemberStore + DepartmentStore {
    async fn put_role(&self, role: Role) -> Result<Option<Role>>;

    async fn remove_role(&self, team_id: &str, role_id: &str) -> Result<Option<Role>>;

    async fn put_member(&self, member: Member) -> Result<Option<Member>>;

    async fn remove_member(&self, team_id: &str, user_id: &str) -> Result<Option<Member>>;

    async fn put_department(&self, department: Department) -> Result<Option<Department>>;

    async fn remove_department(&self, team_id: &str, department_id: &str) -> Result<Option<Department>>;
}

type TeamKey = (TeamId, String);

fn team_key(team_id: &str, id: &str) -> TeamKey {
    (team_id.to_string(), id.to_string())
}

/// In-memory directory
#[derive(Default)]
pub struct InMemoryDirectory {
    roles: Arc<RwLock<HashMap<TeamKey, Role>>>,
    members: Arc<RwLock<HashMap<TeamKey, Member>>>,
    departments: Arc<RwLock<HashMap<TeamKey, Department>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for InMemoryDirectory {
    async fn get_role(&self, team_id: &str, role_id: &str) -> Result<Option<Role>> {
        let roles = self.roles.read().await;
        Ok(roles.get(&team_key(team_id, role_id)).cloned())
    }
}

#[async_trait]
impl MemberStore for InMemoryDirectory {
    async fn get_member(&self, team_id: &str, user_id: &str) -> Result<Option<Member>> {
        let members = self.members.read().await;
        Ok(members.get(&team_key(team_id, user_id)).cloned())
    }

    async fn list_members(&self, team_id: &str) -> Result<Vec<Member>> {
        let members = self.members.read().await;
        let mut listed: Vec<Member> = members
            .values()
            .filter(|m| m.team_id == team_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(listed)
    }
}

#[async_trait]
impl DepartmentStore for InMemoryDirectory {
    async fn get_department(&self, team_id: &str, department_id: &str) -> Result<Option<Department>> {
        let departments = self.departments.read().await;
        Ok(departments.get(&team_key(team_id, department_id)).cloned())
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn put_role(&self, role: Role) -> Result<Option<Role>> {
        let mut roles = self.roles.write().await;
        Ok(roles.insert(team_key(&role.team_id, &role.id), role))
    }

    async fn remove_role(&self, team_id: &str, role_id: &str) -> Result<Option<Role>> {
        let mut roles = self.roles.write().await;
        Ok(roles.remove(&team_key(team_id, role_id)))
    }

    async fn put_member(&self, member: Member) -> Result<Option<Member>> {
        let mut members = self.members.write().await;
        Ok(members.insert(team_key(&member.team_id, &member.user_id), member))
    }

    async fn remove_member(&self, team_id: &str, user_id: &str) -> Result<Option<Member>> {
        let mut members = self.members.write().await;
        Ok(members.remove(&team_key(team_id, user_id)))
    }

    async fn put_department(&self, department: Department) -> Result<Option<Department>> {
        let mut departments = self.departments.write().await;
        Ok(departments.insert(team_key(&department.team_id, &department.id), department))
    }

    async fn remove_department(&self, team_id: &str, department_id: &str) -> Result<Option<Department>> {
        let mut departments = self.departments.write().await;
        Ok(departments.remove(&team_key(team_id, department_id)))
    }
}
