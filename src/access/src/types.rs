//! Core access types: identifiers, permission keys, and directory records

use crate::error::{AccessError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Team identifier
pub type TeamId = String;

/// User identifier
pub type UserId = String;

/// Role identifier
pub type RoleId = String;

/// Department identifier
pub type DepartmentId = String;

/// Token request identifier
pub type RequestId = String;

/// Whether a permission key carries a yes/no grant or a numeric limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    Flag,
    Limit,
}

/// Fixed set of permissions understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKey {
    CanRequestTokens,
    CanApproveTokens,
    CanManageTokenRequests,
    CanManageMembers,
    CanManageRoles,
    CanManageDepartments,
    CanViewAuditLog,
    MaxRequestAmount,
    DailyRequestLimit,
}

impl PermissionKey {
    pub const ALL: [PermissionKey; 9] = [
        PermissionKey::CanRequestTokens,
        PermissionKey::CanApproveTokens,
        PermissionKey::CanManageTokenRequests,
        PermissionKey::CanManageMembers,
        PermissionKey::CanManageRoles,
        PermissionKey::CanManageDepartments,
        PermissionKey::CanViewAuditLog,
        PermissionKey::MaxRequestAmount,
        PermissionKey::DailyRequestLimit,
    ];

    pub fn kind(self) -> PermissionKind {
        match self {
            PermissionKey::MaxRequestAmount | PermissionKey::DailyRequestLimit => {
                PermissionKind::Limit
            }
            _ => PermissionKind::Flag,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionKey::CanRequestTokens => "can_request_tokens",
            PermissionKey::CanApproveTokens => "can_approve_tokens",
            PermissionKey::CanManageTokenRequests => "can_manage_token_requests",
            PermissionKey::CanManageMembers => "can_manage_members",
            PermissionKey::CanManageRoles => "can_manage_roles",
            PermissionKey::CanManageDepartments => "can_manage_departments",
            PermissionKey::CanViewAuditLog => "can_view_audit_log",
            PermissionKey::MaxRequestAmount => "max_request_amount",
            PermissionKey::DailyRequestLimit => "daily_request_limit",
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value stored for a permission key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionValue {
    Flag(bool),
    Limit(u64),
}

impl PermissionValue {
    pub fn kind(&self) -> PermissionKind {
        match self {
            PermissionValue::Flag(_) => PermissionKind::Flag,
            PermissionValue::Limit(_) => PermissionKind::Limit,
        }
    }
}

impl From<bool> for PermissionValue {
    fn from(value: bool) -> Self {
        PermissionValue::Flag(value)
    }
}

impl From<u64> for PermissionValue {
    fn from(value: u64) -> Self {
        PermissionValue::Limit(value)
    }
}

/// Shape-checked permission map
///
/// Used both for complete role defaults and for sparse override layers.
/// A key holds a value of the kind declared by [`PermissionKey::kind`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<PermissionKey, PermissionValue>",
    into = "BTreeMap<PermissionKey, PermissionValue>"
)]
pub struct PermissionSet {
    entries: BTreeMap<PermissionKey, PermissionValue>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, rejecting a value of the wrong kind for the key
    pub fn insert(&mut self, key: PermissionKey, value: impl Into<PermissionValue>) -> Result<()> {
        let value = value.into();
        if key.kind() != value.kind() {
            return Err(AccessError::InvalidInput(format!(
                "permission '{}' expects a {:?} value",
                key,
                key.kind()
            )));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, key: PermissionKey, value: impl Into<PermissionValue>) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    pub fn remove(&mut self, key: PermissionKey) -> Option<PermissionValue> {
        self.entries.remove(&key)
    }

    pub fn get(&self, key: PermissionKey) -> Option<PermissionValue> {
        self.entries.get(&key).copied()
    }

    /// True only for a flag key explicitly set to `true`
    pub fn allows(&self, key: PermissionKey) -> bool {
        matches!(self.entries.get(&key), Some(PermissionValue::Flag(true)))
    }

    /// Numeric limit for a limit key; `None` means unlimited
    pub fn limit(&self, key: PermissionKey) -> Option<u64> {
        match self.entries.get(&key) {
            Some(PermissionValue::Limit(limit)) => Some(*limit),
            _ => None,
        }
    }

    /// Apply a more specific layer: every key it carries replaces ours
    pub fn overlay(&mut self, layer: &PermissionSet) {
        for (key, value) in &layer.entries {
            self.entries.insert(*key, *value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PermissionKey, PermissionValue)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TryFrom<BTreeMap<PermissionKey, PermissionValue>> for PermissionSet {
    type Error = AccessError;

    fn try_from(map: BTreeMap<PermissionKey, PermissionValue>) -> Result<Self> {
        let mut set = PermissionSet::new();
        for (key, value) in map {
            set.insert(key, value)?;
        }
        Ok(set)
    }
}

impl From<PermissionSet> for BTreeMap<PermissionKey, PermissionValue> {
    fn from(set: PermissionSet) -> Self {
        set.entries
    }
}

/// Role definition, either a team's system role or a custom role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub team_id: TeamId,
    pub name: String,
    #[serde(default)]
    pub permissions: PermissionSet,
    #[serde(default)]
    pub is_system: bool,
}

impl Role {
    pub fn new(id: impl Into<String>, team_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            team_id: team_id.into(),
            name: name.into(),
            permissions: PermissionSet::new(),
            is_system: false,
        }
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }
}

/// A user's membership in a team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub team_id: TeamId,
    pub user_id: UserId,
    pub role_id: RoleId,
    #[serde(default)]
    pub custom_role_id: Option<RoleId>,
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[serde(default)]
    pub overrides: PermissionSet,
    /// Set by the directory writer when the member is added
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(team_id: impl Into<String>, user_id: impl Into<String>, role_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            user_id: user_id.into(),
            role_id: role_id.into(),
            custom_role_id: None,
            department_id: None,
            overrides: PermissionSet::new(),
            joined_at: None,
        }
    }

    pub fn with_custom_role(mut self, role_id: impl Into<String>) -> Self {
        self.custom_role_id = Some(role_id.into());
        self
    }

    pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    pub fn with_overrides(mut self, overrides: PermissionSet) -> Self {
        self.overrides = overrides;
        self
    }

    /// True if the member holds the role as base or custom role
    pub fn holds_role(&self, role_id: &str) -> bool {
        self.role_id == role_id || self.custom_role_id.as_deref() == Some(role_id)
    }
}

/// Department within a team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub team_id: TeamId,
    pub name: String,
    #[serde(default)]
    pub overrides: PermissionSet,
    /// Budget fields, opaque to the engine
    #[serde(default)]
    pub budget: serde_json::Value,
}

impl Department {
    pub fn new(id: impl Into<String>, team_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            team_id: team_id.into(),
            name: name.into(),
            overrides: PermissionSet::new(),
            budget: serde_json::Value::Null,
        }
    }

    pub fn with_overrides(mut self, overrides: PermissionSet) -> Self {
        self.overrides = overrides;
        self
    }
}
