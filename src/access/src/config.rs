//! Access engine configuration

use crate::error::{AccessError, Result};
use crate::permissions::CacheConfig;
use crate::workflow::{ChainPolicyConfig, WorkflowConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration, usually loaded from TOML
///
/// ```toml
/// [cache]
/// ttl_secs = 300
///
/// [workflow]
/// auto_approval_threshold = 100
/// escalation_target = { type = "role", id = "owner" }
///
/// [[chain.tiers]]
/// min_amount = 0
/// approvers = [{ type = "role", id = "manager" }]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub chain: ChainPolicyConfig,
}

impl AccessConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AccessError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AccessConfig = toml::from_str(contents)
            .map_err(|e| AccessError::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AccessError::InvalidConfig(format!("failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(AccessError::InvalidConfig(
                "cache capacity must be greater than 0".to_string(),
            ));
        }
        self.workflow.validate()?;
        self.chain.validate()?;
        Ok(())
    }
}
