//! Approval chain policy
//!
//! A pure mapping from (amount, category) to the ordered approvers a request
//! must pass. Independent of the state machine so it can be tested and swapped
//! on its own.

use super::request::ApproverSpec;
use crate::error::{AccessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub trait ChainPolicy: Send + Sync {
    /// Ordered approvers for a request of this size and category
    fn chain(&self, amount: u64, category: &str) -> Vec<ApproverSpec>;
}

/// Approvers required from `min_amount` upward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTier {
    pub min_amount: u64,
    pub approvers: Vec<ApproverSpec>,
}

/// Chain configuration: amount tiers plus per-category extra approvers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainPolicyConfig {
    pub tiers: Vec<ChainTier>,
    /// Appended after the tier approvers for matching categories
    pub category_approvers: BTreeMap<String, Vec<ApproverSpec>>,
}

impl Default for ChainPolicyConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                ChainTier {
                    min_amount: 0,
                    approvers: vec![ApproverSpec::role("manager")],
                },
                ChainTier {
                    min_amount: 1_000,
                    approvers: vec![ApproverSpec::role("manager"), ApproverSpec::role("admin")],
                },
                ChainTier {
                    min_amount: 100_000,
                    approvers: vec![
                        ApproverSpec::role("manager"),
                        ApproverSpec::role("admin"),
                        ApproverSpec::role("owner"),
                    ],
                },
            ],
            category_approvers: BTreeMap::new(),
        }
    }
}

impl ChainPolicyConfig {
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.tiers.first() else {
            return Err(AccessError::InvalidConfig("chain policy has no tiers".to_string()));
        };
        if first.min_amount != 0 {
            return Err(AccessError::InvalidConfig(
                "first chain tier must start at amount 0".to_string(),
            ));
        }
        for pair in self.tiers.windows(2) {
            if pair[1].min_amount <= pair[0].min_amount {
                return Err(AccessError::InvalidConfig(
                    "chain tiers must be sorted by strictly increasing min_amount".to_string(),
                ));
            }
        }
        if let Some(tier) = self.tiers.iter().find(|t| t.approvers.is_empty()) {
            return Err(AccessError::InvalidConfig(format!(
                "chain tier at {} has no approvers",
                tier.min_amount
            )));
        }
        Ok(())
    }
}

/// Tier-by-amount policy
#[derive(Debug, Clone)]
pub struct TieredChainPolicy {
    config: ChainPolicyConfig,
}

impl TieredChainPolicy {
    pub fn new(config: ChainPolicyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl ChainPolicy for TieredChainPolicy {
    fn chain(&self, amount: u64, category: &str) -> Vec<ApproverSpec> {
        let mut chain = self
            .config
            .tiers
            .iter()
            .rev()
            .find(|tier| amount >= tier.min_amount)
            .map(|tier| tier.approvers.clone())
            .unwrap_or_default();

        if let Some(extra) = self.config.category_approvers.get(category) {
            for approver in extra {
                if !chain.contains(approver) {
                    chain.push(approver.clone());
                }
            }
        }

        chain
    }
}
