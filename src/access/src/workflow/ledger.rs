//! Ledger collaborator and settlement tracking
//!
//! Settlement is decoupled from approval: a terminal `APPROVED` request stays
//! approved whatever the ledger does. Outcomes are tracked here, beside the
//! read-only request, and failed transfers are retried by the reconciler with
//! the same idempotency key.

use crate::error::Result;
use crate::types::RequestId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Domain prefix for settlement idempotency keys
const SETTLEMENT_KEY_DOMAIN: &str = "token-request-settlement:";

/// Idempotency key for settling a request: hex blake3 of the request id
pub fn settlement_key(request_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(SETTLEMENT_KEY_DOMAIN.as_bytes());
    hasher.update(request_id.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Ledger receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer_id: String,
}

/// Token ledger
///
/// Implementations must treat a repeated `idempotency_key` as the same transfer.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn transfer(
        &self,
        from_account: &str,
        to_account: &str,
        amount: u64,
        idempotency_key: &str,
    ) -> Result<TransferResult>;
}

/// Settlement progress of an approved request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SettlementState {
    /// A transfer attempt is running
    InFlight { attempts: u32 },
    /// Last attempt failed; waiting for the reconciler
    Pending { attempts: u32, last_error: String },
    Settled {
        attempts: u32,
        transfer_id: String,
        settled_at: DateTime<Utc>,
    },
}

impl SettlementState {
    pub fn attempts(&self) -> u32 {
        match self {
            SettlementState::InFlight { attempts }
            | SettlementState::Pending { attempts, .. }
            | SettlementState::Settled { attempts, .. } => *attempts,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementState::Settled { .. })
    }
}

/// Settlement state per approved request
///
/// Claiming an attempt moves the entry to `InFlight`, so two callers never
/// run the same transfer at once.
#[derive(Debug, Default)]
pub struct SettlementTracker {
    states: DashMap<RequestId, SettlementState>,
}

impl SettlementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, request_id: &str) -> Option<SettlementState> {
        self.states.get(request_id).map(|s| s.clone())
    }

    /// Claim the first attempt for a freshly approved request
    pub fn begin(&self, request_id: &str) -> bool {
        match self.states.entry(request_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(SettlementState::InFlight { attempts: 1 });
                true
            }
        }
    }

    /// Claim a retry for a pending settlement
    pub fn retry(&self, request_id: &str) -> bool {
        let Some(mut state) = self.states.get_mut(request_id) else {
            return false;
        };
        let SettlementState::Pending { attempts, .. } = *state else {
            return false;
        };
        *state = SettlementState::InFlight {
            attempts: attempts + 1,
        };
        true
    }

    pub fn succeed(&self, request_id: &str, transfer_id: String, at: DateTime<Utc>) {
        if let Some(mut state) = self.states.get_mut(request_id) {
            let attempts = state.attempts();
            *state = SettlementState::Settled {
                attempts,
                transfer_id,
                settled_at: at,
            };
        }
    }

    pub fn fail(&self, request_id: &str, error: String) {
        if let Some(mut state) = self.states.get_mut(request_id) {
            let attempts = state.attempts();
            *state = SettlementState::Pending {
                attempts,
                last_error: error,
            };
        }
    }

    /// Requests whose settlement is waiting for a retry
    pub fn pending(&self) -> Vec<RequestId> {
        let mut pending: Vec<RequestId> = self
            .states
            .iter()
            .filter(|e| matches!(e.value(), SettlementState::Pending { .. }))
            .map(|e| e.key().clone())
            .collect();
        pending.sort();
        pending
    }
}
