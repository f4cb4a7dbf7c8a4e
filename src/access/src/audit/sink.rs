//! Audit storage backends

use super::{AuditQuery, AuditRecord};
use crate::error::{AccessError, Result};
use async_trait::async_trait;
use blake3::Hasher;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only storage for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a record. Implementations must not expose update or delete.
    async fn append(&self, record: AuditRecord) -> Result<()>;

    /// Records matching the query, oldest first
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>>;
}

/// Stored record with its position in the hash chain
#[derive(Debug, Clone)]
pub struct ChainedEntry {
    pub sequence: u64,
    pub record: AuditRecord,
    pub prev_hash: String,
    pub hash: String,
}

const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn chain_hash(sequence: u64, prev_hash: &str, record: &AuditRecord) -> Result<String> {
    let payload = serde_json::to_vec(record)
        .map_err(|e| AccessError::Audit(format!("Failed to serialize record: {}", e)))?;

    let mut hasher = Hasher::new();
    hasher.update(b"audit_chain_v1:");
    hasher.update(&sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&payload);
    Ok(hasher.finalize().to_hex().to_string())
}

/// In-memory sink with a blake3 hash chain over every entry
pub struct InMemoryAuditSink {
    entries: Arc<RwLock<Vec<ChainedEntry>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Snapshot of the chain
    pub async fn entries(&self) -> Vec<ChainedEntry> {
        self.entries.read().await.clone()
    }

    /// Recompute every link and fail on the first mismatch
    pub async fn verify_chain(&self) -> Result<()> {
        let entries = self.entries.read().await;
        let mut prev_hash = GENESIS_HASH.to_string();

        for (index, entry) in entries.iter().enumerate() {
            if entry.sequence != index as u64 {
                return Err(AccessError::Audit(format!(
                    "sequence gap at position {}: found {}",
                    index, entry.sequence
                )));
            }
            if entry.prev_hash != prev_hash {
                return Err(AccessError::Audit(format!(
                    "broken link at sequence {}",
                    entry.sequence
                )));
            }
            let expected = chain_hash(entry.sequence, &entry.prev_hash, &entry.record)?;
            if entry.hash != expected {
                return Err(AccessError::Audit(format!(
                    "hash mismatch at sequence {}",
                    entry.sequence
                )));
            }
            prev_hash = entry.hash.clone();
        }

        Ok(())
    }

    #[cfg(test)]
    async fn tamper(&self, index: usize, actor_id: &str) {
        let mut entries = self.entries.write().await;
        entries[index].record.actor_id = actor_id.to_string();
    }
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        let mut entries = self.entries.write().await;

        let sequence = entries.len() as u64;
        let prev_hash = entries
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let hash = chain_hash(sequence, &prev_hash, &record)?;

        entries.push(ChainedEntry {
            sequence,
            record,
            prev_hash,
            hash,
        });

        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let entries = self.entries.read().await;
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(entries
            .iter()
            .map(|e| &e.record)
            .filter(|r| query.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }
}
