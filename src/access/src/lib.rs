//! # CretoAI Team Access Engine
//!
//! Team permission resolution and multi-stage token request approval.
//!
//! ## Features
//!
//! - **Layered permissions**: member override > custom role > department > role default
//! - **Single-flight cache** with synchronous invalidation and a TTL backstop
//! - **Approval workflow** with tiered chains, auto-approval, escalation, and expiry
//! - **Optimistic concurrency** on every request transition
//! - **Hash-chained audit trail** for every mutation and transition
//! - **Idempotent settlement** through an injected ledger, with a reconciler
//!
//! ## Example
//!
//! ```ignore
//! use cretoai_access::{AccessConfig, AccessEngine, Collaborators, InMemoryDirectory, ReviewCommand};
//! use std::sync::Arc;
//!
//! let directory = Arc::new(InMemoryDirectory::new());
//! let engine = AccessEngine::new(
//!     AccessConfig::load("access.toml")?,
//!     Collaborators::new(directory, ledger),
//! )?;
//!
//! let request = engine
//!     .create_token_request("team-1", "alice", 5_000, "GPU hours", "compute")
//!     .await?;
//! engine
//!     .review_token_request(ReviewCommand::approve(&request.id, "bob").at_stage(0))
//!     .await?;
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod permissions;
pub mod types;
pub mod workflow;

// Re-export commonly used types
pub use audit::{AuditEventType, AuditQuery, AuditRecord, AuditRecorder, AuditSink, InMemoryAuditSink, TargetType};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AccessConfig;
pub use directory::{DirectoryStore, InMemoryDirectory, TeamAdmin};
pub use engine::{AccessEngine, Collaborators};
pub use error::{AccessError, Result};
pub use permissions::{CacheConfig, CacheStats, PermissionCache, PermissionResolver};
pub use types::{Department, Member, PermissionKey, PermissionSet, PermissionValue, Role};
pub use workflow::{
    ApprovalWorkflow, ApproverSpec, LedgerService, NotificationDispatcher, RequestStatus, ReviewCommand,
    ReviewDecision, StageStatus, SweepReport, TokenRequest, TransferResult, WorkflowConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
