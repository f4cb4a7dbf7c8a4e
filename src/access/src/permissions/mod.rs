//! Effective permission resolution
//!
//! [`PermissionResolver`] merges the four permission layers of a member:
//!
//! ```text
//! role default  →  department  →  custom role  →  member override
//! (least specific)                               (most specific)
//! ```
//!
//! A key set at a more specific layer replaces the value below it, so an
//! explicit `false` override always beats a `true` grant further down.
//!
//! [`PermissionCache`] sits in front of the resolver with single-flight miss
//! collapsing, synchronous invalidation, and a TTL backstop.

pub mod cache;
pub mod resolver;

pub use cache::{CacheConfig, CacheStats, PermissionCache};
pub use resolver::{merge_layers, PermissionResolver};
