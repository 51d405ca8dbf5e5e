//! Append-only audit trail of deployment activity.
//!
//! `store` holds the `LogStore` backends; `trail` is the best-effort front end
//! the engine writes through. Nothing here rewrites or deletes entries.

pub mod store;
pub mod trail;

pub use store::{JsonlLogStore, MemoryLogStore};
pub use trail::{AuditSender, AuditTrail, AuditWriter};
