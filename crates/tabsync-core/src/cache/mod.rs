//! In-memory, TTL-bounded cache for view payloads.
//!
//! This module provides the `CacheStore` that backs every view of one
//! controller. Entries are opaque JSON values that expire after a per-entry
//! TTL, and the number of unexpired entries is bounded: inserting past the
//! bound evicts the entries closest to expiry first.
//!
//! Nothing is written to disk; the store lives as long as its controller.

pub mod store;

pub use store::{CacheEntry, CacheStore};
