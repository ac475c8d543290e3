//! In-process timeline cache.
//!
//! Holds the most recent slice of each user's timeline in an LRU map bounded by the number of
//! users. Slices are never authoritative: the store is the system of record and an absent slice
//! only means "ask the store".
//!
//! ```toml
//! [cache]
//! max_users = 10000
//! max_entries = 100
//! ttl_seconds = 300
//! ```

mod config;
mod store;

pub use config::CacheConfig;
pub use store::TimelineStore;
