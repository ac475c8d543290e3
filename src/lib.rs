//! Murmur: a fan-out-on-write timeline engine.
//!
//! Posts are recorded once in a global store, copied into every follower's timeline by a bounded
//! worker pool, and read back through a best-effort per-user cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
