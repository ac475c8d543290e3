//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod events;
pub mod graph;
pub mod telemetry;
