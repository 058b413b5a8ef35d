//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a store is open.
//!
//! # Tasks
//! - TTL Eviction: Deletes entries whose TTL has elapsed at configured intervals

mod eviction;

pub use eviction::{spawn_eviction_task, sweep_expired, EvictionHandle, SweepReport};
