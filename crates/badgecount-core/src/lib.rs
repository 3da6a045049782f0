//! Core types, configuration, and models for badgecount
//!
//! This crate provides:
//! - The closed notification section vocabulary (`Section`)
//! - Count buckets, per-section count structures, and cap arithmetic
//! - Configuration management (`Config`, environment parsing)
//! - Common error types
//! - Timestamp utilities (microseconds since Unix epoch)
//! - Lock ordering primitives shared by the cache and storage layers

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod lock_order;
pub mod model;
pub mod section;
pub mod timestamps;

// Re-export key types for convenience
pub use config::{Config, env_value};
pub use error::{Error, Result};
pub use lock_order::{LockLevel, OrderedMutex, OrderedRwLock};
pub use model::{
    CountBucket, CountSnapshot, DataSource, Event, GlobalMode, SectionCounts, USER_TALK_CATEGORY,
    cap_count,
};
pub use section::Section;
pub use timestamps::{
    iso_to_micros, micros_to_iso, micros_to_naive, naive_to_micros, now_micros, now_micros_raw,
};
