//! Disk cache for forecast responses
//!
//! Entries carry an expiry timestamp. Expired entries are still readable so a
//! run can fall back to the last known forecast when the API is unreachable.

mod manager;

pub use manager::{CacheManager, CachedData};
