//! meteogrid library
//!
//! Forecast fetching, reverse geocoding, daily aggregation and map rendering
//! for Grand Est / Lorraine. The modules are exposed for integration tests.

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod data;
pub mod map;
pub mod pipeline;
pub mod report;
