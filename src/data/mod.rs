//! Core data models for meteogrid
//!
//! This module contains the types shared by every stage of a run: the places
//! we query, the raw forecast observations, and the per-day statistics built
//! from them.

pub mod forecast;
pub mod geocode;
pub mod locations;

pub use forecast::{FetchOutcome, ForecastClient, ForecastError, ForecastRequest, Resolution};
pub use geocode::{
    CoordKey, CsvStore, GeocodeCache, GeocodeError, GeocodeStore, MemoryStore, ReverseGeocoder,
};
pub use locations::{city_locations, grid_locations, BoundingBox, LORRAINE_BBOX};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Placeholder used when a geocoding field is absent
pub const UNKNOWN: &str = "unknown";

/// How a location was declared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocationKind {
    /// A curated, named city
    City(String),
    /// A synthetic point on a regular lattice
    GridPoint,
}

/// Commune attributes resolved by reverse geocoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commune {
    /// Commune (locality) name
    pub name: String,
    /// Two-digit department code derived from the postal code
    pub department: String,
}

impl Commune {
    /// A commune whose fields could not be resolved
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            department: UNKNOWN.to_string(),
        }
    }

    /// Whether neither field carries real information
    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN && self.department == UNKNOWN
    }
}

/// A place we request a forecast for
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Index of the location within the run, used to tag observations
    pub id: usize,
    /// Human-readable label (city name, or rounded coordinates for grid points)
    pub label: String,
    /// Latitude coordinate
    pub latitude: f64,
    /// Longitude coordinate
    pub longitude: f64,
    /// City or grid point
    pub kind: LocationKind,
    /// Commune resolved by reverse geocoding, grid mode only
    pub commune: Option<Commune>,
}

impl Location {
    pub fn is_grid_point(&self) -> bool {
        matches!(self.kind, LocationKind::GridPoint)
    }
}

/// One reading from the raw forecast series
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Id of the location this reading belongs to
    pub location: usize,
    /// Local timestamp of the reading
    pub time: NaiveDateTime,
    /// Temperature in Celsius
    pub temperature: f64,
    /// Precipitation in millimetres
    pub precipitation: f64,
    /// Relative humidity percentage, when requested and available
    pub humidity: Option<f64>,
}

impl Observation {
    pub fn date(&self) -> NaiveDate {
        self.time.date()
    }
}

/// Daily statistics for one location
#[derive(Debug, Clone, PartialEq)]
pub struct DailyStat {
    /// Id of the location
    pub location: usize,
    /// Calendar date
    pub date: NaiveDate,
    /// Mean temperature in Celsius
    pub temp_mean: f64,
    /// Minimum temperature in Celsius
    pub temp_min: f64,
    /// Maximum temperature in Celsius
    pub temp_max: f64,
    /// Summed precipitation in millimetres
    pub precip_sum: f64,
    /// Mean relative humidity, if any reading carried one
    pub humidity_mean: Option<f64>,
}
