//! Query locations for Grand Est forecasts
//!
//! This module contains the static list of the region's main cities with their
//! city-centre coordinates, and the generator for the regular lattice used in
//! grid mode.

use std::fmt;
use std::str::FromStr;

use super::{Location, LocationKind};

/// A named city with its city-centre coordinates
#[derive(Debug, Clone, Copy)]
pub struct City {
    /// City name
    pub name: &'static str,
    /// Latitude coordinate
    pub latitude: f64,
    /// Longitude coordinate
    pub longitude: f64,
}

/// Static array of the main Grand Est cities
pub static GRAND_EST_CITIES: [City; 10] = [
    City {
        name: "Strasbourg",
        latitude: 48.5734,
        longitude: 7.7521,
    },
    City {
        name: "Metz",
        latitude: 49.1193,
        longitude: 6.1757,
    },
    City {
        name: "Nancy",
        latitude: 48.6921,
        longitude: 6.1844,
    },
    City {
        name: "Reims",
        latitude: 49.2583,
        longitude: 4.0317,
    },
    City {
        name: "Mulhouse",
        latitude: 47.7508,
        longitude: 7.3359,
    },
    City {
        name: "Colmar",
        latitude: 48.0794,
        longitude: 7.3585,
    },
    City {
        name: "Charleville-Mézières",
        latitude: 49.7739,
        longitude: 4.7208,
    },
    City {
        name: "Troyes",
        latitude: 48.2973,
        longitude: 4.0744,
    },
    City {
        name: "Épinal",
        latitude: 48.1724,
        longitude: 6.4496,
    },
    City {
        name: "Châlons-en-Champagne",
        latitude: 48.9562,
        longitude: 4.3674,
    },
];

/// Decimal places kept on grid coordinates
const GRID_DECIMALS: i32 = 2;

/// Latitude/longitude box that clips the grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

/// Default grid area covering Lorraine
pub const LORRAINE_BBOX: BoundingBox = BoundingBox {
    min_lat: 47.8,
    min_lon: 4.9,
    max_lat: 49.6,
    max_lon: 7.7,
};

impl BoundingBox {
    /// Creates a bounding box, returning `None` if the corners are inverted or
    /// fall outside valid coordinate ranges
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Option<Self> {
        let valid = min_lat <= max_lat
            && min_lon <= max_lon
            && (-90.0..=90.0).contains(&min_lat)
            && (-90.0..=90.0).contains(&max_lat)
            && (-180.0..=180.0).contains(&min_lon)
            && (-180.0..=180.0).contains(&max_lon);
        valid.then_some(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    /// Centre of the box as `(latitude, longitude)`
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

impl FromStr for BoundingBox {
    type Err = String;

    /// Parses `min_lat,min_lon,max_lat,max_lon`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid coordinate in '{}': {}", s, e))?;

        match parts.as_slice() {
            [min_lat, min_lon, max_lat, max_lon] => {
                BoundingBox::new(*min_lat, *min_lon, *max_lat, *max_lon)
                    .ok_or_else(|| format!("inverted or out-of-range bounding box '{}'", s))
            }
            _ => Err(format!(
                "expected min_lat,min_lon,max_lat,max_lon but got '{}'",
                s
            )),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

/// Rounds a value to the given number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Builds the city-mode locations, in declaration order
pub fn city_locations() -> Vec<Location> {
    GRAND_EST_CITIES
        .iter()
        .enumerate()
        .map(|(id, city)| Location {
            id,
            label: city.name.to_string(),
            latitude: city.latitude,
            longitude: city.longitude,
            kind: LocationKind::City(city.name.to_string()),
            commune: None,
        })
        .collect()
}

/// Smallest grid step; finer steps would collapse onto the same rounded coordinate
pub const MIN_GRID_STEP: f64 = 0.01;

/// Upper bound on the number of grid points in one run
pub const MAX_GRID_POINTS: usize = 10_000;

/// Number of lattice steps that fit between `min` and `max`
fn steps_between(min: f64, max: f64, step: f64) -> usize {
    // Tolerance keeps the upper edge when (max - min) is an exact multiple of step
    ((max - min) / step + 1e-9).floor() as usize
}

/// Number of points `grid_locations` would generate for `bbox` and `step`
///
/// # Returns
/// * `None` if `step` is NaN, below [`MIN_GRID_STEP`], or the count overflows
pub fn grid_point_count(bbox: &BoundingBox, step: f64) -> Option<usize> {
    if step.is_nan() || step < MIN_GRID_STEP {
        return None;
    }
    let lat_points = steps_between(bbox.min_lat, bbox.max_lat, step).checked_add(1)?;
    let lon_points = steps_between(bbox.min_lon, bbox.max_lon, step).checked_add(1)?;
    lat_points.checked_mul(lon_points)
}

/// Builds a regular lattice of grid points clipped to `bbox`
///
/// Points start at the south-west corner and advance by `step` degrees in both
/// directions, latitude-major. Coordinates are rounded to two decimals.
/// Returns an empty list when `step` is below [`MIN_GRID_STEP`] or the lattice
/// would exceed [`MAX_GRID_POINTS`].
pub fn grid_locations(bbox: &BoundingBox, step: f64) -> Vec<Location> {
    let capacity = match grid_point_count(bbox, step) {
        Some(count) if count <= MAX_GRID_POINTS => count,
        _ => return Vec::new(),
    };

    let lat_steps = steps_between(bbox.min_lat, bbox.max_lat, step);
    let lon_steps = steps_between(bbox.min_lon, bbox.max_lon, step);

    let mut locations = Vec::with_capacity(capacity);
    for i in 0..=lat_steps {
        let latitude = round_to(bbox.min_lat + i as f64 * step, GRID_DECIMALS);
        for j in 0..=lon_steps {
            let longitude = round_to(bbox.min_lon + j as f64 * step, GRID_DECIMALS);
            locations.push(Location {
                id: locations.len(),
                label: format!("{:.2}, {:.2}", latitude, longitude),
                latitude,
                longitude,
                kind: LocationKind::GridPoint,
                commune: None,
            });
        }
    }
    locations
}
