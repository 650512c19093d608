//! Command-line interface parsing for meteogrid
//!
//! This module parses the arguments with clap and validates them into a
//! [`RunConfig`]. Invalid user input (an inverted date range, a malformed
//! bounding box) is rejected here, before any request is sent.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::aggregate::{AggregateError, DateRange};
use crate::data::forecast::{DEFAULT_FORECAST_DAYS, DEFAULT_MODELS, DEFAULT_TIMEZONE};
use crate::data::locations::{grid_point_count, MAX_GRID_POINTS, MIN_GRID_STEP};
use crate::data::{BoundingBox, ForecastRequest, Resolution, LORRAINE_BBOX};

/// Longest horizon Open-Meteo serves
const MAX_FORECAST_DAYS: u8 = 16;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// Start date falls after end date
    #[error(transparent)]
    InvalidRange(#[from] AggregateError),

    /// Grid step is not a number or finer than the coordinate rounding
    #[error("Invalid grid step: {0}. The step must be at least 0.01 degrees")]
    InvalidStep(f64),

    /// Grid step and bounding box would produce too many points
    #[error("Grid too large: step {step} over {bbox} gives more than {max} points")]
    GridTooLarge {
        step: f64,
        bbox: BoundingBox,
        max: usize,
    },

    /// Forecast horizon outside what the API serves
    #[error("Invalid forecast horizon: {0} days. Valid range: 1-16")]
    InvalidDays(u8),

    /// Request timeout of zero
    #[error("Invalid timeout: the request timeout must be at least 1 second")]
    InvalidTimeout,
}

/// Which set of locations to query
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// The main cities of Grand Est
    Cities,
    /// A regular lattice clipped to the bounding box, reverse-geocoded to communes
    Grid,
}

/// Weather forecast map for Grand Est cities and grid points
#[derive(Parser, Debug)]
#[command(name = "meteogrid")]
#[command(about = "Map short-range weather forecasts for Grand Est / Lorraine")]
#[command(version)]
pub struct Cli {
    /// Locations to query
    #[arg(long, value_enum, default_value_t = Mode::Cities)]
    pub mode: Mode,

    /// First day of the aggregation window (YYYY-MM-DD, defaults to today)
    #[arg(long, value_name = "DATE")]
    pub start: Option<NaiveDate>,

    /// Last day of the aggregation window (YYYY-MM-DD, defaults to the start date)
    #[arg(long, value_name = "DATE")]
    pub end: Option<NaiveDate>,

    /// Forecast horizon in days
    #[arg(long, default_value_t = DEFAULT_FORECAST_DAYS)]
    pub days: u8,

    /// Hourly series aggregated locally, or the API's daily series
    #[arg(long, value_enum, default_value_t = Resolution::Hourly)]
    pub resolution: Resolution,

    /// Forecast models in fallback order (comma-separated, empty for the API default)
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_MODELS.map(String::from))]
    pub models: Vec<String>,

    /// Timezone used to split readings into days
    #[arg(long, default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// Grid step in degrees (grid mode)
    #[arg(long, default_value_t = 0.5)]
    pub step: f64,

    /// Grid bounding box as min_lat,min_lon,max_lat,max_lon (grid mode)
    #[arg(long, value_name = "BBOX", default_value_t = LORRAINE_BBOX)]
    pub bbox: BoundingBox,

    /// Skip reverse geocoding of grid points
    #[arg(long)]
    pub no_geocode: bool,

    /// Geocode cache file (defaults to geocode.csv in the cache directory)
    #[arg(long, value_name = "PATH")]
    pub geocode_cache: Option<PathBuf>,

    /// Do not read or write the forecast response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Hours a cached forecast response stays fresh
    #[arg(long, default_value_t = 1)]
    pub cache_ttl_hours: u64,

    /// Output HTML map
    #[arg(long, short, value_name = "PATH", default_value = "meteo_map.html")]
    pub output: PathBuf,

    /// Forecast API endpoint
    #[arg(long, env = "METEOGRID_FORECAST_URL", value_name = "URL")]
    pub forecast_url: Option<String>,

    /// Reverse-geocoding API endpoint
    #[arg(long, env = "METEOGRID_GEOCODE_URL", value_name = "URL")]
    pub geocode_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 15)]
    pub timeout_secs: u64,

    /// Log debug details
    #[arg(long, short)]
    pub verbose: bool,
}

/// Validated configuration for one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    pub range: DateRange,
    pub request: ForecastRequest,
    pub step: f64,
    pub bbox: BoundingBox,
    /// Whether grid points are reverse-geocoded
    pub geocode: bool,
    pub geocode_cache: Option<PathBuf>,
    pub use_cache: bool,
    pub cache_ttl_hours: u64,
    pub output: PathBuf,
    pub forecast_url: Option<String>,
    pub geocode_url: Option<String>,
    pub timeout: Duration,
}

impl RunConfig {
    /// Validates parsed arguments into a run configuration
    ///
    /// # Arguments
    /// * `cli` - The parsed command-line arguments
    /// * `today` - Fills in a missing `--start`
    ///
    /// # Returns
    /// * `Ok(RunConfig)` if every argument is usable
    /// * `Err(CliError)` for an inverted range, a bad horizon, step, grid size or timeout
    pub fn from_cli(cli: &Cli, today: NaiveDate) -> Result<Self, CliError> {
        let start = cli.start.unwrap_or(today);
        let end = cli.end.unwrap_or(start);
        let range = DateRange::new(start, end)?;

        if cli.days == 0 || cli.days > MAX_FORECAST_DAYS {
            return Err(CliError::InvalidDays(cli.days));
        }
        if cli.step.is_nan() || cli.step < MIN_GRID_STEP {
            return Err(CliError::InvalidStep(cli.step));
        }
        if cli.mode == Mode::Grid
            && grid_point_count(&cli.bbox, cli.step).map_or(true, |n| n > MAX_GRID_POINTS)
        {
            return Err(CliError::GridTooLarge {
                step: cli.step,
                bbox: cli.bbox,
                max: MAX_GRID_POINTS,
            });
        }
        if cli.timeout_secs == 0 {
            return Err(CliError::InvalidTimeout);
        }

        let models = cli
            .models
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();

        Ok(RunConfig {
            mode: cli.mode,
            range,
            request: ForecastRequest {
                forecast_days: cli.days,
                timezone: cli.timezone.clone(),
                models,
                resolution: cli.resolution,
            },
            step: cli.step,
            bbox: cli.bbox,
            geocode: cli.mode == Mode::Grid && !cli.no_geocode,
            geocode_cache: cli.geocode_cache.clone(),
            use_cache: !cli.no_cache,
            cache_ttl_hours: cli.cache_ttl_hours,
            output: cli.output.clone(),
            forecast_url: cli.forecast_url.clone(),
            geocode_url: cli.geocode_url.clone(),
            timeout: Duration::from_secs(cli.timeout_secs),
        })
    }
}
