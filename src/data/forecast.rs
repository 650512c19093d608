//! Open-Meteo forecast client
//!
//! Fetches hourly or daily temperature/precipitation series for a location and
//! flattens them into [`Observation`]s. When model-qualified series are present
//! (e.g. `temperature_2m_icon_eu`), the configured models are tried in order
//! before the unqualified variable.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::ValueEnum;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Location, Observation};
use crate::cache::CacheManager;

/// Base URL for the Open-Meteo API
pub const OPEN_METEO_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Models requested by default, in fallback order
pub const DEFAULT_MODELS: [&str; 2] = ["icon_eu", "gfs_global"];

/// Timezone the series are expressed in by default
pub const DEFAULT_TIMEZONE: &str = "Europe/Paris";

/// Default forecast horizon in days
pub const DEFAULT_FORECAST_DAYS: u8 = 7;

/// User agent sent with every request
const USER_AGENT: &str = "meteo-grid-app";

const HOURLY_VARIABLES: [&str; 3] = ["temperature_2m", "precipitation", "relative_humidity_2m"];
const DAILY_VARIABLES: [&str; 3] = ["temperature_2m_max", "temperature_2m_min", "precipitation_sum"];

/// Granularity of the requested series
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Resolution {
    Hourly,
    Daily,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Hourly => write!(f, "hourly"),
            Resolution::Daily => write!(f, "daily"),
        }
    }
}

/// Errors that can occur when fetching forecast data
#[derive(Debug, Error)]
pub enum ForecastError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Forecast API returned status {0}")]
    Status(u16),

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Missing expected field in response
    #[error("Missing expected field in response: {0}")]
    MissingField(String),

    /// Series arrays do not line up with the time axis
    #[error("Series '{0}' does not match the time axis length")]
    InconsistentLengths(String),

    /// Invalid time format in response
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),
}

/// Query parameters shared by every location of a run
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRequest {
    /// Forecast horizon in days
    pub forecast_days: u8,
    /// IANA timezone for the returned timestamps
    pub timezone: String,
    /// Named source models, in fallback order
    pub models: Vec<String>,
    /// Hourly or daily series
    pub resolution: Resolution,
}

impl Default for ForecastRequest {
    fn default() -> Self {
        Self {
            forecast_days: DEFAULT_FORECAST_DAYS,
            timezone: DEFAULT_TIMEZONE.to_string(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            resolution: Resolution::Hourly,
        }
    }
}

/// Per-location result of a fetch
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The location produced at least one observation
    Fetched {
        location: Location,
        observations: Vec<Observation>,
    },
    /// The location was skipped; `reason` says why
    Skipped { location: Location, reason: String },
}

impl FetchOutcome {
    pub fn location(&self) -> &Location {
        match self {
            FetchOutcome::Fetched { location, .. } | FetchOutcome::Skipped { location, .. } => {
                location
            }
        }
    }
}

/// Raw Open-Meteo response, cached as-is
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    hourly: Option<SeriesBlock>,
    #[serde(default)]
    daily: Option<SeriesBlock>,
}

/// A block of parallel arrays keyed by variable name
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeriesBlock {
    time: Vec<String>,
    #[serde(flatten)]
    series: HashMap<String, Vec<Option<f64>>>,
}

impl SeriesBlock {
    /// Returns the first series found among `<base>_<model>` for each model, then `<base>`
    fn pick(&self, base: &str, models: &[String]) -> Option<&[Option<f64>]> {
        models
            .iter()
            .map(|model| format!("{}_{}", base, model))
            .chain(std::iter::once(base.to_string()))
            .find_map(|key| self.series.get(&key))
            .map(Vec::as_slice)
    }

    /// Like [`pick`](Self::pick) but the series must exist and match the time axis
    fn require(&self, base: &str, models: &[String]) -> Result<&[Option<f64>], ForecastError> {
        let series = self
            .pick(base, models)
            .ok_or_else(|| ForecastError::MissingField(base.to_string()))?;
        if series.len() != self.time.len() {
            return Err(ForecastError::InconsistentLengths(base.to_string()));
        }
        Ok(series)
    }
}

/// Client for fetching forecasts from the Open-Meteo API
#[derive(Debug, Clone)]
pub struct ForecastClient {
    client: Client,
    base_url: String,
    request: ForecastRequest,
    cache: Option<CacheManager>,
    cache_ttl_hours: u64,
}

impl ForecastClient {
    /// Creates a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, ForecastError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: OPEN_METEO_BASE_URL.to_string(),
            request: ForecastRequest::default(),
            cache: None,
            cache_ttl_hours: 1,
        })
    }

    /// Points the client at another forecast endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replaces the query parameters
    pub fn with_request(mut self, request: ForecastRequest) -> Self {
        self.request = request;
        self
    }

    /// Enables the on-disk response cache
    pub fn with_cache(mut self, cache: CacheManager, ttl_hours: u64) -> Self {
        self.cache = Some(cache);
        self.cache_ttl_hours = ttl_hours;
        self
    }

    fn cache_key(&self, location: &Location) -> String {
        format!(
            "forecast_{:.4}_{:.4}_{}_{}d_{}_{}",
            location.latitude,
            location.longitude,
            self.request.resolution,
            self.request.forecast_days,
            self.request.timezone,
            self.request.models.join("-"),
        )
    }

    /// Fetches and flattens the series for one location
    ///
    /// A fresh cache entry is used without touching the network. On API failure
    /// an expired cache entry is used if one exists.
    ///
    /// # Arguments
    /// * `location` - Where to fetch; its `id` is stamped on every observation
    ///
    /// # Returns
    /// * `Ok(Vec<Observation>)` in API order, hours without a temperature dropped
    /// * `Err(ForecastError)` if the request fails with no cache to fall back on,
    ///   or the response lacks a required series
    pub async fn fetch(&self, location: &Location) -> Result<Vec<Observation>, ForecastError> {
        let key = self.cache_key(location);

        if let Some(ref cache) = self.cache {
            if let Some(cached) = cache.read::<ForecastResponse>(&key) {
                if !cached.is_expired {
                    tracing::debug!(location = %location.label, "forecast cache hit");
                    return self.parse_response(cached.data, location.id);
                }
            }
        }

        match self.fetch_from_api(location).await {
            Ok(response) => {
                if let Some(ref cache) = self.cache {
                    if let Err(e) = cache.write(&key, &response, self.cache_ttl_hours) {
                        tracing::debug!(location = %location.label, error = %e, "failed to write forecast cache");
                    }
                }
                self.parse_response(response, location.id)
            }
            Err(api_error) => {
                if let Some(ref cache) = self.cache {
                    if let Some(cached) = cache.read::<ForecastResponse>(&key) {
                        tracing::warn!(
                            location = %location.label,
                            error = %api_error,
                            cached_at = %cached.cached_at,
                            "forecast API failed, using expired cache entry"
                        );
                        return self.parse_response(cached.data, location.id);
                    }
                }
                Err(api_error)
            }
        }
    }

    /// Fetches one location, converting every failure into a skip
    pub async fn fetch_outcome(&self, location: Location) -> FetchOutcome {
        match self.fetch(&location).await {
            Ok(observations) if observations.is_empty() => FetchOutcome::Skipped {
                location,
                reason: "response contained no usable readings".to_string(),
            },
            Ok(observations) => FetchOutcome::Fetched {
                location,
                observations,
            },
            Err(e) => FetchOutcome::Skipped {
                location,
                reason: e.to_string(),
            },
        }
    }

    async fn fetch_from_api(&self, location: &Location) -> Result<ForecastResponse, ForecastError> {
        let (block_param, variables) = match self.request.resolution {
            Resolution::Hourly => ("hourly", HOURLY_VARIABLES),
            Resolution::Daily => ("daily", DAILY_VARIABLES),
        };

        let mut query = vec![
            ("latitude", location.latitude.to_string()),
            ("longitude", location.longitude.to_string()),
            (block_param, variables.join(",")),
            ("forecast_days", self.request.forecast_days.to_string()),
            ("timezone", self.request.timezone.clone()),
        ];
        if !self.request.models.is_empty() {
            query.push(("models", self.request.models.join(",")));
        }

        let response = self.client.get(&self.base_url).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(ForecastError::Status(response.status().as_u16()));
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    fn parse_response(
        &self,
        response: ForecastResponse,
        location_id: usize,
    ) -> Result<Vec<Observation>, ForecastError> {
        match self.request.resolution {
            Resolution::Hourly => {
                let block = response
                    .hourly
                    .ok_or_else(|| ForecastError::MissingField("hourly".to_string()))?;
                parse_hourly(&block, &self.request.models, location_id)
            }
            Resolution::Daily => {
                let block = response
                    .daily
                    .ok_or_else(|| ForecastError::MissingField("daily".to_string()))?;
                parse_daily(&block, &self.request.models, location_id)
            }
        }
    }
}

/// Flattens an hourly block into observations
///
/// Hours without a temperature are dropped. A missing precipitation value
/// counts as zero. Humidity is optional and ignored if its length is off.
fn parse_hourly(
    block: &SeriesBlock,
    models: &[String],
    location_id: usize,
) -> Result<Vec<Observation>, ForecastError> {
    if block.time.is_empty() {
        return Err(ForecastError::MissingField("time".to_string()));
    }

    let temps = block.require("temperature_2m", models)?;
    let precips = block.require("precipitation", models)?;
    let humidity = block
        .pick("relative_humidity_2m", models)
        .filter(|h| h.len() == block.time.len());

    let mut observations = Vec::with_capacity(block.time.len());
    for (i, time_str) in block.time.iter().enumerate() {
        let time = parse_datetime(time_str)?;
        let Some(temperature) = temps[i] else {
            continue;
        };
        observations.push(Observation {
            location: location_id,
            time,
            temperature,
            precipitation: precips[i].unwrap_or(0.0),
            humidity: humidity.and_then(|h| h[i]),
        });
    }
    Ok(observations)
}

/// Flattens a daily block into observations
///
/// Each day becomes two readings, `(max, precipitation_sum)` and `(min, 0)`, so
/// daily aggregation recovers the API's min, max and sum unchanged.
fn parse_daily(
    block: &SeriesBlock,
    models: &[String],
    location_id: usize,
) -> Result<Vec<Observation>, ForecastError> {
    if block.time.is_empty() {
        return Err(ForecastError::MissingField("time".to_string()));
    }

    let maxes = block.require("temperature_2m_max", models)?;
    let mins = block.require("temperature_2m_min", models)?;
    let sums = block.require("precipitation_sum", models)?;

    let mut observations = Vec::with_capacity(block.time.len() * 2);
    for (i, date_str) in block.time.iter().enumerate() {
        let time = parse_date(date_str)?.and_time(NaiveTime::MIN);
        let (Some(max), Some(min)) = (maxes[i], mins[i]) else {
            continue;
        };
        observations.push(Observation {
            location: location_id,
            time,
            temperature: max,
            precipitation: sums[i].unwrap_or(0.0),
            humidity: None,
        });
        observations.push(Observation {
            location: location_id,
            time,
            temperature: min,
            precipitation: 0.0,
            humidity: None,
        });
    }
    Ok(observations)
}

/// Parses an ISO 8601 local datetime (e.g. "2024-07-15T05:00")
fn parse_datetime(datetime_str: &str) -> Result<NaiveDateTime, ForecastError> {
    NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%dT%H:%M")
        .map_err(|_| ForecastError::InvalidTimeFormat(datetime_str.to_string()))
}

/// Parses an ISO 8601 date (e.g. "2024-07-15")
fn parse_date(date_str: &str) -> Result<NaiveDate, ForecastError> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| ForecastError::InvalidTimeFormat(date_str.to_string()))
}
