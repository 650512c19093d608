//! End-to-end forecast run
//!
//! Fetches every location in turn, optionally resolves grid points to communes,
//! aggregates the observations within the chosen range and hands one marker per
//! surviving location to a [`MarkerSink`]. Locations that fail are recorded in
//! the [`RunSummary`] instead of aborting the run.

use thiserror::Error;

use crate::aggregate::{aggregate_daily, DateRange};
use crate::data::{
    Commune, FetchOutcome, ForecastClient, GeocodeCache, GeocodeStore, Location, Observation,
    ReverseGeocoder,
};
use crate::map::{Marker, MarkerSink};
use crate::report::{build_report, ReportLayout};

/// Failures that stop a run before any marker is placed
#[derive(Debug, Error)]
pub enum RunError {
    /// The location list was empty to begin with
    #[error("no locations to query")]
    NoLocations,

    /// Every forecast request failed
    #[error("forecast unavailable for all {attempted} locations")]
    AllFetchesFailed { attempted: usize },

    /// Forecasts were fetched but none covers the chosen dates
    #[error("no forecast data between {start} and {end}")]
    EmptySelection {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
}

/// A location left off the map and why
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLocation {
    pub label: String,
    pub reason: String,
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Locations queried
    pub attempted: usize,
    /// Locations with at least one observation
    pub fetched: usize,
    /// Locations whose fetch failed
    pub skipped: Vec<SkippedLocation>,
    /// Grid points whose commune lookup failed
    pub geocode_failures: usize,
    /// Markers handed to the sink
    pub rendered: usize,
}

/// Reverse-geocoding step for grid runs
pub struct Geocoding<'a, S> {
    pub geocoder: &'a ReverseGeocoder,
    pub cache: &'a mut GeocodeCache<S>,
}

/// Fetches every location sequentially
pub async fn fetch_all(client: &ForecastClient, locations: Vec<Location>) -> Vec<FetchOutcome> {
    let mut outcomes = Vec::with_capacity(locations.len());
    for location in locations {
        let outcome = client.fetch_outcome(location).await;
        let label = &outcome.location().label;
        match &outcome {
            FetchOutcome::Fetched { observations, .. } => tracing::debug!(
                location = %label,
                observations = observations.len(),
                "forecast fetched"
            ),
            FetchOutcome::Skipped { reason, .. } => {
                tracing::warn!(location = %label, %reason, "skipping location")
            }
        }
        outcomes.push(outcome);
    }
    outcomes
}

/// Splits outcomes into usable locations, their observations, and skips
fn partition(
    outcomes: Vec<FetchOutcome>,
) -> (Vec<Location>, Vec<Observation>, Vec<SkippedLocation>) {
    let mut located = Vec::new();
    let mut observations = Vec::new();
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            FetchOutcome::Fetched {
                location,
                observations: obs,
            } => {
                located.push(location);
                observations.extend(obs);
            }
            FetchOutcome::Skipped { location, reason } => skipped.push(SkippedLocation {
                label: location.label,
                reason,
            }),
        }
    }
    (located, observations, skipped)
}

/// Attaches communes to grid points, returning the number of failed lookups
///
/// A failed lookup leaves the point on the map with an unknown commune.
async fn attach_communes<S: GeocodeStore>(
    locations: &mut [Location],
    geocoding: Geocoding<'_, S>,
) -> usize {
    let Geocoding { geocoder, cache } = geocoding;
    let mut failures = 0;
    for location in locations.iter_mut().filter(|l| l.is_grid_point()) {
        match geocoder
            .resolve(cache, location.latitude, location.longitude)
            .await
        {
            Ok(commune) => location.commune = Some(commune),
            Err(e) => {
                tracing::warn!(location = %location.label, error = %e, "reverse geocoding failed");
                location.commune = Some(Commune::unknown());
                failures += 1;
            }
        }
    }
    failures
}

/// Runs the whole pipeline and feeds `sink`
///
/// The caller owns the geocode cache and decides when to flush it.
///
/// # Arguments
/// * `client` - Forecast client, already configured with models and horizon
/// * `geocoding` - Commune lookup for grid points, or `None` to skip it
/// * `locations` - Everything to query, fetched one at a time
/// * `range` - Dates kept for aggregation and shown in the popups
/// * `sink` - Receives one marker per location with data in `range`
///
/// # Returns
/// * `Ok(RunSummary)` once at least one marker was handed to `sink`
/// * `Err(RunError)` if there was nothing to query, every fetch failed, or no
///   forecast falls inside `range`; `sink` is untouched in that case
pub async fn run<S, M>(
    client: &ForecastClient,
    geocoding: Option<Geocoding<'_, S>>,
    locations: Vec<Location>,
    range: &DateRange,
    sink: &mut M,
) -> Result<RunSummary, RunError>
where
    S: GeocodeStore,
    M: MarkerSink,
{
    if locations.is_empty() {
        return Err(RunError::NoLocations);
    }
    let attempted = locations.len();

    let outcomes = fetch_all(client, locations).await;
    let (mut located, observations, skipped) = partition(outcomes);
    if located.is_empty() {
        return Err(RunError::AllFetchesFailed { attempted });
    }

    let stats = aggregate_daily(&observations, range);
    if stats.is_empty() {
        return Err(RunError::EmptySelection {
            start: range.start(),
            end: range.end(),
        });
    }

    // Only points that will actually be drawn are geocoded
    located.retain(|l| stats.iter().any(|s| s.location == l.id));
    let geocode_failures = match geocoding {
        Some(geocoding) => attach_communes(&mut located, geocoding).await,
        None => 0,
    };

    let layout = ReportLayout::for_range(range);
    for location in &located {
        sink.add_marker(Marker {
            latitude: location.latitude,
            longitude: location.longitude,
            title: location.label.clone(),
            popup_html: build_report(location, &stats, &layout),
        });
    }

    let summary = RunSummary {
        attempted,
        fetched: attempted - skipped.len(),
        skipped,
        geocode_failures,
        rendered: located.len(),
    };
    tracing::info!(
        attempted = summary.attempted,
        fetched = summary.fetched,
        skipped = summary.skipped.len(),
        rendered = summary.rendered,
        "run complete"
    );
    Ok(summary)
}
