//! meteogrid - map short-range weather forecasts for Grand Est / Lorraine
//!
//! Fetches forecasts for the region's main cities or for a regular grid,
//! aggregates them per day over the chosen window and writes a Leaflet map
//! with one popup per location.

use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use meteogrid::cache::CacheManager;
use meteogrid::cli::{Cli, Mode, RunConfig};
use meteogrid::data::{
    city_locations, grid_locations, CsvStore, ForecastClient, GeocodeCache, GeocodeStore,
    MemoryStore, ReverseGeocoder,
};
use meteogrid::map::LeafletMap;
use meteogrid::pipeline::{self, Geocoding};

/// File name of the geocode cache inside the cache directory
const GEOCODE_CACHE_FILE: &str = "geocode.csv";

/// Installs the stderr log subscriber; `RUST_LOG` overrides the default level
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "meteogrid=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Picks the geocode cache backing store
///
/// An explicit path wins, then the XDG cache directory. Without either the
/// cache only lives for this run.
fn geocode_store(config: &RunConfig, cache_manager: Option<&CacheManager>) -> Box<dyn GeocodeStore> {
    let path = config
        .geocode_cache
        .clone()
        .or_else(|| cache_manager.map(|c| c.dir().join(GEOCODE_CACHE_FILE)));
    match path {
        Some(path) => {
            let store = CsvStore::new(path);
            tracing::debug!(path = %store.path().display(), "using geocode cache file");
            Box::new(store)
        }
        None => Box::new(MemoryStore),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match RunConfig::from_cli(&cli, Local::now().date_naive()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return Ok(ExitCode::from(2));
        }
    };

    let cache_manager = CacheManager::new();

    let mut forecast = ForecastClient::new(config.timeout)?.with_request(config.request.clone());
    if let Some(url) = &config.forecast_url {
        forecast = forecast.with_base_url(url.clone());
    }
    if config.use_cache {
        if let Some(manager) = cache_manager.clone() {
            forecast = forecast.with_cache(manager, config.cache_ttl_hours);
        }
    }

    let locations = match config.mode {
        Mode::Cities => city_locations(),
        Mode::Grid => grid_locations(&config.bbox, config.step),
    };
    tracing::info!(
        mode = ?config.mode,
        locations = locations.len(),
        range = %config.range,
        "starting forecast run"
    );

    let mut map = LeafletMap::new(
        format!("Prévisions météo Grand Est ({})", config.range),
        config.bbox.center(),
    );

    let result = if config.geocode {
        let mut geocoder = ReverseGeocoder::new(config.timeout)?;
        if let Some(url) = &config.geocode_url {
            geocoder = geocoder.with_base_url(url.clone());
        }

        let mut cache = match GeocodeCache::open(geocode_store(&config, cache_manager.as_ref())) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(error = %e, "geocode cache unreadable, starting empty");
                GeocodeCache::open(Box::new(MemoryStore) as Box<dyn GeocodeStore>)?
            }
        };
        tracing::debug!(entries = cache.len(), "geocode cache loaded");

        let result = pipeline::run(
            &forecast,
            Some(Geocoding {
                geocoder: &geocoder,
                cache: &mut cache,
            }),
            locations,
            &config.range,
            &mut map,
        )
        .await;

        if let Err(e) = cache.flush() {
            tracing::warn!(error = %e, "failed to save geocode cache");
        }
        result
    } else {
        pipeline::run::<MemoryStore, _>(&forecast, None, locations, &config.range, &mut map).await
    };

    match result {
        Ok(summary) => {
            map.write_to(&config.output)?;
            if !summary.skipped.is_empty() {
                eprintln!(
                    "{} of {} locations skipped",
                    summary.skipped.len(),
                    summary.attempted
                );
            }
            println!("{}", config.output.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
