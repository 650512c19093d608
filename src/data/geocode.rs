//! Reverse geocoding of grid points to communes
//!
//! Uses Nominatim (OpenStreetMap). Lookups go through an explicit
//! [`GeocodeCache`] whose backing store is injected: [`MemoryStore`] keeps
//! results for the current run only, [`CsvStore`] persists them to a flat file
//! that is read at startup and rewritten in full on [`GeocodeCache::flush`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Commune;

/// Nominatim reverse endpoint
pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Nominatim zoom level for commune-sized results
pub const COMMUNE_ZOOM: u8 = 10;

/// Nominatim usage policy allows one request per second
pub const NOMINATIM_REQUESTS_PER_SECOND: NonZeroU32 = NonZeroU32::MIN;

const USER_AGENT: &str = "meteo-grid-app";

/// Fixed-point scale of cache keys (4 decimals)
const KEY_SCALE: f64 = 10_000.0;

/// Errors that can occur while geocoding or persisting the cache
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Geocoding API returned status {0}")]
    Status(u16),

    /// Cache file could not be read or written as CSV
    #[error("Geocode cache file error: {0}")]
    Csv(#[from] csv::Error),

    /// Cache file I/O failed
    #[error("Geocode cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coordinate rounded to 4 decimals, used as the cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordKey {
    lat_e4: i64,
    lon_e4: i64,
}

impl CoordKey {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            lat_e4: (latitude * KEY_SCALE).round() as i64,
            lon_e4: (longitude * KEY_SCALE).round() as i64,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.lat_e4 as f64 / KEY_SCALE
    }

    pub fn longitude(&self) -> f64 {
        self.lon_e4 as f64 / KEY_SCALE
    }
}

impl fmt::Display for CoordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude(), self.longitude())
    }
}

/// Backing storage for a [`GeocodeCache`]
pub trait GeocodeStore {
    /// Loads every stored entry
    fn load(&self) -> Result<HashMap<CoordKey, Commune>, GeocodeError>;

    /// Replaces the stored entries with `entries`
    fn persist(&self, entries: &HashMap<CoordKey, Commune>) -> Result<(), GeocodeError>;
}

impl<S: GeocodeStore + ?Sized> GeocodeStore for Box<S> {
    fn load(&self) -> Result<HashMap<CoordKey, Commune>, GeocodeError> {
        (**self).load()
    }

    fn persist(&self, entries: &HashMap<CoordKey, Commune>) -> Result<(), GeocodeError> {
        (**self).persist(entries)
    }
}

/// Store that keeps nothing beyond the process lifetime
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStore;

impl GeocodeStore for MemoryStore {
    fn load(&self) -> Result<HashMap<CoordKey, Commune>, GeocodeError> {
        Ok(HashMap::new())
    }

    fn persist(&self, _entries: &HashMap<CoordKey, Commune>) -> Result<(), GeocodeError> {
        Ok(())
    }
}

/// One row of the cache file
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    lat: f64,
    lon: f64,
    commune: String,
    department: String,
}

/// Store backed by a CSV file with header `lat,lon,commune,department`
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GeocodeStore for CsvStore {
    fn load(&self) -> Result<HashMap<CoordKey, Commune>, GeocodeError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut entries = HashMap::new();
        for record in reader.deserialize::<CacheRecord>() {
            let record = record?;
            entries.insert(
                CoordKey::new(record.lat, record.lon),
                Commune {
                    name: record.commune,
                    department: record.department,
                },
            );
        }
        Ok(entries)
    }

    fn persist(&self, entries: &HashMap<CoordKey, Commune>) -> Result<(), GeocodeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let sorted: BTreeMap<_, _> = entries.iter().collect();
        let mut writer = csv::Writer::from_path(&self.path)?;
        for (key, commune) in sorted {
            writer.serialize(CacheRecord {
                lat: key.latitude(),
                lon: key.longitude(),
                commune: commune.name.clone(),
                department: commune.department.clone(),
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Memo of resolved communes, keyed by rounded coordinate
///
/// Entries only ever get added; there is no eviction.
#[derive(Debug)]
pub struct GeocodeCache<S> {
    store: S,
    entries: HashMap<CoordKey, Commune>,
    dirty: bool,
}

impl<S: GeocodeStore> GeocodeCache<S> {
    /// Opens the cache, loading whatever `store` already holds
    pub fn open(store: S) -> Result<Self, GeocodeError> {
        let entries = store.load()?;
        Ok(Self {
            store,
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, key: &CoordKey) -> Option<&Commune> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: CoordKey, commune: Commune) {
        self.entries.insert(key, commune);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes all entries back to the store if anything was added
    pub fn flush(&mut self) -> Result<(), GeocodeError> {
        if self.dirty {
            self.store.persist(&self.entries)?;
            self.dirty = false;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    postcode: Option<String>,
}

/// Derives the 2-digit department code from a French postal code
pub fn department_from_postcode(postcode: &str) -> Option<String> {
    let prefix = postcode.trim().get(..2)?;
    prefix
        .chars()
        .all(|c| c.is_ascii_digit())
        .then(|| prefix.to_string())
}

/// Builds a commune from an address, degrading absent fields to `unknown`
fn commune_from_address(address: Option<NominatimAddress>) -> Commune {
    let Some(addr) = address else {
        return Commune::unknown();
    };
    let unknown = Commune::unknown();

    let department = addr
        .postcode
        .as_deref()
        .and_then(department_from_postcode)
        .unwrap_or(unknown.department);
    let name = addr
        .city
        .or(addr.town)
        .or(addr.village)
        .or(addr.municipality)
        .filter(|n| !n.is_empty())
        .unwrap_or(unknown.name);

    Commune { name, department }
}

/// Evenly spaced requests with no burst allowance
fn pacing(per_second: NonZeroU32) -> Arc<DefaultDirectRateLimiter> {
    let quota = Quota::per_second(per_second).allow_burst(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(quota))
}

/// Client for the Nominatim reverse-geocoding API
#[derive(Debug, Clone)]
pub struct ReverseGeocoder {
    client: Client,
    base_url: String,
    zoom: u8,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl ReverseGeocoder {
    /// Creates a geocoder whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: NOMINATIM_URL.to_string(),
            zoom: COMMUNE_ZOOM,
            limiter: pacing(NOMINATIM_REQUESTS_PER_SECOND),
        })
    }

    /// Replaces the request pacing; cache hits are never paced
    pub fn with_rate_limit(mut self, per_second: NonZeroU32) -> Self {
        self.limiter = pacing(per_second);
        self
    }

    /// Points the geocoder at another endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Looks a coordinate up without consulting any cache
    ///
    /// Waits for the rate limiter before sending, so consecutive lookups are
    /// spaced at least one second apart by default.
    pub async fn lookup(&self, latitude: f64, longitude: f64) -> Result<Commune, GeocodeError> {
        let query = [
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("format", "jsonv2".to_string()),
            ("zoom", self.zoom.to_string()),
            ("addressdetails", "1".to_string()),
        ];

        self.limiter.until_ready().await;
        let response = self.client.get(&self.base_url).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status().as_u16()));
        }

        let body: NominatimResponse = response.json().await?;
        Ok(commune_from_address(body.address))
    }

    /// Resolves a coordinate through `cache`, querying the API on a miss
    ///
    /// Only successful lookups are memoized, so a transient failure is retried
    /// on the next run.
    pub async fn resolve<S: GeocodeStore>(
        &self,
        cache: &mut GeocodeCache<S>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Commune, GeocodeError> {
        let key = CoordKey::new(latitude, longitude);
        if let Some(commune) = cache.get(&key) {
            tracing::debug!(%key, "geocode cache hit");
            return Ok(commune.clone());
        }

        tracing::debug!(%key, "geocode cache miss");
        let commune = self.lookup(latitude, longitude).await?;
        cache.insert(key, commune.clone());
        Ok(commune)
    }
}
