//! Integration tests for the forecast pipeline using wiremock.
//!
//! The forecast and reverse-geocoding APIs are replaced by mock servers so the
//! whole fetch → geocode → aggregate → render path runs offline.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use meteogrid::aggregate::DateRange;
use meteogrid::cache::CacheManager;
use meteogrid::data::{
    city_locations, grid_locations, BoundingBox, CsvStore, ForecastClient, ForecastRequest,
    GeocodeCache, GeocodeStore, Location, MemoryStore, Resolution, ReverseGeocoder,
};
use meteogrid::map::{LeafletMap, Marker, MarkerSink};
use meteogrid::pipeline::{run, Geocoding, RunError};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

/// Hourly payload with model-qualified series, three hours per listed day
fn hourly_body(days: &[u32]) -> serde_json::Value {
    let mut time = Vec::new();
    let mut temps = Vec::new();
    let mut precips = Vec::new();
    for day in days {
        for (hour, temp, precip) in [(0, 2.0, 0.0), (1, 5.0, 1.5), (2, -1.0, 0.5)] {
            time.push(format!("2024-01-{:02}T{:02}:00", day, hour));
            temps.push(temp);
            precips.push(precip);
        }
    }
    serde_json::json!({
        "latitude": 49.12,
        "longitude": 6.18,
        "timezone": "Europe/Paris",
        "hourly": {
            "time": time,
            "temperature_2m_icon_eu": temps,
            "precipitation_icon_eu": precips
        }
    })
}

fn forecast_client(server: &MockServer) -> ForecastClient {
    ForecastClient::new(Duration::from_secs(5))
        .unwrap()
        .with_base_url(format!("{}/v1/forecast", server.uri()))
}

fn geocoder(server: &MockServer) -> ReverseGeocoder {
    ReverseGeocoder::new(Duration::from_secs(5))
        .unwrap()
        .with_base_url(format!("{}/reverse", server.uri()))
}

/// Strasbourg and Metz, in that order
fn two_cities() -> Vec<Location> {
    city_locations().into_iter().take(2).collect()
}

async fn mount_forecast(server: &MockServer, latitude: &str, status: u16, days: &[u32]) {
    let response = if status == 200 {
        ResponseTemplate::new(200).set_body_json(hourly_body(days))
    } else {
        ResponseTemplate::new(status)
    };
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", latitude))
        .and(query_param(
            "hourly",
            "temperature_2m,precipitation,relative_humidity_2m",
        ))
        .and(query_param("models", "icon_eu,gfs_global"))
        .and(query_param("forecast_days", "7"))
        .and(query_param("timezone", "Europe/Paris"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_failed_location_is_skipped_and_counted() {
    let server = MockServer::start().await;
    mount_forecast(&server, "48.5734", 500, &[]).await;
    mount_forecast(&server, "49.1193", 200, &[1]).await;

    let mut markers: Vec<Marker> = Vec::new();
    let summary = run::<MemoryStore, _>(
        &forecast_client(&server),
        None,
        two_cities(),
        &DateRange::single(date(1)),
        &mut markers,
    )
    .await
    .unwrap();

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.rendered, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].label, "Strasbourg");
    assert!(summary.skipped[0].reason.contains("500"));

    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].title, "Metz");
    let popup = &markers[0].popup_html;
    assert!(popup.contains("Temp. moyenne : 2.0 °C"));
    assert!(popup.contains("Temp. min : -1.0 °C"));
    assert!(popup.contains("Temp. max : 5.0 °C"));
    assert!(popup.contains("Précipitations : 2.0 mm"));
}

#[tokio::test]
async fn test_multi_day_table_marks_missing_day_as_na() {
    let server = MockServer::start().await;
    mount_forecast(&server, "48.5734", 200, &[1, 2]).await;
    mount_forecast(&server, "49.1193", 200, &[1]).await;

    let mut markers: Vec<Marker> = Vec::new();
    let range = DateRange::new(date(1), date(2)).unwrap();
    let summary = run::<MemoryStore, _>(
        &forecast_client(&server),
        None,
        two_cities(),
        &range,
        &mut markers,
    )
    .await
    .unwrap();

    assert_eq!(summary.rendered, 2);
    let metz = markers.iter().find(|m| m.title == "Metz").unwrap();
    assert!(metz
        .popup_html
        .contains("<tr><th>Temp. min (°C)</th><td>-1.0</td><td>NA</td></tr>"));

    let strasbourg = markers.iter().find(|m| m.title == "Strasbourg").unwrap();
    assert!(!strasbourg.popup_html.contains("NA"));
}

#[tokio::test]
async fn test_every_location_failing_is_an_error() {
    let server = MockServer::start().await;
    mount_forecast(&server, "48.5734", 503, &[]).await;
    mount_forecast(&server, "49.1193", 404, &[]).await;

    let mut map = LeafletMap::new("test", (48.7, 6.3));
    let result = run::<MemoryStore, _>(
        &forecast_client(&server),
        None,
        two_cities(),
        &DateRange::single(date(1)),
        &mut map,
    )
    .await;

    assert!(matches!(
        result,
        Err(RunError::AllFetchesFailed { attempted: 2 })
    ));
    assert!(map.markers().is_empty());
}

#[tokio::test]
async fn test_range_outside_forecast_is_empty_selection() {
    let server = MockServer::start().await;
    mount_forecast(&server, "48.5734", 200, &[1]).await;
    mount_forecast(&server, "49.1193", 200, &[1]).await;

    let mut markers: Vec<Marker> = Vec::new();
    let range = DateRange::new(date(10), date(12)).unwrap();
    let result = run::<MemoryStore, _>(
        &forecast_client(&server),
        None,
        two_cities(),
        &range,
        &mut markers,
    )
    .await;

    assert!(matches!(result, Err(RunError::EmptySelection { .. })));
    assert!(markers.is_empty());
}

#[tokio::test]
async fn test_malformed_response_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "48.5734"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "hourly": { "time": ["2024-01-01T00:00"], "relative_humidity_2m": [80.0] }
        })))
        .mount(&server)
        .await;
    mount_forecast(&server, "49.1193", 200, &[1]).await;

    let mut markers: Vec<Marker> = Vec::new();
    let summary = run::<MemoryStore, _>(
        &forecast_client(&server),
        None,
        two_cities(),
        &DateRange::single(date(1)),
        &mut markers,
    )
    .await
    .unwrap();

    assert_eq!(summary.skipped.len(), 1);
    assert!(summary.skipped[0].reason.contains("temperature_2m"));
    assert_eq!(markers.len(), 1);
}

#[tokio::test]
async fn test_multi_day_range_past_forecast_keeps_na_column() {
    let server = MockServer::start().await;
    mount_forecast(&server, "48.5734", 200, &[1, 2]).await;
    mount_forecast(&server, "49.1193", 200, &[1, 2]).await;

    let mut markers: Vec<Marker> = Vec::new();
    let range = DateRange::new(date(1), date(3)).unwrap();
    run::<MemoryStore, _>(
        &forecast_client(&server),
        None,
        two_cities(),
        &range,
        &mut markers,
    )
    .await
    .unwrap();

    for marker in &markers {
        assert!(marker
            .popup_html
            .contains("<th>01/01</th><th>02/01</th><th>03/01</th>"));
        assert!(marker
            .popup_html
            .contains("<tr><th>Temp. max (°C)</th><td>5.0</td><td>5.0</td><td>NA</td></tr>"));
    }
}

#[tokio::test]
async fn test_daily_resolution_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param(
            "daily",
            "temperature_2m_max,temperature_2m_min,precipitation_sum",
        ))
        .and(query_param("timezone", "Europe/Paris"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "daily": {
                "time": ["2024-01-01", "2024-01-02"],
                "temperature_2m_max_icon_eu": [6.0, 4.0],
                "temperature_2m_min_icon_eu": [-2.0, 0.0],
                "precipitation_sum_icon_eu": [3.4, 0.0]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = forecast_client(&server).with_request(ForecastRequest {
        resolution: Resolution::Daily,
        ..ForecastRequest::default()
    });
    let metz: Vec<Location> = city_locations().into_iter().skip(1).take(1).collect();

    let mut markers: Vec<Marker> = Vec::new();
    run::<MemoryStore, _>(
        &client,
        None,
        metz,
        &DateRange::single(date(1)),
        &mut markers,
    )
    .await
    .unwrap();

    let popup = &markers[0].popup_html;
    assert!(popup.contains("Temp. moyenne : 2.0 °C"));
    assert!(popup.contains("Temp. min : -2.0 °C"));
    assert!(popup.contains("Temp. max : 6.0 °C"));
    assert!(popup.contains("Précipitations : 3.4 mm"));
}

#[tokio::test]
async fn test_fresh_cache_entry_skips_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hourly_body(&[1])))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let client = forecast_client(&server)
        .with_cache(CacheManager::with_dir(temp_dir.path().to_path_buf()), 1);
    let metz = city_locations().remove(1);

    let first = client.fetch(&metz).await.unwrap();
    let second = client.fetch(&metz).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.len(), 3);
}

#[tokio::test]
async fn test_prefilled_cache_means_no_request() {
    let temp_dir = TempDir::new().unwrap();
    let metz = city_locations().remove(1);

    // Fill the cache from one server
    let warm = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hourly_body(&[1])))
        .mount(&warm)
        .await;
    forecast_client(&warm)
        .with_cache(CacheManager::with_dir(temp_dir.path().to_path_buf()), 1)
        .fetch(&metz)
        .await
        .unwrap();

    // A second server must never be contacted while the entry is fresh
    let cold = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&cold)
        .await;
    let observations = forecast_client(&cold)
        .with_cache(CacheManager::with_dir(temp_dir.path().to_path_buf()), 1)
        .fetch(&metz)
        .await
        .unwrap();
    assert_eq!(observations.len(), 3);
}

fn single_grid_point() -> Vec<Location> {
    grid_locations(&BoundingBox::new(48.69, 6.18, 48.69, 6.18).unwrap(), 0.5)
}

async fn mount_grid_forecast(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hourly_body(&[1])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_grid_point_is_geocoded_once_across_runs() {
    let server = MockServer::start().await;
    mount_grid_forecast(&server).await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .and(query_param("format", "jsonv2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "display_name": "Nancy, Meurthe-et-Moselle, Grand Est, France",
            "address": { "city": "Nancy", "postcode": "54000", "country": "France" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = forecast_client(&server);
    let geocoder = geocoder(&server);
    let mut cache = GeocodeCache::open(MemoryStore).unwrap();

    for _ in 0..2 {
        let mut markers: Vec<Marker> = Vec::new();
        let summary = run(
            &client,
            Some(Geocoding {
                geocoder: &geocoder,
                cache: &mut cache,
            }),
            single_grid_point(),
            &DateRange::single(date(1)),
            &mut markers,
        )
        .await
        .unwrap();

        assert_eq!(summary.rendered, 1);
        assert_eq!(summary.geocode_failures, 0);
        assert!(markers[0]
            .popup_html
            .contains("<p class=\"commune\">Nancy (54)</p>"));
    }
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_geocode_failure_keeps_marker() {
    let server = MockServer::start().await;
    mount_grid_forecast(&server).await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let mut cache = GeocodeCache::open(MemoryStore).unwrap();
    let mut markers: Vec<Marker> = Vec::new();
    let summary = run(
        &forecast_client(&server),
        Some(Geocoding {
            geocoder: &geocoder(&server),
            cache: &mut cache,
        }),
        single_grid_point(),
        &DateRange::single(date(1)),
        &mut markers,
    )
    .await
    .unwrap();

    assert_eq!(summary.geocode_failures, 1);
    assert_eq!(summary.rendered, 1);
    assert!(cache.is_empty());
    assert!(!markers[0].popup_html.contains("commune"));
}

#[tokio::test]
async fn test_csv_geocode_cache_is_written_after_flush() {
    let server = MockServer::start().await;
    mount_grid_forecast(&server).await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "address": { "village": "Laxou", "postcode": "54520" }
        })))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let cache_path = temp_dir.path().join("geocode.csv");
    let mut cache = GeocodeCache::open(CsvStore::new(&cache_path)).unwrap();

    let mut markers: Vec<Marker> = Vec::new();
    run(
        &forecast_client(&server),
        Some(Geocoding {
            geocoder: &geocoder(&server),
            cache: &mut cache,
        }),
        single_grid_point(),
        &DateRange::single(date(1)),
        &mut markers,
    )
    .await
    .unwrap();
    cache.flush().unwrap();

    let stored = CsvStore::new(&cache_path).load().unwrap();
    assert_eq!(stored.len(), 1);
    let commune = stored.values().next().unwrap();
    assert_eq!(commune.name, "Laxou");
    assert_eq!(commune.department, "54");
}

#[tokio::test]
async fn test_leaflet_map_receives_markers() {
    let server = MockServer::start().await;
    mount_forecast(&server, "48.5734", 200, &[1]).await;
    mount_forecast(&server, "49.1193", 200, &[1]).await;

    let mut map = LeafletMap::new("Prévisions", (48.7, 6.3));
    run::<MemoryStore, _>(
        &forecast_client(&server),
        None,
        two_cities(),
        &DateRange::single(date(1)),
        &mut map,
    )
    .await
    .unwrap();

    assert_eq!(map.markers().len(), 2);
    let html = map.render();
    assert!(html.contains("\"title\":\"Strasbourg\""));
    assert!(html.contains("\"title\":\"Metz\""));
}

#[tokio::test]
async fn test_geocoder_spaces_network_lookups() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "address": { "town": "Toul", "postcode": "54200" }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let geocoder = geocoder(&server).with_rate_limit(NonZeroU32::new(2).unwrap());
    let mut cache = GeocodeCache::open(MemoryStore).unwrap();

    let started = Instant::now();
    geocoder.resolve(&mut cache, 48.68, 5.89).await.unwrap();
    geocoder.resolve(&mut cache, 48.70, 5.90).await.unwrap();
    // Cache hits are not paced
    geocoder.resolve(&mut cache, 48.68, 5.89).await.unwrap();

    // Two lookups at 2 per second are at least half a second apart
    assert!(started.elapsed() >= Duration::from_millis(450));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_marker_sink_is_object_safe() {
    let mut sink: Box<dyn MarkerSink> = Box::new(Vec::<Marker>::new());
    sink.add_marker(Marker {
        latitude: 48.0,
        longitude: 6.0,
        title: "A".to_string(),
        popup_html: String::new(),
    });
}
