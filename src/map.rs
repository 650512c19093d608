//! Map rendering
//!
//! [`MarkerSink`] is the single "add marker with popup" seam the pipeline talks
//! to. [`LeafletMap`] implements it by collecting markers and emitting a
//! self-contained HTML page that loads Leaflet and OpenStreetMap tiles.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use crate::report::escape_html;

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";
const TILE_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
const TILE_ATTRIBUTION: &str = "&copy; OpenStreetMap contributors";

/// Default zoom level, wide enough to show the region
const DEFAULT_ZOOM: u8 = 8;

/// One marker on the map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub latitude: f64,
    pub longitude: f64,
    /// Tooltip text (plain, not HTML)
    pub title: String,
    /// Popup body (HTML)
    pub popup_html: String,
}

/// Anything that can receive markers
pub trait MarkerSink {
    fn add_marker(&mut self, marker: Marker);
}

impl MarkerSink for Vec<Marker> {
    fn add_marker(&mut self, marker: Marker) {
        self.push(marker);
    }
}

/// Leaflet map rendered as a standalone HTML document
#[derive(Debug, Clone)]
pub struct LeafletMap {
    title: String,
    default_center: (f64, f64),
    markers: Vec<Marker>,
}

impl LeafletMap {
    /// Creates an empty map; `default_center` is used when no marker is added
    pub fn new(title: impl Into<String>, default_center: (f64, f64)) -> Self {
        Self {
            title: title.into(),
            default_center,
            markers: Vec::new(),
        }
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Mean marker position, or the default centre
    pub fn center(&self) -> (f64, f64) {
        if self.markers.is_empty() {
            return self.default_center;
        }
        let n = self.markers.len() as f64;
        let (lat, lon) = self
            .markers
            .iter()
            .fold((0.0, 0.0), |(lat, lon), m| (lat + m.latitude, lon + m.longitude));
        (lat / n, lon / n)
    }

    /// Renders the full HTML page
    pub fn render(&self) -> String {
        let (center_lat, center_lon) = self.center();
        // Serializing to JSON yields a valid JS array literal with escaped popups
        let markers_json = serde_json::to_string(&self.markers)
            .unwrap_or_else(|_| "[]".to_string())
            .replace("</", "<\\/");

        format!(
            r#"<!DOCTYPE html>
<html lang="fr">
<head>
<meta charset="utf-8">
<title>{title}</title>
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<link rel="stylesheet" href="{css}">
<script src="{js}"></script>
<style>
html, body, #map {{ height: 100%; margin: 0; }}
.meteo-popup table {{ border-collapse: collapse; font-size: 12px; }}
.meteo-popup th, .meteo-popup td {{ border: 1px solid #ccc; padding: 2px 4px; text-align: right; }}
</style>
</head>
<body>
<div id="map"></div>
<script>
var map = L.map('map').setView([{center_lat}, {center_lon}], {zoom});
L.tileLayer('{tiles}', {{ maxZoom: 18, attribution: '{attribution}' }}).addTo(map);
var markers = {markers};
markers.forEach(function (m) {{
  L.marker([m.latitude, m.longitude], {{ title: m.title }}).addTo(map).bindPopup(m.popup_html, {{ maxWidth: 600 }});
}});
</script>
</body>
</html>
"#,
            title = escape_html(&self.title),
            css = LEAFLET_CSS,
            js = LEAFLET_JS,
            center_lat = center_lat,
            center_lon = center_lon,
            zoom = DEFAULT_ZOOM,
            tiles = TILE_URL,
            attribution = TILE_ATTRIBUTION,
            markers = markers_json,
        )
    }

    /// Writes the rendered page to `path`
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())
    }
}

impl MarkerSink for LeafletMap {
    fn add_marker(&mut self, marker: Marker) {
        self.markers.push(marker);
    }
}
