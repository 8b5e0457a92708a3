//! Leaflet-based HTML map output (SPEC_FULL.md §B.8, grounded on
//! `include/geodesk/format/MapWriter.h`). Produces one self-contained HTML
//! document embedding a GeoJSON `FeatureCollection` and a Leaflet script
//! tag, exactly like the original writes a single buffer the caller saves
//! to disk and opens in a browser -- no server, no build step.

use crate::error::Result;
use crate::feature::Feature;
use crate::format::geometry_to_geojson;

/// Tunable presentation knobs, mirroring `MapWriter`'s private fields
/// (`basemapUrl_`, `attribution_`, `leafletUrl_`, `leafletStylesheetUrl_`,
/// `leafletVersion_`, `minZoom_`, `maxZoom_`).
#[derive(Debug, Clone)]
pub struct MapWriter {
    pub basemap_url: String,
    pub attribution: String,
    pub leaflet_version: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Default for MapWriter {
    fn default() -> Self {
        MapWriter {
            basemap_url: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            attribution: "Map data &copy; <a href=\"http://openstreetmap.org\">OpenStreetMap</a> contributors".to_string(),
            leaflet_version: "1.8.0".to_string(),
            min_zoom: 0,
            max_zoom: 19,
        }
    }
}

impl MapWriter {
    pub fn new() -> Self {
        MapWriter::default()
    }

    fn leaflet_js_url(&self) -> String {
        format!("https://unpkg.com/leaflet@{v}/dist/leaflet.js", v = self.leaflet_version)
    }

    fn leaflet_css_url(&self) -> String {
        format!("https://unpkg.com/leaflet@{v}/dist/leaflet.css", v = self.leaflet_version)
    }

    fn header(&self) -> String {
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <link rel=\"stylesheet\" href=\"{css}\">\n\
             <script src=\"{js}\"></script>\n\
             <style>html,body,#map{{height:100%;margin:0}}</style>\n\
             </head>\n<body>\n<div id=\"map\"></div>\n<script>\n",
            css = self.leaflet_css_url(),
            js = self.leaflet_js_url(),
        )
    }

    fn footer(&self, feature_count: usize) -> String {
        format!(
            "var map = L.map('map');\n\
             L.tileLayer('{basemap}', {{minZoom: {min}, maxZoom: {max}, attribution: '{attr}'}}).addTo(map);\n\
             var layer = L.geoJSON(features).addTo(map);\n\
             if ({count} > 0) {{ map.fitBounds(layer.getBounds()); }} else {{ map.setView([0, 0], 2); }}\n\
             </script>\n</body>\n</html>\n",
            basemap = self.basemap_url,
            min = self.min_zoom,
            max = self.max_zoom,
            attr = self.attribution.replace('\'', "\\'"),
            count = feature_count,
        )
    }

    /// Renders one self-contained HTML document for every feature that
    /// decodes a geometry; features with none (e.g. a non-area relation,
    /// spec §1 "no GIS engine") are silently skipped, matching
    /// `MapWriter::writeFeature`'s behavior of only emitting a shape it can
    /// actually draw.
    pub fn write_map(&self, features: impl Iterator<Item = Result<Feature>>) -> Result<String> {
        let mut geojson_features = Vec::new();
        for feature in features {
            let feature = feature?;
            let Some(geometry) = feature.geometry() else { continue };
            geojson_features.push(serde_json::json!({
                "type": "Feature",
                "id": feature.id(),
                "properties": { "type": feature.type_name() },
                "geometry": geometry_to_geojson(&geometry),
            }));
        }
        let count = geojson_features.len();
        let collection = serde_json::json!({ "type": "FeatureCollection", "features": geojson_features });

        let mut out = self.header();
        out.push_str(&format!("var features = {};\n", collection));
        out.push_str(&self.footer(count));
        Ok(out)
    }
}
