//! Optional output formatters over the public `Feature`/`Features` API
//! (SPEC_FULL.md §B.8, grounded on `include/geodesk/format/CsvWriter.h` and
//! `MapWriter.h`). Neither formatter touches store internals -- both are
//! plain consumers of [`crate::feature::Feature`], matching spec §1's
//! framing of output formats as "referenced by interface" rather than core
//! functionality, which is why each lives behind its own crate feature.

#[cfg(feature = "fmt-csv")]
pub mod csv;
#[cfg(feature = "fmt-map")]
pub mod map;

use geo::{LineString, Point, Polygon};
use serde_json::{json, Value};

use crate::filter::Geometry;

/// Converts a decoded [`Geometry`] to a GeoJSON geometry object, shared by
/// both formatters (the map writer embeds a `FeatureCollection` built from
/// this; the CSV writer does not use it directly but callers commonly want
/// it alongside the column dump).
pub fn geometry_to_geojson(geometry: &Geometry) -> Value {
    match geometry {
        Geometry::Point(p) => json!({ "type": "Point", "coordinates": point_coords(p) }),
        Geometry::LineString(l) => json!({ "type": "LineString", "coordinates": line_coords(l) }),
        Geometry::Polygon(p) => json!({ "type": "Polygon", "coordinates": polygon_coords(p) }),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.0.iter().map(polygon_coords).collect::<Vec<_>>(),
        }),
    }
}

fn point_coords(p: &Point<f64>) -> Value {
    json!([p.x(), p.y()])
}

fn line_coords(l: &LineString<f64>) -> Value {
    l.0.iter().map(|c| json!([c.x, c.y])).collect()
}

fn polygon_coords(p: &Polygon<f64>) -> Value {
    let mut rings = vec![line_coords(p.exterior())];
    for interior in p.interiors() {
        rings.push(line_coords(interior));
    }
    Value::Array(rings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    #[test]
    fn point_round_trips_as_geojson_coordinates() {
        let geom = Geometry::Point(Point::new(13.4, 52.5));
        let json = geometry_to_geojson(&geom);
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"][0], 13.4);
        assert_eq!(json["coordinates"][1], 52.5);
    }

    #[test]
    fn polygon_includes_interior_rings() {
        let exterior = LineString(vec![coord! {x: 0.0, y: 0.0}, coord! {x: 0.0, y: 10.0}, coord! {x: 10.0, y: 10.0}, coord! {x: 0.0, y: 0.0}]);
        let interior = LineString(vec![coord! {x: 1.0, y: 1.0}, coord! {x: 1.0, y: 2.0}, coord! {x: 2.0, y: 2.0}, coord! {x: 1.0, y: 1.0}]);
        let polygon = Polygon::new(exterior, vec![interior]);
        let json = geometry_to_geojson(&Geometry::Polygon(polygon));
        assert_eq!(json["coordinates"].as_array().unwrap().len(), 2);
    }
}
