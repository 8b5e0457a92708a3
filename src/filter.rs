//! Geometry-level acceptance filters layered on top of matcher results
//! (spec §4.5 "geometry-level acceptance", §6 `Features(filter)`).
//!
//! A [`Filter`] never participates in index pruning -- it is applied only
//! after a candidate has already passed its tile's bbox test and the tag
//! matcher, exactly like the original's `SpatialFilter` chain
//! (`include/geodesk/filter/SpatialFilter.h`). It is the one place this
//! crate reaches for the `geo` crate's predicates rather than its own
//! projected-integer `Bbox`, since filters compare real geometry, not just
//! bounding boxes.

use geo::{Contains, Intersects, LineString, MultiPolygon, Point, Polygon};

use crate::feature::Feature;

/// A geometric predicate evaluated against a feature's decoded geometry
/// (spec §6: intersects / within / containsPoint / crossing / maxMetersFrom).
/// `Crossing` and `Intersects` coincide for this port's purposes -- the
/// original source distinguishes them only for boundary-touching edge cases
/// that the `geo` crate's `Intersects` already treats as intersecting.
#[derive(Debug, Clone)]
pub enum Filter {
    Intersects(Geometry),
    Within(Geometry),
    ContainsPoint(Point<f64>),
    Crossing(Geometry),
    MaxMetersFrom(Point<f64>, f64),
}

/// A filter's reference geometry, resolved once at construction time so
/// evaluating it against many candidates doesn't repeat the work.
#[derive(Debug, Clone)]
pub enum Geometry {
    Point(Point<f64>),
    LineString(LineString<f64>),
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Filter {
    pub fn intersects(geometry: Geometry) -> Self {
        Filter::Intersects(geometry)
    }

    pub fn within(geometry: Geometry) -> Self {
        Filter::Within(geometry)
    }

    pub fn contains_point(lon: f64, lat: f64) -> Self {
        Filter::ContainsPoint(Point::new(lon, lat))
    }

    pub fn crossing(geometry: Geometry) -> Self {
        Filter::Crossing(geometry)
    }

    pub fn max_meters_from(lon: f64, lat: f64, meters: f64) -> Self {
        Filter::MaxMetersFrom(Point::new(lon, lat), meters)
    }

    /// Tests a feature's decoded geometry against this filter. Features with
    /// no decodable geometry (e.g. a non-area relation -- a member
    /// collection, not a single shape; spec §1 "no GIS engine") never pass.
    pub fn accepts(&self, feature: &Feature) -> bool {
        let Some(candidate) = feature.geometry() else {
            return false;
        };
        match self {
            Filter::Intersects(g) | Filter::Crossing(g) => geometry_intersects(g, &candidate),
            Filter::Within(g) => geometry_contains(g, &candidate),
            Filter::ContainsPoint(p) => geometry_contains_point(&candidate, *p),
            Filter::MaxMetersFrom(p, meters) => geometry_distance_meters(&candidate, *p) <= *meters,
        }
    }
}

fn geometry_intersects(a: &Geometry, b: &Geometry) -> bool {
    match (a, b) {
        (Geometry::Point(a), Geometry::Point(b)) => a.intersects(b),
        (Geometry::Point(a), Geometry::LineString(b)) => a.intersects(b),
        (Geometry::Point(a), Geometry::Polygon(b)) => a.intersects(b),
        (Geometry::Point(a), Geometry::MultiPolygon(b)) => a.intersects(b),
        (Geometry::LineString(a), Geometry::Point(b)) => a.intersects(b),
        (Geometry::LineString(a), Geometry::LineString(b)) => a.intersects(b),
        (Geometry::LineString(a), Geometry::Polygon(b)) => a.intersects(b),
        (Geometry::LineString(a), Geometry::MultiPolygon(b)) => a.intersects(b),
        (Geometry::Polygon(a), Geometry::Point(b)) => a.intersects(b),
        (Geometry::Polygon(a), Geometry::LineString(b)) => a.intersects(b),
        (Geometry::Polygon(a), Geometry::Polygon(b)) => a.intersects(b),
        (Geometry::Polygon(a), Geometry::MultiPolygon(b)) => a.intersects(b),
        (Geometry::MultiPolygon(a), Geometry::Point(b)) => a.intersects(b),
        (Geometry::MultiPolygon(a), Geometry::LineString(b)) => a.intersects(b),
        (Geometry::MultiPolygon(a), Geometry::Polygon(b)) => a.intersects(b),
        (Geometry::MultiPolygon(a), Geometry::MultiPolygon(b)) => a.intersects(b),
    }
}

/// "Within": does `candidate` lie within the filter's reference geometry
/// `within_of`? `geo::Contains` is the reverse relation, so the arguments
/// are swapped relative to [`geometry_intersects`].
fn geometry_contains(within_of: &Geometry, candidate: &Geometry) -> bool {
    match (within_of, candidate) {
        (Geometry::Polygon(a), Geometry::Point(b)) => a.contains(b),
        (Geometry::Polygon(a), Geometry::LineString(b)) => a.contains(b),
        (Geometry::Polygon(a), Geometry::Polygon(b)) => a.contains(b),
        (Geometry::MultiPolygon(a), Geometry::Point(b)) => a.contains(b),
        (Geometry::MultiPolygon(a), Geometry::LineString(b)) => a.contains(b),
        (Geometry::MultiPolygon(a), Geometry::Polygon(b)) => a.contains(b),
        // A point or line can only "contain" its own kind; nothing of
        // interest is ever within a zero-area or linear reference shape.
        _ => false,
    }
}

fn geometry_contains_point(candidate: &Geometry, point: Point<f64>) -> bool {
    match candidate {
        Geometry::Point(p) => p.intersects(&point),
        Geometry::LineString(l) => l.intersects(&point),
        Geometry::Polygon(p) => p.contains(&point),
        Geometry::MultiPolygon(p) => p.contains(&point),
    }
}

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters, computed directly rather than through
/// an unverified `geo::Distance`/`Haversine` trait.
fn haversine_meters(from: Point<f64>, to: Point<f64>) -> f64 {
    let (lat1, lon1) = (from.y().to_radians(), from.x().to_radians());
    let (lat2, lon2) = (to.y().to_radians(), to.x().to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// Closest point to `p` on the segment `a`-`b`, found via a local
/// equirectangular projection centered on `p` (degrees scaled by
/// `cos(latitude)` so the projection is locally conformal) -- accurate
/// enough to pick the right point along the segment regardless of its
/// length, since only the projected *direction*, not its absolute scale,
/// determines which point minimizes distance; the final distance reported
/// to the caller is always the true haversine distance from `p` to
/// whichever point this returns.
fn nearest_point_on_segment(p: Point<f64>, a: Point<f64>, b: Point<f64>) -> Point<f64> {
    let scale_x = p.y().to_radians().cos().max(1e-6);
    let (px, py) = (p.x() * scale_x, p.y());
    let (ax, ay) = (a.x() * scale_x, a.y());
    let (bx, by) = (b.x() * scale_x, b.y());
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 1e-18 {
        (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    Point::new((ax + t * dx) / scale_x, ay + t * dy)
}

/// Closest point to `p` on any segment of `line`, or `None` for an empty
/// line.
fn nearest_point_on_linestring(p: Point<f64>, line: &LineString<f64>) -> Option<Point<f64>> {
    let coords = &line.0;
    match coords.len() {
        0 => None,
        1 => Some(Point::new(coords[0].x, coords[0].y)),
        _ => coords
            .windows(2)
            .map(|w| nearest_point_on_segment(p, Point::new(w[0].x, w[0].y), Point::new(w[1].x, w[1].y)))
            .min_by(|a, b| haversine_meters(p, *a).total_cmp(&haversine_meters(p, *b))),
    }
}

/// Distance from `p` to a polygon's boundary, or `0.0` if `p` lies inside
/// it (a point inside a shape is "at" that shape, not at some nonzero
/// distance from its nearest edge).
fn polygon_distance_meters(p: Point<f64>, polygon: &Polygon<f64>) -> f64 {
    if polygon.contains(&p) {
        return 0.0;
    }
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .filter_map(|ring| nearest_point_on_linestring(p, ring))
        .map(|np| haversine_meters(p, np))
        .fold(f64::INFINITY, f64::min)
}

/// True minimum great-circle distance in meters from `from` to `candidate`
/// (`maxMetersFrom`): the nearest point on the actual geometry, not merely
/// its first vertex -- a long way or polygon can have a far first vertex
/// but a close edge, or vice versa.
fn geometry_distance_meters(candidate: &Geometry, from: Point<f64>) -> f64 {
    match candidate {
        Geometry::Point(p) => haversine_meters(from, *p),
        Geometry::LineString(l) => nearest_point_on_linestring(from, l).map(|np| haversine_meters(from, np)).unwrap_or(f64::INFINITY),
        Geometry::Polygon(p) => polygon_distance_meters(from, p),
        Geometry::MultiPolygon(mp) => mp.0.iter().map(|p| polygon_distance_meters(from, p)).fold(f64::INFINITY, f64::min),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    #[test]
    fn haversine_distance_between_known_points_is_reasonable() {
        // London to Paris is roughly 344 km.
        let london = Geometry::Point(Point::new(-0.1278, 51.5074));
        let paris = Point::new(2.3522, 48.8566);
        let d = geometry_distance_meters(&london, paris);
        assert!((300_000.0..400_000.0).contains(&d), "distance was {d}");
    }

    #[test]
    fn distance_to_linestring_uses_nearest_segment_not_first_vertex() {
        let line = LineString(vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 0.0, y: 1.0 }, coord! { x: 1.0, y: 1.0 }]);
        let candidate = Geometry::LineString(line);
        // Near the last segment, far from the first vertex at (0, 0).
        let from = Point::new(1.0, 0.99);
        let d = geometry_distance_meters(&candidate, from);
        assert!(d < 5_000.0, "distance was {d}, expected close to the nearest edge, not the far first vertex");
    }

    #[test]
    fn distance_to_polygon_is_zero_when_point_is_inside() {
        let square = Polygon::new(
            LineString(vec![
                coord! { x: 0.0, y: 0.0 },
                coord! { x: 0.0, y: 10.0 },
                coord! { x: 10.0, y: 10.0 },
                coord! { x: 10.0, y: 0.0 },
                coord! { x: 0.0, y: 0.0 },
            ]),
            vec![],
        );
        let candidate = Geometry::Polygon(square);
        assert_eq!(geometry_distance_meters(&candidate, Point::new(5.0, 5.0)), 0.0);
    }

    #[test]
    fn distance_to_polygon_uses_nearest_edge_not_first_vertex() {
        let square = Polygon::new(
            LineString(vec![
                coord! { x: 0.0, y: 0.0 },
                coord! { x: 0.0, y: 10.0 },
                coord! { x: 10.0, y: 10.0 },
                coord! { x: 10.0, y: 0.0 },
                coord! { x: 0.0, y: 0.0 },
            ]),
            vec![],
        );
        let candidate = Geometry::Polygon(square);
        // Just outside the edge at x=10, far from the first vertex (0, 0).
        let from = Point::new(10.1, 5.0);
        let d = geometry_distance_meters(&candidate, from);
        assert!(d < 20_000.0, "distance was {d}, expected close to the near edge, not the far first vertex");
    }

    #[test]
    fn polygon_contains_interior_point() {
        let square = Polygon::new(
            LineString(vec![
                coord! { x: 0.0, y: 0.0 },
                coord! { x: 0.0, y: 10.0 },
                coord! { x: 10.0, y: 10.0 },
                coord! { x: 10.0, y: 0.0 },
                coord! { x: 0.0, y: 0.0 },
            ]),
            vec![],
        );
        let candidate = Geometry::Polygon(square);
        assert!(geometry_contains_point(&candidate, Point::new(5.0, 5.0)));
        assert!(!geometry_contains_point(&candidate, Point::new(50.0, 50.0)));
    }
}
