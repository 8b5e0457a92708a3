//! Axis-aligned bounding boxes in the projected (Mercator) integer
//! coordinate space used throughout the store (spec §3.2, §3.3, §4.5).

use crate::codec::mercator::{lat_to_y, lon_to_x};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bbox {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Bbox {
    pub const EMPTY: Bbox = Bbox {
        min_x: i32::MAX,
        min_y: i32::MAX,
        max_x: i32::MIN,
        max_y: i32::MIN,
    };

    pub const WORLD: Bbox = Bbox {
        min_x: i32::MIN,
        min_y: i32::MIN,
        max_x: i32::MAX,
        max_y: i32::MAX,
    };

    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Bbox { min_x, min_y, max_x, max_y }
    }

    /// Builds a bbox from a geographic (lon, lat) corner pair.
    pub fn from_lon_lat(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Bbox {
            min_x: lon_to_x(min_lon),
            min_y: lat_to_y(min_lat),
            max_x: lon_to_x(max_lon),
            max_y: lat_to_y(max_lat),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn intersects(&self, other: &Bbox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn contains(&self, other: &Bbox) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Narrows to the overlap with `other`; the result `is_empty()` if the
    /// two boxes don't overlap at all (spec §6 `Features(bbox)`).
    pub fn intersection(&self, other: &Bbox) -> Bbox {
        Bbox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        }
    }

    pub fn union(&self, other: &Bbox) -> Bbox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Bbox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn expand(&mut self, x: i32, y: i32) {
        if self.is_empty() {
            self.min_x = x;
            self.min_y = y;
            self.max_x = x;
            self.max_y = y;
        } else {
            self.min_x = self.min_x.min(x);
            self.min_y = self.min_y.min(y);
            self.max_x = self.max_x.max(x);
            self.max_y = self.max_y.max(y);
        }
    }

    pub fn center(&self) -> (i32, i32) {
        (
            self.min_x + (self.max_x - self.min_x) / 2,
            self.min_y + (self.max_y - self.min_y) / 2,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_boxes_do_not_intersect() {
        let a = Bbox::new(0, 0, 10, 10);
        let b = Bbox::new(20, 20, 30, 30);
        assert!(!a.intersects(&b));
    }

    #[test]
    fn touching_boxes_intersect() {
        let a = Bbox::new(0, 0, 10, 10);
        let b = Bbox::new(10, 10, 20, 20);
        assert!(a.intersects(&b));
    }

    #[test]
    fn union_grows_to_cover_both() {
        let a = Bbox::new(0, 0, 5, 5);
        let b = Bbox::new(3, 3, 10, 1);
        // b's y range is inverted/degenerate on purpose here; union still
        // widens min/max independently per axis.
        let u = a.union(&Bbox::new(3, -2, 10, 8));
        assert_eq!(u, Bbox::new(0, -2, 10, 8));
        let _ = b;
    }
}
