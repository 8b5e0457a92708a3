//! Mercator projection between geographic (lon, lat) and the 32-bit
//! projected integer coordinate space used by way/node bodies (spec §3.3,
//! §4.3). Longitude maps linearly onto the full `i32` range; latitude is
//! projected with the standard spherical Mercator formula and then scaled
//! onto the same range, matching the original's fixed-point tile geometry.

use std::f64::consts::PI;

/// Half the width of the projected coordinate space (`i32::MAX` would
/// overflow on the round-trip at the poles, so clamp to this bound).
const PROJECTED_EXTENT: f64 = 2_147_483_647.0;

/// Converts a longitude in degrees to a projected x coordinate.
pub fn lon_to_x(lon: f64) -> i32 {
    let clamped = lon.clamp(-180.0, 180.0);
    ((clamped / 180.0) * PROJECTED_EXTENT) as i32
}

/// Converts a projected x coordinate back to a longitude in degrees.
pub fn x_to_lon(x: i32) -> f64 {
    (f64::from(x) / PROJECTED_EXTENT) * 180.0
}

/// Converts a latitude in degrees to a projected y coordinate using
/// spherical Mercator.
pub fn lat_to_y(lat: f64) -> i32 {
    let clamped = lat.clamp(-85.051_128_78, 85.051_128_78);
    let merc = (PI / 4.0 + clamped.to_radians() / 2.0).tan().ln();
    // merc is in (-PI, PI); scale onto the projected extent.
    ((merc / PI) * PROJECTED_EXTENT) as i32
}

/// Converts a projected y coordinate back to a latitude in degrees.
pub fn y_to_lat(y: i32) -> f64 {
    let merc = (f64::from(y) / PROJECTED_EXTENT) * PI;
    (2.0 * (merc.exp().atan() - PI / 4.0)).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longitude_roundtrips_within_tolerance() {
        for lon in [-180.0, -90.0, -45.5, 0.0, 1.0, 45.5, 90.0, 179.999] {
            let x = lon_to_x(lon);
            let back = x_to_lon(x);
            assert!((back - lon).abs() < 1e-4, "{lon} -> {x} -> {back}");
        }
    }

    #[test]
    fn latitude_roundtrips_within_tolerance() {
        for lat in [-85.0, -45.0, 0.0, 1.0, 45.0, 84.9] {
            let y = lat_to_y(lat);
            let back = y_to_lat(y);
            assert!((back - lat).abs() < 1e-3, "{lat} -> {y} -> {back}");
        }
    }

    #[test]
    fn equator_and_prime_meridian_map_near_origin() {
        assert_eq!(lon_to_x(0.0), 0);
        assert_eq!(lat_to_y(0.0), 0);
    }
}
