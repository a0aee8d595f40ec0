use crate::types::Position;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates in kilometers.
///
/// Haversine formula on a spherical-Earth approximation. Coordinate
/// validity is the caller's responsibility.
pub fn distance_km(a: Position, b: Position) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pos(lat: f64, lon: f64) -> Position {
        Position {
            latitude: lat,
            longitude: lon,
        }
    }

    #[test]
    fn test_zero_distance() {
        let p = pos(51.5074, -0.1278);
        assert_relative_eq!(distance_km(p, p), 0.0);
    }

    #[test]
    fn test_one_degree_longitude_at_equator() {
        // One degree of longitude at the equator is ~111.19 km
        let d = distance_km(pos(0.0, 0.0), pos(0.0, 1.0));
        assert_relative_eq!(d, 111.19, epsilon = 0.05);
    }

    #[test]
    fn test_london_to_paris() {
        // Known pair, ~343-344 km
        let d = distance_km(pos(51.5074, -0.1278), pos(48.8566, 2.3522));
        assert!(d > 340.0 && d < 348.0, "unexpected distance: {}", d);
    }

    #[test]
    fn test_symmetry() {
        let a = pos(37.7749, -122.4194);
        let b = pos(34.0522, -118.2437);
        assert_relative_eq!(distance_km(a, b), distance_km(b, a));
    }
}
