use crate::models::position::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Average urban driving speed assumed by the static ETA model.
const AVG_URBAN_SPEED_KMH: f64 = 30.0;

/// Great-circle distance in kilometers. Inputs are degrees; out-of-range
/// coordinates are not validated and NaN propagates to the result.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Static-speed arrival estimate in whole minutes, floored at 1. This is a
/// 30 km/h straight-line approximation, not a routed ETA.
pub fn eta_minutes(distance_km: f64) -> i64 {
    let minutes = (distance_km / AVG_URBAN_SPEED_KMH * 60.0).round() as i64;
    minutes.max(1)
}

#[cfg(test)]
mod tests {
    use super::{eta_minutes, haversine_km};
    use crate::models::position::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 5.3600,
            lng: -4.0083,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint {
            lat: 5.3600,
            lng: -4.0083,
        };
        let b = GeoPoint {
            lat: 6.8276,
            lng: -5.2893,
        };
        let forward = haversine_km(&a, &b);
        let back = haversine_km(&b, &a);
        assert!((forward - back).abs() < 1e-9);
    }

    #[test]
    fn tenth_of_a_degree_latitude_at_equator_is_about_11_km() {
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint { lat: 0.1, lng: 0.0 };
        let distance = haversine_km(&a, &b);
        assert!((distance - 11.1).abs() < 0.1);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn eta_is_floored_at_one_minute() {
        assert_eq!(eta_minutes(0.0), 1);
        assert_eq!(eta_minutes(0.1), 1);
    }

    #[test]
    fn eta_scales_with_distance() {
        // 30 km at 30 km/h is one hour.
        assert_eq!(eta_minutes(30.0), 60);
        assert_eq!(eta_minutes(15.0), 30);
    }
}
