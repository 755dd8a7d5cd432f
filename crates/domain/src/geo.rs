//! 地理距离与ETA的纯函数计算

use serde::{Deserialize, Serialize};

/// 地球平均半径（公里）
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// 市区平均行驶速度（公里/小时），用于在途ETA估算
pub const URBAN_SPEED_KMH: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Haversine 大圆距离，单位公里
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// 按市区速度估算在途分钟数，向上取整，至少1分钟
pub fn eta_minutes(distance_km: f64) -> i64 {
    let minutes = (distance_km / URBAN_SPEED_KMH * 60.0).ceil() as i64;
    minutes.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        let p = GeoPoint {
            lat: 10.6549,
            lng: -61.5019,
        };
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_known_distance() {
        // 西班牙港 -> 圣费尔南多，约42公里
        let pos = GeoPoint {
            lat: 10.6549,
            lng: -61.5019,
        };
        let sfo = GeoPoint {
            lat: 10.2799,
            lng: -61.4589,
        };
        let d = haversine_km(pos, sfo);
        assert!((d - 42.0).abs() < 10.0, "distance was {d}");

        // 一度纬线约111公里
        let a = GeoPoint { lat: 0.0, lng: 0.0 };
        let b = GeoPoint { lat: 1.0, lng: 0.0 };
        let d = haversine_km(a, b);
        assert!((d - 111.19).abs() < 0.5, "distance was {d}");
    }

    #[test]
    fn test_haversine_is_symmetric() {
        let a = GeoPoint {
            lat: 10.0,
            lng: -61.0,
        };
        let b = GeoPoint {
            lat: 10.5,
            lng: -61.5,
        };
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn test_eta_minutes_floor_is_one() {
        assert_eq!(eta_minutes(0.0), 1);
        assert_eq!(eta_minutes(0.1), 1);
    }

    #[test]
    fn test_eta_minutes_rounds_up() {
        // 30 km/h: 15公里 -> 30分钟整
        assert_eq!(eta_minutes(15.0), 30);
        // 15.1公里 -> 30.2分钟，向上取整为31
        assert_eq!(eta_minutes(15.1), 31);
        assert_eq!(eta_minutes(1.0), 2);
    }
}
