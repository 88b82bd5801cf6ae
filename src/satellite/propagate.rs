//! SGP4 propagation to WGS84 ground positions.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

const WGS84_A_KM: f64 = 6378.137;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const SECONDS_PER_DAY: f64 = 86_400.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const J2000_JD: f64 = 2_451_545.0;

/// Sub-satellite point and height above the ellipsoid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geodetic {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_km: f64,
}

impl Geodetic {
    pub fn is_finite(&self) -> bool {
        self.latitude_deg.is_finite() && self.longitude_deg.is_finite() && self.altitude_km.is_finite()
    }
}

/// Propagate orbital elements to `at` and convert to geodetic coordinates.
pub fn propagate(elements: &sgp4::Elements, at: DateTime<Utc>) -> Result<Geodetic> {
    let constants = sgp4::Constants::from_elements(elements)
        .map_err(|e| anyhow!("invalid orbital elements: {}", e))?;
    let elapsed = at.naive_utc() - elements.datetime;
    let minutes = elapsed.num_milliseconds() as f64 / 60_000.0;
    let prediction = constants
        .propagate(sgp4::MinutesSinceEpoch(minutes))
        .map_err(|e| anyhow!("propagation failed: {}", e))?;
    Ok(teme_to_geodetic(prediction.position, gmst_rad(at)))
}

/// Greenwich mean sidereal time (IAU 1982), radians.
pub fn gmst_rad(at: DateTime<Utc>) -> f64 {
    let unix_s = at.timestamp() as f64 + at.timestamp_subsec_nanos() as f64 * 1e-9;
    let jd = unix_s / SECONDS_PER_DAY + UNIX_EPOCH_JD;
    let t = (jd - J2000_JD) / 36_525.0;
    let seconds = 67_310.548_41 + (876_600.0 * 3600.0 + 8_640_184.812_866) * t
        + 0.093_104 * t * t
        - 6.2e-6 * t * t * t;
    let degrees = seconds.rem_euclid(SECONDS_PER_DAY) / 240.0;
    degrees.to_radians()
}

/// TEME position (km) to WGS84 geodetic, given sidereal angle `gmst`.
pub fn teme_to_geodetic(position: [f64; 3], gmst: f64) -> Geodetic {
    let (sin_g, cos_g) = gmst.sin_cos();
    let x = cos_g * position[0] + sin_g * position[1];
    let y = -sin_g * position[0] + cos_g * position[1];
    let z = position[2];

    let e2 = WGS84_F * (2.0 - WGS84_F);
    let p = x.hypot(y);
    let longitude = y.atan2(x);
    let mut latitude = z.atan2(p * (1.0 - e2));
    let mut altitude = 0.0;
    for _ in 0..6 {
        let sin_lat = latitude.sin();
        let n = WGS84_A_KM / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        altitude = if latitude.cos().abs() > 1e-10 {
            p / latitude.cos() - n
        } else {
            z.abs() - n * (1.0 - e2)
        };
        latitude = z.atan2(p * (1.0 - e2 * n / (n + altitude)));
    }

    Geodetic {
        latitude_deg: latitude.to_degrees(),
        longitude_deg: normalize_longitude(longitude.to_degrees()),
        altitude_km: altitude,
    }
}

/// Wrap into [-180, 180).
pub fn normalize_longitude(degrees: f64) -> f64 {
    (degrees + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn equator_point_maps_to_zero_height() {
        let g = teme_to_geodetic([WGS84_A_KM, 0.0, 0.0], 0.0);
        assert!(g.latitude_deg.abs() < 1e-9);
        assert!(g.longitude_deg.abs() < 1e-9);
        assert!(g.altitude_km.abs() < 1e-6);
    }

    #[test]
    fn sidereal_rotation_shifts_longitude() {
        let g = teme_to_geodetic([0.0, WGS84_A_KM + 400.0, 0.0], 0.0);
        assert!((g.longitude_deg - 90.0).abs() < 1e-9);
        assert!((g.altitude_km - 400.0).abs() < 1e-6);

        let rotated = teme_to_geodetic([0.0, WGS84_A_KM + 400.0, 0.0], 90f64.to_radians());
        assert!(rotated.longitude_deg.abs() < 1e-9);
    }

    #[test]
    fn polar_point_has_polar_radius_height() {
        let b = WGS84_A_KM * (1.0 - WGS84_F);
        let g = teme_to_geodetic([0.0, 0.0, b + 10.0], 0.0);
        assert!((g.latitude_deg - 90.0).abs() < 1e-6);
        assert!((g.altitude_km - 10.0).abs() < 1e-3);
    }

    #[test]
    fn gmst_at_j2000_matches_reference() {
        // 2000-01-01T12:00:00Z: GMST = 280.46061837 degrees.
        let at = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        let expected = 280.460_618_37_f64.to_radians();
        assert!((gmst_rad(at) - expected).abs() < 1e-6);
    }

    #[test]
    fn longitude_normalization() {
        assert_eq!(normalize_longitude(190.0), -170.0);
        assert_eq!(normalize_longitude(-180.0), -180.0);
        assert_eq!(normalize_longitude(180.0), -180.0);
        assert_eq!(normalize_longitude(45.0), 45.0);
    }
}
