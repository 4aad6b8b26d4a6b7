//! Geodesic helpers over WGS-84 coordinates.
//!
//! All distances are meters, bearings are degrees clockwise from true
//! north. Formulas are the standard spherical haversine / cross-track
//! forms, which are accurate to well under a meter at corridor scale.

use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Great-circle distance between two points, in meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` toward `b`, degrees in [0, 360).
pub fn initial_bearing_deg(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Point reached by travelling `distance_m` from `origin` on `bearing_deg`.
pub fn destination_point(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();
    let brg = bearing_deg.to_radians();
    let d = distance_m / EARTH_RADIUS_M;

    let lat2 = (lat1.sin() * d.cos() + lat1.cos() * d.sin() * brg.cos()).asin();
    let lon2 = lon1 + (brg.sin() * d.sin() * lat1.cos()).atan2(d.cos() - lat1.sin() * lat2.sin());

    GeoPoint {
        lat: lat2.to_degrees(),
        lon: ((lon2.to_degrees() + 540.0) % 360.0) - 180.0,
    }
}

/// Linear interpolation between two nearby points.
///
/// Only valid for segment-scale spans (hundreds of meters), which is the
/// only way it is used here.
pub fn interpolate(a: GeoPoint, b: GeoPoint, f: f64) -> GeoPoint {
    let f = f.clamp(0.0, 1.0);
    GeoPoint {
        lat: a.lat + (b.lat - a.lat) * f,
        lon: a.lon + (b.lon - a.lon) * f,
    }
}

/// Signed cross-track distance from `p` to the great circle through
/// `start`→`end`, in meters. Positive means right of track.
pub fn cross_track_distance_m(p: GeoPoint, start: GeoPoint, end: GeoPoint) -> f64 {
    let d13 = haversine_m(start, p) / EARTH_RADIUS_M;
    let b13 = initial_bearing_deg(start, p).to_radians();
    let b12 = initial_bearing_deg(start, end).to_radians();
    let dxt = (d13.sin() * (b13 - b12).sin()).clamp(-1.0, 1.0).asin();
    dxt * EARTH_RADIUS_M
}

/// Along-track distance from `start` to the projection of `p` onto the
/// `start`→`end` track, in meters. Negative when the projection falls
/// behind `start`.
pub fn along_track_distance_m(p: GeoPoint, start: GeoPoint, end: GeoPoint) -> f64 {
    let d13 = haversine_m(start, p) / EARTH_RADIUS_M;
    let b13 = initial_bearing_deg(start, p).to_radians();
    let b12 = initial_bearing_deg(start, end).to_radians();
    let dxt = (d13.sin() * (b13 - b12).sin()).clamp(-1.0, 1.0).asin();
    let dat = (d13.cos() / dxt.cos().max(f64::EPSILON)).clamp(-1.0, 1.0).acos();
    let sign = if (b13 - b12).cos() >= 0.0 { 1.0 } else { -1.0 };
    sign * dat * EARTH_RADIUS_M
}

/// Shortest distance from `p` to the bounded segment `start`→`end`.
pub fn point_to_segment_m(p: GeoPoint, start: GeoPoint, end: GeoPoint) -> f64 {
    let seg_len = haversine_m(start, end);
    if seg_len < 1.0 {
        return haversine_m(p, start);
    }
    let along = along_track_distance_m(p, start, end);
    if along <= 0.0 {
        haversine_m(p, start)
    } else if along >= seg_len {
        haversine_m(p, end)
    } else {
        cross_track_distance_m(p, start, end).abs()
    }
}

/// Smallest signed difference `b - a` between two bearings, in (-180, 180].
pub fn bearing_diff_deg(a: f64, b: f64) -> f64 {
    let mut d = (b - a) % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d <= -180.0 {
        d += 360.0;
    }
    d
}
