use crate::model::GeoPoint;
use chrono::{DateTime, SecondsFormat, Utc};

const EARTH_RADIUS_KM: f64 = 6371.0;
const GEOHASH_BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
pub const DEFAULT_GEOHASH_PRECISION: usize = 9;

/// Great-circle distance in kilometers (haversine).
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Standard geohash, longitude bit first.
pub fn geohash(point: GeoPoint, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lng_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut even = true;
    let mut bit = 0;
    let mut ch = 0usize;

    while hash.len() < precision {
        if even {
            let mid = (lng_range.0 + lng_range.1) / 2.0;
            if point.longitude > mid {
                ch |= 1 << (4 - bit);
                lng_range.0 = mid;
            } else {
                lng_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if point.latitude > mid {
                ch |= 1 << (4 - bit);
                lat_range.0 = mid;
            } else {
                lat_range.1 = mid;
            }
        }
        even = !even;

        if bit < 4 {
            bit += 1;
        } else {
            hash.push(GEOHASH_BASE32[ch] as char);
            bit = 0;
            ch = 0;
        }
    }
    hash
}

/// ISO-8601 in UTC with millisecond precision, e.g. `2026-03-01T14:00:00.250Z`.
pub fn iso_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
