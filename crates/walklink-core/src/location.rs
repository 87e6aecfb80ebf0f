//! Location payload normalization.
//!
//! Clients stream either the compact form (`p`, `lat`, `lng`, `acc`, `spd`,
//! `ts`) or the older verbose form (`paseoId`, `latitud`, `longitud`,
//! `accuracy`, `speed`, `timestamp`). Both are accepted; compact keys win when
//! both are present.

use crate::model::{GeoPoint, LocationSample};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const INVALID_WALK_ID: &str = "paseoId inválido o vacío";
pub const INVALID_COORDINATES: &str = "Coordenadas inválidas";

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct LocationPayload {
    #[serde(default)]
    pub p: Option<String>,
    #[serde(default, rename = "paseoId")]
    pub paseo_id: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub latitud: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub longitud: Option<f64>,
    #[serde(default)]
    pub acc: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub spd: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Canonical location update after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationUpdate {
    pub walk_id: String,
    pub point: GeoPoint,
    pub accuracy: f64,
    pub speed: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationUpdate {
    pub fn sample(&self) -> LocationSample {
        LocationSample {
            latitude: self.point.latitude,
            longitude: self.point.longitude,
            accuracy: self.accuracy,
            speed: self.speed,
            captured_at: self.captured_at,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl LocationPayload {
    /// Normalizes into a [`LocationUpdate`]. `now` fills in a missing capture time.
    pub fn normalize(self, now: DateTime<Utc>) -> Result<LocationUpdate, &'static str> {
        let walk_id = non_empty(self.p)
            .or_else(|| non_empty(self.paseo_id))
            .ok_or(INVALID_WALK_ID)?;
        let latitude = self.lat.or(self.latitud).ok_or(INVALID_COORDINATES)?;
        let longitude = self.lng.or(self.longitud).ok_or(INVALID_COORDINATES)?;
        let point = GeoPoint::new(latitude, longitude);
        if !point.is_valid() {
            return Err(INVALID_COORDINATES);
        }
        let accuracy = self
            .acc
            .or(self.accuracy)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(0.0);
        let speed = self
            .spd
            .or(self.speed)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(0.0);
        let captured_at = self
            .ts
            .or(self.timestamp)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or(now);

        Ok(LocationUpdate {
            walk_id,
            point,
            accuracy,
            speed,
            captured_at,
        })
    }
}
