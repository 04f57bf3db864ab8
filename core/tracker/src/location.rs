//! Provider gate: which fixes count as delivered.
//!
//! Mirrors the subscription a location provider is registered with: only
//! subscribed providers deliver, and each provider delivers at most once per
//! `min_time_secs` and only after moving `min_distance_m`. Fixes rejected here
//! never reach the point recorder.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use tracker_protocol::LocationFix;

use crate::config::SamplingConfig;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    UnsubscribedProvider,
    TooSoon,
    TooClose,
}

impl GateRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateRejection::UnsubscribedProvider => "unsubscribed_provider",
            GateRejection::TooSoon => "too_soon",
            GateRejection::TooClose => "too_close",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Delivered {
    at: DateTime<Local>,
    lat: f64,
    lon: f64,
}

pub struct ProviderGate {
    sampling: SamplingConfig,
    last: HashMap<String, Delivered>,
}

impl ProviderGate {
    pub fn new(sampling: SamplingConfig) -> Self {
        Self {
            sampling,
            last: HashMap::new(),
        }
    }

    /// Admits `fix` arriving at `now`, remembering it as the provider's last
    /// delivery when accepted.
    pub fn admit(&mut self, fix: &LocationFix, now: DateTime<Local>) -> Result<(), GateRejection> {
        let provider = fix.provider.trim();
        if !self
            .sampling
            .providers
            .iter()
            .any(|subscribed| subscribed == provider)
        {
            return Err(GateRejection::UnsubscribedProvider);
        }

        if let Some(previous) = self.last.get(provider) {
            let elapsed = now.signed_duration_since(previous.at).num_milliseconds();
            let min_time_ms = self.sampling.min_time_secs.saturating_mul(1000) as i64;
            if min_time_ms > 0 && elapsed < min_time_ms {
                return Err(GateRejection::TooSoon);
            }

            if self.sampling.min_distance_m > 0.0 {
                let moved = haversine_distance(previous.lat, previous.lon, fix.lat, fix.lon);
                if moved < self.sampling.min_distance_m {
                    return Err(GateRejection::TooClose);
                }
            }
        }

        self.last.insert(
            provider.to_string(),
            Delivered {
                at: now,
                lat: fix.lat,
                lon: fix.lon,
            },
        );
        Ok(())
    }

    /// Forgets every provider's last delivery.
    pub fn reset(&mut self) {
        self.last.clear();
    }
}

/// Haversine distance between two points in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}
