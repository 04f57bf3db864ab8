//! Turns delivered fixes into track points on the current track.

use tracker_protocol::{FixQuality, LocationFix, TrackPoint};

use crate::clock::to_store_time;
use crate::error::Result;
use crate::state::RecordingState;
use crate::store::{NewTrackPoint, TrackStore};

#[derive(Debug, Default)]
pub struct PointRecorder {
    satellites: u32,
}

impl PointRecorder {
    pub fn satellites(&self) -> u32 {
        self.satellites
    }

    /// Fix-quality events only refresh the last-known satellite count.
    pub fn update_quality(&mut self, quality: FixQuality) {
        self.satellites = quality.satellites;
    }

    /// Inserts one point for `fix` on the current track. Returns `None` when
    /// nothing is recording; such fixes are dropped, not buffered.
    pub fn record(
        &self,
        store: &dyn TrackStore,
        state: &RecordingState,
        fix: &LocationFix,
    ) -> Result<Option<TrackPoint>> {
        let Some(session) = state.current_track_id() else {
            return Ok(None);
        };

        let timestamp = fix
            .timestamp()
            .map(|at| to_store_time(at.with_timezone(&chrono::Local)))
            .unwrap_or_else(|| fix.time.clone());

        let point = store.insert_point(&NewTrackPoint {
            session,
            lon: fix.lon,
            lat: fix.lat,
            ele: fix.ele,
            fix: fix.fix_kind(),
            sat: self.satellites,
            timestamp,
            provider: fix.provider.trim().to_string(),
        })?;

        tracing::debug!(
            track_id = session,
            point_id = point.id,
            provider = %point.provider,
            fix = point.fix.as_str(),
            sat = point.sat,
            "Track point recorded"
        );
        Ok(Some(point))
    }
}
