//! CRUD interface over track and track-point records.
//!
//! The lifecycle manager and point recorder only see this trait; `Db` is the
//! SQLite implementation used by the daemon.

use tracker_protocol::{FixKind, Track, TrackPoint};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrack {
    pub name: String,
    pub start: String,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrackPoint {
    pub session: i64,
    pub lon: f64,
    pub lat: f64,
    pub ele: Option<f64>,
    pub fix: FixKind,
    pub sat: u32,
    pub timestamp: String,
    pub provider: String,
}

pub trait TrackStore: Send {
    /// Track with the highest id, if any.
    fn last_track(&self) -> Result<Option<Track>>;

    fn get_track(&self, id: i64) -> Result<Option<Track>>;

    fn track_name_exists(&self, name: &str) -> Result<bool>;

    /// Sets `end` on every open track except `keep`. Returns rows touched.
    fn close_open_tracks(&self, end: &str, keep: Option<i64>) -> Result<usize>;

    /// Closes every open track and inserts `next` in one transaction.
    fn rotate_track(&self, end: &str, next: &NewTrack) -> Result<(usize, Track)>;

    fn insert_point(&self, point: &NewTrackPoint) -> Result<TrackPoint>;

    /// All tracks, newest first.
    fn list_tracks(&self) -> Result<Vec<Track>>;

    fn list_points(&self, track_id: i64) -> Result<Vec<TrackPoint>>;

    fn set_track_visible(&self, id: i64, visible: bool) -> Result<bool>;

    /// Deletes tracks and their points. Returns tracks removed.
    fn delete_tracks(&self, ids: &[i64]) -> Result<usize>;

    /// Closes every open track and deletes `ids` in one transaction.
    /// Returns (tracks closed, tracks removed).
    fn close_and_delete_tracks(&self, end: &str, ids: &[i64]) -> Result<(usize, usize)>;

    fn count_open_tracks(&self) -> Result<usize>;
}
