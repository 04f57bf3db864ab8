//! Persistent status surface mirroring the recording state.
//!
//! There is exactly one surface (`STATUS_SURFACE_ID`). While recording it
//! names the current track and offers "open" and "stop"; when stopped it is
//! cleared. The in-memory copy is authoritative for `get_status`; the sink is
//! the external notification surface and its failures are only logged.

use chrono::{DateTime, Local};
use fs_err as fs;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracker_protocol::{StatusSurface, SurfaceAction, STATUS_SURFACE_ID};

use crate::clock::to_store_time;
use crate::error::{Result, TrackerError};
use crate::state::{ActiveTrack, RecordingState};

const STATUS_TEXT: &str = "Track recording is running";

pub trait StatusSink: Send {
    fn show(&mut self, surface: &StatusSurface) -> Result<()>;
    fn clear(&mut self, id: u32) -> Result<()>;
}

/// Writes the surface as JSON to a single file, replaced in place.
pub struct FileStatusSink {
    path: PathBuf,
}

impl FileStatusSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StatusSink for FileStatusSink {
    fn show(&mut self, surface: &StatusSurface) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(TrackerError::io("create status dir"))?;
        }
        let payload =
            serde_json::to_vec_pretty(surface).map_err(TrackerError::json("serialize status"))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload).map_err(TrackerError::io("write status"))?;
        fs::rename(&tmp_path, &self.path).map_err(TrackerError::io("commit status"))?;
        Ok(())
    }

    fn clear(&mut self, _id: u32) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TrackerError::Io {
                context: "remove status".to_string(),
                source: err,
            }),
        }
    }
}

pub struct StatusNotifier {
    sink: Box<dyn StatusSink>,
    current: Option<StatusSurface>,
}

impl StatusNotifier {
    pub fn new(sink: Box<dyn StatusSink>) -> Self {
        Self {
            sink,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&StatusSurface> {
        self.current.as_ref()
    }

    /// Brings the surface in line with `state`. Called after every transition.
    pub fn mirror(&mut self, state: &RecordingState, now: DateTime<Local>) {
        match state.active() {
            Some(active) => {
                let surface = build_surface(active, now);
                if let Err(err) = self.sink.show(&surface) {
                    warn!(error = %err, "Failed to publish status surface");
                }
                debug!(title = %surface.title, "Status surface updated");
                self.current = Some(surface);
            }
            None => {
                if let Err(err) = self.sink.clear(STATUS_SURFACE_ID) {
                    warn!(error = %err, "Failed to clear status surface");
                }
                if self.current.take().is_some() {
                    debug!("Status surface cleared");
                }
            }
        }
    }
}

fn build_surface(active: &ActiveTrack, now: DateTime<Local>) -> StatusSurface {
    StatusSurface {
        id: STATUS_SURFACE_ID,
        title: format!("Recording {}", active.track.name),
        text: STATUS_TEXT.to_string(),
        track_name: active.track.name.clone(),
        updated_at: to_store_time(now),
        actions: vec![
            SurfaceAction::Open {
                launch: active.target.clone(),
            },
            SurfaceAction::Stop,
        ],
    }
}
