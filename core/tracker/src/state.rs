//! Recording state owned by the lifecycle manager.
//!
//! Other components get it by reference; nothing else mutates it.

use chrono::{DateTime, Local};
use tracker_protocol::{LaunchDescriptor, Track};

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTrack {
    pub track: Track,
    /// Surface the status surface's "open" action launches.
    pub target: LaunchDescriptor,
    /// Midnight the split alarm is armed for.
    pub alarm_due: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RecordingState {
    #[default]
    Stopped,
    Recording(ActiveTrack),
}

impl RecordingState {
    pub fn is_running(&self) -> bool {
        matches!(self, RecordingState::Recording(_))
    }

    pub fn active(&self) -> Option<&ActiveTrack> {
        match self {
            RecordingState::Recording(active) => Some(active),
            RecordingState::Stopped => None,
        }
    }

    pub fn current_track_id(&self) -> Option<i64> {
        self.active().map(|active| active.track.id)
    }

    pub fn current_track_name(&self) -> Option<&str> {
        self.active().map(|active| active.track.name.as_str())
    }
}
