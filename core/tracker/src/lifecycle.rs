//! Track lifecycle: start, stop, midnight split and crash recovery.
//!
//! The manager is the only writer of `RecordingState`. Every transition
//! commits to the store first and only then touches in-memory state, the
//! alarm, the scratch journal and the status surface, so a failed store call
//! leaves the manager exactly where it was.
//!
//! Recovery trusts the store over the journal: if the newest track is still
//! open, the previous process died while recording it and it is adopted
//! as-is instead of opening a new segment.

use chrono::{DateTime, Duration, Local};
use tracing::{debug, info, warn};
use tracker_protocol::{
    parse_track_uri, LaunchDescriptor, StartOutcome, StatusSurface, StopOutcome, Track,
};

use crate::alarm::MidnightAlarm;
use crate::clock::{next_local_midnight, to_store_time, Clock};
use crate::error::Result;
use crate::journal::{RecordingScratch, ScratchJournal};
use crate::naming::{next_ordinal, track_name};
use crate::notifier::StatusNotifier;
use crate::state::{ActiveTrack, RecordingState};
use crate::store::{NewTrack, TrackStore};
use crate::surfaces::SurfaceRegistry;

const SPLIT_RETRY_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum SplitOutcome {
    Split { closed: Track, opened: Track },
    NotRecording,
    /// The alarm that fired is not the one currently armed.
    StaleAlarm,
}

pub struct LifecycleManager {
    state: RecordingState,
    clock: Box<dyn Clock>,
    alarm: Box<dyn MidnightAlarm>,
    journal: ScratchJournal,
    surfaces: SurfaceRegistry,
    notifier: StatusNotifier,
}

impl LifecycleManager {
    pub fn new(
        clock: Box<dyn Clock>,
        alarm: Box<dyn MidnightAlarm>,
        journal: ScratchJournal,
        surfaces: SurfaceRegistry,
        notifier: StatusNotifier,
    ) -> Self {
        Self {
            state: RecordingState::Stopped,
            clock,
            alarm,
            journal,
            surfaces,
            notifier,
        }
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    pub fn now(&self) -> DateTime<Local> {
        self.clock.now()
    }

    pub fn status_surface(&self) -> Option<&StatusSurface> {
        self.notifier.current()
    }

    /// Whether a previous process left a journal behind.
    pub fn has_interrupted_recording(&self) -> bool {
        self.journal.load().is_some()
    }

    /// Clears a surface a killed process may have left showing. A fresh
    /// manager is stopped until it resumes.
    pub fn sync_status_surface(&mut self) {
        let now = self.clock.now();
        self.notifier.mirror(&self.state, now);
    }

    /// Relaunch recovery. Resumes only when a journal exists and the newest
    /// track is still open; a journal left behind a closed track is stale
    /// and is removed instead of opening a segment nobody asked for.
    pub fn recover(&mut self, store: &dyn TrackStore) -> Result<Option<StartOutcome>> {
        if self.state.is_running() {
            debug!("Recovery skipped; already recording");
            return Ok(None);
        }
        if !self.has_interrupted_recording() {
            debug!("Recovery skipped; no journal");
            return Ok(None);
        }

        let now = self.clock.now();
        match store.last_track()? {
            Some(last) if last.is_open() => self.resume(store, last, None, now).map(Some),
            last => {
                warn!(
                    last_track = ?last.map(|track| track.id),
                    "Journal outlived its track; discarding it"
                );
                if let Err(err) = self.journal.clear() {
                    warn!(error = %err, "Failed to clear stale recording journal");
                }
                Ok(None)
            }
        }
    }

    pub fn start_or_resume(
        &mut self,
        store: &dyn TrackStore,
        target: Option<&str>,
    ) -> Result<StartOutcome> {
        if let Some(active) = self.state.active() {
            debug!(track = %active.track.name, "Start ignored; already recording");
            return Ok(StartOutcome::AlreadyRecording {
                track: active.track.clone(),
            });
        }

        let now = self.clock.now();
        match store.last_track()? {
            Some(last) if last.is_open() => self.resume(store, last, target, now),
            last => self.open_new(store, last.as_ref(), target, now),
        }
    }

    fn resume(
        &mut self,
        store: &dyn TrackStore,
        track: Track,
        requested: Option<&str>,
        now: DateTime<Local>,
    ) -> Result<StartOutcome> {
        let strays = store.close_open_tracks(&to_store_time(now), Some(track.id))?;
        if strays > 0 {
            warn!(closed = strays, "Closed stray open tracks while resuming");
        }

        let scratch = self.journal.load();
        match scratch
            .as_ref()
            .and_then(|scratch| parse_track_uri(&scratch.track_uri))
        {
            Some(journal_id) if journal_id == track.id => {}
            Some(journal_id) => warn!(
                journal_track_id = journal_id,
                track_id = track.id,
                "Journal names a different track; adopting the open track from the store"
            ),
            None => debug!(track_id = track.id, "No usable journal entry for open track"),
        }

        let requested = scratch
            .as_ref()
            .map(|scratch| scratch.target_component.as_str())
            .or(requested);
        let target = self.surfaces.resolve(requested);

        info!(
            track_id = track.id,
            name = %track.name,
            target = %target.surface,
            "Resuming interrupted track"
        );
        self.enter_recording(track.clone(), target, now);
        Ok(StartOutcome::Resumed { track })
    }

    fn open_new(
        &mut self,
        store: &dyn TrackStore,
        last: Option<&Track>,
        requested: Option<&str>,
        now: DateTime<Local>,
    ) -> Result<StartOutcome> {
        let name = next_track_name(store, last, now)?;
        let start = to_store_time(now);
        let (strays, track) = store.rotate_track(
            &start,
            &NewTrack {
                name,
                start: start.clone(),
                visible: true,
            },
        )?;
        if strays > 0 {
            warn!(closed = strays, "Closed stray open tracks before starting");
        }

        let target = self.surfaces.resolve(requested);
        info!(
            track_id = track.id,
            name = %track.name,
            target = %target.surface,
            "Track started"
        );
        self.enter_recording(track.clone(), target, now);
        Ok(StartOutcome::Started { track })
    }

    /// Closes every open track, not just the current one.
    pub fn stop(&mut self, store: &dyn TrackStore) -> Result<StopOutcome> {
        let now = self.clock.now();
        let closed_tracks = store.close_open_tracks(&to_store_time(now), None)?;
        Ok(self.enter_stopped(closed_tracks, now))
    }

    /// Stops and deletes `ids` as one store transaction; on failure nothing
    /// changes, recording included.
    pub fn stop_and_delete(
        &mut self,
        store: &dyn TrackStore,
        ids: &[i64],
    ) -> Result<(StopOutcome, usize)> {
        let now = self.clock.now();
        let (closed_tracks, deleted) = store.close_and_delete_tracks(&to_store_time(now), ids)?;
        Ok((self.enter_stopped(closed_tracks, now), deleted))
    }

    fn enter_stopped(&mut self, closed_tracks: usize, now: DateTime<Local>) -> StopOutcome {
        let previous = std::mem::take(&mut self.state);
        self.alarm.cancel();
        if let Err(err) = self.journal.clear() {
            warn!(error = %err, "Failed to clear recording journal");
        }
        self.notifier.mirror(&self.state, now);

        let track_name = previous.current_track_name().map(str::to_string);
        info!(
            was_running = previous.is_running(),
            closed = closed_tracks,
            track = ?track_name,
            "Track stopped"
        );
        StopOutcome {
            was_running: previous.is_running(),
            closed_tracks,
            track_name,
        }
    }

    /// Closes the current track and opens the next one at the same instant.
    ///
    /// `due` identifies the alarm that fired; `None` forces a split.
    pub fn split(
        &mut self,
        store: &dyn TrackStore,
        due: Option<DateTime<Local>>,
    ) -> Result<SplitOutcome> {
        let Some(active) = self.state.active() else {
            debug!("Split ignored; not recording");
            return Ok(SplitOutcome::NotRecording);
        };
        if let Some(due) = due {
            if due != active.alarm_due {
                debug!(due = %due, armed = %active.alarm_due, "Ignoring stale split alarm");
                return Ok(SplitOutcome::StaleAlarm);
            }
        }

        let now = self.clock.now();
        let boundary = to_store_time(now);
        let mut closed = active.track.clone();
        closed.end = Some(boundary.clone());
        let target = active.target.clone();

        let rotated = next_track_name(store, Some(&closed), now).and_then(|name| {
            store.rotate_track(
                &boundary,
                &NewTrack {
                    name,
                    start: boundary.clone(),
                    visible: true,
                },
            )
        });
        let opened = match rotated {
            Ok((_, opened)) => opened,
            Err(err) => {
                self.retry_split_later(now);
                return Err(err);
            }
        };

        info!(
            closed = %closed.name,
            opened = %opened.name,
            at = %boundary,
            "Track split"
        );
        self.enter_recording(opened.clone(), target, now);
        Ok(SplitOutcome::Split { closed, opened })
    }

    /// Keeps recording the current track and re-arms the split shortly.
    fn retry_split_later(&mut self, now: DateTime<Local>) {
        let retry_at = now + Duration::seconds(SPLIT_RETRY_SECS);
        if let RecordingState::Recording(active) = &mut self.state {
            active.alarm_due = retry_at;
        }
        self.alarm.arm(retry_at);
        warn!(retry_at = %retry_at, "Track split failed; will retry");
    }

    fn enter_recording(&mut self, track: Track, target: LaunchDescriptor, now: DateTime<Local>) {
        let alarm_due = next_local_midnight(now);
        self.alarm.arm(alarm_due);

        let scratch = RecordingScratch {
            target_component: target.surface.clone(),
            track_uri: track.uri(),
        };
        if let Err(err) = self.journal.persist(&scratch) {
            warn!(
                error = %err,
                path = %self.journal.path().display(),
                "Failed to persist recording journal"
            );
        }

        self.state = RecordingState::Recording(ActiveTrack {
            track,
            target,
            alarm_due,
        });
        self.notifier.mirror(&self.state, now);
    }
}

fn next_track_name(
    store: &dyn TrackStore,
    last: Option<&Track>,
    now: DateTime<Local>,
) -> Result<String> {
    let today = now.date_naive();
    let mut ordinal = next_ordinal(last, now);
    loop {
        let name = track_name(today, ordinal);
        if !store.track_name_exists(&name)? {
            return Ok(name);
        }
        debug!(name = %name, "Track name taken; trying next ordinal");
        ordinal = ordinal.saturating_add(1);
    }
}
