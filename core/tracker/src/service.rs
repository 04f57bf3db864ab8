//! The service thread: owns the store, lifecycle and recorder and applies
//! every request and timer event in arrival order.
//!
//! Connection threads and timers never touch state directly; they enqueue a
//! `ServiceEvent` and, for requests, wait on the reply channel.

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp;
use std::sync::mpsc::{Receiver, Sender};
use std::thread;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, warn};

use tracker_protocol::{
    parse_delete_tracks, parse_fix_quality, parse_location_fix, parse_start, parse_track_id,
    parse_visibility, FixOutcome, LocationFix, Method, Request, Response, StatusSnapshot, Track,
    TrackPoint, PROTOCOL_VERSION,
};

use crate::error::{self, TrackerError};
use crate::lifecycle::{LifecycleManager, SplitOutcome};
use crate::location::ProviderGate;
use crate::recorder::PointRecorder;
use crate::store::TrackStore;

const NOT_RECORDING: &str = "not_recording";
const RESUME_RETRY_STEP: StdDuration = StdDuration::from_secs(1);
const RESUME_RETRY_MAX: StdDuration = StdDuration::from_secs(30);

pub enum ServiceEvent {
    Request {
        request: Request,
        reply: Sender<Response>,
    },
    /// The midnight alarm armed for `due` fired.
    Split { due: DateTime<Local> },
    /// Relaunch after an interrupted recording. `attempt` counts earlier
    /// tries that hit an unavailable store.
    Resume { attempt: u32 },
    /// Teardown, from a signal or after a `shutdown` reply was written.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Where and how fast a failed relaunch recovery is re-enqueued.
struct ResumeRetry {
    events: Sender<ServiceEvent>,
    step: StdDuration,
}

pub struct Tracker {
    store: Box<dyn TrackStore>,
    lifecycle: LifecycleManager,
    recorder: PointRecorder,
    gate: ProviderGate,
    resume_retry: Option<ResumeRetry>,
}

impl Tracker {
    pub fn new(store: Box<dyn TrackStore>, lifecycle: LifecycleManager, gate: ProviderGate) -> Self {
        Self {
            store,
            lifecycle,
            recorder: PointRecorder::default(),
            gate,
            resume_retry: None,
        }
    }

    /// Lets relaunch recovery re-enqueue itself while the store is busy.
    pub fn with_resume_retry(mut self, events: Sender<ServiceEvent>) -> Self {
        self.resume_retry = Some(ResumeRetry {
            events,
            step: RESUME_RETRY_STEP,
        });
        self
    }

    #[cfg(test)]
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn handle_event(&mut self, event: ServiceEvent) -> Flow {
        match event {
            ServiceEvent::Request { request, reply } => {
                let response = self.handle_request(request);
                if reply.send(response).is_err() {
                    debug!("Client went away before the reply was sent");
                }
                Flow::Continue
            }
            ServiceEvent::Split { due } => {
                match self.lifecycle.split(self.store.as_ref(), Some(due)) {
                    Ok(SplitOutcome::Split { .. }) => {}
                    Ok(outcome) => debug!(?outcome, "Split event had no effect"),
                    Err(err) => error!(error = %err, "Midnight split failed"),
                }
                Flow::Continue
            }
            ServiceEvent::Resume { attempt } => {
                match self.lifecycle.recover(self.store.as_ref()) {
                    Ok(Some(outcome)) => info!(
                        track = %outcome.track().name,
                        "Recording restored after relaunch"
                    ),
                    Ok(None) => {}
                    Err(TrackerError::StoreUnavailable(reason)) => {
                        self.schedule_resume(attempt.saturating_add(1), &reason)
                    }
                    Err(err) => error!(error = %err, "Failed to restore recording"),
                }
                Flow::Continue
            }
            ServiceEvent::Shutdown => {
                self.teardown();
                Flow::Exit
            }
        }
    }

    fn schedule_resume(&self, attempt: u32, reason: &str) {
        let Some(retry) = &self.resume_retry else {
            error!(reason, "Failed to restore recording; store unavailable");
            return;
        };
        let delay = resume_backoff(retry.step, attempt);
        warn!(
            reason,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Store unavailable while restoring recording; will retry"
        );
        let events = retry.events.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = events.send(ServiceEvent::Resume { attempt });
        });
    }

    fn teardown(&mut self) {
        match self.lifecycle.stop(self.store.as_ref()) {
            Ok(outcome) => info!(closed = outcome.closed_tracks, "Tracker shutting down"),
            Err(err) => error!(error = %err, "Failed to close tracks during shutdown"),
        }
        self.gate.reset();
    }

    pub fn handle_request(&mut self, request: Request) -> Response {
        if request.protocol_version != PROTOCOL_VERSION {
            return Response::error(
                request.id,
                "protocol_mismatch",
                "unsupported protocol version",
            );
        }

        let id = request.id;
        match request.method {
            Method::GetHealth => Response::ok(
                id,
                json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                    "recording": self.lifecycle.state().is_running(),
                    "open_tracks": self.store.count_open_tracks().ok(),
                }),
            ),
            Method::GetStatus => respond(id, "status", &self.status_snapshot()),
            Method::StartOrResume => {
                let params = match parse_start(request.params) {
                    Ok(params) => params,
                    Err(err) => return Response::error_with_info(id, err),
                };
                match self
                    .lifecycle
                    .start_or_resume(self.store.as_ref(), params.target.as_deref())
                {
                    Ok(outcome) => respond(id, "start outcome", &outcome),
                    Err(err) => error_response(id, &err),
                }
            }
            Method::Stop => match self.lifecycle.stop(self.store.as_ref()) {
                Ok(outcome) => {
                    self.gate.reset();
                    respond(id, "stop outcome", &outcome)
                }
                Err(err) => error_response(id, &err),
            },
            Method::LocationFix => {
                let params = match require_params(request.params, &id, "location fix") {
                    Ok(params) => params,
                    Err(response) => return response,
                };
                let fix = match parse_location_fix(params) {
                    Ok(fix) => fix,
                    Err(err) => return Response::error_with_info(id, err),
                };
                match self.accept_fix(&fix) {
                    Ok(outcome) => respond(id, "fix outcome", &outcome),
                    Err(err) => error_response(id, &err),
                }
            }
            Method::FixQuality => {
                let params = match require_params(request.params, &id, "fix quality") {
                    Ok(params) => params,
                    Err(response) => return response,
                };
                match parse_fix_quality(params) {
                    Ok(quality) => {
                        self.recorder.update_quality(quality);
                        Response::ok(id, json!({ "satellites": self.recorder.satellites() }))
                    }
                    Err(err) => Response::error_with_info(id, err),
                }
            }
            Method::ListTracks => match self.store.list_tracks() {
                Ok(tracks) => {
                    debug!(tracks = tracks.len(), "Track list snapshot");
                    respond(id, "tracks", &tracks)
                }
                Err(err) => error_response(id, &err),
            },
            Method::ListPoints => {
                let params = match require_params(request.params, &id, "track id") {
                    Ok(params) => params,
                    Err(response) => return response,
                };
                let track_id = match parse_track_id(params) {
                    Ok(parsed) => parsed.track_id,
                    Err(err) => return Response::error_with_info(id, err),
                };
                match self.points_of(track_id) {
                    Ok(points) => respond(id, "track points", &points),
                    Err(err) => error_response(id, &err),
                }
            }
            Method::SetTrackVisible => {
                let params = match require_params(request.params, &id, "visibility") {
                    Ok(params) => params,
                    Err(response) => return response,
                };
                let parsed = match parse_visibility(params) {
                    Ok(parsed) => parsed,
                    Err(err) => return Response::error_with_info(id, err),
                };
                match self.set_visible(parsed.track_id, parsed.visible) {
                    Ok(track) => respond(id, "track", &track),
                    Err(err) => error_response(id, &err),
                }
            }
            Method::DeleteTracks => {
                let params = match require_params(request.params, &id, "track ids") {
                    Ok(params) => params,
                    Err(response) => return response,
                };
                let parsed = match parse_delete_tracks(params) {
                    Ok(parsed) => parsed,
                    Err(err) => return Response::error_with_info(id, err),
                };
                match self.delete_tracks(&parsed.track_ids) {
                    Ok(data) => Response::ok(id, data),
                    Err(err) => error_response(id, &err),
                }
            }
            Method::Shutdown => match self.lifecycle.stop(self.store.as_ref()) {
                Ok(outcome) => {
                    self.gate.reset();
                    info!("Shutdown requested by client");
                    Response::ok(id, json!({ "stopping": true, "stop": outcome }))
                }
                Err(err) => {
                    error!(error = %err, "Failed to close tracks during shutdown");
                    error_response(id, &err)
                }
            },
        }
    }

    fn status_snapshot(&self) -> StatusSnapshot {
        let state = self.lifecycle.state();
        StatusSnapshot {
            recording: state.is_running(),
            track_id: state.current_track_id(),
            track_name: state.current_track_name().map(str::to_string),
            target: state.active().map(|active| active.target.surface.clone()),
            satellites: self.recorder.satellites(),
            surface: self.lifecycle.status_surface().cloned(),
        }
    }

    fn accept_fix(&mut self, fix: &LocationFix) -> error::Result<FixOutcome> {
        if !self.lifecycle.state().is_running() {
            debug!(provider = %fix.provider, "Fix dropped; not recording");
            return Ok(rejected(NOT_RECORDING));
        }

        if let Err(rejection) = self.gate.admit(fix, self.lifecycle.now()) {
            debug!(
                provider = %fix.provider,
                reason = rejection.as_str(),
                "Fix rejected by provider gate"
            );
            return Ok(rejected(rejection.as_str()));
        }

        let point = self
            .recorder
            .record(self.store.as_ref(), self.lifecycle.state(), fix)?;
        Ok(match point {
            Some(point) => FixOutcome {
                accepted: true,
                reason: None,
                point: Some(point),
            },
            None => rejected(NOT_RECORDING),
        })
    }

    fn points_of(&self, track_id: i64) -> error::Result<Vec<TrackPoint>> {
        if self.store.get_track(track_id)?.is_none() {
            return Err(TrackerError::TrackNotFound(track_id));
        }
        self.store.list_points(track_id)
    }

    fn set_visible(&self, track_id: i64, visible: bool) -> error::Result<Track> {
        if !self.store.set_track_visible(track_id, visible)? {
            return Err(TrackerError::TrackNotFound(track_id));
        }
        self.store
            .get_track(track_id)?
            .ok_or(TrackerError::TrackNotFound(track_id))
    }

    /// Deleting the track being recorded stops recording in the same
    /// transaction; a failed delete leaves recording untouched.
    fn delete_tracks(&mut self, track_ids: &[i64]) -> error::Result<Value> {
        let (stopped, deleted) = match self.lifecycle.state().current_track_id() {
            Some(current) if track_ids.contains(&current) => {
                info!(track_id = current, "Deleting the recording track; stopping");
                let (_, deleted) = self
                    .lifecycle
                    .stop_and_delete(self.store.as_ref(), track_ids)?;
                self.gate.reset();
                (true, deleted)
            }
            _ => (false, self.store.delete_tracks(track_ids)?),
        };
        info!(requested = track_ids.len(), deleted, "Tracks deleted");
        Ok(json!({ "deleted": deleted, "stopped": stopped }))
    }
}

/// Linear backoff per attempt, capped.
fn resume_backoff(step: StdDuration, attempt: u32) -> StdDuration {
    cmp::min(step.saturating_mul(attempt.max(1)), RESUME_RETRY_MAX)
}

/// Drains `events` until a shutdown or until every sender is gone.
pub fn run(mut tracker: Tracker, events: Receiver<ServiceEvent>) {
    for event in events.iter() {
        if tracker.handle_event(event) == Flow::Exit {
            info!("Service loop exiting");
            return;
        }
    }
    warn!("Event channel closed; service loop exiting");
}

fn rejected(reason: &str) -> FixOutcome {
    FixOutcome {
        accepted: false,
        reason: Some(reason.to_string()),
        point: None,
    }
}

fn require_params(params: Option<Value>, id: &Option<String>, what: &str) -> Result<Value, Response> {
    match params {
        Some(Value::Null) | None => Err(Response::error(
            id.clone(),
            "invalid_params",
            format!("{} params are required", what),
        )),
        Some(params) => Ok(params),
    }
}

fn respond<T: Serialize>(id: Option<String>, what: &str, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        ),
    }
}

fn error_response(id: Option<String>, err: &TrackerError) -> Response {
    Response::error(id, err.code(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::testing::ScriptedAlarm;
    use crate::clock::testing::{local, ManualClock};
    use crate::clock::Clock;
    use crate::config::SamplingConfig;
    use crate::db::Db;
    use crate::journal::ScratchJournal;
    use crate::lifecycle::testing::FlakyStore;
    use crate::notifier::testing::RecordingSink;
    use crate::notifier::StatusNotifier;
    use crate::surfaces::SurfaceRegistry;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use tracker_protocol::{StartOutcome, StopOutcome};

    struct Fixture {
        dir: tempfile::TempDir,
        sampling: SamplingConfig,
        clock: ManualClock,
        alarm: ScriptedAlarm,
        failing: Arc<AtomicBool>,
        failing_deletes: Arc<AtomicBool>,
        tracker: Tracker,
    }

    impl Fixture {
        /// Replaces the tracker without stopping it, as a killed daemon would.
        fn relaunch(&mut self, retry: Option<Sender<ServiceEvent>>) {
            let (alarm, failing, failing_deletes, tracker) =
                build_tracker(self.dir.path(), &self.clock, self.sampling.clone());
            self.alarm = alarm;
            self.failing = failing;
            self.failing_deletes = failing_deletes;
            self.tracker = match retry {
                Some(events) => tracker.with_resume_retry(events),
                None => tracker,
            };
        }

        fn journal(&self) -> ScratchJournal {
            ScratchJournal::new(self.dir.path().join("recording.json"))
        }
    }

    fn build_tracker(
        dir: &std::path::Path,
        clock: &ManualClock,
        sampling: SamplingConfig,
    ) -> (ScriptedAlarm, Arc<AtomicBool>, Arc<AtomicBool>, Tracker) {
        let alarm = ScriptedAlarm::default();
        let lifecycle = LifecycleManager::new(
            Box::new(clock.clone()),
            Box::new(alarm.clone()),
            ScratchJournal::new(dir.join("recording.json")),
            SurfaceRegistry::with_defaults(),
            StatusNotifier::new(Box::new(RecordingSink::default())),
        );
        let store = FlakyStore::new(Db::new(dir.join("tracks.db")).expect("db init"));
        let failing = store.failing.clone();
        let failing_deletes = store.failing_deletes.clone();
        let tracker = Tracker::new(Box::new(store), lifecycle, ProviderGate::new(sampling));
        (alarm, failing, failing_deletes, tracker)
    }

    fn fixture(sampling: SamplingConfig) -> Fixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let clock = ManualClock::at(local(2024, 1, 1, 23, 58, 0));
        let (alarm, failing, failing_deletes, tracker) =
            build_tracker(dir.path(), &clock, sampling.clone());
        Fixture {
            dir,
            sampling,
            clock,
            alarm,
            failing,
            failing_deletes,
            tracker,
        }
    }

    fn open_sampling() -> SamplingConfig {
        SamplingConfig {
            min_time_secs: 0,
            min_distance_m: 0.0,
            ..SamplingConfig::default()
        }
    }

    fn call(tracker: &mut Tracker, method: Method, params: Option<Value>) -> Response {
        tracker.handle_request(Request::new(method, Some("req-1".to_string()), params))
    }

    fn data<T: serde::de::DeserializeOwned>(response: Response) -> T {
        assert!(response.ok, "unexpected error: {:?}", response.error);
        serde_json::from_value(response.data.expect("data")).expect("decode data")
    }

    fn error_code(response: &Response) -> &str {
        assert!(!response.ok);
        response.error.as_ref().map(|err| err.code.as_str()).expect("error")
    }

    fn fix_params(provider: &str, lat: f64, at: DateTime<Local>) -> Option<Value> {
        Some(json!({
            "provider": provider,
            "lat": lat,
            "lon": 37.61,
            "ele": 140.0,
            "time": at.to_rfc3339(),
        }))
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let mut f = fixture(open_sampling());
        let mut request = Request::new(Method::GetHealth, Some("x".to_string()), None);
        request.protocol_version = PROTOCOL_VERSION + 1;

        let response = f.tracker.handle_request(request);
        assert_eq!(error_code(&response), "protocol_mismatch");
        assert_eq!(response.id.as_deref(), Some("x"));
    }

    #[test]
    fn health_reports_recording_flag() {
        let mut f = fixture(open_sampling());
        let health: Value = data(call(&mut f.tracker, Method::GetHealth, None));
        assert_eq!(health["status"], "ok");
        assert_eq!(health["recording"], false);
        assert_eq!(health["open_tracks"], 0);
    }

    #[test]
    fn start_fix_and_status_flow() {
        let mut f = fixture(open_sampling());

        let started: StartOutcome = data(call(
            &mut f.tracker,
            Method::StartOrResume,
            Some(json!({ "target": "tracks" })),
        ));
        assert_eq!(started.track().name, "2024-01-01-1");

        let quality = call(
            &mut f.tracker,
            Method::FixQuality,
            Some(json!({ "satellites": 8 })),
        );
        assert!(quality.ok);

        let outcome: FixOutcome = data(call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("gps", 55.75, f.clock.now()),
        ));
        assert!(outcome.accepted);
        let point = outcome.point.expect("point");
        assert_eq!(point.session, started.track().id);
        assert_eq!(point.sat, 8);

        let status: StatusSnapshot = data(call(&mut f.tracker, Method::GetStatus, None));
        assert!(status.recording);
        assert_eq!(status.track_name.as_deref(), Some("2024-01-01-1"));
        assert_eq!(status.target.as_deref(), Some("tracks"));
        assert_eq!(status.satellites, 8);
        assert_eq!(
            status.surface.map(|surface| surface.track_name),
            Some("2024-01-01-1".to_string())
        );
    }

    #[test]
    fn fix_while_stopped_is_dropped() {
        let mut f = fixture(open_sampling());
        let outcome: FixOutcome = data(call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("gps", 55.75, f.clock.now()),
        ));
        assert!(!outcome.accepted);
        assert_eq!(outcome.reason.as_deref(), Some(NOT_RECORDING));

        let tracks: Vec<Track> = data(call(&mut f.tracker, Method::ListTracks, None));
        assert!(tracks.is_empty());
    }

    #[test]
    fn provider_gate_filters_fixes() {
        let mut f = fixture(SamplingConfig {
            min_time_secs: 2,
            min_distance_m: 0.0,
            ..SamplingConfig::default()
        });
        call(&mut f.tracker, Method::StartOrResume, None);

        let first: FixOutcome = data(call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("gps", 55.75, f.clock.now()),
        ));
        assert!(first.accepted);

        let too_soon: FixOutcome = data(call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("gps", 55.76, f.clock.now()),
        ));
        assert_eq!(too_soon.reason.as_deref(), Some("too_soon"));

        let passive: FixOutcome = data(call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("passive", 55.76, f.clock.now()),
        ));
        assert_eq!(passive.reason.as_deref(), Some("unsubscribed_provider"));

        f.clock.advance(Duration::seconds(2));
        let later: FixOutcome = data(call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("gps", 55.76, f.clock.now()),
        ));
        assert!(later.accepted);
    }

    #[test]
    fn malformed_fix_params_are_rejected() {
        let mut f = fixture(open_sampling());
        call(&mut f.tracker, Method::StartOrResume, None);

        let missing = call(&mut f.tracker, Method::LocationFix, None);
        assert_eq!(error_code(&missing), "invalid_params");
        assert_eq!(missing.id.as_deref(), Some("req-1"));

        let out_of_range = call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("gps", 91.0, f.clock.now()),
        );
        assert_eq!(error_code(&out_of_range), "invalid_coordinate");
    }

    #[test]
    fn stop_reports_closed_tracks() {
        let mut f = fixture(open_sampling());
        call(&mut f.tracker, Method::StartOrResume, None);

        let stopped: StopOutcome = data(call(&mut f.tracker, Method::Stop, None));
        assert!(stopped.was_running);
        assert_eq!(stopped.closed_tracks, 1);

        let again: StopOutcome = data(call(&mut f.tracker, Method::Stop, None));
        assert!(!again.was_running);
        assert_eq!(again.closed_tracks, 0);
        assert_eq!(f.alarm.pending(), None);
    }

    #[test]
    fn points_and_visibility_for_unknown_track() {
        let mut f = fixture(open_sampling());
        let points = call(
            &mut f.tracker,
            Method::ListPoints,
            Some(json!({ "track_id": 42 })),
        );
        assert_eq!(error_code(&points), "track_not_found");

        let visibility = call(
            &mut f.tracker,
            Method::SetTrackVisible,
            Some(json!({ "track_id": 42, "visible": false })),
        );
        assert_eq!(error_code(&visibility), "track_not_found");
    }

    #[test]
    fn hides_track_and_lists_its_points() {
        let mut f = fixture(open_sampling());
        let started: StartOutcome = data(call(&mut f.tracker, Method::StartOrResume, None));
        let track_id = started.track().id;
        call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("gps", 55.75, f.clock.now()),
        );

        let hidden: Track = data(call(
            &mut f.tracker,
            Method::SetTrackVisible,
            Some(json!({ "track_id": track_id, "visible": false })),
        ));
        assert!(!hidden.visible);

        let points: Vec<TrackPoint> = data(call(
            &mut f.tracker,
            Method::ListPoints,
            Some(json!({ "track_id": track_id })),
        ));
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn deleting_current_track_stops_recording() {
        let mut f = fixture(open_sampling());
        let started: StartOutcome = data(call(&mut f.tracker, Method::StartOrResume, None));

        let result: Value = data(call(
            &mut f.tracker,
            Method::DeleteTracks,
            Some(json!({ "track_ids": [started.track().id] })),
        ));
        assert_eq!(result["deleted"], 1);
        assert_eq!(result["stopped"], true);
        assert!(!f.tracker.lifecycle().state().is_running());
        assert!(f.tracker.lifecycle().status_surface().is_none());

        let empty = call(
            &mut f.tracker,
            Method::DeleteTracks,
            Some(json!({ "track_ids": [] })),
        );
        assert_eq!(error_code(&empty), "invalid_params");
    }

    #[test]
    fn failed_delete_of_current_track_keeps_recording() {
        let mut f = fixture(open_sampling());
        let started: StartOutcome = data(call(&mut f.tracker, Method::StartOrResume, None));
        let track_id = started.track().id;

        f.failing_deletes.store(true, Ordering::SeqCst);
        let failed = call(
            &mut f.tracker,
            Method::DeleteTracks,
            Some(json!({ "track_ids": [track_id] })),
        );
        assert_eq!(error_code(&failed), "store_error");

        assert_eq!(f.tracker.lifecycle().state().current_track_id(), Some(track_id));
        assert!(f.tracker.lifecycle().status_surface().is_some());
        assert!(f.journal().load().is_some());
        assert_eq!(f.alarm.pending(), Some(local(2024, 1, 2, 0, 0, 0)));

        f.failing_deletes.store(false, Ordering::SeqCst);
        let tracks: Vec<Track> = data(call(&mut f.tracker, Method::ListTracks, None));
        assert_eq!(tracks.len(), 1);
        assert!(tracks[0].is_open());

        let outcome: FixOutcome = data(call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("gps", 55.75, f.clock.now()),
        ));
        assert!(outcome.accepted);
    }

    #[test]
    fn relaunch_recovery_retries_while_store_is_busy() {
        let mut f = fixture(open_sampling());
        let started: StartOutcome = data(call(&mut f.tracker, Method::StartOrResume, None));

        let (events, queue) = mpsc::channel();
        f.relaunch(Some(events));
        if let Some(retry) = f.tracker.resume_retry.as_mut() {
            retry.step = StdDuration::from_millis(5);
        }

        f.failing.store(true, Ordering::SeqCst);
        f.tracker.handle_event(ServiceEvent::Resume { attempt: 0 });
        assert!(!f.tracker.lifecycle().state().is_running());

        f.failing.store(false, Ordering::SeqCst);
        let retry = queue
            .recv_timeout(StdDuration::from_secs(2))
            .expect("resume re-enqueued");
        assert!(matches!(retry, ServiceEvent::Resume { attempt: 1 }));
        f.tracker.handle_event(retry);

        assert_eq!(
            f.tracker.lifecycle().state().current_track_id(),
            Some(started.track().id)
        );
        assert!(f.tracker.lifecycle().status_surface().is_some());
        let outcome: FixOutcome = data(call(
            &mut f.tracker,
            Method::LocationFix,
            fix_params("gps", 55.75, f.clock.now()),
        ));
        assert!(outcome.accepted);
    }

    #[test]
    fn relaunch_without_journal_stays_stopped() {
        let mut f = fixture(open_sampling());
        call(&mut f.tracker, Method::StartOrResume, None);
        call(&mut f.tracker, Method::Stop, None);

        f.relaunch(None);
        f.tracker.handle_event(ServiceEvent::Resume { attempt: 0 });
        assert!(!f.tracker.lifecycle().state().is_running());
        let tracks: Vec<Track> = data(call(&mut f.tracker, Method::ListTracks, None));
        assert_eq!(tracks.len(), 1);
    }

    #[test]
    fn resume_backoff_grows_linearly_to_a_cap() {
        let step = StdDuration::from_secs(1);
        assert_eq!(resume_backoff(step, 1), StdDuration::from_secs(1));
        assert_eq!(resume_backoff(step, 3), StdDuration::from_secs(3));
        assert_eq!(resume_backoff(step, 500), RESUME_RETRY_MAX);
    }

    #[test]
    fn split_event_rotates_track() {
        let mut f = fixture(open_sampling());
        call(&mut f.tracker, Method::StartOrResume, None);
        let due = f.alarm.pending().expect("armed");

        f.clock.set(due);
        assert_eq!(
            f.tracker.handle_event(ServiceEvent::Split { due }),
            Flow::Continue
        );

        let tracks: Vec<Track> = data(call(&mut f.tracker, Method::ListTracks, None));
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].name, "2024-01-02-1");
        assert!(tracks[0].is_open());
        assert!(!tracks[1].is_open());
    }

    #[test]
    fn shutdown_request_closes_tracks_before_exit() {
        let mut f = fixture(open_sampling());
        call(&mut f.tracker, Method::StartOrResume, None);

        let (reply, replies) = mpsc::channel();
        let flow = f.tracker.handle_event(ServiceEvent::Request {
            request: Request::new(Method::Shutdown, None, None),
            reply,
        });
        assert_eq!(flow, Flow::Continue);

        let response = replies.recv().expect("reply");
        assert!(response.ok);
        assert_eq!(response.data.expect("data")["stop"]["closed_tracks"], 1);
        assert!(!f.tracker.lifecycle().state().is_running());

        assert_eq!(f.tracker.handle_event(ServiceEvent::Shutdown), Flow::Exit);
    }

    #[test]
    fn run_loop_stops_on_signal_shutdown() {
        let f = fixture(open_sampling());
        let (events, receiver) = mpsc::channel();
        let (reply, replies) = mpsc::channel();

        events
            .send(ServiceEvent::Request {
                request: Request::new(Method::StartOrResume, None, None),
                reply,
            })
            .expect("send start");
        events.send(ServiceEvent::Shutdown).expect("send shutdown");

        run(f.tracker, receiver);
        let started = replies.recv().expect("reply");
        assert!(started.ok);
    }
}
