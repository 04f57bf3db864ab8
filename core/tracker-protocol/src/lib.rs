//! IPC protocol types and validation for the track recorder daemon.
//!
//! Shared by `trackerd` and its clients so the wire schema cannot drift.
//! The daemon remains the authority on validation; clients reuse the same
//! types to build valid requests and to decode responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// Identifier of the single status surface. Updated in place, never duplicated.
pub const STATUS_SURFACE_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    StartOrResume,
    Stop,
    LocationFix,
    FixQuality,
    ListTracks,
    ListPoints,
    SetTrackVisible,
    DeleteTracks,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: Option<String>, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// One continuous recording segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub name: String,
    pub start: String,
    /// `None` while the track is still being recorded.
    #[serde(default)]
    pub end: Option<String>,
    pub visible: bool,
}

impl Track {
    pub fn is_open(&self) -> bool {
        self.end
            .as_deref()
            .map(|end| end.trim().is_empty())
            .unwrap_or(true)
    }

    /// Opaque reference used by the scratch journal.
    pub fn uri(&self) -> String {
        track_uri(self.id)
    }
}

pub fn track_uri(id: i64) -> String {
    format!("tracks/{}", id)
}

/// Parses the last path segment of a track uri back into an id.
pub fn parse_track_uri(uri: &str) -> Option<i64> {
    uri.trim()
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<i64>().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixKind {
    #[serde(rename = "2d")]
    TwoD,
    #[serde(rename = "3d")]
    ThreeD,
}

impl FixKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixKind::TwoD => "2d",
            FixKind::ThreeD => "3d",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "2d" => Some(FixKind::TwoD),
            "3d" => Some(FixKind::ThreeD),
            _ => None,
        }
    }
}

/// One recorded fix belonging to a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub id: i64,
    pub session: i64,
    pub lon: f64,
    pub lat: f64,
    #[serde(default)]
    pub ele: Option<f64>,
    pub fix: FixKind,
    pub sat: u32,
    pub timestamp: String,
    pub provider: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Status surface
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDescriptor {
    pub surface: String,
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurfaceAction {
    Open { launch: LaunchDescriptor },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSurface {
    pub id: u32,
    pub title: String,
    pub text: String,
    pub track_name: String,
    pub updated_at: String,
    pub actions: Vec<SurfaceAction>,
}

impl StatusSurface {
    pub fn open_action(&self) -> Option<&LaunchDescriptor> {
        self.actions.iter().find_map(|action| match action {
            SurfaceAction::Open { launch } => Some(launch),
            SurfaceAction::Stop => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub recording: bool,
    #[serde(default)]
    pub track_id: Option<i64>,
    #[serde(default)]
    pub track_name: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    pub satellites: u32,
    #[serde(default)]
    pub surface: Option<StatusSurface>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Command outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { track: Track },
    Resumed { track: Track },
    AlreadyRecording { track: Track },
}

impl StartOutcome {
    pub fn track(&self) -> &Track {
        match self {
            StartOutcome::Started { track }
            | StartOutcome::Resumed { track }
            | StartOutcome::AlreadyRecording { track } => track,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOutcome {
    pub was_running: bool,
    pub closed_tracks: usize,
    #[serde(default)]
    pub track_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<TrackPoint>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Params
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartParams {
    /// Surface the status surface's "open" action should launch.
    #[serde(default)]
    pub target: Option<String>,
}

/// A single location reading delivered by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationFix {
    pub provider: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub ele: Option<f64>,
    pub time: String,
}

impl LocationFix {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.provider.trim().is_empty() {
            return Err(ErrorInfo::new("missing_field", "provider is required"));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ErrorInfo::new(
                "invalid_coordinate",
                "lat must be within [-90, 90]",
            ));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(ErrorInfo::new(
                "invalid_coordinate",
                "lon must be within [-180, 180]",
            ));
        }
        if let Some(ele) = self.ele {
            if !ele.is_finite() {
                return Err(ErrorInfo::new("invalid_coordinate", "ele must be finite"));
            }
        }
        if self.timestamp().is_none() {
            return Err(ErrorInfo::new("invalid_timestamp", "time must be RFC3339"));
        }
        Ok(())
    }

    /// Fixes with altitude are 3d, the rest 2d.
    pub fn fix_kind(&self) -> FixKind {
        if self.ele.is_some() {
            FixKind::ThreeD
        } else {
            FixKind::TwoD
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixQuality {
    /// Satellites used in the most recent fix.
    pub satellites: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackIdParams {
    pub track_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisibilityParams {
    pub track_id: i64,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteTracksParams {
    pub track_ids: Vec<i64>,
}

pub fn parse_start(params: Option<Value>) -> Result<StartParams, ErrorInfo> {
    let params = match params {
        Some(Value::Null) | None => return Ok(StartParams::default()),
        Some(params) => params,
    };
    let mut parsed: StartParams = parse_params(params, "start params")?;
    if parsed
        .target
        .as_deref()
        .map(|target| target.trim().is_empty())
        .unwrap_or(false)
    {
        parsed.target = None;
    }
    Ok(parsed)
}

pub fn parse_location_fix(params: Value) -> Result<LocationFix, ErrorInfo> {
    let fix: LocationFix = parse_params(params, "location fix")?;
    fix.validate()?;
    Ok(fix)
}

pub fn parse_fix_quality(params: Value) -> Result<FixQuality, ErrorInfo> {
    parse_params(params, "fix quality")
}

pub fn parse_track_id(params: Value) -> Result<TrackIdParams, ErrorInfo> {
    parse_params(params, "track id")
}

pub fn parse_visibility(params: Value) -> Result<VisibilityParams, ErrorInfo> {
    parse_params(params, "visibility params")
}

pub fn parse_delete_tracks(params: Value) -> Result<DeleteTracksParams, ErrorInfo> {
    let parsed: DeleteTracksParams = parse_params(params, "delete params")?;
    if parsed.track_ids.is_empty() {
        return Err(ErrorInfo::new("invalid_params", "track_ids must not be empty"));
    }
    Ok(parsed)
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value, what: &str) -> Result<T, ErrorInfo> {
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} payload is invalid: {}", what, err),
        )
    })
}
