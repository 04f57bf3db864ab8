//! Subcommand implementations and their text rendering.

use serde::Serialize;
use serde_json::{json, Value};
use std::process::Command;
use thiserror::Error;
use tracker_protocol::{
    FixOutcome, Method, StartOutcome, StatusSnapshot, StopOutcome, Track, TrackPoint,
};

use crate::daemon_client::{self, ClientError};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Not recording; there is no status surface to open")]
    NotRecording,

    #[error("Failed to launch surface '{surface}': {source}")]
    Launch {
        surface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render output: {0}")]
    Render(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CommandError>;

pub struct Output {
    pub json: bool,
}

impl Output {
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text(value));
        }
        Ok(())
    }
}

pub fn start(output: &Output, target: Option<String>) -> Result<()> {
    let params = target.map(|target| json!({ "target": target }));
    let outcome: StartOutcome = daemon_client::call(Method::StartOrResume, params)?;
    output.emit(&outcome, format_start)
}

pub fn stop(output: &Output) -> Result<()> {
    let outcome: StopOutcome = daemon_client::call(Method::Stop, None)?;
    output.emit(&outcome, format_stop)
}

pub fn status(output: &Output) -> Result<()> {
    let status: StatusSnapshot = daemon_client::call(Method::GetStatus, None)?;
    output.emit(&status, format_status)
}

pub fn fix(
    output: &Output,
    provider: String,
    lat: f64,
    lon: f64,
    ele: Option<f64>,
    time: Option<String>,
) -> Result<()> {
    let time = time.unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    let params = json!({
        "provider": provider,
        "lat": lat,
        "lon": lon,
        "ele": ele,
        "time": time,
    });
    let outcome: FixOutcome = daemon_client::call(Method::LocationFix, Some(params))?;
    output.emit(&outcome, format_fix)
}

pub fn satellites(output: &Output, count: u32) -> Result<()> {
    let data: Value = daemon_client::call(Method::FixQuality, Some(json!({ "satellites": count })))?;
    output.emit(&data, |data| {
        format!("Satellites: {}", data["satellites"].as_u64().unwrap_or(0))
    })
}

pub fn list_tracks(output: &Output) -> Result<()> {
    let tracks: Vec<Track> = daemon_client::call(Method::ListTracks, None)?;
    output.emit(&tracks, |tracks| {
        if tracks.is_empty() {
            return "No tracks recorded".to_string();
        }
        tracks
            .iter()
            .map(format_track)
            .collect::<Vec<_>>()
            .join("\n")
    })
}

pub fn list_points(output: &Output, track_id: i64) -> Result<()> {
    let points: Vec<TrackPoint> =
        daemon_client::call(Method::ListPoints, Some(json!({ "track_id": track_id })))?;
    output.emit(&points, |points| {
        if points.is_empty() {
            return format!("Track {} has no points", track_id);
        }
        points
            .iter()
            .map(format_point)
            .collect::<Vec<_>>()
            .join("\n")
    })
}

pub fn set_visible(output: &Output, track_id: i64, visible: bool) -> Result<()> {
    let track: Track = daemon_client::call(
        Method::SetTrackVisible,
        Some(json!({ "track_id": track_id, "visible": visible })),
    )?;
    output.emit(&track, format_track)
}

pub fn delete_tracks(output: &Output, track_ids: Vec<i64>) -> Result<()> {
    let data: Value = daemon_client::call(
        Method::DeleteTracks,
        Some(json!({ "track_ids": track_ids })),
    )?;
    output.emit(&data, |data| {
        let deleted = data["deleted"].as_u64().unwrap_or(0);
        if data["stopped"].as_bool().unwrap_or(false) {
            format!("Stopped recording and deleted {} track(s)", deleted)
        } else {
            format!("Deleted {} track(s)", deleted)
        }
    })
}

/// Runs the status surface's "open" action.
pub fn open(output: &Output) -> Result<()> {
    let status: StatusSnapshot = daemon_client::call(Method::GetStatus, None)?;
    let launch = status
        .surface
        .as_ref()
        .and_then(|surface| surface.open_action())
        .cloned()
        .ok_or(CommandError::NotRecording)?;

    let Some((program, args)) = launch.command.split_first() else {
        return output.emit(&launch, |launch| {
            format!("Surface '{}' has no launch command configured", launch.surface)
        });
    };

    tracing::info!(surface = %launch.surface, program = %program, "Launching surface");
    Command::new(program)
        .args(args)
        .status()
        .map_err(|source| CommandError::Launch {
            surface: launch.surface.clone(),
            source,
        })?;
    Ok(())
}

pub fn health(output: &Output) -> Result<()> {
    let data: Value = daemon_client::call(Method::GetHealth, None)?;
    output.emit(&data, |data| {
        format!(
            "trackerd {} (pid {}): {}{}",
            data["version"].as_str().unwrap_or("?"),
            data["pid"],
            data["status"].as_str().unwrap_or("unknown"),
            if data["recording"].as_bool().unwrap_or(false) {
                ", recording"
            } else {
                ""
            }
        )
    })
}

pub fn shutdown(output: &Output) -> Result<()> {
    let data: Value = daemon_client::call(Method::Shutdown, None)?;
    output.emit(&data, |_| "trackerd is shutting down".to_string())
}

fn format_start(outcome: &StartOutcome) -> String {
    let track = outcome.track();
    match outcome {
        StartOutcome::Started { .. } => format!("Started {} (track {})", track.name, track.id),
        StartOutcome::Resumed { .. } => format!("Resumed {} (track {})", track.name, track.id),
        StartOutcome::AlreadyRecording { .. } => {
            format!("Already recording {} (track {})", track.name, track.id)
        }
    }
}

fn format_stop(outcome: &StopOutcome) -> String {
    match (&outcome.track_name, outcome.was_running) {
        (Some(name), true) => format!("Stopped {}", name),
        _ if outcome.closed_tracks > 0 => {
            format!("Not recording; closed {} stray track(s)", outcome.closed_tracks)
        }
        _ => "Not recording".to_string(),
    }
}

fn format_status(status: &StatusSnapshot) -> String {
    if !status.recording {
        return "Not recording".to_string();
    }
    let mut lines = vec![format!(
        "Recording {} (track {})",
        status.track_name.as_deref().unwrap_or("?"),
        status
            .track_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "?".to_string())
    )];
    if let Some(target) = &status.target {
        lines.push(format!("Open action: {}", target));
    }
    lines.push(format!("Satellites: {}", status.satellites));
    lines.join("\n")
}

fn format_fix(outcome: &FixOutcome) -> String {
    match (&outcome.point, &outcome.reason) {
        (Some(point), _) => format!(
            "Recorded point {} on track {} ({})",
            point.id,
            point.session,
            point.fix.as_str()
        ),
        (None, Some(reason)) => format!("Fix dropped: {}", reason),
        (None, None) => "Fix dropped".to_string(),
    }
}

fn format_track(track: &Track) -> String {
    format!(
        "{:>5}  {:<14}  {}  {}{}",
        track.id,
        track.name,
        track.start,
        track.end.as_deref().unwrap_or("recording"),
        if track.visible { "" } else { "  (hidden)" }
    )
}

fn format_point(point: &TrackPoint) -> String {
    let ele = point
        .ele
        .map(|ele| format!("{:.1}m", ele))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:>7}  {}  {:.6},{:.6}  {:>8}  {}  sat={}  {}",
        point.id,
        point.timestamp,
        point.lat,
        point.lon,
        ele,
        point.fix.as_str(),
        point.sat,
        point.provider
    )
}
