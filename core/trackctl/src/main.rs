//! trackctl: command-line client for trackerd.
//!
//! Every subcommand is one request to the daemon socket. `fix` and
//! `satellites` stand in for a location provider; `open` and `stop` are the
//! two actions of the recording status surface.
//!
//! ## Subcommands
//!
//! - `start`, `stop`, `status`: recording lifecycle
//! - `fix`, `satellites`: feed location readings
//! - `tracks`: list, inspect, hide/show and delete recorded tracks
//! - `open`: launch the surface the status surface points at
//! - `health`, `shutdown`: daemon housekeeping

mod commands;
mod daemon_client;
mod logging;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "trackctl")]
#[command(about = "Control the trackerd track recorder")]
#[command(version)]
struct Cli {
    /// Print raw JSON payloads instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start recording, or resume an interrupted recording
    Start {
        /// Surface the status surface's open action launches (e.g. map, tracks)
        #[arg(long)]
        target: Option<String>,
    },

    /// Stop recording and close every open track
    Stop,

    /// Show the recording state and status surface
    Status,

    /// Deliver one location fix
    Fix {
        /// Provider name (gps, network)
        #[arg(long, default_value = "gps")]
        provider: String,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Altitude in meters; presence makes the fix 3d
        #[arg(long, allow_hyphen_values = true)]
        ele: Option<f64>,

        /// RFC3339 fix time (defaults to now)
        #[arg(long)]
        time: Option<String>,
    },

    /// Report the satellite count of the current fix
    Satellites {
        #[arg(value_name = "COUNT")]
        count: u32,
    },

    /// Inspect and manage recorded tracks
    Tracks {
        #[command(subcommand)]
        command: TrackCommands,
    },

    /// Launch the surface the status surface's open action points at
    Open,

    /// Check that trackerd is up
    Health,

    /// Close open tracks and stop trackerd
    Shutdown,
}

#[derive(Subcommand)]
enum TrackCommands {
    /// List tracks, newest first
    List,

    /// List the points of a track
    Points {
        #[arg(value_name = "TRACK_ID")]
        track_id: i64,
    },

    /// Make a track visible on the map
    Show {
        #[arg(value_name = "TRACK_ID")]
        track_id: i64,
    },

    /// Hide a track from the map
    Hide {
        #[arg(value_name = "TRACK_ID")]
        track_id: i64,
    },

    /// Delete tracks and their points
    Delete {
        #[arg(value_name = "TRACK_ID", required = true)]
        track_ids: Vec<i64>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let output = commands::Output { json: cli.json };
    let result = match cli.command {
        Commands::Start { target } => commands::start(&output, target),
        Commands::Stop => commands::stop(&output),
        Commands::Status => commands::status(&output),
        Commands::Fix {
            provider,
            lat,
            lon,
            ele,
            time,
        } => commands::fix(&output, provider, lat, lon, ele, time),
        Commands::Satellites { count } => commands::satellites(&output, count),
        Commands::Tracks { command } => match command {
            TrackCommands::List => commands::list_tracks(&output),
            TrackCommands::Points { track_id } => commands::list_points(&output, track_id),
            TrackCommands::Show { track_id } => commands::set_visible(&output, track_id, true),
            TrackCommands::Hide { track_id } => commands::set_visible(&output, track_id, false),
            TrackCommands::Delete { track_ids } => commands::delete_tracks(&output, track_ids),
        },
        Commands::Open => commands::open(&output),
        Commands::Health => commands::health(&output),
        Commands::Shutdown => commands::shutdown(&output),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "trackctl command failed");
        eprintln!("trackctl: {}", err);
        std::process::exit(1);
    }
}
