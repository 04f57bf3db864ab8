//! trackerd entrypoint.
//!
//! A single-writer background recorder: a Unix socket listener hands each
//! request to the service thread, which owns the track store, the recording
//! lifecycle and the status surface. A midnight alarm and SIGTERM/SIGINT feed
//! the same event queue.

use fs_err as fs;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tracker_protocol::{ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES};

mod alarm;
mod clock;
mod config;
mod db;
mod error;
mod journal;
mod lifecycle;
mod location;
mod naming;
mod notifier;
mod recorder;
mod service;
mod state;
mod store;
mod surfaces;

use alarm::ThreadAlarm;
use clock::SystemClock;
use config::TrackerConfig;
use db::Db;
use journal::ScratchJournal;
use lifecycle::LifecycleManager;
use location::ProviderGate;
use notifier::{FileStatusSink, StatusNotifier};
use service::{ServiceEvent, Tracker};
use surfaces::SurfaceRegistry;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const REPLY_TIMEOUT_SECS: u64 = 10;

fn main() {
    init_logging();

    let config = match config::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load tracker config; using defaults");
            TrackerConfig::default()
        }
    };

    let socket_path = match config::socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve tracker socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare tracker socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let db = match config::db_path().and_then(Db::new) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize track database");
            std::process::exit(1);
        }
    };

    let (journal_path, status_path) = match (config::journal_path(), config::status_path()) {
        (Ok(journal), Ok(status)) => (journal, status),
        (Err(err), _) | (_, Err(err)) => {
            error!(error = %err, "Failed to resolve tracker state paths");
            std::process::exit(1);
        }
    };

    let (events, receiver) = mpsc::channel();
    let mut lifecycle = LifecycleManager::new(
        Box::new(SystemClock),
        Box::new(ThreadAlarm::new(events.clone())),
        ScratchJournal::new(journal_path),
        SurfaceRegistry::from_config(&config.surfaces),
        StatusNotifier::new(Box::new(FileStatusSink::new(status_path))),
    );
    lifecycle.sync_status_surface();
    let resume = config.resume_on_launch && lifecycle.has_interrupted_recording();
    let tracker = Tracker::new(
        Box::new(db),
        lifecycle,
        ProviderGate::new(config.sampling.clone()),
    )
    .with_resume_retry(events.clone());
    info!(
        min_time_secs = config.sampling.min_time_secs,
        min_distance_m = config.sampling.min_distance_m,
        providers = ?config.sampling.providers,
        resume_on_launch = config.resume_on_launch,
        "Tracker config loaded"
    );

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind tracker socket");
            std::process::exit(1);
        }
    };
    info!(path = %socket_path.display(), "trackerd started");

    if resume {
        info!("Interrupted recording found; resuming");
        let _ = events.send(ServiceEvent::Resume { attempt: 0 });
    }

    spawn_signal_listener(events.clone());
    spawn_acceptor(listener, events);

    service::run(tracker, receiver);

    if let Err(err) = remove_existing_socket(&socket_path) {
        warn!(error = %err, "Failed to remove tracker socket on exit");
    }
    info!("trackerd stopped");
}

fn init_logging() {
    let debug_enabled = env::var("TRACKER_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn spawn_signal_listener(events: Sender<ServiceEvent>) {
    let mut signals = match Signals::new([SIGTERM, SIGINT]) {
        Ok(signals) => signals,
        Err(err) => {
            warn!(error = %err, "Failed to install signal handlers");
            return;
        }
    };
    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            info!(signal, "Termination signal received");
            let _ = events.send(ServiceEvent::Shutdown);
        }
    });
}

fn spawn_acceptor(listener: UnixListener, events: Sender<ServiceEvent>) {
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let events = events.clone();
                    thread::spawn(move || handle_connection(stream, events));
                }
                Err(err) => {
                    warn!(error = %err, "Failed to accept tracker connection");
                }
            }
        }
    });
}

fn handle_connection(mut stream: UnixStream, events: Sender<ServiceEvent>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Tracker request received");
    let shutdown_requested = request.method == Method::Shutdown;
    let response = dispatch(request, &events);
    let acknowledged = response.ok;
    let _ = write_response(&mut stream, response);

    if shutdown_requested && acknowledged {
        let _ = events.send(ServiceEvent::Shutdown);
    }
}

fn dispatch(request: Request, events: &Sender<ServiceEvent>) -> Response {
    let id = request.id.clone();
    let (reply, replies) = mpsc::channel();
    if events
        .send(ServiceEvent::Request { request, reply })
        .is_err()
    {
        return Response::error(id, "service_unavailable", "tracker service has exited");
    }

    match replies.recv_timeout(Duration::from_secs(REPLY_TIMEOUT_SECS)) {
        Ok(response) => response,
        Err(_) => Response::error(id, "service_timeout", "tracker service did not reply"),
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
