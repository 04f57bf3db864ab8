//! Client for the trackerd socket.
//!
//! One request per connection, newline-delimited JSON both ways. A refused
//! connection is retried once after a short delay so a daemon that is still
//! binding its socket does not fail the command.

use rand::RngCore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracker_protocol::{Method, Request, Response, MAX_REQUEST_BYTES};

const SOCKET_ENV: &str = "TRACKER_SOCKET";
const TRACKER_DIR: &str = ".tracker";
const SOCKET_NAME: &str = "trackerd.sock";
const READ_TIMEOUT_MS: u64 = 15_000;
const WRITE_TIMEOUT_MS: u64 = 2_000;
const RETRY_DELAY_MS: u64 = 200;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to connect to trackerd at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to talk to trackerd: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for trackerd response")]
    Timeout,

    #[error("Invalid response from trackerd: {0}")]
    InvalidResponse(String),

    #[error("trackerd rejected the request ({code}): {message}")]
    Daemon { code: String, message: String },
}

pub fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or(ClientError::HomeDirNotFound)?;
    Ok(home.join(TRACKER_DIR).join(SOCKET_NAME))
}

/// Sends `method` and decodes the `data` payload of a successful reply.
pub fn call<T: DeserializeOwned>(method: Method, params: Option<Value>) -> Result<T, ClientError> {
    let request = Request::new(method, Some(make_request_id()), params);
    let response = send_with_retry(&request)?;
    into_data(response)
}

fn into_data<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    if !response.ok {
        let (code, message) = response
            .error
            .map(|err| (err.code, err.message))
            .unwrap_or_else(|| ("unknown".to_string(), "Unknown daemon error".to_string()));
        return Err(ClientError::Daemon { code, message });
    }
    let data = response.data.unwrap_or(Value::Null);
    serde_json::from_value(data).map_err(|err| ClientError::InvalidResponse(err.to_string()))
}

fn send_with_retry(request: &Request) -> Result<Response, ClientError> {
    match send_request(request) {
        Err(ClientError::Connect { path, source }) => {
            tracing::warn!(
                error = %source,
                path = %path.display(),
                "Failed to connect to trackerd; retrying"
            );
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(request)
        }
        other => other,
    }
}

fn send_request(request: &Request) -> Result<Response, ClientError> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket).map_err(|source| ClientError::Connect {
        path: socket.clone(),
        source,
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    tracing::debug!(method = ?request.method, id = ?request.id, "Sending request to trackerd");
    serde_json::to_writer(&mut stream, request)
        .map_err(|err| ClientError::InvalidResponse(format!("Failed to write request: {}", err)))?;
    stream.write_all(b"\n")?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES * 16 {
                    return Err(ClientError::InvalidResponse(
                        "response exceeded maximum size".to_string(),
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
                return Err(ClientError::Timeout);
            }
            Err(err) => return Err(ClientError::Io(err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::InvalidResponse("response was empty".to_string()));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::InvalidResponse(format!("not valid JSON: {}", err)))
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "req-{}-{}-{:x}",
        chrono::Utc::now().timestamp_millis(),
        std::process::id(),
        random.next_u64()
    )
}
