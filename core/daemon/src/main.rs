//! Chrontic daemon entrypoint.
//!
//! One daemon per project checkout. It owns the tracking engine, accepts
//! activity and focus reports from editor hooks over a Unix socket, and
//! answers status queries. Requests are newline-delimited JSON, one per
//! connection.
//!
//! SIGINT and SIGTERM are blocked in every thread and collected by a single
//! listener thread, which removes the socket, lets the tracker finish its
//! current tick and exits.

use clap::Parser;
use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chrontic_core::{ActivityEvent, ActivityKind, ActivityOrigin, Settings};
use chrontic_daemon_protocol::{
    parse_activity, parse_focus, ActivityPayload, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION, SOCKET_ENV, SOCKET_NAME, STATE_DIR_NAME,
};

mod state;

use state::SharedState;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const SIGNAL_THREAD_NAME: &str = "chrontic-signals";

#[derive(Parser, Debug)]
#[command(name = "chrontic-daemon")]
#[command(about = "Tracks work time for one project checkout")]
#[command(version)]
struct Args {
    /// Project directory to track (defaults to the current directory)
    #[arg(long)]
    project: Option<PathBuf>,

    /// Settings file (defaults to ~/.chrontic/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    init_logging();

    // Must run before any thread is spawned so every thread inherits the mask.
    let shutdown_signals = match block_shutdown_signals() {
        Ok(set) => Some(set),
        Err(err) => {
            warn!(error = %err, "Failed to block shutdown signals; SIGTERM will not stop tracking cleanly");
            None
        }
    };

    let project_dir = match resolve_project_dir(args.project) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve project directory");
            std::process::exit(1);
        }
    };

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = claim_socket_path(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to claim daemon socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            warn!(error = %err, "Failed to load settings; using defaults");
            Settings::default()
        }
    };
    info!(
        path = %socket_path.display(),
        project = %project_dir.display(),
        settings = ?settings.redacted(),
        "Chrontic daemon started"
    );

    let shared_state = Arc::new(SharedState::new(project_dir, args.config, settings));
    if let Some(set) = shutdown_signals {
        spawn_shutdown_listener(set, Arc::clone(&shared_state), socket_path);
    }

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("CHRONTIC_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn resolve_project_dir(project: Option<PathBuf>) -> Result<PathBuf, String> {
    let path = match project {
        Some(path) => path,
        None => env::current_dir().map_err(|err| format!("Failed to read current dir: {}", err))?,
    };
    if !path.is_dir() {
        return Err(format!("Project directory not found: {}", path.display()));
    }
    Ok(fs::canonicalize(&path).unwrap_or(path))
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(STATE_DIR_NAME).join(SOCKET_NAME))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

/// Refuses a socket another daemon still answers on; clears a stale one.
fn claim_socket_path(socket_path: &Path) -> Result<(), String> {
    if UnixStream::connect(socket_path).is_ok() {
        return Err(format!(
            "Another chrontic daemon is already listening on {}",
            socket_path.display()
        ));
    }
    remove_existing_socket(socket_path)
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn block_shutdown_signals() -> std::io::Result<libc::sigset_t> {
    // SAFETY: the set is zeroed plain data initialised by sigemptyset before
    // use, and pthread_sigmask only changes the calling thread's mask.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        if rc != 0 {
            return Err(std::io::Error::from_raw_os_error(rc));
        }
        Ok(set)
    }
}

fn spawn_shutdown_listener(set: libc::sigset_t, state: Arc<SharedState>, socket_path: PathBuf) {
    let spawned = thread::Builder::new()
        .name(SIGNAL_THREAD_NAME.to_string())
        .spawn(move || {
            let signal = wait_for_signal(&set);
            info!(signal, "Shutdown signal received");
            if let Err(err) = remove_existing_socket(&socket_path) {
                warn!(error = %err, path = %socket_path.display(), "Failed to remove daemon socket");
            }
            state.shutdown();
            info!("Chrontic daemon stopped");
            std::process::exit(0);
        });
    if let Err(err) = spawned {
        warn!(error = %err, "Failed to start shutdown signal listener");
    }
}

fn wait_for_signal(set: &libc::sigset_t) -> libc::c_int {
    let mut signal: libc::c_int = 0;
    loop {
        // SAFETY: `set` holds blocked signals and `signal` is a valid out pointer.
        let rc = unsafe { libc::sigwait(set, &mut signal) };
        if rc == 0 {
            return signal;
        }
    }
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
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
        Some(index) => &buffer[..index],
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

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            });
            if let Ok(value) = serde_json::to_value(state.health()) {
                data["tracking"] = value;
            }
            Response::ok(request.id, data)
        }
        Method::Activity => {
            let payload = match parse_activity(request.params) {
                Ok(payload) => payload,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            let counted = state.record_activity(&activity_event(payload));
            Response::ok(
                request.id,
                serde_json::json!({ "accepted": true, "counted": counted }),
            )
        }
        Method::Focus => {
            let focused = match parse_focus(request.params) {
                Ok(focused) => focused,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            state.set_focus(focused);
            Response::ok(
                request.id,
                serde_json::json!({ "accepted": true, "focused": focused }),
            )
        }
        Method::GetStatus => to_response(request.id, state.status(), "status"),
        Method::Reload => match state.reload() {
            Ok(status) => to_response(request.id, status, "status"),
            Err(err) => {
                warn!(error = %err, "Reload failed; keeping previous settings");
                Response::error(request.id, "reload_failed", err.to_string())
            }
        },
    }
}

fn to_response<T: serde::Serialize>(id: Option<String>, value: T, what: &str) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        ),
    }
}

fn activity_event(payload: ActivityPayload) -> ActivityEvent {
    use chrontic_daemon_protocol::{ActivityKind as WireKind, ActivityOrigin as WireOrigin};

    let kind = match payload.kind {
        WireKind::DocumentSave => ActivityKind::DocumentSave,
        WireKind::Edit => ActivityKind::Edit,
        WireKind::Action => ActivityKind::Action,
        WireKind::Navigation => ActivityKind::Navigation,
    };
    let origin = match payload.origin {
        WireOrigin::Foreground => ActivityOrigin::Foreground,
        WireOrigin::Background => ActivityOrigin::Background,
        WireOrigin::Automatic => ActivityOrigin::Automatic,
        WireOrigin::Scheduled => ActivityOrigin::Scheduled,
    };

    let event = ActivityEvent::new(kind).with_origin(origin);
    match payload.action {
        Some(action) => event.with_action(action),
        None => event,
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
