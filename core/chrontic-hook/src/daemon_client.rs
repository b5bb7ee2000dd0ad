//! Client helper for talking to the chrontic daemon.
//!
//! One request per connection, newline-delimited JSON. Activity reports are
//! retried once since a dropped keystroke signal is cheap to resend but the
//! daemon may be mid-reload.

use chrono::Utc;
use chrontic_daemon_protocol::{
    ActivityPayload, FocusPayload, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
    SOCKET_ENV, SOCKET_NAME, STATE_DIR_NAME,
};
use rand::RngCore;
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const ENABLE_ENV: &str = "CHRONTIC_DAEMON_ENABLED";
const READ_TIMEOUT_MS: u64 = 600;
/// Reload joins the tracker, which may wait out an in-flight submission.
const SLOW_READ_TIMEOUT_MS: u64 = 35_000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Daemon disabled via CHRONTIC_DAEMON_ENABLED")]
    Disabled,

    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Failed to connect to daemon socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write request: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to read response: {0}")]
    Read(#[source] std::io::Error),

    #[error("Timed out waiting for daemon response")]
    Timeout,

    #[error("Response exceeded maximum size")]
    TooLarge,

    #[error("Daemon response was empty")]
    Empty,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{code}: {message}")]
    Daemon { code: String, message: String },
}

pub fn daemon_enabled() -> bool {
    match env::var(ENABLE_ENV) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => true,
    }
}

pub fn send_activity(payload: &ActivityPayload) -> Result<Value, ClientError> {
    let params = serde_json::to_value(payload)?;
    call_with_retry(Method::Activity, Some(params), "activity")
}

pub fn send_focus(focused: bool) -> Result<Value, ClientError> {
    let params = serde_json::to_value(FocusPayload {
        focused: Some(focused),
    })?;
    call_with_retry(Method::Focus, Some(params), "focus")
}

pub fn status() -> Result<Value, ClientError> {
    call(Method::GetStatus, None, READ_TIMEOUT_MS)
}

pub fn health() -> Result<Value, ClientError> {
    call(Method::GetHealth, None, READ_TIMEOUT_MS)
}

pub fn reload() -> Result<Value, ClientError> {
    call(Method::Reload, None, SLOW_READ_TIMEOUT_MS)
}

fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(ClientError::HomeNotFound)?;
    Ok(home.join(STATE_DIR_NAME).join(SOCKET_NAME))
}

fn call_with_retry(
    method: Method,
    params: Option<Value>,
    label: &str,
) -> Result<Value, ClientError> {
    match call(method, params.clone(), READ_TIMEOUT_MS) {
        Ok(data) => Ok(data),
        // Validation failures will not improve on retry.
        Err(err) if is_rejection(&err) => Err(err),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to send {} to daemon", label);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            call(method, params, READ_TIMEOUT_MS).map_err(|retry_err| {
                tracing::warn!(
                    error = %retry_err,
                    "Retry failed sending {} to daemon",
                    label
                );
                retry_err
            })
        }
    }
}

fn is_rejection(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Daemon { code, .. }
            if matches!(code.as_str(), "invalid_params" | "missing_field" | "invalid_action" | "invalid_timestamp" | "protocol_mismatch")
    )
}

fn call(method: Method, params: Option<Value>, read_timeout_ms: u64) -> Result<Value, ClientError> {
    if !daemon_enabled() {
        return Err(ClientError::Disabled);
    }

    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(make_request_id()),
        params,
    };

    let response = send_request(&request, read_timeout_ms)?;
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        let (code, message) = match response.error {
            Some(err) => (err.code, err.message),
            None => ("unknown".to_string(), "Unknown daemon error".to_string()),
        };
        Err(ClientError::Daemon { code, message })
    }
}

fn send_request(request: &Request, read_timeout_ms: u64) -> Result<Response, ClientError> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket).map_err(|source| ClientError::Connect {
        path: socket.clone(),
        source,
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(read_timeout_ms)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    let mut payload = serde_json::to_vec(request)?;
    payload.push(b'\n');
    stream.write_all(&payload).map_err(ClientError::Write)?;
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
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ClientError::TooLarge);
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
            Err(err) => return Err(ClientError::Read(err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::Empty);
    }

    Ok(serde_json::from_slice(response_bytes)?)
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "req-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        random.next_u64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrontic_daemon_protocol::{ActivityKind, ActivityOrigin};
    use std::os::unix::net::UnixListener;
    use std::path::Path;
    use std::sync::{Arc, Mutex, OnceLock};
    use std::time::Instant;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    struct EnvGuard {
        key: &'static str,
        prior: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prior = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, prior }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.prior {
                std::env::set_var(self.key, value);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_request(stream: &mut UnixStream) -> Option<Request> {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if buffer.contains(&b'\n') {
                        break;
                    }
                }
                Err(_) => return None,
            }
        }
        let end = buffer.iter().position(|b| *b == b'\n').unwrap_or(buffer.len());
        serde_json::from_slice(&buffer[..end]).ok()
    }

    /// Answers `responses.len()` connections in order, recording each request.
    fn fake_daemon(
        socket_path: &Path,
        responses: Vec<Response>,
    ) -> (std::thread::JoinHandle<()>, Arc<Mutex<Vec<Request>>>) {
        let listener = UnixListener::bind(socket_path).unwrap();
        listener.set_nonblocking(true).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let mut responses = responses.into_iter();
            let mut next = responses.next();
            while next.is_some() && start.elapsed() < Duration::from_secs(5) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        if let Some(request) = read_request(&mut stream) {
                            seen_clone.lock().unwrap().push(request);
                        }
                        let mut payload = serde_json::to_vec(&next.take().unwrap()).unwrap();
                        payload.push(b'\n');
                        let _ = stream.write_all(&payload);
                        next = responses.next();
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });
        (handle, seen)
    }

    fn edit_payload() -> ActivityPayload {
        ActivityPayload {
            kind: ActivityKind::Edit,
            origin: ActivityOrigin::Foreground,
            action: Some("EditorTyping".to_string()),
            recorded_at: None,
        }
    }

    #[test]
    fn activity_retries_after_transient_daemon_error() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");

        let (server, seen) = fake_daemon(
            &socket,
            vec![
                Response::error(None, "busy", "reloading"),
                Response::ok(None, serde_json::json!({ "accepted": true, "counted": true })),
            ],
        );
        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket.to_str().unwrap());
        let _enabled_guard = EnvGuard::set(ENABLE_ENV, "1");

        let data = send_activity(&edit_payload()).expect("activity accepted");
        server.join().unwrap();

        assert_eq!(data["counted"], Value::Bool(true));
        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(matches!(requests[0].method, Method::Activity));
        let sent: ActivityPayload =
            serde_json::from_value(requests[0].params.clone().unwrap()).unwrap();
        assert_eq!(sent, edit_payload());
    }

    #[test]
    fn validation_errors_are_not_retried() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("daemon.sock");

        let (server, seen) = fake_daemon(
            &socket,
            vec![Response::error(None, "invalid_params", "bad kind")],
        );
        let _socket_guard = EnvGuard::set(SOCKET_ENV, socket.to_str().unwrap());
        let _enabled_guard = EnvGuard::set(ENABLE_ENV, "1");

        let err = send_focus(true).unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, ClientError::Daemon { ref code, .. } if code == "invalid_params"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn disabled_client_never_connects() {
        let _guard = env_lock();
        let _enabled_guard = EnvGuard::set(ENABLE_ENV, "0");
        assert!(matches!(status(), Err(ClientError::Disabled)));
    }

    #[test]
    fn missing_daemon_is_a_connect_error() {
        let _guard = env_lock();
        let dir = tempfile::tempdir().unwrap();
        let _socket_guard = EnvGuard::set(SOCKET_ENV, dir.path().join("none.sock").to_str().unwrap());
        let _enabled_guard = EnvGuard::set(ENABLE_ENV, "1");
        assert!(matches!(health(), Err(ClientError::Connect { .. })));
    }
}
