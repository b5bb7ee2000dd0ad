//! IPC protocol types and validation for chrontic-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024; // 64KB
pub const MAX_ACTION_CHARS: usize = 256;

/// Per-user state directory under `$HOME`.
pub const STATE_DIR_NAME: &str = ".chrontic";
pub const SOCKET_NAME: &str = "daemon.sock";
/// Overrides the socket location for both the daemon and its clients.
pub const SOCKET_ENV: &str = "CHRONTIC_SOCKET";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Activity,
    Focus,
    GetStatus,
    Reload,
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

// ═══════════════════════════════════════════════════════════════════════════════
// Payloads
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    DocumentSave,
    Edit,
    Action,
    Navigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityOrigin {
    #[default]
    Foreground,
    Background,
    Automatic,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivityPayload {
    pub kind: ActivityKind,
    #[serde(default)]
    pub origin: ActivityOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// When the editor saw the event. Informational only; the daemon stamps
    /// activity with its own clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<String>,
}

impl ActivityPayload {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(action) = &self.action {
            require_string(&self.action, "action")?;
            if action.chars().count() > MAX_ACTION_CHARS {
                return Err(ErrorInfo::new(
                    "invalid_action",
                    format!("action must be {} characters or fewer", MAX_ACTION_CHARS),
                ));
            }
        }
        if let Some(recorded_at) = &self.recorded_at {
            if DateTime::parse_from_rfc3339(recorded_at).is_err() {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "recorded_at must be RFC3339",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FocusPayload {
    #[serde(default)]
    pub focused: Option<bool>,
}

impl FocusPayload {
    pub fn validate(&self) -> Result<bool, ErrorInfo> {
        require_bool(&self.focused, "focused")
    }
}

pub fn parse_activity(params: Option<Value>) -> Result<ActivityPayload, ErrorInfo> {
    let payload: ActivityPayload = parse_params(params, "activity")?;
    payload.validate()?;
    Ok(payload)
}

/// Returns the reported focus state.
pub fn parse_focus(params: Option<Value>) -> Result<bool, ErrorInfo> {
    let payload: FocusPayload = parse_params(params, "focus")?;
    payload.validate()
}

fn parse_params<T: for<'de> Deserialize<'de>>(
    params: Option<Value>,
    what: &str,
) -> Result<T, ErrorInfo> {
    let params = params.ok_or_else(|| {
        ErrorInfo::new("invalid_params", format!("{} payload is required", what))
    })?;
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} payload is invalid: {}", what, err),
        )
    })
}

fn require_string(value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    if let Some(candidate) = value {
        if !candidate.trim().is_empty() {
            return Ok(());
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}

fn require_bool(value: &Option<bool>, field: &str) -> Result<bool, ErrorInfo> {
    match value {
        Some(value) => Ok(*value),
        None => Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_activity() {
        let payload = parse_activity(Some(json!({ "kind": "document_save" }))).unwrap();
        assert_eq!(payload.kind, ActivityKind::DocumentSave);
        assert_eq!(payload.origin, ActivityOrigin::Foreground);
        assert!(payload.action.is_none());
    }

    #[test]
    fn rejects_unknown_kind_and_fields() {
        assert!(parse_activity(Some(json!({ "kind": "typing" }))).is_err());
        let err = parse_activity(Some(json!({ "kind": "edit", "extra": 1 }))).unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn rejects_blank_or_oversized_action() {
        let err = parse_activity(Some(json!({ "kind": "action", "action": "  " }))).unwrap_err();
        assert_eq!(err.code, "missing_field");

        let long = "a".repeat(MAX_ACTION_CHARS + 1);
        let err = parse_activity(Some(json!({ "kind": "action", "action": long }))).unwrap_err();
        assert_eq!(err.code, "invalid_action");
    }

    #[test]
    fn rejects_bad_timestamp() {
        let err = parse_activity(Some(json!({
            "kind": "edit",
            "recorded_at": "yesterday",
        })))
        .unwrap_err();
        assert_eq!(err.code, "invalid_timestamp");
    }

    #[test]
    fn focus_requires_flag() {
        assert_eq!(parse_focus(Some(json!({ "focused": false }))), Ok(false));
        let err = parse_focus(Some(json!({}))).unwrap_err();
        assert_eq!(err.code, "missing_field");
        assert!(parse_focus(None).is_err());
    }

    #[test]
    fn request_round_trips_method_names() {
        let request: Request = serde_json::from_value(json!({
            "protocol_version": 1,
            "method": "get_status",
        }))
        .unwrap();
        assert_eq!(request.method, Method::GetStatus);
        assert!(request.params.is_none());
    }
}
