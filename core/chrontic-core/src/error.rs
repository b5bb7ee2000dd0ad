//! Error types for chrontic-core operations.
//!
//! None of these terminate the tracking loop. Identity and focus errors are
//! folded into a no-op tick or a fail-open focus value at the call site;
//! configuration errors disable tracking until settings change.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid ticket pattern {pattern:?}: {source}")]
    InvalidTicketPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid API base URL {0:?}: expected http:// or https://")]
    InvalidBaseUrl(String),

    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("API key not configured")]
    MissingCredential,
}

// ═══════════════════════════════════════════════════════════════════════════════
// VCS / Focus Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("No git repository found above {0}")]
    NoRepository(PathBuf),

    #[error("Malformed gitdir file: {0}")]
    MalformedGitFile(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FocusError {
    #[error("Focus state unavailable: {0}")]
    Unavailable(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lifecycle Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Automatic tracking is disabled in settings")]
    AutoTrackingDisabled,

    #[error("Tracking disabled: {0}")]
    Config(#[from] ConfigError),

    #[error("Tracker is already running")]
    AlreadyRunning,

    #[error("Tracking engine was lost when its worker exited abnormally")]
    EngineLost,

    #[error("Failed to spawn tracker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;
