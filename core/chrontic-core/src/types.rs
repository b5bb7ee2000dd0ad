//! Value types shared by the resolver, the engine and the submission client.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Normalized label a time interval is attributed to: an uppercased ticket id
/// or the raw branch name. Never blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkIdentity(String);

impl WorkIdentity {
    pub fn new(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the VCS looked like on a single tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchState {
    pub branch: Option<String>,
    pub ticket: Option<String>,
}

impl BranchState {
    /// Ticket wins over branch; blank values count as absent.
    pub fn identity(&self) -> Option<WorkIdentity> {
        self.ticket
            .as_deref()
            .and_then(WorkIdentity::new)
            .or_else(|| self.branch.as_deref().and_then(WorkIdentity::new))
    }
}

/// The engine's in-memory accumulation baseline for one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSession {
    pub identity: WorkIdentity,
    pub session_start: DateTime<Utc>,
    pub last_tick: DateTime<Utc>,
}

impl TrackingSession {
    pub fn start(identity: WorkIdentity, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            session_start: now,
            last_tick: now,
        }
    }
}

/// A completed, reportable slice of work.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeInterval {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub hours_worked: f64,
    pub description: String,
}

impl TimeInterval {
    /// Returns `None` for empty/inverted ranges or a blank description.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, description: &str) -> Option<Self> {
        if end <= start || description.trim().is_empty() {
            return None;
        }
        let seconds = end.signed_duration_since(start).num_seconds();
        Some(Self {
            start_time: start,
            end_time: end,
            hours_worked: seconds as f64 / 3600.0,
            description: description.to_string(),
        })
    }

    /// Whole minutes covered, for payloads that report integer durations.
    pub fn duration_minutes(&self) -> i64 {
        self.end_time
            .signed_duration_since(self.start_time)
            .num_minutes()
    }
}
