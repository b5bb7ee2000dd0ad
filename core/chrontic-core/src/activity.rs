//! User activity detection.
//!
//! Keeps a decaying "is the user actually working" signal. Event sources call
//! [`ActivityMonitor::observe`] (or `record_activity` for pre-filtered
//! events) from any thread; the tracking tick reads the signal through
//! [`ActivityMonitor::is_active`]. Every field is a standalone atomic, so
//! writers never contend with a tick that is blocked on the network.
//!
//! Window focus is sampled at most once per minute. Focus alone never counts
//! as activity: having the editor open is presence, not work.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::FocusError;
use crate::patterns::BACKGROUND_ACTION_KEYWORDS;

const NEVER: i64 = i64::MIN;
const FOCUS_SAMPLE_INTERVAL_SECS: i64 = 60;

// ═══════════════════════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    DocumentSave,
    Edit,
    Action,
    Navigation,
}

/// Who triggered the event. Anything but `Foreground` is the host doing
/// housekeeping on its own (auto-save, formatters, indexers, timers).
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
pub struct ActivityEvent {
    pub kind: ActivityKind,
    #[serde(default)]
    pub origin: ActivityOrigin,
    #[serde(default)]
    pub action: Option<String>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind) -> Self {
        Self {
            kind,
            origin: ActivityOrigin::Foreground,
            action: None,
        }
    }

    pub fn with_origin(mut self, origin: ActivityOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Foreground only, and the action name must not look like host
    /// housekeeping.
    pub fn is_qualifying(&self) -> bool {
        if self.origin != ActivityOrigin::Foreground {
            return false;
        }
        match &self.action {
            Some(action) => {
                let lowered = action.to_lowercase();
                !BACKGROUND_ACTION_KEYWORDS
                    .iter()
                    .any(|keyword| lowered.contains(keyword))
            }
            None => true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Focus
// ═══════════════════════════════════════════════════════════════════════════════

pub trait FocusProbe: Send + Sync {
    fn is_focused(&self) -> Result<bool, FocusError>;
}

/// For hosts that cannot report focus at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysFocused;

impl FocusProbe for AlwaysFocused {
    fn is_focused(&self) -> Result<bool, FocusError> {
        Ok(true)
    }
}

/// Focus as last pushed by the editor integration. Starts out focused.
#[derive(Debug)]
pub struct ReportedFocus {
    focused: AtomicBool,
}

impl ReportedFocus {
    pub fn new() -> Self {
        Self {
            focused: AtomicBool::new(true),
        }
    }

    pub fn set(&self, focused: bool) {
        self.focused.store(focused, Ordering::SeqCst);
    }
}

impl Default for ReportedFocus {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusProbe for ReportedFocus {
    fn is_focused(&self) -> Result<bool, FocusError> {
        Ok(self.focused.load(Ordering::SeqCst))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Monitor
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct ActivitySnapshot {
    pub last_activity_at: Option<DateTime<Utc>>,
    pub minutes_since_last_activity: Option<i64>,
    pub window_focused: bool,
    pub last_focus_check_at: Option<DateTime<Utc>>,
    pub activity_timeout_minutes: i64,
}

pub struct ActivityMonitor {
    clock: Arc<dyn Clock>,
    focus: Arc<dyn FocusProbe>,
    activity_timeout_minutes: i64,
    last_activity_ms: AtomicI64,
    last_focus_check_ms: AtomicI64,
    window_focused: AtomicBool,
}

impl ActivityMonitor {
    pub fn new(
        clock: Arc<dyn Clock>,
        focus: Arc<dyn FocusProbe>,
        activity_timeout_minutes: u32,
    ) -> Self {
        Self {
            clock,
            focus,
            activity_timeout_minutes: i64::from(activity_timeout_minutes),
            last_activity_ms: AtomicI64::new(NEVER),
            last_focus_check_ms: AtomicI64::new(NEVER),
            window_focused: AtomicBool::new(true),
        }
    }

    /// Applies the qualifying filter, then stamps. Returns whether the event
    /// counted.
    pub fn observe(&self, event: &ActivityEvent) -> bool {
        if !event.is_qualifying() {
            tracing::trace!(kind = ?event.kind, origin = ?event.origin, action = ?event.action, "Ignoring background activity");
            return false;
        }
        self.record_activity();
        tracing::debug!(kind = ?event.kind, action = ?event.action, "Activity detected");
        true
    }

    pub fn record_activity(&self) {
        let now = self.clock.now().timestamp_millis();
        self.last_activity_ms.fetch_max(now, Ordering::SeqCst);
    }

    /// Keeps the newer of the two activity stamps. Used when a monitor is
    /// rebuilt on config reload.
    pub fn inherit(&self, previous: &ActivityMonitor) {
        let stamp = previous.last_activity_ms.load(Ordering::SeqCst);
        self.last_activity_ms.fetch_max(stamp, Ordering::SeqCst);
    }

    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_activity_ms.load(Ordering::SeqCst))
    }

    /// Whole minutes since the last qualifying event; `None` means never.
    pub fn minutes_since_last_activity(&self) -> Option<i64> {
        let last = self.last_activity_at()?;
        Some(self.clock.now().signed_duration_since(last).num_minutes())
    }

    pub fn is_active(&self) -> bool {
        let focused = self.sample_focus();
        let Some(minutes) = self.minutes_since_last_activity() else {
            // Nothing recorded yet: presence is the only evidence available.
            tracing::debug!(window_focused = focused, "No activity recorded yet");
            return focused;
        };

        let recently_active = minutes <= self.activity_timeout_minutes;
        let active = recently_active && focused;
        tracing::debug!(
            recently_active,
            minutes_since_last_activity = minutes,
            window_focused = focused,
            active,
            "Activity check"
        );
        active
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        ActivitySnapshot {
            last_activity_at: self.last_activity_at(),
            minutes_since_last_activity: self.minutes_since_last_activity(),
            window_focused: self.window_focused.load(Ordering::SeqCst),
            last_focus_check_at: from_millis(self.last_focus_check_ms.load(Ordering::SeqCst)),
            activity_timeout_minutes: self.activity_timeout_minutes,
        }
    }

    fn sample_focus(&self) -> bool {
        let now = self.clock.now();
        let last_check = self.last_focus_check_ms.load(Ordering::SeqCst);
        let due = match from_millis(last_check) {
            None => true,
            Some(checked_at) => {
                now.signed_duration_since(checked_at)
                    >= Duration::seconds(FOCUS_SAMPLE_INTERVAL_SECS)
            }
        };
        if !due {
            return self.window_focused.load(Ordering::SeqCst);
        }

        let focused = match self.focus.is_focused() {
            Ok(focused) => focused,
            Err(err) => {
                tracing::warn!(error = %err, "Could not determine window focus state; assuming focused");
                true
            }
        };
        self.window_focused.store(focused, Ordering::SeqCst);
        self.last_focus_check_ms
            .store(now.timestamp_millis(), Ordering::SeqCst);
        focused
    }
}

fn from_millis(value: i64) -> Option<DateTime<Utc>> {
    if value == NEVER {
        return None;
    }
    Utc.timestamp_millis_opt(value).single()
}
