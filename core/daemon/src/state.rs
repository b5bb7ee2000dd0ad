//! Tracking state owned by the daemon.
//!
//! Connection threads share one `SharedState`. Activity and focus updates only
//! touch atomics inside the monitor; the tracker itself is swapped out under a
//! short lock on reload so a stop that waits on an in-flight submission never
//! blocks event intake. Activity is observed under that same lock, so the
//! swap can carry every stamp of the outgoing monitor over to the new one.

use chrono::{DateTime, Utc};
use chrontic_core::{
    ActivityEvent, ActivityMonitor, ActivitySnapshot, ConfigError, EngineSnapshot, IdleTimePolicy,
    Notification, NotificationLog, ReportedFocus, Settings, SubmissionStyle, SystemClock, Tracker,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct SharedState {
    project_dir: PathBuf,
    config_path: Option<PathBuf>,
    started_at: DateTime<Utc>,
    focus: Arc<ReportedFocus>,
    notifications: Arc<NotificationLog>,
    tracking: Mutex<Tracking>,
    reload_lock: Mutex<()>,
}

struct Tracking {
    settings: Settings,
    monitor: Arc<ActivityMonitor>,
    tracker: Option<Tracker>,
    disabled_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub project_name: String,
    pub project_dir: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    pub tracking_interval_minutes: u64,
    pub idle_time_policy: IdleTimePolicy,
    pub submission_style: SubmissionStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineSnapshot>,
    pub activity: ActivitySnapshot,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub started_at: DateTime<Utc>,
    pub project_dir: String,
    pub running: bool,
}

impl SharedState {
    pub fn new(project_dir: PathBuf, config_path: Option<PathBuf>, settings: Settings) -> Self {
        let focus = Arc::new(ReportedFocus::new());
        let notifications = Arc::new(NotificationLog::default());
        let monitor = build_monitor(&settings, &focus);
        let (tracker, disabled_reason) =
            start_tracking(&settings, &project_dir, &monitor, &notifications);

        Self {
            project_dir,
            config_path,
            started_at: Utc::now(),
            focus,
            notifications,
            tracking: Mutex::new(Tracking {
                settings,
                monitor,
                tracker,
                disabled_reason,
            }),
            reload_lock: Mutex::new(()),
        }
    }

    /// Returns whether the event counted as activity.
    pub fn record_activity(&self, event: &ActivityEvent) -> bool {
        self.lock_tracking().monitor.observe(event)
    }

    pub fn set_focus(&self, focused: bool) {
        tracing::debug!(focused, "Window focus reported");
        self.focus.set(focused);
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            started_at: self.started_at,
            project_dir: self.project_dir.display().to_string(),
            running: self.lock_tracking().tracker.is_some(),
        }
    }

    pub fn status(&self) -> StatusReport {
        let tracking = self.lock_tracking();
        let tracker = tracking.tracker.as_ref();
        let interval_minutes = match tracker {
            Some(tracker) => tracker.period().as_secs() / 60,
            None => u64::from(tracking.settings.tracking_interval()),
        };

        StatusReport {
            project_name: tracking.settings.project_name_for(&self.project_dir),
            project_dir: self.project_dir.display().to_string(),
            running: tracker.map(Tracker::is_running).unwrap_or(false),
            disabled_reason: tracking.disabled_reason.clone(),
            tracking_interval_minutes: interval_minutes,
            idle_time_policy: tracking.settings.idle_time_policy,
            submission_style: tracking.settings.submission_style,
            engine: tracker.map(Tracker::snapshot),
            activity: tracking.monitor.snapshot(),
            notifications: self.notifications.recent(),
        }
    }

    /// Re-reads settings, then stops the running tracker and starts a new one.
    /// A config that fails to load leaves the current tracker untouched.
    pub fn reload(&self) -> Result<StatusReport, ConfigError> {
        let _reload = match self.reload_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let settings = Settings::load(self.config_path.as_deref())?;
        tracing::info!(config = ?self.config_path, "Reloading settings");

        let (previous_tracker, previous_monitor) = {
            let mut tracking = self.lock_tracking();
            (tracking.tracker.take(), Arc::clone(&tracking.monitor))
        };
        if let Some(mut tracker) = previous_tracker {
            tracker.stop();
        }

        let monitor = build_monitor(&settings, &self.focus);
        monitor.inherit(&previous_monitor);
        let (tracker, disabled_reason) =
            start_tracking(&settings, &self.project_dir, &monitor, &self.notifications);

        self.install(
            Tracking {
                settings,
                monitor,
                tracker,
                disabled_reason,
            },
            &previous_monitor,
        );
        Ok(self.status())
    }

    /// Swaps in `next`, picking up activity that reached `previous` after the
    /// new monitor was built.
    fn install(&self, next: Tracking, previous: &ActivityMonitor) {
        let mut tracking = self.lock_tracking();
        next.monitor.inherit(previous);
        *tracking = next;
    }

    /// Stops the worker; used on shutdown. Waits for a reload in progress.
    pub fn shutdown(&self) {
        let _reload = match self.reload_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let tracker = self.lock_tracking().tracker.take();
        if let Some(mut tracker) = tracker {
            tracker.stop();
        }
    }

    fn lock_tracking(&self) -> MutexGuard<'_, Tracking> {
        match self.tracking.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn build_monitor(settings: &Settings, focus: &Arc<ReportedFocus>) -> Arc<ActivityMonitor> {
    Arc::new(ActivityMonitor::new(
        Arc::new(SystemClock),
        Arc::clone(focus) as _,
        settings.activity_timeout_minutes,
    ))
}

fn start_tracking(
    settings: &Settings,
    project_dir: &Path,
    monitor: &Arc<ActivityMonitor>,
    notifications: &Arc<NotificationLog>,
) -> (Option<Tracker>, Option<String>) {
    let started = Tracker::from_settings(
        settings,
        project_dir,
        Arc::clone(monitor),
        Arc::clone(notifications) as _,
    )
    .and_then(|mut tracker| {
        tracker.start()?;
        Ok(tracker)
    });

    match started {
        Ok(tracker) => {
            tracing::info!(project = %project_dir.display(), "Time tracking enabled");
            (Some(tracker), None)
        }
        Err(err) => {
            tracing::warn!(error = %err, "Time tracking not started");
            (None, Some(err.to_string()))
        }
    }
}
