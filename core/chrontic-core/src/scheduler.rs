//! Fixed-delay driver for the tracking engine.
//!
//! A single named worker thread owns the engine. The first tick runs
//! immediately; each following tick starts one full period after the previous
//! one finished, so a slow submission stretches the schedule instead of
//! stacking ticks. Stopping flips the engine's cancellation flag, wakes the
//! worker and joins it; a tick blocked on the network finishes first and its
//! result is discarded.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::activity::ActivityMonitor;
use crate::clock::SystemClock;
use crate::config::Settings;
use crate::engine::{EngineSnapshot, TrackingEngine};
use crate::error::TrackerError;
use crate::identity::{GitHeadReader, IdentityResolver};
use crate::notify::Notifier;
use crate::submission::HttpSubmissionClient;

const WORKER_THREAD_NAME: &str = "chrontic-tracker";

struct Worker {
    wake: Sender<()>,
    handle: JoinHandle<TrackingEngine>,
}

pub struct Tracker {
    period: Duration,
    monitor: Arc<ActivityMonitor>,
    cancelled: Arc<AtomicBool>,
    status: Arc<RwLock<EngineSnapshot>>,
    idle: Option<TrackingEngine>,
    worker: Option<Worker>,
}

impl Tracker {
    pub fn new(engine: TrackingEngine, monitor: Arc<ActivityMonitor>, period: Duration) -> Self {
        Self {
            period,
            monitor,
            cancelled: engine.cancellation(),
            status: Arc::new(RwLock::new(engine.snapshot())),
            idle: Some(engine),
            worker: None,
        }
    }

    /// Wires the production engine: git HEAD for identity, HTTP for
    /// submission, wall clock for time. Refuses when auto tracking is off or
    /// the credential is missing.
    pub fn from_settings(
        settings: &Settings,
        project_dir: &Path,
        monitor: Arc<ActivityMonitor>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, TrackerError> {
        if !settings.enable_auto_tracking {
            return Err(TrackerError::AutoTrackingDisabled);
        }
        settings.validate()?;

        let submitter = Arc::new(HttpSubmissionClient::new(settings, notifier)?);
        let resolver = IdentityResolver::new(
            Box::new(GitHeadReader::new(project_dir)),
            settings.ticket_pattern()?,
        );
        let engine = TrackingEngine::new(
            Arc::new(SystemClock),
            Arc::clone(&monitor),
            resolver,
            submitter,
            settings.project_name_for(project_dir),
        )
        .with_idle_policy(settings.idle_time_policy);

        let period = Duration::from_secs(u64::from(settings.tracking_interval()) * 60);
        Ok(Self::new(engine, monitor, period))
    }

    pub fn start(&mut self) -> Result<(), TrackerError> {
        if self.worker.is_some() {
            return Err(TrackerError::AlreadyRunning);
        }
        let Some(engine) = self.idle.take() else {
            return Err(TrackerError::EngineLost);
        };

        self.cancelled.store(false, Ordering::SeqCst);
        let (wake, rx) = mpsc::channel();
        let period = self.period;
        let cancelled = Arc::clone(&self.cancelled);
        let status = Arc::clone(&self.status);

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(engine, period, rx, cancelled, status))
            .map_err(TrackerError::Spawn)?;

        tracing::info!(period_secs = self.period.as_secs(), "Time tracking started");
        self.worker = Some(Worker { wake, handle });
        Ok(())
    }

    /// Safe to call repeatedly and before `start`.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = worker.wake.send(());

        match worker.handle.join() {
            Ok(engine) => self.idle = Some(engine),
            Err(_) => tracing::error!("Tracking worker exited abnormally"),
        }
        tracing::info!("Time tracking stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn monitor(&self) -> &Arc<ActivityMonitor> {
        &self.monitor
    }

    /// State as of the last completed tick.
    pub fn snapshot(&self) -> EngineSnapshot {
        match self.status.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut engine: TrackingEngine,
    period: Duration,
    wake: Receiver<()>,
    cancelled: Arc<AtomicBool>,
    status: Arc<RwLock<EngineSnapshot>>,
) -> TrackingEngine {
    loop {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| engine.tick())) {
            Ok(outcome) => tracing::debug!(outcome = outcome.label(), "Tracking tick finished"),
            Err(_) => tracing::error!("Tracking tick panicked; continuing with next tick"),
        }
        publish(&status, engine.snapshot());

        match wake.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    engine
}

fn publish(status: &RwLock<EngineSnapshot>, snapshot: EngineSnapshot) {
    match status.write() {
        Ok(mut guard) => *guard = snapshot,
        Err(poisoned) => *poisoned.into_inner() = snapshot,
    }
}
