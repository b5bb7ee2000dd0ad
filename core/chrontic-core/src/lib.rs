//! # chrontic-core
//!
//! Core library for Chrontic: measures work time inside a git checkout by
//! attributing elapsed wall-clock time to the current branch (or the ticket
//! embedded in its name), gated by evidence of real user activity.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The scheduler is a single
//!   worker thread; submissions block it for at most the request timeout.
//! - **Fail soft**: VCS, focus and network failures degrade a single tick,
//!   never the engine.
//! - **No double counting**: `last_tick` advances only once a submission is
//!   acknowledged, so failed submissions are retried by accumulation.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chrontic_core::{ActivityMonitor, ReportedFocus, Settings, SystemClock, TracingNotifier, Tracker};
//! use std::sync::Arc;
//!
//! let settings = Settings::load(None)?;
//! let monitor = Arc::new(ActivityMonitor::new(
//!     Arc::new(SystemClock),
//!     Arc::new(ReportedFocus::new()),
//!     settings.activity_timeout_minutes,
//! ));
//! let mut tracker =
//!     Tracker::from_settings(&settings, project_dir, monitor, Arc::new(TracingNotifier))?;
//! tracker.start()?;
//! tracker.monitor().record_activity();
//! ```

pub mod activity;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod notify;
pub mod patterns;
pub mod scheduler;
pub mod submission;
pub mod types;

pub use activity::{
    ActivityEvent, ActivityKind, ActivityMonitor, ActivityOrigin, ActivitySnapshot, AlwaysFocused,
    FocusProbe, ReportedFocus,
};
pub use clock::{Clock, SystemClock};
pub use config::{IdleTimePolicy, Settings, SubmissionStyle};
pub use engine::{describe, EngineSnapshot, TickOutcome, TrackingEngine, FALLBACK_DESCRIPTION};
pub use error::{ConfigError, FocusError, IdentityError, TrackerError};
pub use identity::{BranchSource, GitHeadReader, IdentityResolver, TicketPattern};
pub use notify::{Notification, NotificationLevel, NotificationLog, Notifier, TracingNotifier};
pub use scheduler::Tracker;
pub use submission::{HttpSubmissionClient, SubmissionClient};
pub use types::{BranchState, TimeInterval, TrackingSession, WorkIdentity};
