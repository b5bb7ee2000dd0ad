//! The tracking state machine.
//!
//! States are Idle (no session) and Tracking(session). Each tick:
//!
//! 1. Inactive user → nothing happens (under `IdleTimePolicy::Discard` the
//!    live session is dropped as well).
//! 2. No identity (no repo / no branch) → nothing happens.
//! 3. New or changed identity → fresh session baselined at `now`, no
//!    submission on this tick.
//! 4. Same identity, under a minute since `last_tick` → nothing happens.
//! 5. Otherwise submit `[last_tick, now]`; `last_tick` moves to `now` only
//!    if the backend acknowledged it. A failed submission is retried by the
//!    next tick's larger interval.
//!
//! The engine is owned by exactly one worker, so ticks never overlap.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::activity::ActivityMonitor;
use crate::clock::Clock;
use crate::config::IdleTimePolicy;
use crate::identity::IdentityResolver;
use crate::submission::SubmissionClient;
use crate::types::{TimeInterval, TrackingSession, WorkIdentity};

pub const FALLBACK_DESCRIPTION: &str = "Auto-tracked: branch name could not be determined";

const MIN_SUBMIT_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Inactive { session_dropped: bool },
    NoIdentity,
    SessionStarted { identity: WorkIdentity },
    BelowThreshold { elapsed_secs: i64 },
    Submitted(TimeInterval),
    SubmissionFailed(TimeInterval),
    /// The engine was torn down while the submission was in flight.
    Discarded,
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::Inactive { .. } => "inactive",
            TickOutcome::NoIdentity => "no_identity",
            TickOutcome::SessionStarted { .. } => "session_started",
            TickOutcome::BelowThreshold { .. } => "below_threshold",
            TickOutcome::Submitted(_) => "submitted",
            TickOutcome::SubmissionFailed(_) => "submission_failed",
            TickOutcome::Discarded => "discarded",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub identity: Option<WorkIdentity>,
    pub session_start: Option<DateTime<Utc>>,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<&'static str>,
    pub ticks: u64,
    pub submitted: u64,
    pub failed: u64,
    pub hours_submitted: f64,
}

/// Label priority: ticket, then `<project>_<branch>`, then a fixed fallback.
/// Blank values count as absent.
pub fn describe(ticket: Option<&str>, branch: Option<&str>, project_name: &str) -> String {
    if let Some(ticket) = present(ticket) {
        return ticket.to_string();
    }
    if let Some(branch) = present(branch) {
        return format!("{}_{}", project_name, branch);
    }
    FALLBACK_DESCRIPTION.to_string()
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct TrackingEngine {
    clock: Arc<dyn Clock>,
    monitor: Arc<ActivityMonitor>,
    resolver: IdentityResolver,
    submitter: Arc<dyn SubmissionClient>,
    project_name: String,
    idle_policy: IdleTimePolicy,
    cancelled: Arc<AtomicBool>,
    session: Option<TrackingSession>,
    stats: EngineSnapshot,
}

impl TrackingEngine {
    pub fn new(
        clock: Arc<dyn Clock>,
        monitor: Arc<ActivityMonitor>,
        resolver: IdentityResolver,
        submitter: Arc<dyn SubmissionClient>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            clock,
            monitor,
            resolver,
            submitter,
            project_name: project_name.into(),
            idle_policy: IdleTimePolicy::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            session: None,
            stats: EngineSnapshot::default(),
        }
    }

    pub fn with_idle_policy(mut self, policy: IdleTimePolicy) -> Self {
        self.idle_policy = policy;
        self
    }

    /// Flag checked after each submission; set by the scheduler on stop.
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn session(&self) -> Option<&TrackingSession> {
        self.session.as_ref()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let mut snapshot = self.stats.clone();
        if let Some(session) = &self.session {
            snapshot.identity = Some(session.identity.clone());
            snapshot.session_start = Some(session.session_start);
            snapshot.last_tick = Some(session.last_tick);
        } else {
            snapshot.identity = None;
            snapshot.session_start = None;
            snapshot.last_tick = None;
        }
        snapshot
    }

    pub fn tick(&mut self) -> TickOutcome {
        let now = self.clock.now();
        let outcome = self.advance(now);

        self.stats.ticks += 1;
        self.stats.last_tick_at = Some(now);
        self.stats.last_outcome = Some(outcome.label());
        match &outcome {
            TickOutcome::Submitted(interval) => {
                self.stats.submitted += 1;
                self.stats.hours_submitted += interval.hours_worked;
            }
            TickOutcome::SubmissionFailed(_) => self.stats.failed += 1,
            _ => {}
        }
        outcome
    }

    fn advance(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if !self.monitor.is_active() {
            let session_dropped =
                self.idle_policy == IdleTimePolicy::Discard && self.session.take().is_some();
            tracing::info!(
                minutes_since_last_activity = ?self.monitor.minutes_since_last_activity(),
                session_dropped,
                "Project not actively worked on, skipping time tracking"
            );
            return TickOutcome::Inactive { session_dropped };
        }

        let branch_state = self.resolver.observe();
        let Some(identity) = branch_state.identity() else {
            tracing::info!("No ticket or branch found, skipping time tracking");
            return TickOutcome::NoIdentity;
        };

        let session = match &mut self.session {
            Some(session) if session.identity == identity => session,
            slot => {
                tracing::info!(
                    %identity,
                    previous = ?slot.as_ref().map(|s| s.identity.as_str()),
                    "Starting time tracking"
                );
                *slot = Some(TrackingSession::start(identity.clone(), now));
                return TickOutcome::SessionStarted { identity };
            }
        };

        let elapsed = now.signed_duration_since(session.last_tick);
        if elapsed < Duration::seconds(MIN_SUBMIT_SECS) {
            tracing::debug!(elapsed_secs = elapsed.num_seconds(), "Less than a minute since last tick");
            return TickOutcome::BelowThreshold {
                elapsed_secs: elapsed.num_seconds(),
            };
        }

        let description = describe(
            branch_state.ticket.as_deref(),
            branch_state.branch.as_deref(),
            &self.project_name,
        );
        let Some(interval) = TimeInterval::new(session.last_tick, now, &description) else {
            tracing::warn!(%description, "Refusing to build an empty interval");
            return TickOutcome::BelowThreshold {
                elapsed_secs: elapsed.num_seconds(),
            };
        };

        let accepted = self.submitter.submit(&interval);

        if self.cancelled.load(Ordering::SeqCst) {
            // The backend already holds an accepted interval; only the report is dropped.
            if accepted {
                session.last_tick = now;
            }
            tracing::info!(accepted, "Tracker stopped during submission; discarding result");
            return TickOutcome::Discarded;
        }

        if accepted {
            session.last_tick = now;
            tracing::info!(
                minutes = interval.duration_minutes(),
                %identity,
                "Successfully tracked time"
            );
            TickOutcome::Submitted(interval)
        } else {
            tracing::warn!(
                %identity,
                pending_since = %session.last_tick,
                "Failed to track time; interval will be retried on the next tick"
            );
            TickOutcome::SubmissionFailed(interval)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ReportedFocus;
    use crate::clock::testing::ManualClock;
    use crate::error::IdentityError;
    use crate::identity::{BranchSource, TicketPattern};
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct SwitchableBranch(Arc<Mutex<Option<String>>>);

    impl BranchSource for SwitchableBranch {
        fn current_branch(&self) -> Result<Option<String>, IdentityError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingSubmitter {
        results: Mutex<VecDeque<bool>>,
        attempts: Mutex<Vec<TimeInterval>>,
        cancel_on_submit: Mutex<Option<Arc<AtomicBool>>>,
    }

    impl RecordingSubmitter {
        fn fail_next(&self, count: usize) {
            let mut results = self.results.lock().unwrap();
            for _ in 0..count {
                results.push_back(false);
            }
        }

        fn attempts(&self) -> Vec<TimeInterval> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl SubmissionClient for RecordingSubmitter {
        fn submit(&self, interval: &TimeInterval) -> bool {
            self.attempts.lock().unwrap().push(interval.clone());
            if let Some(flag) = self.cancel_on_submit.lock().unwrap().as_ref() {
                flag.store(true, Ordering::SeqCst);
            }
            self.results.lock().unwrap().pop_front().unwrap_or(true)
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        branch: Arc<Mutex<Option<String>>>,
        focus: Arc<ReportedFocus>,
        submitter: Arc<RecordingSubmitter>,
        engine: TrackingEngine,
    }

    impl Harness {
        fn new(branch: Option<&str>) -> Self {
            Self::with_policy(branch, IdleTimePolicy::Count)
        }

        fn with_policy(branch: Option<&str>, policy: IdleTimePolicy) -> Self {
            let clock = Arc::new(ManualClock::new(t0()));
            let branch = Arc::new(Mutex::new(branch.map(str::to_string)));
            let focus = Arc::new(ReportedFocus::new());
            let monitor = Arc::new(ActivityMonitor::new(clock.clone(), focus.clone(), 5));
            let resolver = IdentityResolver::new(
                Box::new(SwitchableBranch(Arc::clone(&branch))),
                TicketPattern::default(),
            );
            let submitter = Arc::new(RecordingSubmitter::default());
            let engine = TrackingEngine::new(
                clock.clone(),
                monitor,
                resolver,
                submitter.clone(),
                "MyProject",
            )
            .with_idle_policy(policy);
            Self {
                clock,
                branch,
                focus,
                submitter,
                engine,
            }
        }

        fn checkout(&self, branch: Option<&str>) {
            *self.branch.lock().unwrap() = branch.map(str::to_string);
        }

        fn tick_after(&mut self, minutes: i64) -> TickOutcome {
            self.clock.advance_minutes(minutes);
            self.engine.tick()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(m)
    }

    #[test]
    fn first_tick_only_establishes_baseline() {
        let mut h = Harness::new(Some("feature/PROJ-123-new-feature"));
        let outcome = h.engine.tick();
        assert_eq!(
            outcome,
            TickOutcome::SessionStarted {
                identity: WorkIdentity::new("PROJ-123").unwrap()
            }
        );
        assert!(h.submitter.attempts().is_empty());
        let session = h.engine.session().expect("session");
        assert_eq!(session.session_start, t0());
        assert_eq!(session.last_tick, t0());
    }

    #[test]
    fn second_tick_submits_interval() {
        let mut h = Harness::new(Some("feature/PROJ-123-new-feature"));
        h.engine.tick();
        let outcome = h.tick_after(15);

        let TickOutcome::Submitted(interval) = outcome else {
            panic!("expected submission");
        };
        assert_eq!(interval.start_time, t0());
        assert_eq!(interval.end_time, minutes(15));
        assert_eq!(interval.hours_worked, 0.25);
        assert_eq!(interval.description, "PROJ-123");
        assert_eq!(h.engine.session().unwrap().last_tick, minutes(15));
    }

    #[test]
    fn failed_submission_is_retried_by_accumulation() {
        let mut h = Harness::new(Some("feature/PROJ-123-new-feature"));
        h.engine.tick();
        h.submitter.fail_next(1);

        let failed = h.tick_after(15);
        assert!(matches!(failed, TickOutcome::SubmissionFailed(_)));
        assert_eq!(h.engine.session().unwrap().last_tick, t0());

        let TickOutcome::Submitted(interval) = h.tick_after(15) else {
            panic!("expected submission");
        };
        assert_eq!(interval.start_time, t0());
        assert_eq!(interval.end_time, minutes(30));
        assert_eq!(interval.hours_worked, 0.5);
        assert_eq!(h.submitter.attempts().len(), 2);
    }

    #[test]
    fn identity_switch_never_submits_on_the_same_tick() {
        let mut h = Harness::new(Some("PROJ-123-work"));
        h.engine.tick();
        assert!(matches!(h.tick_after(15), TickOutcome::Submitted(_)));

        h.checkout(Some("PROJ-456-other"));
        let outcome = h.tick_after(15);
        assert_eq!(
            outcome,
            TickOutcome::SessionStarted {
                identity: WorkIdentity::new("PROJ-456").unwrap()
            }
        );
        assert_eq!(h.submitter.attempts().len(), 1);
        assert_eq!(h.engine.session().unwrap().last_tick, minutes(30));

        let TickOutcome::Submitted(interval) = h.tick_after(15) else {
            panic!("expected submission");
        };
        assert_eq!(interval.description, "PROJ-456");
        assert_eq!(interval.start_time, minutes(30));
    }

    #[test]
    fn branch_fallback_is_prefixed_with_project() {
        let mut h = Harness::new(Some("feature/add-auth"));
        assert_eq!(
            h.engine.tick(),
            TickOutcome::SessionStarted {
                identity: WorkIdentity::new("feature/add-auth").unwrap()
            }
        );
        let TickOutcome::Submitted(interval) = h.tick_after(15) else {
            panic!("expected submission");
        };
        assert_eq!(interval.description, "MyProject_feature/add-auth");
    }

    #[test]
    fn switching_between_ticket_and_plain_branches() {
        let mut h = Harness::new(Some("feature/PROJ-123-feature"));
        h.engine.tick();
        h.tick_after(15);
        h.checkout(Some("hotfix/urgent-fix"));
        assert!(matches!(h.tick_after(15), TickOutcome::SessionStarted { .. }));
        let TickOutcome::Submitted(interval) = h.tick_after(15) else {
            panic!("expected submission");
        };
        assert_eq!(interval.description, "MyProject_hotfix/urgent-fix");
        assert_eq!(h.submitter.attempts().len(), 2);
    }

    #[test]
    fn missing_branch_is_a_no_op() {
        let mut h = Harness::new(None);
        assert_eq!(h.engine.tick(), TickOutcome::NoIdentity);
        assert_eq!(h.tick_after(15), TickOutcome::NoIdentity);
        assert!(h.engine.session().is_none());
        assert!(h.submitter.attempts().is_empty());
    }

    #[test]
    fn missing_branch_keeps_existing_session_untouched() {
        let mut h = Harness::new(Some("PROJ-1-x"));
        h.engine.tick();
        h.checkout(None);
        assert_eq!(h.tick_after(15), TickOutcome::NoIdentity);
        assert_eq!(h.engine.session().unwrap().last_tick, t0());

        h.checkout(Some("PROJ-1-x"));
        let TickOutcome::Submitted(interval) = h.tick_after(15) else {
            panic!("expected submission");
        };
        assert_eq!(interval.hours_worked, 0.5);
    }

    #[test]
    fn inactive_tick_never_submits() {
        let mut h = Harness::new(Some("PROJ-1-x"));
        h.engine.tick();
        h.focus.set(false);
        for _ in 0..4 {
            assert_eq!(
                h.tick_after(15),
                TickOutcome::Inactive {
                    session_dropped: false
                }
            );
        }
        assert!(h.submitter.attempts().is_empty());
        assert_eq!(h.engine.session().unwrap().last_tick, t0());
    }

    #[test]
    fn count_policy_includes_idle_gap_once_work_resumes() {
        let mut h = Harness::new(Some("PROJ-1-x"));
        h.engine.tick();
        h.focus.set(false);
        h.tick_after(15);
        h.focus.set(true);

        let TickOutcome::Submitted(interval) = h.tick_after(15) else {
            panic!("expected submission");
        };
        assert_eq!(interval.start_time, t0());
        assert_eq!(interval.hours_worked, 0.5);
    }

    #[test]
    fn discard_policy_rebaselines_after_idle() {
        let mut h = Harness::with_policy(Some("PROJ-1-x"), IdleTimePolicy::Discard);
        h.engine.tick();
        h.focus.set(false);
        assert_eq!(
            h.tick_after(15),
            TickOutcome::Inactive {
                session_dropped: true
            }
        );
        assert!(h.engine.session().is_none());

        h.focus.set(true);
        assert!(matches!(h.tick_after(15), TickOutcome::SessionStarted { .. }));
        let TickOutcome::Submitted(interval) = h.tick_after(15) else {
            panic!("expected submission");
        };
        assert_eq!(interval.start_time, minutes(30));
        assert_eq!(interval.hours_worked, 0.25);
    }

    #[test]
    fn sub_minute_ticks_accumulate() {
        let mut h = Harness::new(Some("PROJ-1-x"));
        h.engine.tick();
        h.clock.advance(Duration::seconds(40));
        assert_eq!(
            h.engine.tick(),
            TickOutcome::BelowThreshold { elapsed_secs: 40 }
        );
        assert_eq!(h.engine.session().unwrap().last_tick, t0());

        h.clock.advance(Duration::seconds(20));
        let TickOutcome::Submitted(interval) = h.engine.tick() else {
            panic!("expected submission");
        };
        assert_eq!(interval.start_time, t0());
        assert_eq!(interval.end_time, minutes(1));
    }

    #[test]
    fn stable_identity_sums_exactly() {
        let mut h = Harness::new(Some("PROJ-7-x"));
        h.engine.tick();
        let delay = 15;
        let n = 8;
        for _ in 0..n {
            assert!(matches!(h.tick_after(delay), TickOutcome::Submitted(_)));
        }
        let attempts = h.submitter.attempts();
        let total: f64 = attempts.iter().map(|i| i.hours_worked).sum();
        assert_eq!(total, n as f64 * delay as f64 / 60.0);
        for pair in attempts.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time, "no gaps or overlaps");
        }
        let snapshot = h.engine.snapshot();
        assert_eq!(snapshot.submitted, n);
        assert_eq!(snapshot.ticks, n + 1);
    }

    #[test]
    fn accepted_submission_finishing_after_stop_keeps_its_time() {
        let mut h = Harness::new(Some("PROJ-1-x"));
        h.engine.tick();
        *h.submitter.cancel_on_submit.lock().unwrap() = Some(h.engine.cancellation());

        assert_eq!(h.tick_after(15), TickOutcome::Discarded);
        assert_eq!(h.engine.session().unwrap().last_tick, minutes(15));
        assert_eq!(h.engine.snapshot().submitted, 0);

        // Restart: the same engine with the flag cleared.
        *h.submitter.cancel_on_submit.lock().unwrap() = None;
        h.engine.cancellation().store(false, Ordering::SeqCst);

        let TickOutcome::Submitted(interval) = h.tick_after(15) else {
            panic!("expected submission");
        };
        assert_eq!(interval.start_time, minutes(15));
        assert_eq!(interval.end_time, minutes(30));

        let attempts = h.submitter.attempts();
        let total: f64 = attempts.iter().map(|i| i.hours_worked).sum();
        assert_eq!(total, 0.5);
        assert_eq!(attempts[0].end_time, attempts[1].start_time);
    }

    #[test]
    fn rejected_submission_finishing_after_stop_is_retried_later() {
        let mut h = Harness::new(Some("PROJ-1-x"));
        h.engine.tick();
        h.submitter.fail_next(1);
        *h.submitter.cancel_on_submit.lock().unwrap() = Some(h.engine.cancellation());

        assert_eq!(h.tick_after(15), TickOutcome::Discarded);
        assert_eq!(h.engine.session().unwrap().last_tick, t0());

        *h.submitter.cancel_on_submit.lock().unwrap() = None;
        h.engine.cancellation().store(false, Ordering::SeqCst);

        let TickOutcome::Submitted(interval) = h.tick_after(15) else {
            panic!("expected submission");
        };
        assert_eq!(interval.start_time, t0());
        assert_eq!(interval.hours_worked, 0.5);
    }

    #[test]
    fn describe_priority_handles_blank_values() {
        assert_eq!(describe(Some("PROJ-1"), Some("b"), "P"), "PROJ-1");
        assert_eq!(describe(Some("  "), Some("feature/x"), "P"), "P_feature/x");
        assert_eq!(describe(None, Some("feature/x"), "P"), "P_feature/x");
        assert_eq!(describe(None, Some(" \t"), "P"), FALLBACK_DESCRIPTION);
        assert_eq!(describe(Some(""), None, "P"), FALLBACK_DESCRIPTION);
    }
}
