//! Transient user notifications for submission outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

const DEFAULT_LOG_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: &str, body: impl Into<String>) -> Self {
        Self {
            level,
            title: title.to_string(),
            body: body.into(),
            at: Utc::now(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        emit(&notification);
    }
}

/// Keeps the most recent notifications so a client can show them later.
#[derive(Debug)]
pub struct NotificationLog {
    capacity: usize,
    entries: Mutex<VecDeque<Notification>>,
}

impl NotificationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Newest last.
    pub fn recent(&self) -> Vec<Notification> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl Notifier for NotificationLog {
    fn notify(&self, notification: Notification) {
        emit(&notification);
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(notification);
        }
    }
}

fn emit(notification: &Notification) {
    match notification.level {
        NotificationLevel::Info => {
            tracing::info!(title = %notification.title, "{}", notification.body)
        }
        NotificationLevel::Warning => {
            tracing::warn!(title = %notification.title, "{}", notification.body)
        }
        NotificationLevel::Error => {
            tracing::error!(title = %notification.title, "{}", notification.body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_keeps_only_most_recent() {
        let log = NotificationLog::new(2);
        for body in ["one", "two", "three"] {
            log.notify(Notification::new(NotificationLevel::Info, "t", body));
        }
        let bodies: Vec<_> = log.recent().into_iter().map(|n| n.body).collect();
        assert_eq!(bodies, vec!["two", "three"]);
    }
}
