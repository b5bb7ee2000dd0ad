//! Backend submission of completed intervals.
//!
//! One blocking POST per interval with a bounded timeout. Every failure mode
//! (transport, timeout, non-2xx) folds into `false` so the engine's
//! retry-by-accumulation applies uniformly; nothing escapes this boundary.

use chrono::{Local, NaiveDateTime, SubsecRound};
use reqwest::blocking::{Client, RequestBuilder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Settings, SubmissionStyle};
use crate::error::TrackerError;
use crate::notify::{Notification, NotificationLevel, Notifier};
use crate::types::TimeInterval;

const BEARER_DEFAULT_DESCRIPTION: &str = "Auto-tracked via Chrontic";

pub trait SubmissionClient: Send + Sync {
    /// `true` only on a 2xx acknowledgement.
    fn submit(&self, interval: &TimeInterval) -> bool;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Request Styles
// ═══════════════════════════════════════════════════════════════════════════════

trait RequestStyle: Send + Sync {
    fn path(&self) -> &'static str;
    fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder;
    fn body(&self, interval: &TimeInterval) -> serde_json::Result<serde_json::Value>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PluginTimeEntry<'a> {
    start_time: NaiveDateTime,
    end_time: NaiveDateTime,
    hours_worked: f64,
    description: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TicketTimeEntry<'a> {
    jira_ticket: &'a str,
    start_time: NaiveDateTime,
    duration: i64,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<i64>,
}

struct ApiKeyStyle;

impl RequestStyle for ApiKeyStyle {
    fn path(&self) -> &'static str {
        "/api/time-entries/plugin"
    }

    fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        request.header("X-API-Key", api_key)
    }

    fn body(&self, interval: &TimeInterval) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(PluginTimeEntry {
            start_time: local_time(interval.start_time),
            end_time: local_time(interval.end_time),
            hours_worked: interval.hours_worked,
            description: &interval.description,
        })
    }
}

struct BearerStyle {
    user_id: Option<i64>,
    project_id: Option<i64>,
}

impl RequestStyle for BearerStyle {
    fn path(&self) -> &'static str {
        "/api/time-entries"
    }

    fn authorize(&self, request: RequestBuilder, api_key: &str) -> RequestBuilder {
        request.bearer_auth(api_key)
    }

    fn body(&self, interval: &TimeInterval) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(TicketTimeEntry {
            jira_ticket: &interval.description,
            start_time: local_time(interval.start_time),
            duration: interval.duration_minutes(),
            description: BEARER_DEFAULT_DESCRIPTION,
            user_id: self.user_id,
            project_id: self.project_id,
        })
    }
}

/// Wire timestamps are local date-times without an offset.
fn local_time(value: chrono::DateTime<chrono::Utc>) -> NaiveDateTime {
    value.with_timezone(&Local).naive_local().trunc_subsecs(0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP Client
// ═══════════════════════════════════════════════════════════════════════════════

pub struct HttpSubmissionClient {
    client: Client,
    base_url: String,
    api_key: String,
    style: Box<dyn RequestStyle>,
    notifier: Arc<dyn Notifier>,
}

impl HttpSubmissionClient {
    /// Fails when the credential is blank: submission stays disabled until
    /// settings change.
    pub fn new(settings: &Settings, notifier: Arc<dyn Notifier>) -> Result<Self, TrackerError> {
        let api_key = settings.require_credential()?.to_string();
        let timeout = Duration::from_secs(settings.request_timeout_secs.max(1));
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(TrackerError::HttpClient)?;

        let style: Box<dyn RequestStyle> = match settings.submission_style {
            SubmissionStyle::ApiKey => Box::new(ApiKeyStyle),
            SubmissionStyle::Bearer => Box::new(BearerStyle {
                user_id: settings.user_id,
                project_id: settings.project_id,
            }),
        };

        Ok(Self {
            client,
            base_url: settings.api_base_url.trim().trim_end_matches('/').to_string(),
            api_key,
            style,
            notifier,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.style.path())
    }
}

impl SubmissionClient for HttpSubmissionClient {
    fn submit(&self, interval: &TimeInterval) -> bool {
        let minutes = interval.duration_minutes();
        let body = match self.style.body(interval) {
            Ok(body) => body,
            Err(err) => {
                tracing::error!(error = %err, "Failed to serialize time entry");
                return false;
            }
        };
        let request = self.client.post(self.endpoint()).json(&body);
        let request = self.style.authorize(request, &self.api_key);

        tracing::info!(
            description = %interval.description,
            hours_worked = interval.hours_worked,
            "Creating time entry"
        );

        match request.send() {
            Ok(response) if response.status().is_success() => {
                tracing::info!(
                    status = response.status().as_u16(),
                    minutes,
                    description = %interval.description,
                    "Time entry created"
                );
                self.notifier.notify(Notification::new(
                    NotificationLevel::Info,
                    "Time Entry Recorded",
                    format!("Tracked {} min for: {}", minutes, interval.description),
                ));
                true
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().unwrap_or_default();
                tracing::error!(status, body = %body, "Failed to create time entry");
                self.notifier.notify(Notification::new(
                    NotificationLevel::Error,
                    "Time Entry Failed",
                    format!("Failed to record time entry. Status: {}", status),
                ));
                false
            }
            Err(err) => {
                tracing::error!(error = %err, timeout = err.is_timeout(), "Error creating time entry");
                self.notifier.notify(Notification::new(
                    NotificationLevel::Error,
                    "Time Entry Error",
                    format!("Error recording time entry: {}", err),
                ));
                false
            }
        }
    }
}
