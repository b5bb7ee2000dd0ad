//! Settings loading and saving.
//!
//! Settings live in `~/.chrontic/config.toml` (or `$CHRONTIC_CONFIG`). A
//! missing file means defaults; a malformed one is an error the caller
//! reports. `CHRONTIC_API_KEY` and `CHRONTIC_API_BASE_URL` override the file
//! so credentials can stay out of it.

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::identity::TicketPattern;
use crate::patterns::DEFAULT_TICKET_REGEX;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".chrontic/config.toml";
const CONFIG_ENV: &str = "CHRONTIC_CONFIG";
const API_KEY_ENV: &str = "CHRONTIC_API_KEY";
const API_BASE_URL_ENV: &str = "CHRONTIC_API_BASE_URL";

pub const MIN_TRACKING_INTERVAL_MINUTES: u32 = 1;
pub const MAX_TRACKING_INTERVAL_MINUTES: u32 = 60;

/// How request headers and body are shaped for the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionStyle {
    /// `X-API-Key` header, start/end/hours body.
    #[default]
    ApiKey,
    /// `Authorization: Bearer`, ticket/duration body.
    Bearer,
}

/// What an inactive tick does to the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleTimePolicy {
    /// Leave the session alone; once work resumes the next submission covers
    /// the idle gap too.
    #[default]
    Count,
    /// Drop the session; the next active tick starts a fresh baseline.
    Discard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_base_url: String,
    pub api_key: String,
    pub tracking_interval_minutes: u32,
    pub activity_timeout_minutes: u32,
    pub enable_auto_tracking: bool,
    pub ticket_regex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub submission_style: SubmissionStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    pub request_timeout_secs: u64,
    pub idle_time_policy: IdleTimePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8086".to_string(),
            api_key: String::new(),
            tracking_interval_minutes: 15,
            activity_timeout_minutes: 5,
            enable_auto_tracking: true,
            ticket_regex: DEFAULT_TICKET_REGEX.to_string(),
            project_name: None,
            submission_style: SubmissionStyle::ApiKey,
            user_id: None,
            project_id: None,
            request_timeout_secs: 30,
            idle_time_policy: IdleTimePolicy::Count,
        }
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

impl Settings {
    /// Reads the file (defaults when missing) and applies env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::load_file(path)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// File contents only, without env overrides. Used when rewriting the
    /// file so overrides never leak into it.
    pub fn load_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        toml::from_str::<Settings>(&content).map_err(|source| ConfigError::Parse {
            path: config_path,
            source,
        })
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        let write_err = |source| ConfigError::Write {
            path: config_path.clone(),
            source,
        };

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let payload = toml::to_string_pretty(self)?;
        let tmp_path = config_path.with_extension("toml.tmp");
        fs::write(&tmp_path, payload).map_err(write_err)?;
        fs::rename(&tmp_path, &config_path).map_err(write_err)?;
        Ok(config_path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var(API_KEY_ENV) {
            if !value.trim().is_empty() {
                self.api_key = value;
            }
        }
        if let Ok(value) = env::var(API_BASE_URL_ENV) {
            if !value.trim().is_empty() {
                self.api_base_url = value;
            }
        }
    }

    /// Checks everything that would otherwise fail on the first tick.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ticket_pattern()?;
        let url = self.api_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(self.api_base_url.clone()));
        }
        Ok(())
    }

    /// Blank credential disables submission entirely.
    pub fn require_credential(&self) -> Result<&str, ConfigError> {
        let key = self.api_key.trim();
        if key.is_empty() {
            Err(ConfigError::MissingCredential)
        } else {
            Ok(key)
        }
    }

    pub fn ticket_pattern(&self) -> Result<TicketPattern, ConfigError> {
        TicketPattern::new(&self.ticket_regex)
    }

    /// Tick period clamped into the supported 1–60 minute range.
    pub fn tracking_interval(&self) -> u32 {
        let clamped = self
            .tracking_interval_minutes
            .clamp(MIN_TRACKING_INTERVAL_MINUTES, MAX_TRACKING_INTERVAL_MINUTES);
        if clamped != self.tracking_interval_minutes {
            tracing::warn!(
                configured = self.tracking_interval_minutes,
                effective = clamped,
                "Tracking interval out of range; clamping"
            );
        }
        clamped
    }

    /// Explicit setting, else the project directory's name.
    pub fn project_name_for(&self, project_dir: &Path) -> String {
        if let Some(name) = self
            .project_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            return name.to_string();
        }
        project_dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
    }

    /// Copy safe to print or send over IPC.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api_key.is_empty() {
            copy.api_key = "********".to_string();
        }
        copy
    }

    /// Sets one key by its file name (camelCase), parsing the value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let optional = |value: &str| {
            let trimmed = value.trim();
            if trimmed.is_empty() || trimmed == "none" {
                None
            } else {
                Some(trimmed.to_string())
            }
        };

        match key {
            "apiBaseUrl" => self.api_base_url = value.trim().to_string(),
            "apiKey" => self.api_key = value.to_string(),
            "trackingIntervalMinutes" => {
                let minutes: u32 = value.trim().parse().map_err(|_| invalid())?;
                if !(MIN_TRACKING_INTERVAL_MINUTES..=MAX_TRACKING_INTERVAL_MINUTES)
                    .contains(&minutes)
                {
                    return Err(invalid());
                }
                self.tracking_interval_minutes = minutes;
            }
            "activityTimeoutMinutes" => {
                self.activity_timeout_minutes = value.trim().parse().map_err(|_| invalid())?
            }
            "enableAutoTracking" => {
                self.enable_auto_tracking = value.trim().parse().map_err(|_| invalid())?
            }
            "ticketRegex" => {
                TicketPattern::new(value.trim())?;
                self.ticket_regex = value.trim().to_string();
            }
            "projectName" => self.project_name = optional(value),
            "submissionStyle" => {
                self.submission_style = match value.trim() {
                    "apiKey" => SubmissionStyle::ApiKey,
                    "bearer" => SubmissionStyle::Bearer,
                    _ => return Err(invalid()),
                }
            }
            "userId" => {
                self.user_id = optional(value)
                    .map(|v| v.parse().map_err(|_| invalid()))
                    .transpose()?
            }
            "projectId" => {
                self.project_id = optional(value)
                    .map(|v| v.parse().map_err(|_| invalid()))
                    .transpose()?
            }
            "requestTimeoutSecs" => {
                let secs: u64 = value.trim().parse().map_err(|_| invalid())?;
                if secs == 0 {
                    return Err(invalid());
                }
                self.request_timeout_secs = secs;
            }
            "idleTimePolicy" => {
                self.idle_time_policy = match value.trim() {
                    "count" => IdleTimePolicy::Count,
                    "discard" => IdleTimePolicy::Discard,
                    _ => return Err(invalid()),
                }
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.api_base_url, "http://localhost:8086");
        assert_eq!(settings.api_key, "");
        assert_eq!(settings.tracking_interval_minutes, 15);
        assert_eq!(settings.activity_timeout_minutes, 5);
        assert!(settings.enable_auto_tracking);
        assert_eq!(settings.ticket_regex, r"([A-Z]{2,10}-\d+)");
        assert_eq!(settings.submission_style, SubmissionStyle::ApiKey);
        assert_eq!(settings.idle_time_policy, IdleTimePolicy::Count);
        assert_eq!(settings.request_timeout_secs, 30);
    }

    #[test]
    fn load_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let settings = Settings::load_file(Some(&path)).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn load_parses_partial_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
apiBaseUrl = "https://time.example.com"
apiKey = "secret"
trackingIntervalMinutes = 30
submissionStyle = "bearer"
userId = 7
idleTimePolicy = "discard"
"#,
        )
        .expect("write config");

        let settings = Settings::load_file(Some(&path)).expect("load");
        assert_eq!(settings.api_base_url, "https://time.example.com");
        assert_eq!(settings.api_key, "secret");
        assert_eq!(settings.tracking_interval_minutes, 30);
        assert_eq!(settings.submission_style, SubmissionStyle::Bearer);
        assert_eq!(settings.user_id, Some(7));
        assert_eq!(settings.idle_time_policy, IdleTimePolicy::Discard);
        assert_eq!(settings.activity_timeout_minutes, 5);
        assert!(settings.enable_auto_tracking);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "trackingIntervalMinutes = \"soon\"").expect("write config");
        assert!(matches!(
            Settings::load_file(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.api_key = "custom-key".to_string();
        settings.tracking_interval_minutes = 45;
        settings.enable_auto_tracking = false;
        settings.ticket_regex = r"(CUSTOM-\d+)".to_string();

        settings.save(Some(&path)).expect("save");
        let loaded = Settings::load_file(Some(&path)).expect("load");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn tracking_interval_is_clamped() {
        let mut settings = Settings::default();
        for (configured, effective) in [(0, 1), (1, 1), (15, 15), (60, 60), (90, 60)] {
            settings.tracking_interval_minutes = configured;
            assert_eq!(settings.tracking_interval(), effective);
        }
    }

    #[test]
    fn validate_rejects_bad_regex_and_url() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.ticket_regex = "([A-Z".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidTicketPattern { .. })
        ));

        settings.ticket_regex = DEFAULT_TICKET_REGEX.to_string();
        settings.api_base_url = "localhost:8086".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn blank_credential_is_missing() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.require_credential(),
            Err(ConfigError::MissingCredential)
        ));
        settings.api_key = "   ".to_string();
        assert!(settings.require_credential().is_err());
        settings.api_key = "key".to_string();
        assert_eq!(settings.require_credential().unwrap(), "key");
    }

    #[test]
    fn project_name_falls_back_to_directory() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.project_name_for(Path::new("/work/MyProject")),
            "MyProject"
        );
        settings.project_name = Some("  ".to_string());
        assert_eq!(
            settings.project_name_for(Path::new("/work/MyProject")),
            "MyProject"
        );
        settings.project_name = Some("Billing".to_string());
        assert_eq!(settings.project_name_for(Path::new("/work/x")), "Billing");
    }

    #[test]
    fn set_parses_and_validates_values() {
        let mut settings = Settings::default();
        settings.set("trackingIntervalMinutes", "30").expect("set");
        assert_eq!(settings.tracking_interval_minutes, 30);
        assert!(settings.set("trackingIntervalMinutes", "61").is_err());
        assert!(settings.set("ticketRegex", "([").is_err());
        settings.set("submissionStyle", "bearer").expect("set");
        assert_eq!(settings.submission_style, SubmissionStyle::Bearer);
        settings.set("userId", "12").expect("set");
        assert_eq!(settings.user_id, Some(12));
        settings.set("userId", "none").expect("set");
        assert_eq!(settings.user_id, None);
        assert!(matches!(
            settings.set("colour", "blue"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn redacted_hides_key() {
        let mut settings = Settings::default();
        assert_eq!(settings.redacted().api_key, "");
        settings.api_key = "secret".to_string();
        assert_eq!(settings.redacted().api_key, "********");
    }
}
