//! Compiled patterns and keyword tables.
//!
//! The default ticket pattern is compiled once on first use. User-supplied
//! patterns go through [`crate::identity::TicketPattern::new`] instead.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Two-to-ten letters, a hyphen, digits. Matched case-insensitively.
pub const DEFAULT_TICKET_REGEX: &str = r"([A-Z]{2,10}-\d+)";

pub static RE_DEFAULT_TICKET: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(DEFAULT_TICKET_REGEX)
        .case_insensitive(true)
        .build()
        .unwrap()
});

/// `ref: refs/heads/<branch>` line of a git HEAD file.
pub static RE_HEAD_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ref:\s*refs/heads/(.+)$").unwrap());

/// Action names containing any of these are host housekeeping, not the user.
pub const BACKGROUND_ACTION_KEYWORDS: &[&str] = &["background", "auto", "daemon", "update"];
