//! Shared value types used by the coordinator, the report engine and the client.

use chrono::{Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{DacaError, DacaResult};

/// Version id of the development build; always compared against a baseline.
pub const HEAD_VERSION: &str = "head";

/// Format of the first line of every stored record.
pub const UPLOAD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Format of sidecar dates and the "today" comparisons.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// The pair of analyzer versions currently being compared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionPair {
    /// Fixed released version every head result is compared against
    pub baseline: String,
    /// Development build id (always [`HEAD_VERSION`] on the wire)
    pub head: String,
}

impl VersionPair {
    pub fn new(baseline: impl Into<String>) -> Self {
        Self {
            baseline: baseline.into(),
            head: HEAD_VERSION.to_string(),
        }
    }

    /// Reply body of `GetCppcheckVersions`.
    pub fn wire_reply(&self) -> String {
        format!("{} {}", self.head, self.baseline)
    }

    /// Parse a `GetCppcheckVersions` reply. The head token is found by name,
    /// the other token is the baseline.
    pub fn parse_reply(reply: &str) -> Option<Self> {
        let tokens: Vec<&str> = reply.split_whitespace().collect();
        if tokens.len() != 2 {
            return None;
        }
        let head_pos = tokens.iter().position(|t| *t == HEAD_VERSION)?;
        let baseline = tokens[1 - head_pos];
        if baseline == HEAD_VERSION {
            return None;
        }
        Some(Self::new(baseline))
    }

    /// Tokens of the `cppcheck:` payload line, baseline first.
    pub fn declaration(&self) -> String {
        format!("{} {}", self.baseline, self.head)
    }

    /// True if `tokens` name exactly this pair, in any order.
    pub fn matches_declared(&self, tokens: &[&str]) -> bool {
        tokens.len() == 2
            && tokens.contains(&self.baseline.as_str())
            && tokens.contains(&self.head.as_str())
    }
}

/// Current local time truncated for record headers.
pub fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn format_upload_time(at: NaiveDateTime) -> String {
    at.format(UPLOAD_TIME_FORMAT).to_string()
}

pub fn parse_upload_time(line: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(line.trim(), UPLOAD_TIME_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn package_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+~-]*$").expect("static package name regex")
    })
}

/// Reject names that are unsafe to use as a file name in the results directory.
pub fn validate_package_name(name: &str) -> DacaResult<()> {
    if name.len() > 255 || !package_name_regex().is_match(name) {
        return Err(DacaError::InvalidPackageName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_reply_round_trip() {
        let versions = VersionPair::new("2.14");
        assert_eq!(versions.wire_reply(), "head 2.14");
        assert_eq!(VersionPair::parse_reply("head 2.14\n"), Some(versions.clone()));
        assert_eq!(VersionPair::parse_reply("2.14 head"), Some(versions));
        assert_eq!(VersionPair::parse_reply("head head"), None);
        assert_eq!(VersionPair::parse_reply("2.13 2.14"), None);
    }

    #[test]
    fn test_matches_declared() {
        let versions = VersionPair::new("2.14");
        assert!(versions.matches_declared(&["2.14", "head"]));
        assert!(versions.matches_declared(&["head", "2.14"]));
        assert!(!versions.matches_declared(&["2.13", "head"]));
        assert!(!versions.matches_declared(&["2.14", "head", "2.13"]));
    }

    #[test]
    fn test_upload_time_format() {
        let at = parse_upload_time("2024-03-05 09:07").unwrap();
        assert_eq!(format_upload_time(at), "2024-03-05 09:07");
        assert!(parse_upload_time("yesterday").is_none());
    }

    #[test]
    fn test_package_name_validation() {
        assert!(validate_package_name("zlib").is_ok());
        assert!(validate_package_name("libfoo-1.2+dfsg").is_ok());
        assert!(validate_package_name("..").is_err());
        assert!(validate_package_name("a/b").is_err());
        assert!(validate_package_name("").is_err());
    }
}
