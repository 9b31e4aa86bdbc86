//! Parser for the textual result record format.
//!
//! ```text
//! 2024-03-05 09:07                     upload timestamp
//! ftp://.../zlib_1.3.orig.tar.gz       package url
//! cppcheck-options: --library=posix ...
//! platform: Linux-6.1-x86_64
//! cppcheck: 2.14 head                  order of the positional fields below
//! count: 12 10
//! elapsed-time: 5.0 4.8
//! head-timing-info:
//! ...
//! old-timing-info:
//! ...
//! head results:
//! ...                                  runs until `diff:`
//! diff:
//! ...                                  runs to EOF
//! ```
//!
//! Info records share the header and end with an `info messages:` section.

use chrono::{NaiveDate, NaiveDateTime};

use crate::types::{parse_upload_time, HEAD_VERSION};

pub const OPTIONS_PREFIX: &str = "cppcheck-options:";
pub const PLATFORM_PREFIX: &str = "platform:";
pub const VERSIONS_PREFIX: &str = "cppcheck:";
pub const COUNT_PREFIX: &str = "count:";
pub const ELAPSED_PREFIX: &str = "elapsed-time:";
pub const HEAD_TIMING_HEADER: &str = "head-timing-info:";
pub const OLD_TIMING_HEADER: &str = "old-timing-info:";
pub const HEAD_RESULTS_HEADER: &str = "head results:";
pub const DIFF_HEADER: &str = "diff:";
pub const INFO_MESSAGES_HEADER: &str = "info messages:";

/// Single-line fields kept verbatim as platform/tool metadata.
const METADATA_PREFIXES: &[&str] = &["head-info:", "client-version:", "python:", "compiler:"];

/// Count sentinel written for a crashed scan.
pub const CRASH_MARKER: &str = "Crash!";
/// Count sentinel written for a timed out scan.
pub const TIMEOUT_MARKER: &str = "TO!";

/// One positional value of the `count:` line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanCount {
    Findings(u64),
    Crash,
    Timeout,
    Unknown,
}

impl ScanCount {
    pub fn parse(token: &str) -> Self {
        match token {
            CRASH_MARKER => ScanCount::Crash,
            TIMEOUT_MARKER => ScanCount::Timeout,
            other => other
                .parse::<u64>()
                .map(ScanCount::Findings)
                .unwrap_or(ScanCount::Unknown),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ScanCount::Crash | ScanCount::Timeout)
    }

    /// Text shown in report tables.
    pub fn label(&self) -> String {
        match self {
            ScanCount::Findings(n) => n.to_string(),
            ScanCount::Crash => "Crash".to_string(),
            ScanCount::Timeout => "TO!".to_string(),
            ScanCount::Unknown => String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Header,
    HeadTiming,
    OldTiming,
    HeadResults,
    Diff,
    InfoMessages,
}

/// A parsed result (or info) record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultRecord {
    /// Package name (the file name in the store)
    pub package: String,
    /// First line verbatim
    pub date_line: String,
    pub uploaded_at: Option<NaiveDateTime>,
    pub url: Option<String>,
    pub options: Option<String>,
    pub platform: Option<String>,
    /// Versions declared by the `cppcheck:` line, in positional order
    pub versions: Vec<String>,
    /// Other recognized single-line fields, in file order
    pub metadata: Vec<(String, String)>,
    pub counts: Vec<ScanCount>,
    pub elapsed: Vec<Option<f64>>,
    pub head_timing: Vec<String>,
    pub old_timing: Vec<String>,
    pub head_results: Vec<String>,
    pub diff: Vec<String>,
    pub info_messages: Vec<String>,
}

impl ResultRecord {
    /// Parse stored record text. Never fails: unknown lines are ignored.
    pub fn parse(package: &str, text: &str) -> Self {
        let mut record = ResultRecord {
            package: package.to_string(),
            ..Default::default()
        };

        let mut lines = text.lines();
        if let Some(first) = lines.next() {
            record.date_line = first.trim().to_string();
            record.uploaded_at = parse_upload_time(first);
        }

        let mut section = Section::Header;
        for raw in lines {
            let line = raw.trim_end_matches('\r');
            match section {
                Section::Diff => {
                    record.diff.push(line.to_string());
                    continue;
                }
                Section::InfoMessages => {
                    record.info_messages.push(line.to_string());
                    continue;
                }
                Section::HeadResults => {
                    match line.trim() {
                        DIFF_HEADER => section = Section::Diff,
                        INFO_MESSAGES_HEADER => section = Section::InfoMessages,
                        _ => record.head_results.push(line.to_string()),
                    }
                    continue;
                }
                Section::Header | Section::HeadTiming | Section::OldTiming => {}
            }

            let trimmed = line.trim();
            if let Some(value) = trimmed.strip_prefix(OPTIONS_PREFIX) {
                record.options = Some(value.trim().to_string());
                section = Section::Header;
            } else if let Some(value) = trimmed.strip_prefix(PLATFORM_PREFIX) {
                record.platform = Some(value.trim().to_string());
                section = Section::Header;
            } else if let Some(value) = trimmed.strip_prefix(VERSIONS_PREFIX) {
                record.versions = value.split_whitespace().map(str::to_string).collect();
                section = Section::Header;
            } else if let Some(value) = trimmed.strip_prefix(COUNT_PREFIX) {
                record.counts = value.split_whitespace().map(ScanCount::parse).collect();
                section = Section::Header;
            } else if let Some(value) = trimmed.strip_prefix(ELAPSED_PREFIX) {
                record.elapsed = value
                    .split_whitespace()
                    .map(|t| t.parse::<f64>().ok())
                    .collect();
                section = Section::Header;
            } else if trimmed == HEAD_TIMING_HEADER {
                section = Section::HeadTiming;
            } else if trimmed == OLD_TIMING_HEADER {
                section = Section::OldTiming;
            } else if trimmed == HEAD_RESULTS_HEADER {
                section = Section::HeadResults;
            } else if trimmed == DIFF_HEADER {
                section = Section::Diff;
            } else if trimmed == INFO_MESSAGES_HEADER {
                section = Section::InfoMessages;
            } else if let Some(prefix) = METADATA_PREFIXES.iter().find(|p| trimmed.starts_with(*p)) {
                let value = trimmed[prefix.len()..].trim().to_string();
                record
                    .metadata
                    .push((prefix.trim_end_matches(':').to_string(), value));
                section = Section::Header;
            } else if record.url.is_none() && section == Section::Header && trimmed.contains("://") {
                record.url = Some(trimmed.to_string());
            } else if section == Section::HeadTiming {
                record.head_timing.push(line.to_string());
            } else if section == Section::OldTiming {
                record.old_timing.push(line.to_string());
            }
        }

        record
    }

    /// Position of the head version in the positional fields.
    pub fn head_index(&self) -> usize {
        self.versions
            .iter()
            .position(|v| v == HEAD_VERSION)
            .unwrap_or(1)
    }

    /// Position of the baseline version in the positional fields.
    pub fn baseline_index(&self) -> usize {
        if self.head_index() == 0 {
            1
        } else {
            0
        }
    }

    /// Baseline version this record was compared against, if declared.
    pub fn baseline_version(&self) -> Option<&str> {
        self.versions
            .get(self.baseline_index())
            .map(String::as_str)
            .filter(|v| *v != HEAD_VERSION)
    }

    /// False when the record declares versions that do not include `baseline`
    /// (uploaded before the baseline moved). Undeclared records count as current.
    pub fn is_current(&self, baseline: &str) -> bool {
        self.versions.is_empty() || self.versions.iter().any(|v| v == baseline)
    }

    pub fn head_count(&self) -> ScanCount {
        self.counts
            .get(self.head_index())
            .copied()
            .unwrap_or(ScanCount::Unknown)
    }

    pub fn baseline_count(&self) -> ScanCount {
        self.counts
            .get(self.baseline_index())
            .copied()
            .unwrap_or(ScanCount::Unknown)
    }

    pub fn crashed(&self) -> bool {
        self.counts.iter().any(|c| *c == ScanCount::Crash)
    }

    pub fn timed_out(&self) -> bool {
        self.counts.iter().any(|c| *c == ScanCount::Timeout)
    }

    /// `(baseline, head)` elapsed seconds when both are present.
    pub fn elapsed_pair(&self) -> Option<(f64, f64)> {
        let baseline = (*self.elapsed.get(self.baseline_index())?)?;
        let head = (*self.elapsed.get(self.head_index())?)?;
        Some((baseline, head))
    }

    pub fn upload_date(&self) -> Option<NaiveDate> {
        self.uploaded_at.map(|at| at.date())
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Finding id of a diagnostic header line: the text inside the trailing `[...]`.
pub fn finding_id(line: &str) -> Option<&str> {
    let line = line.trim_end();
    if !line.ends_with(']') {
        return None;
    }
    let open = line.rfind('[')?;
    let id = &line[open + 1..line.len() - 1];
    if id.is_empty() || id.contains(' ') {
        None
    } else {
        Some(id)
    }
}
