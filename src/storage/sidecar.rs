//! Per-package diff statistics derived from a record's `diff:` section.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::{finding_id, ResultRecord};
use crate::types::{format_date, HEAD_VERSION};

/// Occurrences of one finding id in the diff, per version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffCounts {
    /// Lines reported only by the baseline version
    pub baseline: u64,
    /// Lines reported only by head
    pub head: u64,
}

impl DiffCounts {
    pub fn add(&mut self, other: DiffCounts) {
        self.baseline += other.baseline;
        self.head += other.head;
    }

    pub fn total(&self) -> u64 {
        self.baseline + self.head
    }
}

/// Sidecar file contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffStatSidecar {
    /// Upload date of the record (`YYYY-MM-DD`)
    pub date: String,
    pub sums: BTreeMap<String, DiffCounts>,
}

impl DiffStatSidecar {
    /// Derive the sidecar for `record`, or `None` when there is nothing to
    /// count. Records compared against another baseline than `baseline`
    /// produce nothing.
    pub fn from_record(record: &ResultRecord, baseline: &str) -> Option<Self> {
        if !record.is_current(baseline) {
            return None;
        }
        let baseline_label = format!("{} ", record.baseline_version().unwrap_or(baseline));
        let head_label = format!("{} ", HEAD_VERSION);

        let mut sums: BTreeMap<String, DiffCounts> = BTreeMap::new();
        for line in &record.diff {
            let line = line.trim();
            let is_baseline = line.starts_with(&baseline_label);
            let is_head = line.starts_with(&head_label);
            if !is_baseline && !is_head {
                continue;
            }
            let Some(id) = finding_id(line) else {
                continue;
            };
            let entry = sums.entry(id.to_string()).or_default();
            if is_baseline {
                entry.baseline += 1;
            } else {
                entry.head += 1;
            }
        }

        if sums.is_empty() {
            return None;
        }
        Some(Self {
            date: record.upload_date().map(format_date).unwrap_or_default(),
            sums,
        })
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(diff: &str) -> ResultRecord {
        let text = format!("2024-03-05 09:07\ncppcheck: 2.14 head\ndiff:\n{}", diff);
        ResultRecord::parse("pkg", &text)
    }

    #[test]
    fn test_sums_per_version() {
        let rec = record(
            "2.14 a.c:1:1: error: x [nullPointer]\n\
             head a.c:2:1: error: y [nullPointer]\n\
             head a.c:3:1: style: z [unusedVariable]\n    int x;\n    ^\n",
        );
        let sidecar = DiffStatSidecar::from_record(&rec, "2.14").unwrap();
        assert_eq!(sidecar.date, "2024-03-05");
        assert_eq!(sidecar.sums["nullPointer"], DiffCounts { baseline: 1, head: 1 });
        assert_eq!(sidecar.sums["unusedVariable"], DiffCounts { baseline: 0, head: 1 });
        assert_eq!(sidecar.sums.len(), 2);
    }

    #[test]
    fn test_empty_diff_produces_nothing() {
        assert!(DiffStatSidecar::from_record(&record(""), "2.14").is_none());
    }

    #[test]
    fn test_other_baseline_produces_nothing() {
        let rec = record("2.14 a.c:1:1: error: x [nullPointer]\n");
        assert!(DiffStatSidecar::from_record(&rec, "2.15").is_none());
    }

    #[test]
    fn test_serialization_is_stable() {
        let rec = record("head a.c:1:1: error: x [b]\nhead a.c:1:1: error: x [a]\n");
        let first = DiffStatSidecar::from_record(&rec, "2.14").unwrap().to_bytes().unwrap();
        let second = DiffStatSidecar::from_record(&rec, "2.14").unwrap().to_bytes().unwrap();
        assert_eq!(first, second);
        assert_eq!(
            String::from_utf8(first).unwrap(),
            r#"{"date":"2024-03-05","sums":{"a":{"baseline":0,"head":1},"b":{"baseline":0,"head":1}}}"#
        );
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let bytes = br#"{"date":"2024-03-05","sums":{},"extra":1}"#;
        assert!(DiffStatSidecar::from_bytes(bytes).is_err());
    }
}
