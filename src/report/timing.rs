//! Timing reports: head vs baseline elapsed time per package.

use std::fmt::Write as _;

use super::html::{link, page, row};
use crate::storage::ResultRecord;
use crate::types::HEAD_VERSION;

/// Threshold used when the request does not pass `factor`.
pub const DEFAULT_FACTOR: f64 = 2.0;
/// Rows on the slowest-packages page.
pub const SLOW_LIMIT: usize = 100;

/// `head / baseline`. A zero baseline maps to `1 + head * 10` so a package
/// that suddenly takes time still ranks as a regression.
pub fn time_ratio(baseline: f64, head: f64) -> f64 {
    if baseline == 0.0 {
        1.0 + head * 10.0
    } else {
        head / baseline
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimingEntry {
    pub package: String,
    pub url: Option<String>,
    pub date_line: String,
    pub baseline: f64,
    pub head: f64,
    pub ratio: f64,
}

/// Comparable timings and the grand totals over them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimingSummary {
    pub entries: Vec<TimingEntry>,
    pub total_baseline: f64,
    pub total_head: f64,
}

impl TimingSummary {
    /// Skips crashed or timed out scans, negative times and pairs where both
    /// times are zero.
    pub fn collect<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ResultRecord>,
    {
        let mut summary = Self::default();
        for record in records {
            if record.crashed() || record.timed_out() {
                continue;
            }
            let Some((baseline, head)) = record.elapsed_pair() else {
                continue;
            };
            if baseline < 0.0 || head < 0.0 || (baseline == 0.0 && head == 0.0) {
                continue;
            }
            summary.total_baseline += baseline;
            summary.total_head += head;
            summary.entries.push(TimingEntry {
                ratio: time_ratio(baseline, head),
                package: record.package,
                url: record.url,
                date_line: record.date_line,
                baseline,
                head,
            });
        }
        summary
    }

    /// Entries with `ratio > factor`, largest first.
    pub fn regressed(&self, factor: f64) -> Vec<&TimingEntry> {
        let mut out: Vec<&TimingEntry> = self.entries.iter().filter(|e| e.ratio > factor).collect();
        out.sort_by(|a, b| b.ratio.total_cmp(&a.ratio).then_with(|| a.package.cmp(&b.package)));
        out
    }

    /// Entries with `ratio < 1 / factor`, smallest first.
    pub fn improved(&self, factor: f64) -> Vec<&TimingEntry> {
        let limit = 1.0 / factor;
        let mut out: Vec<&TimingEntry> = self.entries.iter().filter(|e| e.ratio < limit).collect();
        out.sort_by(|a, b| a.ratio.total_cmp(&b.ratio).then_with(|| a.package.cmp(&b.package)));
        out
    }

    /// Slowest head scans first.
    pub fn slowest(&self, limit: usize) -> Vec<&TimingEntry> {
        let mut out: Vec<&TimingEntry> = self.entries.iter().collect();
        out.sort_by(|a, b| b.head.total_cmp(&a.head).then_with(|| a.package.cmp(&b.package)));
        out.truncate(limit);
        out
    }

    pub fn total_factor(&self) -> f64 {
        if self.total_baseline > 0.0 {
            self.total_head / self.total_baseline
        } else {
            0.0
        }
    }
}

/// Usable threshold from a query value.
pub fn sanitize_factor(factor: Option<f64>) -> f64 {
    match factor {
        Some(f) if f.is_finite() && f > 0.0 => f,
        _ => DEFAULT_FACTOR,
    }
}

const TIME_WIDTHS: [usize; 5] = [40, 17, 10, 10, 10];

fn header(baseline: &str, last: &str) -> String {
    let mut out = String::from("<b>");
    out.push_str(&row(
        "Package",
        None,
        &[
            "Date       Time".to_string(),
            baseline.to_string(),
            HEAD_VERSION.to_string(),
            last.to_string(),
        ],
        &TIME_WIDTHS,
    ));
    out.push_str("</b>");
    out
}

fn entry_row(entry: &TimingEntry, last: String) -> String {
    row(
        &entry.package,
        Some(link(&entry.package, &entry.package)),
        &[
            entry.date_line.clone(),
            format!("{:.1}", entry.baseline),
            format!("{:.1}", entry.head),
            last,
        ],
        &TIME_WIDTHS,
    )
}

/// `time_gt.html` when `regressed`, otherwise `time_lt.html`.
pub fn time_page(summary: &TimingSummary, regressed: bool, factor: f64, baseline: &str) -> String {
    let entries = if regressed {
        summary.regressed(factor)
    } else {
        summary.improved(factor)
    };

    let mut body = String::from("<pre>\n");
    body.push_str(&header(baseline, "Factor"));
    for entry in &entries {
        body.push_str(&entry_row(entry, format!("{:.2}", entry.ratio)));
    }
    body.push('\n');
    let _ = writeln!(
        body,
        "(listed above are all suspicious timings with a factor {} {:.2})",
        if regressed { ">" } else { "<" },
        if regressed { factor } else { 1.0 / factor }
    );
    body.push('\n');
    body.push_str("Time for all packages (not just the ones listed above):\n");
    body.push_str(&row(
        "Total time:",
        None,
        &[
            String::new(),
            format!("{:.1}", summary.total_baseline),
            format!("{:.1}", summary.total_head),
            format!("{:.2}", summary.total_factor()),
        ],
        &TIME_WIDTHS,
    ));
    body.push_str("</pre>\n");

    let title = if regressed {
        "Time report (regressed)"
    } else {
        "Time report (improved)"
    };
    page(title, &body)
}

/// Urls of the regressed packages, one per line.
pub fn regressed_packages(summary: &TimingSummary, factor: f64) -> String {
    summary
        .regressed(factor)
        .into_iter()
        .map(|e| format!("{}\n", e.url.as_deref().unwrap_or(&e.package)))
        .collect()
}

pub fn slow_page(summary: &TimingSummary, baseline: &str) -> String {
    let mut body = String::from("<pre>\n");
    body.push_str(&header(baseline, ""));
    for entry in summary.slowest(SLOW_LIMIT) {
        body.push_str(&entry_row(entry, String::new()));
    }
    body.push_str("</pre>\n");
    page("Time report (slowest)", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, counts: &str, elapsed: &str) -> ResultRecord {
        let text = format!(
            "2024-03-05 10:00\nftp://x/{}.tar.gz\ncppcheck: 2.14 head\ncount: {}\nelapsed-time: {}\n",
            name, counts, elapsed
        );
        ResultRecord::parse(name, &text)
    }

    #[test]
    fn test_improved_record_only_in_lt() {
        let summary = TimingSummary::collect(vec![record("fast", "1 1", "5.0 1.0")]);
        let improved = summary.improved(2.0);
        assert_eq!(improved.len(), 1);
        assert!((improved[0].ratio - 0.20).abs() < 1e-9);
        assert!(summary.regressed(2.0).is_empty());

        let lt = time_page(&summary, false, 2.0, "2.14");
        assert!(lt.contains(">fast<"));
        assert!(lt.contains("0.20"));
        let gt = time_page(&summary, true, 2.0, "2.14");
        assert!(!gt.contains(">fast<"));
    }

    #[test]
    fn test_zero_baseline_rule() {
        assert_eq!(time_ratio(0.0, 0.5), 6.0);
        assert_eq!(time_ratio(2.0, 1.0), 0.5);
    }

    #[test]
    fn test_skips_failures_and_counts_all_in_totals() {
        let summary = TimingSummary::collect(vec![
            record("crashed", "1 Crash!", "1.0 9.0"),
            record("timeout", "TO! 1", "1.0 9.0"),
            record("zero", "1 1", "0.0 0.0"),
            record("negative", "1 1", "-1.0 2.0"),
            record("slow", "1 1", "1.0 3.0"),
            record("same", "1 1", "2.0 2.0"),
        ]);
        let names: Vec<&str> = summary.entries.iter().map(|e| e.package.as_str()).collect();
        assert_eq!(names, vec!["slow", "same"]);
        assert_eq!(summary.total_baseline, 3.0);
        assert_eq!(summary.total_head, 5.0);
        assert_eq!(summary.regressed(2.0).len(), 1);
        assert_eq!(regressed_packages(&summary, 2.0), "ftp://x/slow.tar.gz\n");
    }

    #[test]
    fn test_slowest_ranked_by_head() {
        let summary = TimingSummary::collect(vec![
            record("a", "1 1", "1.0 2.0"),
            record("b", "1 1", "1.0 7.0"),
            record("c", "1 1", "1.0 4.0"),
        ]);
        let names: Vec<&str> = summary.slowest(2).iter().map(|e| e.package.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_sanitize_factor() {
        assert_eq!(sanitize_factor(None), DEFAULT_FACTOR);
        assert_eq!(sanitize_factor(Some(-1.0)), DEFAULT_FACTOR);
        assert_eq!(sanitize_factor(Some(f64::NAN)), DEFAULT_FACTOR);
        assert_eq!(sanitize_factor(Some(3.0)), 3.0);
    }
}
