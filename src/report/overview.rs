//! Index page and the simple listing reports: latest, timeout, stale.

use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::fmt::Write as _;

use super::html::{escape, link, page, row};
use crate::context::ReportContext;
use crate::storage::ResultRecord;
use crate::types::{format_upload_time, HEAD_VERSION};

/// Server state shown on the index page.
#[derive(Clone, Debug, Default)]
pub struct OverviewStats {
    pub baseline: String,
    pub packages: usize,
    pub cursor: usize,
    pub withdrawn: usize,
    pub results: usize,
    pub sidecars: usize,
    pub info_records: usize,
    pub connections: u64,
    pub uploads_accepted: u64,
    pub uploads_rejected: u64,
    pub protocol_errors: u64,
    pub started_at: Option<NaiveDateTime>,
}

const REPORT_LINKS: &[(&str, &str)] = &[
    ("latest.html", "Latest results"),
    ("crash.html", "Crash report"),
    ("timeout.html", "Timeout report"),
    ("stale.html", "Stale report"),
    ("diff.html", "Diff report"),
    ("head.html", "HEAD report"),
    ("headinfo.html", "HEAD (information) report"),
    ("time_lt.html", "Time report (improved)"),
    ("time_gt.html", "Time report (regressed)"),
    ("time_slow.html", "Time report (slowest)"),
];

pub fn overview_page(stats: &OverviewStats) -> String {
    let mut body = String::new();
    for (href, label) in REPORT_LINKS {
        body.push_str(&link(href, label));
        match *href {
            "crash.html" => {
                let _ = write!(body, " - {}", link("crash.html?pkgs=1", "packages.txt"));
            }
            "time_gt.html" => {
                let _ = write!(body, " - {}", link("time_gt.html?pkgs=1", "packages.txt"));
            }
            _ => {}
        }
        body.push_str("<br>\n");
    }

    body.push_str("<br>\n--- Check library reports ---<br>\n");
    for kind in super::library::LibraryReport::ALL {
        let _ = writeln!(
            body,
            "{}<br>",
            link(kind.page_name(), &format!("{} report", kind.message_id()))
        );
    }

    body.push_str("<br>\n<pre>\n");
    let _ = writeln!(body, "Versions:          {} {}", escape(&stats.baseline), HEAD_VERSION);
    let _ = writeln!(body, "Packages:          {}", stats.packages);
    let _ = writeln!(body, "Next package:      {}", stats.cursor);
    let _ = writeln!(body, "Withdrawn:         {}", stats.withdrawn);
    let _ = writeln!(body, "Results stored:    {}", stats.results);
    let _ = writeln!(body, "With diff:         {}", stats.sidecars);
    let _ = writeln!(body, "Info records:      {}", stats.info_records);
    let _ = writeln!(body, "Connections:       {}", stats.connections);
    let _ = writeln!(body, "Uploads accepted:  {}", stats.uploads_accepted);
    let _ = writeln!(body, "Uploads rejected:  {}", stats.uploads_rejected);
    let _ = writeln!(body, "Protocol errors:   {}", stats.protocol_errors);
    if let Some(started_at) = stats.started_at {
        let _ = writeln!(body, "Running since:     {}", format_upload_time(started_at));
    }
    body.push_str("</pre>\n");

    page("daca@home", &body)
}

const LISTING_WIDTHS: [usize; 5] = [40, 17, 10, 10, 10];

fn package_link(record: &ResultRecord) -> String {
    link(&record.package, &record.package)
}

/// `(added, lost)`: diff lines produced only by head / only by the baseline.
pub fn diff_summary(record: &ResultRecord, baseline: &str) -> (usize, usize) {
    let head_label = format!("{} ", HEAD_VERSION);
    let baseline_label = format!("{} ", record.baseline_version().unwrap_or(baseline));
    record.diff.iter().fold((0, 0), |(added, lost), line| {
        if line.starts_with(&head_label) {
            (added + 1, lost)
        } else if line.starts_with(&baseline_label) {
            (added, lost + 1)
        } else {
            (added, lost)
        }
    })
}

/// Records of the latest window, newest first.
pub fn latest_page(records: &[ResultRecord], rc: &ReportContext) -> String {
    let mut body = String::from("<pre>\n<b>");
    body.push_str(&row(
        "Package",
        None,
        &[
            "Date       Time".to_string(),
            rc.baseline.clone(),
            HEAD_VERSION.to_string(),
            "Diff".to_string(),
        ],
        &LISTING_WIDTHS,
    ));
    body.push_str("</b>");
    for record in records {
        let (added, lost) = diff_summary(record, &rc.baseline);
        body.push_str(&row(
            &record.package,
            Some(package_link(record)),
            &[
                record.date_line.clone(),
                record.baseline_count().label(),
                record.head_count().label(),
                format!("+{} -{}", added, lost),
            ],
            &LISTING_WIDTHS,
        ));
    }
    body.push_str("</pre>\n");
    page("Latest daca@home results", &body)
}

/// Records where either scan timed out.
pub fn timeout_page<I>(records: I, rc: &ReportContext) -> String
where
    I: IntoIterator<Item = ResultRecord>,
{
    let mut body = String::from("<pre>\n<b>");
    body.push_str(&row(
        "Package",
        None,
        &[
            "Date       Time".to_string(),
            rc.baseline.clone(),
            HEAD_VERSION.to_string(),
        ],
        &LISTING_WIDTHS,
    ));
    body.push_str("</b>");
    for record in records.into_iter().filter(ResultRecord::timed_out) {
        body.push_str(&row(
            &record.package,
            Some(package_link(&record)),
            &[
                record.date_line.clone(),
                record.baseline_count().label(),
                record.head_count().label(),
            ],
            &LISTING_WIDTHS,
        ));
    }
    body.push_str("</pre>\n");
    page("Timeout report", &body)
}

/// True when `record` was uploaded more than `days` days before `now`.
/// Records without a readable upload time count as stale. A threshold too
/// large to represent leaves every dated record fresh.
pub fn is_stale(record: &ResultRecord, now: NaiveDateTime, days: i64) -> bool {
    match (record.uploaded_at, ChronoDuration::try_days(days)) {
        (Some(at), Some(threshold)) => now - at > threshold,
        (Some(_), None) => false,
        (None, _) => true,
    }
}

pub fn stale_page<I>(records: I, rc: &ReportContext, days: i64) -> String
where
    I: IntoIterator<Item = ResultRecord>,
{
    let mut body = format!("Results older than {} days.\n<pre>\n<b>", days);
    body.push_str(&row(
        "Package",
        None,
        &["Date       Time".to_string()],
        &LISTING_WIDTHS,
    ));
    body.push_str("</b>");
    for record in records
        .into_iter()
        .filter(|r| is_stale(r, rc.now, days))
    {
        body.push_str(&row(
            &record.package,
            Some(package_link(&record)),
            &[record.date_line.clone()],
            &LISTING_WIDTHS,
        ));
    }
    body.push_str("</pre>\n");
    page("Stale report", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_upload_time;

    fn rc() -> ReportContext {
        ReportContext {
            baseline: "2.14".to_string(),
            now: parse_upload_time("2024-03-31 12:00").unwrap(),
            stale_days: 30,
        }
    }

    fn record(name: &str, date: &str, counts: &str, diff: &str) -> ResultRecord {
        let text = format!(
            "{}\nftp://x/{}.tar.gz\ncppcheck: 2.14 head\ncount: {}\ndiff:\n{}",
            date, name, counts, diff
        );
        ResultRecord::parse(name, &text)
    }

    #[test]
    fn test_latest_shows_diff_summary() {
        let records = vec![record(
            "zlib",
            "2024-03-30 10:00",
            "3 4",
            "head a.c:1:1: error: x [a]\nhead a.c:2:1: error: y [b]\n2.14 a.c:3:1: error: z [c]\n",
        )];
        let html = latest_page(&records, &rc());
        assert!(html.contains("<a href=\"zlib\">zlib</a>"));
        assert!(html.contains("+2 -1"));
        assert!(html.contains("2024-03-30 10:00"));
    }

    #[test]
    fn test_timeout_lists_only_timeouts() {
        let records = vec![
            record("slow", "2024-03-30 10:00", "3 TO!", ""),
            record("fine", "2024-03-30 10:00", "3 3", ""),
        ];
        let html = timeout_page(records, &rc());
        assert!(html.contains(">slow<"));
        assert!(!html.contains(">fine<"));
    }

    #[test]
    fn test_stale_threshold() {
        let records = vec![
            record("old", "2024-02-01 10:00", "1 1", ""),
            record("new", "2024-03-20 10:00", "1 1", ""),
        ];
        let html = stale_page(records.clone(), &rc(), 30);
        assert!(html.contains(">old<"));
        assert!(!html.contains(">new<"));

        let html = stale_page(records, &rc(), 5);
        assert!(html.contains(">new<"));
    }

    #[test]
    fn test_huge_stale_threshold_lists_nothing() {
        let records = vec![record("old", "2024-02-01 10:00", "1 1", "")];
        let html = stale_page(records.clone(), &rc(), i64::MAX);
        assert!(!html.contains(">old<"));
        assert!(!is_stale(&records[0], rc().now, i64::MAX));
    }

    #[test]
    fn test_overview_escapes_and_links() {
        let stats = OverviewStats {
            baseline: "2.14".to_string(),
            packages: 3,
            ..Default::default()
        };
        let html = overview_page(&stats);
        assert!(html.contains("href=\"crash.html?pkgs=1\""));
        assert!(html.contains("check_library_function_report.html"));
        assert!(html.contains("Packages:          3"));
    }
}
