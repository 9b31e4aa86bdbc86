//! Per-finding-id reports: diff aggregation over sidecars, head and
//! head-info counts over stored records, and the drill-down pages that replay
//! matching lines.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::html::{encode_component, link, page, row};
use crate::diff::is_finding_header;
use crate::storage::{finding_id, DiffCounts, DiffStatSidecar, ResultRecord};
use crate::types::{format_date, HEAD_VERSION};

/// Summed sidecar counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffAggregate {
    pub all: BTreeMap<String, DiffCounts>,
    pub today: BTreeMap<String, DiffCounts>,
}

impl DiffAggregate {
    pub fn from_sidecars<'a, I>(sidecars: I, today: NaiveDate) -> Self
    where
        I: IntoIterator<Item = &'a DiffStatSidecar>,
    {
        let today = format_date(today);
        let mut aggregate = Self::default();
        for sidecar in sidecars {
            let is_today = sidecar.date == today;
            for (id, counts) in &sidecar.sums {
                aggregate.all.entry(id.clone()).or_default().add(*counts);
                if is_today {
                    aggregate.today.entry(id.clone()).or_default().add(*counts);
                }
            }
        }
        aggregate
    }
}

/// Ids by total descending, then by name.
fn ranked(sums: &BTreeMap<String, DiffCounts>) -> Vec<(&String, &DiffCounts)> {
    let mut rows: Vec<_> = sums.iter().collect();
    rows.sort_by(|a, b| b.1.total().cmp(&a.1.total()).then_with(|| a.0.cmp(b.0)));
    rows
}

const ID_WIDTHS: [usize; 3] = [40, 10, 10];

fn diff_table(sums: &BTreeMap<String, DiffCounts>, baseline: &str, link_prefix: &str) -> String {
    let mut out = String::from("<pre>\n<b>");
    out.push_str(&row(
        "MessageID",
        None,
        &[baseline.to_string(), HEAD_VERSION.to_string()],
        &ID_WIDTHS,
    ));
    out.push_str("</b>");

    let mut total = DiffCounts::default();
    for (id, counts) in ranked(sums) {
        total.add(*counts);
        let href = format!("{}{}", link_prefix, encode_component(id));
        out.push_str(&row(
            id,
            Some(link(&href, id)),
            &[counts.baseline.to_string(), counts.head.to_string()],
            &ID_WIDTHS,
        ));
    }
    out.push_str(&row(
        "Total",
        Some("<b>Total</b>".to_string()),
        &[total.baseline.to_string(), total.head.to_string()],
        &ID_WIDTHS,
    ));
    out.push_str("</pre>\n");
    out
}

pub fn diff_page(aggregate: &DiffAggregate, baseline: &str) -> String {
    let mut body = String::from("<h2>Uploaded today</h2>\n");
    body.push_str(&diff_table(&aggregate.today, baseline, "difftoday-"));
    body.push_str("<h2>All</h2>\n");
    body.push_str(&diff_table(&aggregate.all, baseline, "diff-"));
    page("Diff report", &body)
}

/// Occurrences of each finding id among diagnostic header lines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdCounts {
    pub all: BTreeMap<String, u64>,
    pub today: BTreeMap<String, u64>,
}

/// Which section of a record a head report reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindingSection {
    /// `head results:` of result records
    HeadResults,
    /// `info messages:` of info records
    InfoMessages,
    /// `diff:` of result records
    Diff,
}

impl FindingSection {
    fn lines(self, record: &ResultRecord) -> &[String] {
        match self {
            FindingSection::HeadResults => &record.head_results,
            FindingSection::InfoMessages => &record.info_messages,
            FindingSection::Diff => &record.diff,
        }
    }
}

pub fn count_ids<I>(records: I, section: FindingSection, today: NaiveDate) -> IdCounts
where
    I: IntoIterator<Item = ResultRecord>,
{
    let mut counts = IdCounts::default();
    for record in records {
        let is_today = record.upload_date() == Some(today);
        for line in section.lines(&record) {
            if !is_finding_header(line) {
                continue;
            }
            let Some(id) = finding_id(line) else {
                continue;
            };
            *counts.all.entry(id.to_string()).or_default() += 1;
            if is_today {
                *counts.today.entry(id.to_string()).or_default() += 1;
            }
        }
    }
    counts
}

fn id_table(counts: &BTreeMap<String, u64>, link_prefix: &str) -> String {
    let mut rows: Vec<_> = counts.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut out = String::from("<pre>\n<b>");
    out.push_str(&row("MessageID", None, &["Count".to_string()], &ID_WIDTHS));
    out.push_str("</b>");
    let mut total = 0;
    for (id, count) in rows {
        total += count;
        let href = format!("{}{}", link_prefix, encode_component(id));
        out.push_str(&row(id, Some(link(&href, id)), &[count.to_string()], &ID_WIDTHS));
    }
    out.push_str(&row(
        "Total",
        Some("<b>Total</b>".to_string()),
        &[total.to_string()],
        &ID_WIDTHS,
    ));
    out.push_str("</pre>\n");
    out
}

/// `head.html` / `headinfo.html`.
pub fn head_page(title: &str, counts: &IdCounts, link_prefix: &str) -> String {
    let mut body = String::from("<h2>Uploaded today</h2>\n");
    body.push_str(&id_table(&counts.today, link_prefix));
    body.push_str("<h2>All</h2>\n");
    body.push_str(&id_table(&counts.all, link_prefix));
    page(title, &body)
}

/// Replay the lines of `section` whose finding id is `id`, each package's
/// matches preceded by its url. With `today`, only records uploaded that day.
pub fn message_lines<I>(
    records: I,
    section: FindingSection,
    id: &str,
    today: Option<NaiveDate>,
) -> String
where
    I: IntoIterator<Item = ResultRecord>,
{
    let suffix = format!("[{}]", id);
    let mut out = String::new();
    for record in records {
        if today.is_some() && record.upload_date() != today {
            continue;
        }
        let mut url = Some(record.url.clone().unwrap_or_else(|| record.package.clone()));
        for line in section.lines(&record) {
            if !line.trim_end().ends_with(&suffix) {
                continue;
            }
            if let Some(url) = url.take() {
                let _ = writeln!(out, "{}", url);
            }
            let _ = writeln!(out, "{}", line);
        }
    }
    out
}
