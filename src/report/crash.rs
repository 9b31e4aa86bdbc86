//! Crash report: crashed scans, clustered by stack trace signature.
//!
//! A crashed head scan carries the debugger output in its `head results:`
//! section:
//!
//! ```text
//! Thread 1 "cppcheck" received signal SIGSEGV, Segmentation fault.
//! 0x000055555 in Tokenizer::foo (this=0x0) at lib/tokenize.cpp:42     crash line
//! 42        tok->next();                                              code line
//! #0  0x000055555 in Tokenizer::foo (this=0x0) at lib/tokenize.cpp:42
//! #1  0x000055556 in main (argc=2, argv=0x7ffe) at cli/main.cpp:10
//!                                                                      blank ends the trace
//! ```
//!
//! Frames are normalized to `#N function(...) at location` or
//! `#N function(...) from binary`, dropping addresses and argument values.

use log::warn;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::html::{escape, link, page, row};
use crate::context::ReportContext;
use crate::storage::{ResultRecord, ScanCount};
use crate::types::HEAD_VERSION;

/// Marks the start of the debugger output.
pub const SIGNAL_MARKER: &str = " received signal ";

struct FrameRegexes {
    from_binary: Regex,
    in_at: Regex,
    at: Regex,
}

fn frame_regexes() -> &'static FrameRegexes {
    static RE: OnceLock<FrameRegexes> = OnceLock::new();
    RE.get_or_init(|| FrameRegexes {
        // #0  0x00007ffff71cbf67 in raise () from /lib64/libc.so.6
        from_binary: Regex::new(r"(?P<number>#\d+) .* in (?P<function>.+?)\s*\(.*\) from (?P<binary>.*)$")
            .expect("static frame regex"),
        // #1  0x00000000006f2414 in reportError (msg=...) at lib/errorlogger.cpp:12
        in_at: Regex::new(r"(?P<number>#\d+) .* in (?P<function>.+?)\s*\(.*\) at (?P<location>.*)$")
            .expect("static frame regex"),
        // #2  CppCheck::check (this=0x7ffe) at lib/cppcheck.cpp:350
        at: Regex::new(r"(?P<number>#\d+)\s+(?P<function>.+?)\s*\(.*\) at (?P<location>.*)$")
            .expect("static frame regex"),
    })
}

/// Normalize one debugger frame line, or `None` if it matches no known shape.
pub fn normalize_frame(line: &str) -> Option<String> {
    let line = line.trim();
    let re = frame_regexes();
    if let Some(caps) = re.from_binary.captures(line) {
        return Some(format!(
            "{} {}(...) from {}",
            &caps["number"], &caps["function"], &caps["binary"]
        ));
    }
    for regex in [&re.in_at, &re.at] {
        if let Some(caps) = regex.captures(line) {
            return Some(format!(
                "{} {}(...) at {}",
                &caps["number"], &caps["function"], &caps["location"]
            ));
        }
    }
    None
}

/// Debugger output of one crash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrashTrace {
    pub crash_line: String,
    pub code_line: String,
    pub frames: Vec<String>,
}

impl CrashTrace {
    /// Cluster key: the joined normalized frames.
    pub fn signature(&self) -> String {
        self.frames.join(" ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceParse {
    /// No debugger output in the record
    Missing,
    Parsed(CrashTrace),
    /// A frame line matched no known shape
    Unparseable(String),
}

/// Find and parse the debugger output in `lines`.
pub fn parse_stack_trace(lines: &[String]) -> TraceParse {
    let Some(start) = lines.iter().position(|l| l.contains(SIGNAL_MARKER)) else {
        return TraceParse::Missing;
    };
    let mut rest = lines[start + 1..].iter().map(|l| l.trim());

    let crash_line = rest.next().unwrap_or_default().to_string();
    let code_line = if crash_line.rfind(" at ").is_some() {
        rest.next().unwrap_or_default().to_string()
    } else {
        String::new()
    };

    let mut frames = Vec::new();
    for line in rest {
        if line.is_empty() {
            break;
        }
        match normalize_frame(line) {
            Some(frame) => frames.push(frame),
            None => return TraceParse::Unparseable(line.to_string()),
        }
    }
    if frames.is_empty() {
        return TraceParse::Missing;
    }
    TraceParse::Parsed(CrashTrace {
        crash_line,
        code_line,
        frames,
    })
}

/// Crashes sharing one stack trace signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackTraceCluster {
    pub trace: CrashTrace,
    pub count: usize,
    pub packages: Vec<String>,
}

/// Group crashed head scans by signature, most frequent first. Records whose
/// trace cannot be parsed are logged and left out.
pub fn cluster_crashes<'a, I>(records: I) -> Vec<StackTraceCluster>
where
    I: IntoIterator<Item = &'a ResultRecord>,
{
    let mut clusters: HashMap<String, StackTraceCluster> = HashMap::new();
    for record in records {
        if record.head_count() != ScanCount::Crash {
            continue;
        }
        match parse_stack_trace(&record.head_results) {
            TraceParse::Parsed(trace) => {
                let cluster = clusters
                    .entry(trace.signature())
                    .or_insert_with(|| StackTraceCluster {
                        trace,
                        count: 0,
                        packages: Vec::new(),
                    });
                cluster.count += 1;
                cluster.packages.push(record.package.clone());
            }
            TraceParse::Unparseable(frame) => {
                warn!("{} - unmatched stack frame - {}", record.package, frame);
            }
            TraceParse::Missing => {}
        }
    }

    let mut clusters: Vec<StackTraceCluster> = clusters.into_values().collect();
    clusters.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.trace.signature().cmp(&b.trace.signature()))
    });
    clusters
}

const CRASH_WIDTHS: [usize; 4] = [40, 17, 10, 10];

pub fn crash_page(records: &[ResultRecord], rc: &ReportContext) -> String {
    let crashed: Vec<&ResultRecord> = records.iter().filter(|r| r.crashed()).collect();

    let mut body = String::from("<pre>\n<b>");
    body.push_str(&row(
        "Package",
        None,
        &[
            "Date       Time".to_string(),
            rc.baseline.clone(),
            HEAD_VERSION.to_string(),
        ],
        &CRASH_WIDTHS,
    ));
    body.push_str("</b>");
    for record in &crashed {
        body.push_str(&row(
            &record.package,
            Some(link(&record.package, &record.package)),
            &[
                record.date_line.clone(),
                record.baseline_count().label(),
                record.head_count().label(),
            ],
            &CRASH_WIDTHS,
        ));
    }
    body.push_str("</pre>\n");

    body.push_str("<h2>Stack traces</h2>\n<pre>\n");
    for cluster in cluster_crashes(crashed.iter().copied()) {
        let packages: Vec<String> = cluster
            .packages
            .iter()
            .map(|p| link(p, p))
            .collect();
        body.push_str(&format!(
            "<b>{} occurrence(s)</b> Packages: {}\n",
            cluster.count,
            packages.join(" ")
        ));
        body.push_str(&escape(&cluster.trace.crash_line));
        body.push('\n');
        if !cluster.trace.code_line.is_empty() {
            body.push_str(&escape(&cluster.trace.code_line));
            body.push('\n');
        }
        for frame in &cluster.trace.frames {
            body.push_str(&escape(frame));
            body.push('\n');
        }
        body.push('\n');
    }
    body.push_str("</pre>\n");

    page("Crash report", &body)
}

/// Urls of packages whose head scan crashed, one per line.
pub fn crash_packages(records: &[ResultRecord]) -> String {
    records
        .iter()
        .filter(|r| r.head_count() == ScanCount::Crash)
        .filter_map(|r| r.url.as_deref())
        .map(|url| format!("{}\n", url))
        .collect()
}
