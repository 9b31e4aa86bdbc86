//! Finding streams and their symmetric difference.
//!
//! A finding stream is the analyzer's text output. It is split into chunks,
//! one per diagnostic: the header line (`file:line:col: severity: msg [id]`)
//! plus any code excerpt lines that follow it. Two streams are compared by
//! sorting both chunk lists and walking them in lockstep.

/// Severities that mark a diagnostic header line.
pub const SEVERITIES: &[&str] = &[
    "error",
    "warning",
    "style",
    "performance",
    "portability",
    "information",
    "debug",
];

/// Which input a diff entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn swapped(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// A chunk found by only one side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub side: Side,
    pub chunk: String,
}

/// True for a diagnostic header line.
pub fn is_finding_header(line: &str) -> bool {
    let line = line.trim_end();
    line.ends_with(']')
        && SEVERITIES
            .iter()
            .any(|sev| line.contains(&format!(": {}:", sev)))
}

/// Split a finding stream into per-diagnostic chunks.
///
/// Lines before the first header are dropped. A stream without any header
/// line is split one chunk per non-empty line.
pub fn split_findings(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();

    if !lines.iter().any(|l| is_finding_header(l)) {
        return lines
            .into_iter()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
    }

    let mut chunks = Vec::new();
    let mut current: Option<String> = None;
    for line in lines {
        if is_finding_header(line) {
            if let Some(chunk) = current.take() {
                chunks.push(chunk);
            }
            current = Some(line.to_string());
        } else if let Some(chunk) = current.as_mut() {
            if line.trim().is_empty() {
                continue;
            }
            chunk.push('\n');
            chunk.push_str(line);
        }
    }
    if let Some(chunk) = current {
        chunks.push(chunk);
    }
    chunks
}

/// Number of diagnostics in a stream.
pub fn count_findings(text: &str) -> usize {
    split_findings(text).len()
}

/// Chunks present in only one of `left` and `right`, as multisets.
///
/// Output follows the merged sort order of both inputs, so swapping the
/// arguments yields the same chunks with the sides swapped.
pub fn diff_findings(left: &[String], right: &[String]) -> Vec<DiffEntry> {
    let mut left: Vec<&String> = left.iter().collect();
    let mut right: Vec<&String> = right.iter().collect();
    left.sort();
    right.sort();

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(right[j]) {
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                out.push(DiffEntry {
                    side: Side::Left,
                    chunk: left[i].clone(),
                });
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(DiffEntry {
                    side: Side::Right,
                    chunk: right[j].clone(),
                });
                j += 1;
            }
        }
    }
    out.extend(left[i..].iter().map(|c| DiffEntry {
        side: Side::Left,
        chunk: (*c).clone(),
    }));
    out.extend(right[j..].iter().map(|c| DiffEntry {
        side: Side::Right,
        chunk: (*c).clone(),
    }));
    out
}

/// Render entries as `<label> <chunk>` lines, the body of a record's `diff:`
/// section.
pub fn render_diff(entries: &[DiffEntry], left_label: &str, right_label: &str) -> String {
    let mut out = String::new();
    for entry in entries {
        let label = match entry.side {
            Side::Left => left_label,
            Side::Right => right_label,
        };
        out.push_str(label);
        out.push(' ');
        out.push_str(&entry.chunk);
        out.push('\n');
    }
    out
}
