//! Analyzer invocation and outcome classification.

use log::{info, warn};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use super::process::{run_command, CommandSpec, ProcessOutput};
use crate::diff::is_finding_header;
use crate::error::DacaResult;
use crate::report::crash::SIGNAL_MARKER;
use crate::storage::record::{CRASH_MARKER, TIMEOUT_MARKER};

/// Printed by the analyzer when one of its worker processes died.
pub const CHILD_CRASH_MARKER: &str = "Internal error: Child process crashed with signal ";

/// Return code of a package without analyzable source.
pub const RETURN_CODE_NO_SOURCE: i64 = -101;
/// Return code of a killed, overlong scan.
pub const RETURN_CODE_TIMEOUT: i64 = -999;

/// Timing lines kept per scan besides the overall time.
pub const TIMING_LINES_KEPT: usize = 5;

pub const DEFAULT_ANALYZER_OPTIONS: &[&str] = &[
    "--library=posix",
    "--library=gnu",
    "--showtime=top5_summary",
    "-D__GNUC__",
    "--check-library",
    "--inconclusive",
    "--enable=style,information",
    "--inline-suppr",
    "--template=daca2",
    "--disable=missingInclude",
    "--suppress=unmatchedSuppression",
    "--debug-warnings",
    "--suppress=autoNoType",
    "--suppress=valueFlowBailout",
    "--suppress=bailoutUninitVar",
    "--suppress=symbolDatabaseWarning",
    "--platform=unix64",
];

/// A completed scan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanResult {
    /// Findings other than information messages
    pub count: usize,
    pub findings: String,
    pub info: String,
    /// Ranked `--showtime` lines
    pub timing: String,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScanOutcome {
    Success(ScanResult),
    NoSource,
    Timeout {
        elapsed: Duration,
    },
    Crash {
        signal: Option<i32>,
        /// Debugger output starting at the signal line
        stack_trace: Option<String>,
        /// What the analyzer printed before dying
        output: String,
        elapsed: Duration,
    },
}

impl ScanOutcome {
    /// Finding count, or `-101` no source, `-999` timeout, `-<signal>`
    /// crash (`-1` when the signal is unknown).
    pub fn return_code(&self) -> i64 {
        match self {
            ScanOutcome::Success(result) => result.count as i64,
            ScanOutcome::NoSource => RETURN_CODE_NO_SOURCE,
            ScanOutcome::Timeout { .. } => RETURN_CODE_TIMEOUT,
            ScanOutcome::Crash { signal, .. } => -i64::from(signal.unwrap_or(1)),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ScanOutcome::Timeout { .. } | ScanOutcome::Crash { .. })
    }

    /// Field of the uploaded `count:` line.
    pub fn count_token(&self) -> String {
        match self {
            ScanOutcome::Success(result) => result.count.to_string(),
            ScanOutcome::NoSource => "0".to_string(),
            ScanOutcome::Timeout { .. } => TIMEOUT_MARKER.to_string(),
            ScanOutcome::Crash { .. } => CRASH_MARKER.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            ScanOutcome::Success(result) => result.elapsed,
            ScanOutcome::NoSource => Duration::ZERO,
            ScanOutcome::Timeout { elapsed } | ScanOutcome::Crash { elapsed, .. } => *elapsed,
        }
    }

    /// Body of the `head results:` section.
    pub fn results_text(&self) -> &str {
        match self {
            ScanOutcome::Success(result) => &result.findings,
            ScanOutcome::Crash {
                stack_trace: Some(trace),
                ..
            } => trace,
            ScanOutcome::Crash { output, .. } => output,
            ScanOutcome::NoSource | ScanOutcome::Timeout { .. } => "",
        }
    }

    pub fn timing_text(&self) -> &str {
        match self {
            ScanOutcome::Success(result) => &result.timing,
            _ => "",
        }
    }

    pub fn info_text(&self) -> &str {
        match self {
            ScanOutcome::Success(result) => &result.info,
            _ => "",
        }
    }
}

/// Split diagnostic output into findings and information messages. A
/// message's continuation lines (code excerpt, caret) follow its header.
pub fn split_messages(output: &str) -> (String, String, usize) {
    let mut findings = String::new();
    let mut info = String::new();
    let mut count = 0;
    let mut in_info = false;
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if is_finding_header(line) {
            in_info = line.contains(": information: ");
            if !in_info {
                count += 1;
            }
        }
        let target = if in_info { &mut info } else { &mut findings };
        target.push_str(line);
        target.push('\n');
    }
    (findings, info, count)
}

fn child_crash_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!("{}(\\d+)", regex::escape(CHILD_CRASH_MARKER)))
            .expect("static crash marker regex")
    })
}

/// `Some(signal)` when the run crashed; the inner value is `None` when the
/// signal cannot be told.
pub fn crash_signal(output: &ProcessOutput) -> Option<Option<i32>> {
    if let Some(signal) = output.signal {
        return Some(Some(signal));
    }
    let text = output.combined();
    if let Some(caps) = child_crash_regex().captures(&text) {
        return Some(caps[1].parse().ok());
    }
    if text.contains(CHILD_CRASH_MARKER) {
        return Some(None);
    }
    match output.exit_code {
        Some(0) | None => None,
        Some(_) => Some(None),
    }
}

fn timing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>.+?): (?P<secs>\d+(?:\.\d+)?)s\b").expect("static timing regex")
    })
}

/// Slowest `--showtime` entries, slowest first, then the overall time.
pub fn rank_timing(output: &str) -> String {
    let mut entries: Vec<(f64, &str)> = Vec::new();
    let mut overall = None;
    for line in output.lines().map(str::trim) {
        let Some(caps) = timing_regex().captures(line) else {
            continue;
        };
        if caps["name"].starts_with("Overall time") {
            overall = Some(line);
            continue;
        }
        if let Ok(secs) = caps["secs"].parse::<f64>() {
            entries.push((secs, line));
        }
    }
    entries.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut text = String::new();
    for (_, line) in entries.iter().take(TIMING_LINES_KEPT) {
        text.push_str(line);
        text.push('\n');
    }
    if let Some(line) = overall {
        text.push_str(line);
        text.push('\n');
    }
    text
}

/// Debugger output from the signal line on.
pub fn extract_stack_trace(debugger_output: &str) -> Option<String> {
    let start = debugger_output.find(SIGNAL_MARKER)?;
    let line_start = debugger_output[..start].rfind('\n').map_or(0, |p| p + 1);
    let trace = debugger_output[line_start..].trim_end();
    if trace.is_empty() {
        None
    } else {
        Some(format!("{}\n", trace))
    }
}

/// Classify a finished analyzer run.
pub fn classify(output: &ProcessOutput) -> ScanOutcome {
    if output.timed_out {
        return ScanOutcome::Timeout {
            elapsed: output.elapsed,
        };
    }
    if let Some(signal) = crash_signal(output) {
        return ScanOutcome::Crash {
            signal,
            stack_trace: None,
            output: output.combined(),
            elapsed: output.elapsed,
        };
    }
    let (findings, info, count) = split_messages(&output.stderr);
    ScanOutcome::Success(ScanResult {
        count,
        findings,
        info,
        timing: rank_timing(&output.stdout),
        elapsed: output.elapsed,
    })
}

#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub jobs: usize,
    pub timeout: Duration,
    /// Re-run a crashed scan under the debugger to capture a stack trace
    pub use_debugger: bool,
    pub debugger: PathBuf,
    pub options: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            timeout: Duration::from_secs(60 * 60),
            use_debugger: true,
            debugger: PathBuf::from("gdb"),
            options: DEFAULT_ANALYZER_OPTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct ScanRunner {
    config: ScanConfig,
}

impl ScanRunner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Analyzer arguments for scanning `source_dir` with `jobs` workers.
    pub fn arguments(&self, source_dir: &Path, jobs: usize) -> Vec<String> {
        let mut args = self.config.options.clone();
        args.push(format!("-j{}", jobs.max(1)));
        args.push(format!("-rp={}", source_dir.display()));
        args.push(source_dir.display().to_string());
        args
    }

    /// Scan `source_dir` with the analyzer at `analyzer`.
    pub async fn scan(
        &self,
        analyzer: &Path,
        source_dir: &Path,
        source_files: usize,
    ) -> DacaResult<ScanOutcome> {
        if source_files == 0 {
            return Ok(ScanOutcome::NoSource);
        }

        let spec = CommandSpec::new(analyzer)
            .args(self.arguments(source_dir, self.config.jobs))
            .timeout(self.config.timeout);
        let output = run_command(&spec).await?;
        let mut outcome = classify(&output);

        if let ScanOutcome::Crash {
            signal,
            stack_trace,
            ..
        } = &mut outcome
        {
            warn!(
                "{} crashed (signal {:?}) after {:.1}s",
                analyzer.display(),
                signal,
                output.elapsed.as_secs_f64()
            );
            if self.config.use_debugger {
                *stack_trace = self.debugger_trace(analyzer, source_dir).await;
            }
        }
        Ok(outcome)
    }

    /// One single-worker re-run under the debugger. Its result is never
    /// classified again.
    async fn debugger_trace(&self, analyzer: &Path, source_dir: &Path) -> Option<String> {
        let spec = CommandSpec::new(&self.config.debugger)
            .args(["--batch", "-ex", "run", "-ex", "bt", "--return-child-result", "--args"])
            .arg(analyzer.display().to_string())
            .args(self.arguments(source_dir, 1))
            .timeout(self.config.timeout);
        match run_command(&spec).await {
            Ok(output) => {
                let trace = extract_stack_trace(&output.combined());
                if trace.is_none() {
                    info!("Debugger run did not reproduce the crash");
                }
                trace
            }
            Err(e) => {
                warn!("Debugger run failed: {}", e);
                None
            }
        }
    }
}
