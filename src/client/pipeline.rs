//! Volunteer work loop: fetch a package, scan it with both analyzer
//! versions, diff, upload.

use chrono::{Local, NaiveTime};
use log::{error, info, warn};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::PathBuf;

use super::builds::{AnalyzerBuild, BuildConfig, Builder};
use super::connection::{CoordinatorClient, RetryPolicy};
use super::fetch::{unpack, Downloader};
use super::process::{run_command, CommandSpec};
use super::runner::{ScanConfig, ScanOutcome, ScanRunner};
use crate::diff::{diff_findings, render_diff, split_findings};
use crate::error::DacaResult;
use crate::storage::record::{
    COUNT_PREFIX, DIFF_HEADER, ELAPSED_PREFIX, HEAD_RESULTS_HEADER, HEAD_TIMING_HEADER,
    INFO_MESSAGES_HEADER, OLD_TIMING_HEADER, OPTIONS_PREFIX, PLATFORM_PREFIX, VERSIONS_PREFIX,
};
use crate::types::VersionPair;

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_SERVER: &str = "cppcheck1.osuosl.org:8000";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Coordinator `host:port`
    pub server: String,
    pub work_path: PathBuf,
    pub jobs: usize,
    /// Explicit package urls; when empty, packages come from the coordinator
    pub packages: Vec<String>,
    /// Stop once the local time reaches this
    pub stop_time: Option<NaiveTime>,
    pub max_packages: Option<usize>,
    /// Print reports instead of uploading them
    pub upload: bool,
    /// Download limit in bytes per second
    pub bandwidth_limit: Option<u64>,
    pub scan: ScanConfig,
    pub retry: RetryPolicy,
}

pub fn default_work_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("daca-work"))
        .unwrap_or_else(|| PathBuf::from("./daca-work"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            work_path: default_work_path(),
            jobs: 1,
            packages: Vec::new(),
            stop_time: None,
            max_packages: None,
            upload: true,
            bandwidth_limit: None,
            scan: ScanConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    MaxPackages,
    StopTime,
    PackageListExhausted,
}

/// Why the loop should stop before taking another package, if it should.
pub fn stop_reason(config: &ClientConfig, processed: usize, now: NaiveTime) -> Option<StopReason> {
    if config.max_packages.map_or(false, |max| processed >= max) {
        return Some(StopReason::MaxPackages);
    }
    if config.stop_time.map_or(false, |stop| now >= stop) {
        return Some(StopReason::StopTime);
    }
    None
}

// ================================================================================================
// REPORT COMPOSITION
// ================================================================================================

/// Lines shared by the result and info uploads.
#[derive(Clone, Debug)]
pub struct ReportHeader {
    pub options: String,
    pub platform: String,
    pub client_version: String,
    pub compiler: String,
    pub versions: VersionPair,
    pub head_commit: String,
}

impl ReportHeader {
    fn write_to(&self, out: &mut String) {
        let _ = writeln!(out, "{} {}", OPTIONS_PREFIX, self.options);
        let _ = writeln!(out, "{} {}", PLATFORM_PREFIX, self.platform);
        let _ = writeln!(out, "client-version: {}", self.client_version);
        let _ = writeln!(out, "compiler: {}", self.compiler);
        let _ = writeln!(out, "{} {}", VERSIONS_PREFIX, self.versions.declaration());
        let _ = writeln!(out, "head-info: {}", self.head_commit);
    }
}

fn push_section(out: &mut String, header: &str, body: &str) {
    out.push_str(header);
    out.push('\n');
    out.push_str(body);
    if !body.is_empty() && !body.ends_with('\n') {
        out.push('\n');
    }
}

/// Result upload payload. The diff is left out when either scan crashed or
/// timed out.
pub fn compose_report(header: &ReportHeader, baseline: &ScanOutcome, head: &ScanOutcome) -> String {
    let mut out = String::new();
    header.write_to(&mut out);
    let _ = writeln!(
        out,
        "{} {} {}",
        COUNT_PREFIX,
        baseline.count_token(),
        head.count_token()
    );
    let _ = writeln!(
        out,
        "{} {:.1} {:.1}",
        ELAPSED_PREFIX,
        baseline.elapsed().as_secs_f64(),
        head.elapsed().as_secs_f64()
    );
    push_section(&mut out, HEAD_TIMING_HEADER, head.timing_text());
    push_section(&mut out, OLD_TIMING_HEADER, baseline.timing_text());
    push_section(&mut out, HEAD_RESULTS_HEADER, head.results_text());

    if !baseline.is_failure() && !head.is_failure() {
        let entries = diff_findings(
            &split_findings(baseline.results_text()),
            &split_findings(head.results_text()),
        );
        let diff = render_diff(&entries, &header.versions.baseline, &header.versions.head);
        push_section(&mut out, DIFF_HEADER, &diff);
    }
    out
}

/// Info upload payload: the head scan's information messages.
pub fn compose_info(header: &ReportHeader, head: &ScanOutcome) -> String {
    let mut out = String::new();
    header.write_to(&mut out);
    push_section(&mut out, INFO_MESSAGES_HEADER, head.info_text());
    out
}

/// First line of `c++ --version`.
pub async fn detect_compiler() -> String {
    let spec = CommandSpec::new("c++").arg("--version");
    match run_command(&spec).await {
        Ok(output) if output.success() => output
            .stdout
            .lines()
            .next()
            .unwrap_or("unknown")
            .trim()
            .to_string(),
        _ => "unknown".to_string(),
    }
}

// ================================================================================================
// PIPELINE
// ================================================================================================

/// What became of one package.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageStatus {
    Uploaded,
    Printed,
    NoSource,
}

struct Analyzers {
    versions: VersionPair,
    baseline: AnalyzerBuild,
    head: AnalyzerBuild,
}

/// The previous baseline build, if the coordinator still compares against
/// the same baseline. Head is never reused.
fn reusable_baseline(previous: Option<&Analyzers>, versions: &VersionPair) -> Option<AnalyzerBuild> {
    previous
        .filter(|prev| prev.versions.baseline == versions.baseline)
        .map(|prev| prev.baseline.clone())
}

pub struct ClientPipeline {
    config: ClientConfig,
    coordinator: CoordinatorClient,
    downloader: Downloader,
    builder: Builder,
    runner: ScanRunner,
    pending: VecDeque<String>,
    compiler: Option<String>,
}

impl ClientPipeline {
    pub fn new(config: ClientConfig) -> DacaResult<Self> {
        let coordinator = CoordinatorClient::new(config.server.clone(), config.retry);
        let downloader = Downloader::new(config.bandwidth_limit)?;
        let builder = Builder::new(BuildConfig::new(&config.work_path, config.jobs));
        let runner = ScanRunner::new(ScanConfig {
            jobs: config.jobs,
            ..config.scan.clone()
        });
        Ok(Self {
            pending: config.packages.iter().cloned().collect(),
            config,
            coordinator,
            downloader,
            builder,
            runner,
            compiler: None,
        })
    }

    /// Process packages until a stop condition holds. Failures of single
    /// packages are logged and the loop continues.
    pub async fn run(&mut self) -> DacaResult<StopReason> {
        let explicit_list = !self.config.packages.is_empty();
        let mut analyzers: Option<Analyzers> = None;
        let mut processed = 0;

        loop {
            if let Some(reason) = stop_reason(&self.config, processed, Local::now().time()) {
                return Ok(reason);
            }

            let versions = match self.coordinator.get_versions().await {
                Ok(versions) => versions,
                Err(e) => {
                    warn!("Cannot get versions from {}: {}", self.coordinator.addr(), e);
                    tokio::time::sleep(self.config.retry.delay).await;
                    continue;
                }
            };
            match self.prepare_analyzers(analyzers.as_ref(), versions).await {
                Ok(ready) => analyzers = Some(ready),
                Err(e) => {
                    error!("Cannot build the analyzers: {}", e);
                    tokio::time::sleep(self.config.retry.delay).await;
                    continue;
                }
            }
            let Some(current) = analyzers.as_ref() else {
                continue;
            };

            let url = if explicit_list {
                match self.pending.pop_front() {
                    Some(url) => url,
                    None => return Ok(StopReason::PackageListExhausted),
                }
            } else {
                match self.coordinator.get_package().await {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("Cannot get a package: {}", e);
                        tokio::time::sleep(self.config.retry.delay).await;
                        continue;
                    }
                }
            };

            match self.process_package(&url, current).await {
                Ok(status) => info!("{}: {:?}", url, status),
                Err(e) => error!("{}: abandoned: {}", url, e),
            }
            processed += 1;
        }
    }

    /// Bring head up to date for this iteration. The baseline build is
    /// reused while the baseline version stays the same.
    async fn prepare_analyzers(
        &self,
        previous: Option<&Analyzers>,
        versions: VersionPair,
    ) -> DacaResult<Analyzers> {
        let baseline = match reusable_baseline(previous, &versions) {
            Some(build) => build,
            None => {
                info!("Comparing {} against {}", versions.head, versions.baseline);
                self.builder.ensure_built(&versions.baseline).await?
            }
        };
        let head = self.builder.ensure_built(&versions.head).await?;
        if let Some(prev) = previous {
            if prev.head.commit != head.commit {
                info!("{} moved to {}", versions.head, head.commit);
            }
        }
        Ok(Analyzers {
            versions,
            baseline,
            head,
        })
    }

    async fn header(&mut self, analyzers: &Analyzers) -> ReportHeader {
        if self.compiler.is_none() {
            self.compiler = Some(detect_compiler().await);
        }
        let source_placeholder = PathBuf::from("temp");
        ReportHeader {
            options: self
                .runner
                .arguments(&source_placeholder, self.runner.config().jobs)
                .join(" "),
            platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            client_version: CLIENT_VERSION.to_string(),
            compiler: self.compiler.clone().unwrap_or_default(),
            versions: analyzers.versions.clone(),
            head_commit: analyzers.head.commit.clone(),
        }
    }

    async fn process_package(&mut self, url: &str, analyzers: &Analyzers) -> DacaResult<PackageStatus> {
        let archive = self.config.work_path.join("package.archive");
        let source_dir = self.config.work_path.join("temp");

        self.downloader.download(url, &archive).await?;
        let files = unpack(&archive, &source_dir).await?;
        if files == 0 {
            info!("{}: no source files", url);
            if self.config.upload {
                self.coordinator.upload_nodata(url).await?;
            }
            return Ok(PackageStatus::NoSource);
        }

        let baseline = self
            .runner
            .scan(&analyzers.baseline.binary, &source_dir, files)
            .await?;
        let head = self
            .runner
            .scan(&analyzers.head.binary, &source_dir, files)
            .await?;
        info!(
            "{}: {} {} / {} {}",
            url,
            analyzers.versions.baseline,
            baseline.return_code(),
            analyzers.versions.head,
            head.return_code()
        );

        let header = self.header(analyzers).await;
        let report = compose_report(&header, &baseline, &head);
        let info_report = compose_info(&header, &head);

        if !self.config.upload {
            println!("{}\n{}", url, report);
            return Ok(PackageStatus::Printed);
        }
        self.coordinator.upload_result(url, &report).await?;
        if let Err(e) = self.coordinator.upload_info(url, &info_report).await {
            warn!("{}: info upload failed: {}", url, e);
        }
        Ok(PackageStatus::Uploaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::runner::ScanResult;
    use crate::storage::ResultRecord;
    use std::time::Duration;

    fn header() -> ReportHeader {
        ReportHeader {
            options: "--enable=style -j1".to_string(),
            platform: "linux x86_64".to_string(),
            client_version: "0.1.0".to_string(),
            compiler: "g++ 13".to_string(),
            versions: VersionPair::new("2.14"),
            head_commit: "abc123".to_string(),
        }
    }

    fn success(findings: &str, secs: f64) -> ScanOutcome {
        let (findings, info, count) = crate::client::runner::split_messages(findings);
        ScanOutcome::Success(ScanResult {
            count,
            findings,
            info,
            timing: String::new(),
            elapsed: Duration::from_secs_f64(secs),
        })
    }

    #[test]
    fn test_report_diff_keeps_only_differences() {
        let baseline = success(
            "a.c:3:1: error: E1 [E1]\na.c:9:1: style: E2 [E2]\n",
            5.0,
        );
        let head = success("a.c:9:1: style: E2 [E2]\n", 1.0);
        let text = compose_report(&header(), &baseline, &head);

        assert!(text.contains("cppcheck: 2.14 head\n"));
        assert!(text.contains("count: 2 1\n"));
        assert!(text.contains("elapsed-time: 5.0 1.0\n"));
        let diff = text.split("diff:\n").nth(1).unwrap();
        assert_eq!(diff, "2.14 a.c:3:1: error: E1 [E1]\n");

        let stored = format!("2024-03-05 10:00\nftp://x/pkgX.tar.gz\n{}", text);
        let record = ResultRecord::parse("pkgX", &stored);
        assert_eq!(record.elapsed_pair(), Some((5.0, 1.0)));
        assert_eq!(record.diff.len(), 1);
    }

    #[test]
    fn test_crash_report_has_no_diff() {
        let baseline = success("a.c:3:1: error: E1 [E1]\n", 1.0);
        let head = ScanOutcome::Crash {
            signal: Some(11),
            stack_trace: Some("Thread 1 received signal SIGSEGV\n".to_string()),
            output: String::new(),
            elapsed: Duration::from_secs(2),
        };
        let text = compose_report(&header(), &baseline, &head);
        assert!(text.contains("count: 1 Crash!\n"));
        assert!(text.contains("head results:\nThread 1 received signal SIGSEGV\n"));
        assert!(!text.contains("diff:"));
    }

    #[test]
    fn test_info_payload() {
        let head = success(
            "a.c:1:1: information: no config [checkLibraryFunction]\n",
            1.0,
        );
        let text = compose_info(&header(), &head);
        assert!(text.ends_with(
            "info messages:\na.c:1:1: information: no config [checkLibraryFunction]\n"
        ));
    }

    #[test]
    fn test_stop_reasons() {
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let config = ClientConfig {
            max_packages: Some(2),
            stop_time: NaiveTime::from_hms_opt(18, 0, 0),
            ..Default::default()
        };
        assert_eq!(stop_reason(&config, 1, noon), None);
        assert_eq!(stop_reason(&config, 2, noon), Some(StopReason::MaxPackages));
        let evening = NaiveTime::from_hms_opt(18, 30, 0).unwrap();
        assert_eq!(stop_reason(&config, 0, evening), Some(StopReason::StopTime));
    }

    fn build(version: &str, commit: &str) -> AnalyzerBuild {
        AnalyzerBuild {
            version: version.to_string(),
            commit: commit.to_string(),
            binary: PathBuf::from(format!("/work/{}/cppcheck", version)),
        }
    }

    #[test]
    fn test_baseline_build_reused_only_for_same_baseline() {
        let previous = Analyzers {
            versions: VersionPair::new("2.14"),
            baseline: build("2.14", "aaa"),
            head: build("head", "bbb"),
        };
        assert_eq!(
            reusable_baseline(Some(&previous), &VersionPair::new("2.14")),
            Some(build("2.14", "aaa"))
        );
        assert_eq!(reusable_baseline(Some(&previous), &VersionPair::new("2.15")), None);
        assert_eq!(reusable_baseline(None, &VersionPair::new("2.14")), None);
    }

    #[tokio::test]
    async fn test_build_failure_keeps_the_loop_running() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let version_requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&version_requests);
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                stream.read_to_end(&mut request).await.unwrap();
                if request.starts_with(b"GetCppcheckVersions") {
                    counter.fetch_add(1, Ordering::SeqCst);
                    stream.write_all(b"head 2.14").await.unwrap();
                }
            }
        });

        // a work path below a regular file cannot be created
        let tmp_dir = tempfile::tempdir().unwrap();
        let blocker = tmp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let config = ClientConfig {
            server: addr.to_string(),
            work_path: blocker.join("work"),
            packages: vec!["pkg1".to_string(), "pkg2".to_string()],
            retry: RetryPolicy {
                attempts: 1,
                delay: Duration::from_millis(10),
            },
            ..Default::default()
        };
        let mut pipeline = ClientPipeline::new(config).unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(500), pipeline.run()).await;
        assert!(outcome.is_err(), "run() returned early: {:?}", outcome);
        assert!(version_requests.load(Ordering::SeqCst) >= 2);
        assert_eq!(pipeline.pending.len(), 2);
    }
}
