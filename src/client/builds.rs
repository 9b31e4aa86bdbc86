//! Local analyzer builds, one checkout per compared version.
//!
//! ```text
//! <work>/<version>/                 git checkout
//! <work>/<version>/cppcheck         built binary
//! <work>/<version>/.daca-built-commit
//! ```

use log::info;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::process::{run_checked, CommandSpec};
use crate::error::DacaResult;
use crate::types::HEAD_VERSION;

pub const DEFAULT_REPOSITORY: &str = "https://github.com/danmar/cppcheck.git";
pub const BUILT_MARKER: &str = ".daca-built-commit";
pub const ANALYZER_BINARY: &str = "cppcheck";

#[derive(Clone, Debug)]
pub struct BuildConfig {
    pub work_path: PathBuf,
    pub repository: String,
    pub jobs: usize,
    pub git_timeout: Duration,
    pub build_timeout: Duration,
}

impl BuildConfig {
    pub fn new(work_path: impl Into<PathBuf>, jobs: usize) -> Self {
        Self {
            work_path: work_path.into(),
            repository: DEFAULT_REPOSITORY.to_string(),
            jobs: jobs.max(1),
            git_timeout: Duration::from_secs(15 * 60),
            build_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Git revision to check out for `version`.
pub fn checkout_ref(version: &str) -> String {
    if version == HEAD_VERSION {
        "origin/main".to_string()
    } else {
        version.to_string()
    }
}

/// A build is needed unless the marker names exactly `commit`.
pub fn needs_build(marker: Option<&str>, commit: &str) -> bool {
    marker.map(str::trim) != Some(commit)
}

/// A checked-out and built analyzer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalyzerBuild {
    pub version: String,
    pub commit: String,
    pub binary: PathBuf,
}

pub struct Builder {
    config: BuildConfig,
}

impl Builder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.config.work_path.join(version)
    }

    fn git(&self, dir: &Path) -> CommandSpec {
        CommandSpec::new("git")
            .current_dir(dir)
            .timeout(self.config.git_timeout)
    }

    /// Check out `version` and build it if the checked-out commit changed
    /// since the last build.
    pub async fn ensure_built(&self, version: &str) -> DacaResult<AnalyzerBuild> {
        let dir = self.version_dir(version);
        tokio::fs::create_dir_all(&self.config.work_path).await?;

        if dir.join(".git").is_dir() {
            run_checked(&self.git(&dir).args(["fetch", "--tags", "origin"])).await?;
        } else {
            info!("Cloning {} for {}", self.config.repository, version);
            run_checked(
                &self
                    .git(&self.config.work_path)
                    .arg("clone")
                    .arg(self.config.repository.clone())
                    .arg(version),
            )
            .await?;
        }
        run_checked(
            &self
                .git(&dir)
                .args(["checkout", "--detach", "--force"])
                .arg(checkout_ref(version)),
        )
        .await?;

        let commit = run_checked(&self.git(&dir).args(["rev-parse", "HEAD"]))
            .await?
            .stdout
            .trim()
            .to_string();

        let marker_path = dir.join(BUILT_MARKER);
        let marker = tokio::fs::read_to_string(&marker_path).await.ok();
        let binary = dir.join(ANALYZER_BINARY);
        if needs_build(marker.as_deref(), &commit) || !binary.is_file() {
            info!("Building {} at {}", version, commit);
            run_checked(
                &CommandSpec::new("make")
                    .current_dir(&dir)
                    .arg(format!("-j{}", self.config.jobs))
                    .args(["MATCHCOMPILER=yes", "CXXFLAGS=-O2 -g -w"])
                    .timeout(self.config.build_timeout),
            )
            .await?;
            tokio::fs::write(&marker_path, format!("{}\n", commit)).await?;
        } else {
            info!("{} already built at {}", version, commit);
        }

        Ok(AnalyzerBuild {
            version: version.to_string(),
            commit,
            binary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_ref() {
        assert_eq!(checkout_ref("head"), "origin/main");
        assert_eq!(checkout_ref("2.14"), "2.14");
    }

    #[test]
    fn test_needs_build() {
        assert!(needs_build(None, "abc"));
        assert!(needs_build(Some("def\n"), "abc"));
        assert!(!needs_build(Some("abc\n"), "abc"));
    }

    #[test]
    fn test_version_dir() {
        let builder = Builder::new(BuildConfig::new("/work", 0));
        assert_eq!(builder.version_dir("2.14"), PathBuf::from("/work/2.14"));
        assert_eq!(builder.config.jobs, 1);
    }
}
