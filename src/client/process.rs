//! Subprocess execution with a wall-clock limit.
//!
//! The analyzer has no timeout of its own. Every external command the client
//! runs goes through [`run_command`], which kills the child when the limit
//! elapses and reports the run as timed out.

use log::debug;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::error::{DacaError, DacaResult};

/// One external command invocation.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Wall-clock limit; `None` waits forever
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Command line for log and error messages.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished (or killed) command.
#[derive(Clone, Debug, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` when killed by a signal or on timeout
    pub exit_code: Option<i32>,
    /// Terminating signal on Unix
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Run `spec` to completion or until its timeout. Failing to start the
/// program is an error; a non-zero exit, a signal or a timeout is not.
///
/// On timeout only the direct child is killed.
pub async fn run_command(spec: &CommandSpec) -> DacaResult<ProcessOutput> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }

    debug!("Running {}", spec.display());
    let start = Instant::now();
    let child = command.spawn().map_err(|e| DacaError::Subprocess {
        command: spec.display(),
        reason: e.to_string(),
    })?;

    let waited = match spec.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(waited) => Some(waited),
            // the dropped future drops the child, which kills it
            Err(_) => None,
        },
        None => Some(child.wait_with_output().await),
    };
    let elapsed = start.elapsed();

    let Some(waited) = waited else {
        debug!("{} timed out after {:?}", spec.display(), elapsed);
        return Ok(ProcessOutput {
            elapsed,
            timed_out: true,
            ..Default::default()
        });
    };
    let output = waited.map_err(|e| DacaError::Subprocess {
        command: spec.display(),
        reason: e.to_string(),
    })?;

    Ok(ProcessOutput {
        exit_code: output.status.code(),
        signal: exit_signal(&output.status),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        elapsed,
        timed_out: false,
    })
}

/// [`run_command`] that also fails on anything but a clean zero exit.
pub async fn run_checked(spec: &CommandSpec) -> DacaResult<ProcessOutput> {
    let output = run_command(spec).await?;
    if output.success() {
        return Ok(output);
    }
    let reason = if output.timed_out {
        format!("timed out after {:?}", output.elapsed)
    } else if let Some(signal) = output.signal {
        format!("killed by signal {}", signal)
    } else {
        format!(
            "exit code {}: {}",
            output.exit_code.unwrap_or(-1),
            output.stderr.trim()
        )
    };
    Err(DacaError::Subprocess {
        command: spec.display(),
        reason,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_captures_output_and_code() {
        let output = run_command(&sh("echo out; echo err >&2; exit 3")).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.success());
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let spec = sh("sleep 5").timeout(Duration::from_millis(100));
        let output = run_command(&spec).await.unwrap();
        assert!(output.timed_out);
        assert!(output.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_signal_reported() {
        let output = run_command(&sh("kill -SEGV $$")).await.unwrap();
        assert_eq!(output.signal, Some(11));
        assert_eq!(output.exit_code, None);
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let spec = CommandSpec::new("/nonexistent/daca-test-binary");
        assert!(matches!(
            run_command(&spec).await,
            Err(DacaError::Subprocess { .. })
        ));
        assert!(run_checked(&sh("exit 1")).await.is_err());
    }
}
