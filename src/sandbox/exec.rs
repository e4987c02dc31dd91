//! Subprocess execution of the sandbox driver under wall-clock control.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Prefix of the single structured report line the driver prints.
pub const REPORT_PREFIX: &str = "MODFORGE_REPORT:";

/// Errors that prevent the runner from producing any report at all.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecError {
    #[error("failed to spawn sandbox interpreter {bin:?}: {source}")]
    #[diagnostic(
        code(modforge::sandbox::spawn),
        help("Check that the configured interpreter exists inside the runner image.")
    )]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox execution cancelled")]
    #[diagnostic(code(modforge::sandbox::cancelled))]
    Cancelled,

    #[error("sandbox I/O failure: {0}")]
    #[diagnostic(code(modforge::sandbox::io))]
    Io(#[from] std::io::Error),
}

/// One test outcome reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTestOutcome {
    pub id: String,
    pub passed: bool,
    #[serde(default)]
    pub message: String,
}

/// A dynamic import the hook denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDeniedImport {
    pub name: String,
    #[serde(default)]
    pub source: String,
}

/// A chart artifact the generated tests emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChartArtifact {
    pub path: String,
    pub mime: String,
    #[serde(default)]
    pub series: Vec<String>,
}

/// Resource usage sampled by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RawResourceUsage {
    #[serde(default)]
    pub cpu_seconds: f64,
    #[serde(default)]
    pub max_rss_bytes: u64,
}

/// The driver's merged self-report, printed as one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawSandboxReport {
    #[serde(default)]
    pub tests: Vec<RawTestOutcome>,
    #[serde(default)]
    pub denied_imports: Vec<RawDeniedImport>,
    #[serde(default)]
    pub artifacts: Vec<RawChartArtifact>,
    #[serde(default)]
    pub resource: RawResourceUsage,
    #[serde(default)]
    pub adapter_loaded: bool,
    #[serde(default)]
    pub adapter_error: Option<String>,
    #[serde(default)]
    pub harness_error: Option<String>,
}

/// What came back from one driver execution.
#[derive(Debug)]
pub struct ExecOutcome {
    pub report: Option<RawSandboxReport>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl ExecOutcome {
    /// Killed by a signal (no exit code) without timing out — the
    /// rlimit enforcement path.
    #[must_use]
    pub fn killed_by_limits(&self) -> bool {
        !self.timed_out && self.exit_code.is_none()
    }
}

/// Run the driver script under the wall-clock cap, honouring the
/// cancellation token. The child is killed on both timeout and cancel.
pub async fn run_driver(
    python_bin: &str,
    workspace_root: &Path,
    driver: &Path,
    wall_clock: Duration,
    cancel: &CancellationToken,
) -> Result<ExecOutcome, ExecError> {
    let started = Instant::now();
    let mut child = Command::new(python_bin)
        .arg(driver)
        .current_dir(workspace_root)
        .env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .env("PYTHONHASHSEED", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            bin: python_bin.to_string(),
            source,
        })?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let reader = tokio::spawn(async move {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let _ = stdout_pipe.read_to_string(&mut stdout).await;
        let _ = stderr_pipe.read_to_string(&mut stderr).await;
        (stdout, stderr)
    });

    enum WaitOutcome {
        Done(std::process::ExitStatus),
        TimedOut,
        Cancelled,
    }

    let waited = tokio::select! {
        () = cancel.cancelled() => WaitOutcome::Cancelled,
        status = child.wait() => WaitOutcome::Done(status?),
        () = tokio::time::sleep(wall_clock) => WaitOutcome::TimedOut,
    };

    let (status, timed_out) = match waited {
        WaitOutcome::Cancelled => {
            let _ = child.kill().await;
            reader.abort();
            return Err(ExecError::Cancelled);
        }
        WaitOutcome::TimedOut => {
            let _ = child.kill().await;
            (child.wait().await?, true)
        }
        WaitOutcome::Done(status) => (status, false),
    };
    let status = Some(status);

    let (stdout, stderr) = reader.await.unwrap_or_default();
    let elapsed = started.elapsed();

    let report = if timed_out {
        None
    } else {
        stdout
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix(REPORT_PREFIX))
            .and_then(|payload| serde_json::from_str::<RawSandboxReport>(payload).ok())
    };

    let exit_code = if timed_out {
        None
    } else {
        status.and_then(|s| s.code())
    };

    Ok(ExecOutcome {
        report,
        stdout,
        stderr,
        exit_code,
        timed_out,
        elapsed,
    })
}
