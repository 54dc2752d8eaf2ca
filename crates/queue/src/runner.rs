//! Process execution and pass/fail determination for a single test
//!
//! A test fails when the process cannot be spawned, exits unsuccessfully,
//! exceeds its timeout, or prints the casperjs failure summary line. The
//! summary check runs even on a clean exit because some engines (SlimerJS)
//! exit 0 on failure.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::Invocation;

static FAILURE_SUMMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"FAIL \d+ tests? executed in \d+\.\d+s, \d+ passed, \d+ failed, \d+ dubious, \d+ skipped\.",
    )
    .expect("failure summary pattern is valid")
});

/// The failure summary line in `stdout`, if any
pub fn detect_failure_summary(stdout: &str) -> Option<&str> {
    FAILURE_SUMMARY.find(stdout).map(|m| m.as_str())
}

/// How a finished process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Success,
    Failed { code: Option<i32> },
    TimedOut(Duration),
}

/// Captured result of one process execution
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
}

/// The primitive that actually runs a process.
///
/// `Err` means the process could not be started at all.
#[async_trait]
pub trait ProcessExec: Send + Sync {
    async fn exec(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput>;
}

/// Runs invocations as child processes on the tokio runtime
#[derive(Debug, Clone, Default)]
pub struct TokioExec {
    timeout: Option<Duration>,
}

impl TokioExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill any invocation running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How long pipe readers may keep draining after a timed out child is
/// killed. A grandchild can hold the pipe open past that.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Collects one child pipe on its own task, so output written before a
/// timeout is kept.
struct PipeCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl PipeCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else { return };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                }
            }
        });
        Self { buf, task }
    }

    /// Wait for the reader (at most `grace`, if given) and return what it read
    async fn finish(mut self, grace: Option<Duration>) -> String {
        match grace {
            None => {
                let _ = (&mut self.task).await;
            }
            Some(grace) => {
                if tokio::time::timeout(grace, &mut self.task).await.is_err() {
                    self.task.abort();
                }
            }
        }
        let text = String::from_utf8_lossy(&self.buf.lock()).into_owned();
        text
    }
}

fn exit_status(status: std::process::ExitStatus) -> ProcessStatus {
    if status.success() {
        ProcessStatus::Success
    } else {
        ProcessStatus::Failed {
            code: status.code(),
        }
    }
}

#[async_trait]
impl ProcessExec for TokioExec {
    async fn exec(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn()?;
        let stdout = PipeCapture::spawn(child.stdout.take());
        let stderr = PipeCapture::spawn(child.stderr.take());

        let (status, grace) = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => (exit_status(status?), None),
                Err(_) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    (ProcessStatus::TimedOut(limit), Some(DRAIN_GRACE))
                }
            },
            None => (exit_status(child.wait().await?), None),
        };

        let stdout = stdout.finish(grace).await;
        let stderr = stderr.finish(grace).await;

        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
        })
    }
}

/// Why a test execution counted as failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The command could not be built
    InvalidCommand { reason: String },
    /// The process could not be started
    Spawn { reason: String },
    /// The process exited unsuccessfully (`None` when killed by a signal)
    ExitStatus { code: Option<i32> },
    TimedOut { after_ms: u64 },
    /// Clean exit, but stdout carried the failure summary
    SummaryLine { line: String },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidCommand { reason } => write!(f, "invalid command: {}", reason),
            FailureKind::Spawn { reason } => write!(f, "failed to spawn: {}", reason),
            FailureKind::ExitStatus { code: Some(code) } => write!(f, "exited with status {}", code),
            FailureKind::ExitStatus { code: None } => f.write_str("terminated by signal"),
            FailureKind::TimedOut { after_ms } => write!(f, "timed out after {} ms", after_ms),
            FailureKind::SummaryLine { line } => write!(f, "reported failures: {}", line),
        }
    }
}

/// The recorded result of one test execution attempt. Never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Full command line, report flag included
    pub command: String,
    /// Command line without the report flag
    pub readable_command: String,
    pub file: PathBuf,
    pub stdout: String,
    pub stderr: String,
    pub failure: Option<FailureKind>,
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Outcome for a test whose command could not even be built
    pub fn invalid(file: PathBuf, reason: String) -> Self {
        Self {
            command: String::new(),
            readable_command: String::new(),
            file,
            stdout: String::new(),
            stderr: String::new(),
            failure: Some(FailureKind::InvalidCommand { reason }),
            duration: Duration::ZERO,
        }
    }
}

/// Turns process results into [`ExecutionOutcome`]s. Test failures never
/// escape as errors.
#[derive(Clone)]
pub struct ProcessRunner {
    exec: Arc<dyn ProcessExec>,
}

impl ProcessRunner {
    pub fn new(exec: Arc<dyn ProcessExec>) -> Self {
        Self { exec }
    }

    pub async fn run(&self, invocation: &Invocation) -> ExecutionOutcome {
        let command = invocation.command_line();
        debug!("Running: {}", command);

        let start = Instant::now();
        let result = self.exec.exec(invocation).await;
        let duration = start.elapsed();

        let (stdout, stderr, failure) = match result {
            Ok(output) => {
                let failure = classify(&output);
                (output.stdout, output.stderr, failure)
            }
            Err(e) => (
                String::new(),
                String::new(),
                Some(FailureKind::Spawn {
                    reason: e.to_string(),
                }),
            ),
        };

        if let Some(failure) = &failure {
            warn!("✗ {} - {}", invocation.file.display(), failure);
        }

        ExecutionOutcome {
            command,
            readable_command: invocation.readable_command_line(),
            file: invocation.file.clone(),
            stdout,
            stderr,
            failure,
            duration,
        }
    }
}

fn classify(output: &ProcessOutput) -> Option<FailureKind> {
    match &output.status {
        ProcessStatus::Failed { code } => Some(FailureKind::ExitStatus { code: *code }),
        ProcessStatus::TimedOut(limit) => Some(FailureKind::TimedOut {
            after_ms: limit.as_millis() as u64,
        }),
        ProcessStatus::Success => {
            detect_failure_summary(&output.stdout).map(|line| FailureKind::SummaryLine {
                line: line.to_string(),
            })
        }
    }
}
