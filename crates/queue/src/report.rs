//! Summary, failure, and success reports
//!
//! Reports group every attempt by the script that produced it, so a file
//! retried over several rounds shows each round's output in sequence.
//! Each report exists in a raw form (styling preserved) and a plain form.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::QueueResult;
use crate::scheduler::{RecordedOutcome, RunSummary, TerminalStatus};
use crate::style::{render, render_bold, strip_style, Style};

pub const SUMMARY_FILE: &str = "summary.txt";
pub const FAILED_TEXT_FILE: &str = "all_failed_tests.txt";
pub const FAILED_RAW_FILE: &str = "all_failed_tests.stdout";
pub const PASSED_TEXT_FILE: &str = "all_passed_tests.txt";
pub const PASSED_RAW_FILE: &str = "all_passed_tests.stdout";
pub const FAILURE_MAP_FILE: &str = "failed_tests.json";

const BANNER: &str = "*****************************************";

/// Rendered report texts, with styling
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub summary: String,
    /// Empty when nothing failed
    pub failures: String,
    /// Empty when nothing passed
    pub successes: String,
}

impl Report {
    pub fn summary_plain(&self) -> String {
        strip_style(&self.summary)
    }

    pub fn failures_plain(&self) -> String {
        strip_style(&self.failures)
    }

    pub fn successes_plain(&self) -> String {
        strip_style(&self.successes)
    }
}

/// One entry of the machine-readable failure map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTest {
    pub file: PathBuf,
    pub xunit: PathBuf,
}

/// Suite name to the tests that were still failing at the end of the run
pub fn failure_map(summary: &RunSummary) -> IndexMap<String, Vec<FailedTest>> {
    summary
        .failed_by_queue
        .iter()
        .map(|(name, tests)| {
            let entries = tests
                .iter()
                .map(|test| FailedTest {
                    file: test.file.clone(),
                    xunit: test.xunit.clone(),
                })
                .collect();
            (name.clone(), entries)
        })
        .collect()
}

pub fn build_report(summary: &RunSummary) -> Report {
    Report {
        summary: summary_text(summary),
        failures: attempts_text(summary, false),
        successes: attempts_text(summary, true),
    }
}

/// `seconds.millis`, e.g. `12.034`
pub fn format_secs(duration: Duration) -> String {
    format!("{}.{:03}", duration.as_secs(), duration.subsec_millis())
}

fn status_style(status: TerminalStatus) -> Style {
    match status {
        TerminalStatus::DrainedOk => Style::Success,
        TerminalStatus::DrainedOkWithRetry => Style::Retry,
        TerminalStatus::DrainedFailed => Style::Failure,
    }
}

fn summary_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", render(BANNER, Style::Info));
    let _ = writeln!(out, "{}", render("\t     Test Summary:", Style::Info));
    let _ = writeln!(out, "{}", render(BANNER, Style::Info));
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{}",
        render_bold(summary.status.label(), status_style(summary.status))
    );
    let _ = writeln!(out);

    for timing in &summary.queue_timings {
        let _ = writeln!(
            out,
            "Test Set: {} took {}s. Retry #{}",
            timing.name,
            format_secs(timing.elapsed),
            timing.round
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Total time: {} seconds.", format_secs(summary.elapsed));
    let _ = writeln!(out, "Total retry(s): {}", summary.retries);
    let _ = writeln!(out, "Status: {}", summary.status.code());
    out
}

fn group_by_file(summary: &RunSummary, succeeded: bool) -> IndexMap<&Path, Vec<&RecordedOutcome>> {
    let mut groups: IndexMap<&Path, Vec<&RecordedOutcome>> = IndexMap::new();
    for recorded in summary
        .outcomes
        .iter()
        .filter(|r| r.outcome.succeeded() == succeeded)
    {
        groups
            .entry(recorded.outcome.file.as_path())
            .or_default()
            .push(recorded);
    }
    groups
}

fn attempts_text(summary: &RunSummary, succeeded: bool) -> String {
    let groups = group_by_file(summary, succeeded);
    if groups.is_empty() {
        return String::new();
    }

    let total: usize = groups.values().map(Vec::len).sum();
    let mut out = String::new();
    if succeeded {
        let _ = writeln!(out, "Total # of passed attempts: {}", total);
    } else {
        let _ = writeln!(out, "Total # of failures: {}", total);
    }

    for (file, attempts) in groups {
        let test_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{}",
            render(
                &format!("-------------------------- {} ---------------------------", test_name),
                Style::Info
            )
        );

        // Command lines only differ between attempts if the config changed
        if let Some(first) = attempts.first() {
            let _ = writeln!(out);
            let _ = writeln!(out, "COMMAND: {}", first.outcome.readable_command);
        }

        for recorded in attempts {
            let _ = writeln!(out);
            match &recorded.outcome.failure {
                Some(failure) => {
                    let _ = writeln!(
                        out,
                        "{}",
                        render(
                            &format!(
                                "[{} / round {}] {}",
                                recorded.suite, recorded.round, failure
                            ),
                            Style::Failure
                        )
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "{}",
                        render(
                            &format!("[{} / round {}] passed", recorded.suite, recorded.round),
                            Style::Success
                        )
                    );
                }
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "{} ", recorded.outcome.stdout.trim_end());
            if !recorded.outcome.stderr.trim().is_empty() {
                let _ = writeln!(out, "STDERR: {}", recorded.outcome.stderr.trim_end());
            }
        }
    }
    out
}

/// Write `content` to `path`, creating parent directories
pub fn write_file(path: &Path, content: &str) -> QueueResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Write all report artifacts into `dir` and return the paths written.
///
/// Artifacts left by an earlier run are removed first so a passing run
/// never leaves a stale failure report behind.
pub fn write_reports(dir: &Path, report: &Report, summary: &RunSummary) -> QueueResult<Vec<PathBuf>> {
    for name in [
        SUMMARY_FILE,
        FAILED_TEXT_FILE,
        FAILED_RAW_FILE,
        PASSED_TEXT_FILE,
        PASSED_RAW_FILE,
        FAILURE_MAP_FILE,
    ] {
        let stale = dir.join(name);
        if stale.exists() {
            std::fs::remove_file(&stale)?;
        }
    }

    let mut written = Vec::new();
    let mut emit = |name: &str, content: &str| -> QueueResult<()> {
        let path = dir.join(name);
        write_file(&path, content)?;
        written.push(path);
        Ok(())
    };

    emit(SUMMARY_FILE, &report.summary_plain())?;
    if !report.failures.is_empty() {
        emit(FAILED_TEXT_FILE, &report.failures_plain())?;
        emit(FAILED_RAW_FILE, &report.failures)?;
    }
    if !report.successes.is_empty() {
        emit(PASSED_TEXT_FILE, &report.successes_plain())?;
        emit(PASSED_RAW_FILE, &report.successes)?;
    }
    emit(
        FAILURE_MAP_FILE,
        &serde_json::to_string_pretty(&failure_map(summary))?,
    )?;

    info!("Reports written to {}", dir.display());
    Ok(written)
}
