//! Full run against a real child process
//!
//! A small shell script stands in for casperjs: it fails scripts named
//! `*broken*`, fails `*flaky*` scripts on their first attempt only, and
//! passes everything else.

#![cfg(unix)]

use indexmap::IndexMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use casper_queue::report::{FAILED_TEXT_FILE, FAILURE_MAP_FILE, PASSED_TEXT_FILE, SUMMARY_FILE};
use casper_queue::{
    build_report, write_reports, QueueConfig, QueueError, QueueScheduler, TerminalStatus,
    TestCase, TokioExec,
};

fn fake_casperjs(dir: &Path) -> PathBuf {
    let marks = dir.join("marks");
    std::fs::create_dir_all(&marks).unwrap();

    let script = format!(
        r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --xunit=*) ;;
    *.js) file="$arg" ;;
  esac
done
name=$(basename "$file")
echo "Test file: $file"
case "$name" in
  *broken*)
    echo "FAIL 1 test executed in 0.101s, 0 passed, 1 failed, 0 dubious, 0 skipped."
    ;;
  *flaky*)
    if [ ! -e "{marks}/$name" ]; then
      touch "{marks}/$name"
      echo "flaky first attempt" >&2
      exit 3
    fi
    echo "PASS 1 test executed in 0.050s, 1 passed, 0 failed, 0 dubious, 0 skipped."
    ;;
  *)
    echo "PASS 1 test executed in 0.050s, 1 passed, 0 failed, 0 dubious, 0 skipped."
    ;;
esac
exit 0
"#,
        marks = marks.display()
    );

    let path = dir.join("casperjs");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(binary: PathBuf, queue: &[(&str, &[&str])], max_retries: u32) -> QueueConfig {
    let mut suites = IndexMap::new();
    for (name, files) in queue {
        suites.insert(
            name.to_string(),
            files
                .iter()
                .map(|f| TestCase::new(format!("tests/{}", f), format!("reports/{}.xml", f)))
                .collect(),
        );
    }
    QueueConfig {
        queue: suites,
        queue_workers: 2,
        max_retries,
        binary_candidates: vec![PathBuf::from("/nonexistent/casperjs"), binary],
        ..Default::default()
    }
}

/// Retry Against Real Processes Test
///
/// The flaky script fails by exit status on round 0 and passes on round 1;
/// the reports record both attempts.
#[tokio::test]
async fn flaky_process_passes_on_retry_and_reports_are_written() {
    let work = tempfile::tempdir().unwrap();
    let binary = fake_casperjs(work.path());
    let config = config(
        binary,
        &[("google", &["search.js"]), ("bing", &["home.js", "flaky.js"])],
        2,
    );

    let scheduler =
        QueueScheduler::from_config(&config, Arc::new(TokioExec::new()), work.path()).unwrap();
    assert_eq!(scheduler.concurrency(), 2);

    let summary = scheduler.run(config.work_items()).await.unwrap();
    assert_eq!(summary.status, TerminalStatus::DrainedOkWithRetry);
    assert_eq!(summary.retries, 1);

    let flaky: Vec<_> = summary
        .outcomes
        .iter()
        .filter(|r| r.outcome.file.ends_with("flaky.js"))
        .collect();
    assert_eq!(flaky.len(), 2);
    assert!(!flaky[0].outcome.succeeded());
    assert!(flaky[1].outcome.succeeded());
    assert!(flaky[0].outcome.stderr.contains("flaky first attempt"));

    let report = build_report(&summary);
    let report_dir = work.path().join(".log/test");
    let written = write_reports(&report_dir, &report, &summary).unwrap();
    assert!(written.contains(&report_dir.join(SUMMARY_FILE)));
    assert!(report_dir.join(FAILED_TEXT_FILE).exists());
    assert!(report_dir.join(PASSED_TEXT_FILE).exists());

    let summary_text = std::fs::read_to_string(report_dir.join(SUMMARY_FILE)).unwrap();
    assert!(summary_text.contains("PASSED WITH RETRY(S)"));
    assert!(summary_text.contains("Total retry(s): 1"));
    assert!(!summary_text.contains("\x1b["));
}

/// Summary Line Failure Test
///
/// A script that exits 0 but prints the failure summary is retried until
/// the budget runs out and ends up in the failure map.
#[tokio::test]
async fn summary_line_failure_exhausts_retries() {
    let work = tempfile::tempdir().unwrap();
    let binary = fake_casperjs(work.path());
    let config = config(binary, &[("bing", &["broken.js", "ok.js"])], 1);

    let scheduler =
        QueueScheduler::from_config(&config, Arc::new(TokioExec::new()), work.path()).unwrap();
    let summary = scheduler.run(config.work_items()).await.unwrap();

    assert_eq!(summary.status, TerminalStatus::DrainedFailed);
    assert_eq!(summary.retries, 1);
    assert_eq!(summary.failed_by_queue["bing"].len(), 1);
    assert_eq!(
        summary.failed_by_queue["bing"][0].file,
        PathBuf::from("tests/broken.js")
    );

    let report_dir = work.path().join("reports-out");
    write_reports(&report_dir, &build_report(&summary), &summary).unwrap();
    let map = std::fs::read_to_string(report_dir.join(FAILURE_MAP_FILE)).unwrap();
    assert!(map.contains("tests/broken.js"));
}

/// Missing Binary Test
#[test]
fn missing_binary_is_fatal() {
    let config = config(PathBuf::from("/also/missing/casperjs"), &[("s", &["a.js"])], 0);
    let result = QueueScheduler::from_config(&config, Arc::new(TokioExec::new()), Path::new("/"));
    match result {
        Err(QueueError::BinaryNotFound { candidates }) => assert_eq!(candidates.len(), 2),
        other => panic!("expected BinaryNotFound, got {:?}", other.err()),
    }
}

/// Relative Base Directory Test
///
/// Paths that cannot be made absolute are a configuration error raised by
/// `from_config`; the binary is never invoked.
#[test]
fn relative_base_dir_is_fatal() {
    let work = tempfile::tempdir().unwrap();
    let binary = fake_casperjs(work.path());
    let config = config(binary, &[("bing", &["a.js"])], 2);

    let result =
        QueueScheduler::from_config(&config, Arc::new(TokioExec::new()), Path::new("relative-base"));

    match result {
        Err(e) => {
            assert!(matches!(e, QueueError::Configuration(_)));
            assert!(e.is_configuration());
        }
        Ok(_) => panic!("expected a configuration error"),
    }
    assert_eq!(std::fs::read_dir(work.path().join("marks")).unwrap().count(), 0);
}
