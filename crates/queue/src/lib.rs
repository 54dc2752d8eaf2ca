//! casper-queue: parallel suite runner for casperjs-style test binaries
//!
//! Runs many independent browser-automation scripts grouped into named
//! suites. Suites run concurrently; tests inside a suite run one at a time.
//! Suites with failures are retried, failed tests only, for a bounded
//! number of rounds before a consolidated report is produced.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  QueueScheduler (rounds, worker pool, RunLedger)            │
//! │    └── SuiteExecutor × concurrency   (sequential per suite) │
//! │          └── ProcessRunner           (exit + summary check) │
//! │                ├── CommandBuilder    (args + overrides)     │
//! │                └── dyn ProcessExec   (TokioExec, fakes)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RunSummary ──▶ report::build_report ──▶ write_reports      │
//! │  QueueEvent ──▶ presentation layer (CLI)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod style;
pub mod suite;

pub use command::{ArgumentSet, CommandBuilder, Invocation};
pub use config::{Override, QueueConfig, TestCase};
pub use error::{QueueError, QueueResult};
pub use events::{EventSink, QueueEvent};
pub use report::{build_report, write_reports, Report};
pub use runner::{ExecutionOutcome, FailureKind, ProcessExec, ProcessRunner, TokioExec};
pub use scheduler::{QueueScheduler, RunSummary, TerminalStatus};
pub use suite::{SuiteExecutor, SuiteRun, WorkItem};
