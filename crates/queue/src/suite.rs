//! Sequential execution of one suite

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::command::{ArgumentSet, CommandBuilder};
use crate::config::TestCase;
use crate::error::QueueResult;
use crate::events::{EventSink, QueueEvent};
use crate::runner::{ExecutionOutcome, ProcessRunner};

/// A suite name plus the tests to run for it in one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub name: String,
    pub tests: Vec<TestCase>,
}

impl WorkItem {
    pub fn new(name: impl Into<String>, tests: Vec<TestCase>) -> Self {
        Self {
            name: name.into(),
            tests,
        }
    }
}

/// Everything one suite produced in one round
#[derive(Debug, Clone)]
pub struct SuiteRun {
    pub name: String,
    pub round: u32,
    pub elapsed: Duration,
    /// One outcome per test, in execution order
    pub outcomes: Vec<ExecutionOutcome>,
    /// Failed tests in their original relative order
    pub failed: Vec<TestCase>,
}

impl SuiteRun {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Runs the tests of a work item one after another.
///
/// Tests of one suite share browser state in the automation engine, so
/// a test never starts before the previous one's outcome is recorded. The
/// suite always runs to the end; failures do not stop it.
#[derive(Clone)]
pub struct SuiteExecutor {
    builder: CommandBuilder,
    runner: ProcessRunner,
    events: EventSink,
}

impl SuiteExecutor {
    pub fn new(builder: CommandBuilder, runner: ProcessRunner) -> Self {
        Self {
            builder,
            runner,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Build every invocation of `item` without running anything. Fails
    /// with [`crate::error::QueueError::Configuration`] on the first
    /// unresolvable path.
    pub fn check(&self, item: &WorkItem, base_args: &ArgumentSet) -> QueueResult<()> {
        for test in &item.tests {
            self.builder.build(test, base_args)?;
        }
        Ok(())
    }

    pub async fn execute(&self, item: &WorkItem, base_args: &ArgumentSet, round: u32) -> SuiteRun {
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(item.tests.len());
        let mut failed = Vec::new();

        debug!("Suite {} round {}: {} test(s)", item.name, round, item.tests.len());

        for test in &item.tests {
            let outcome = match self.builder.build(test, base_args) {
                Ok(invocation) => self.runner.run(&invocation).await,
                Err(e) => ExecutionOutcome::invalid(test.file.clone(), e.to_string()),
            };

            self.events.emit(QueueEvent::TestFinished {
                suite: item.name.clone(),
                round,
                file: test.file.clone(),
                succeeded: outcome.succeeded(),
                duration: outcome.duration,
            });

            if !outcome.succeeded() {
                failed.push(test.clone());
            }
            outcomes.push(outcome);
        }

        let elapsed = start.elapsed();
        if failed.is_empty() {
            info!("✔ {} ({} ms)", item.name, elapsed.as_millis());
        } else {
            info!(
                "✘ {} - {} of {} failed ({} ms)",
                item.name,
                failed.len(),
                item.tests.len(),
                elapsed.as_millis()
            );
        }

        SuiteRun {
            name: item.name.clone(),
            round,
            elapsed,
            outcomes,
            failed,
        }
    }
}
