//! Queue scheduler: bounded worker pool with retry rounds
//!
//! ```text
//!   RUNNING(0) ──drain──┬── no failures, round 0 ───────────▶ DRAINED_OK
//!       ▲               ├── no failures, round > 0 ─────────▶ DRAINED_OK_WITH_RETRY
//!       │               ├── failures, round >= max_retries ─▶ DRAINED_FAILED
//!       └── RUNNING(r+1)┘── failures otherwise (failed tests only)
//! ```
//!
//! Each round hands its work items to `concurrency` workers. Workers send
//! finished [`SuiteRun`]s over a channel and the scheduler folds them into
//! the [`RunLedger`] on its own task, so the ledger has a single writer. A
//! round ends only once every worker has exited.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::command::{resolve_binary, ArgumentSet, CommandBuilder};
use crate::config::{QueueConfig, TestCase};
use crate::error::{QueueError, QueueResult};
use crate::events::{EventSink, QueueEvent};
use crate::runner::{ExecutionOutcome, ProcessExec, ProcessRunner};
use crate::suite::{SuiteExecutor, SuiteRun, WorkItem};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    /// Everything passed in the first round
    DrainedOk,
    /// Everything passed, after at least one retry round
    DrainedOkWithRetry,
    /// Failures remained after the last allowed round
    DrainedFailed,
}

impl TerminalStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, TerminalStatus::DrainedFailed)
    }

    /// Stable status code used in reports
    pub fn code(&self) -> &'static str {
        match self {
            TerminalStatus::DrainedOk => "DRAINED_OK",
            TerminalStatus::DrainedOkWithRetry => "DRAINED_OK_WITH_RETRY",
            TerminalStatus::DrainedFailed => "DRAINED_FAILED",
        }
    }

    /// Human-facing label
    pub fn label(&self) -> &'static str {
        match self {
            TerminalStatus::DrainedOk => "PASSED",
            TerminalStatus::DrainedOkWithRetry => "PASSED WITH RETRY(S)",
            TerminalStatus::DrainedFailed => "FAILED",
        }
    }
}

/// What to do once a round has drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDecision {
    Finish(TerminalStatus),
    Retry,
}

/// Decide the next step after `round` drained. Total rounds never exceed
/// `max_retries + 1`.
pub fn decide(round: u32, max_retries: u32, has_failures: bool) -> RoundDecision {
    match (has_failures, round) {
        (false, 0) => RoundDecision::Finish(TerminalStatus::DrainedOk),
        (false, _) => RoundDecision::Finish(TerminalStatus::DrainedOkWithRetry),
        (true, r) if r >= max_retries => RoundDecision::Finish(TerminalStatus::DrainedFailed),
        (true, _) => RoundDecision::Retry,
    }
}

/// Duration of one suite in one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTiming {
    pub name: String,
    pub elapsed: Duration,
    pub round: u32,
}

/// An outcome tagged with the suite and round that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedOutcome {
    pub suite: String,
    pub round: u32,
    pub outcome: ExecutionOutcome,
}

/// Accumulated run state, owned by the scheduler task.
///
/// `failed_by_queue` holds the current round only; timings and outcomes
/// accumulate across all rounds.
#[derive(Debug, Default)]
pub struct RunLedger {
    failed_by_queue: IndexMap<String, Vec<TestCase>>,
    queue_timings: Vec<QueueTiming>,
    outcomes: Vec<RecordedOutcome>,
}

impl RunLedger {
    pub fn record_suite(&mut self, run: SuiteRun) {
        self.queue_timings.push(QueueTiming {
            name: run.name.clone(),
            elapsed: run.elapsed,
            round: run.round,
        });
        self.outcomes.extend(run.outcomes.into_iter().map(|outcome| RecordedOutcome {
            suite: run.name.clone(),
            round: run.round,
            outcome,
        }));
        if !run.failed.is_empty() {
            self.failed_by_queue.insert(run.name, run.failed);
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_by_queue.is_empty()
    }

    pub fn failed_by_queue(&self) -> &IndexMap<String, Vec<TestCase>> {
        &self.failed_by_queue
    }

    /// Next round's work items; clears the per-round failure map
    pub fn take_retry_items(&mut self) -> Vec<WorkItem> {
        std::mem::take(&mut self.failed_by_queue)
            .into_iter()
            .map(|(name, tests)| WorkItem::new(name, tests))
            .collect()
    }

    fn into_summary(self, status: TerminalStatus, retries: u32, elapsed: Duration) -> RunSummary {
        RunSummary {
            status,
            retries,
            elapsed,
            queue_timings: self.queue_timings,
            failed_by_queue: self.failed_by_queue,
            outcomes: self.outcomes,
        }
    }
}

/// Terminal state of a run, as consumed by the report builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: TerminalStatus,
    /// Retry rounds executed (rounds after round 0)
    pub retries: u32,
    /// Wall-clock time of the whole run
    pub elapsed: Duration,
    /// Every suite's duration on every round it ran
    pub queue_timings: Vec<QueueTiming>,
    /// Failures of the last round; empty unless the run failed
    pub failed_by_queue: IndexMap<String, Vec<TestCase>>,
    /// Every attempt of every test, in completion order
    pub outcomes: Vec<RecordedOutcome>,
}

/// Bounded-concurrency suite scheduler
pub struct QueueScheduler {
    executor: Arc<SuiteExecutor>,
    base_args: Arc<ArgumentSet>,
    concurrency: usize,
    max_retries: u32,
    events: EventSink,
}

impl QueueScheduler {
    pub fn new(executor: SuiteExecutor, base_args: ArgumentSet) -> Self {
        Self {
            executor: Arc::new(executor),
            base_args: Arc::new(base_args),
            concurrency: 1,
            max_retries: 0,
            events: EventSink::disabled(),
        }
    }

    /// Build a scheduler for `config`.
    ///
    /// Fails with [`QueueError::BinaryNotFound`] when none of the binary
    /// candidates exists, and with [`QueueError::Configuration`] when
    /// `base_dir` is relative or any configured test path cannot be
    /// resolved. Nothing is scheduled in either case.
    pub fn from_config(
        config: &QueueConfig,
        exec: Arc<dyn ProcessExec>,
        base_dir: &Path,
    ) -> QueueResult<Self> {
        config.validate()?;
        if !base_dir.is_absolute() {
            return Err(QueueError::Configuration(format!(
                "base directory '{}' is not absolute",
                base_dir.display()
            )));
        }

        let binary = resolve_binary(&config.binary_candidates).ok_or_else(|| {
            QueueError::BinaryNotFound {
                candidates: config.binary_candidates.clone(),
            }
        })?;
        info!("Using test binary: {}", binary.display());

        let builder = CommandBuilder::from_config(config, &binary, base_dir)?;
        let executor = SuiteExecutor::new(builder, ProcessRunner::new(exec));
        for item in config.work_items() {
            executor.check(&item, &config.args)?;
        }

        Ok(Self::new(executor, config.args.clone())
            .with_concurrency(config.workers())
            .with_max_retries(config.max_retries))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Publish progress events to `events`
    pub fn with_events(mut self, events: EventSink) -> Self {
        let executor = (*self.executor).clone().with_events(events.clone());
        self.executor = Arc::new(executor);
        self.events = events;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run rounds until the queue drains to a terminal status.
    ///
    /// Every invocation is built up front; an unresolvable path is a
    /// [`QueueError::Configuration`] and no test runs.
    pub async fn run(&self, initial: Vec<WorkItem>) -> QueueResult<RunSummary> {
        for item in &initial {
            self.executor.check(item, &self.base_args)?;
        }

        let started = Instant::now();
        let mut ledger = RunLedger::default();
        let mut items = initial;
        let mut round = 0;

        loop {
            if round > 0 {
                info!("Retrying failed test(s): round {}", round);
            }
            self.events.emit(QueueEvent::RoundStarted {
                round,
                suites: items.iter().map(|item| item.name.clone()).collect(),
            });

            self.run_round(round, items, &mut ledger).await?;

            let failing = ledger.failed_by_queue().len();
            self.events.emit(QueueEvent::RoundDrained {
                round,
                failing_suites: failing,
            });

            match decide(round, self.max_retries, ledger.has_failures()) {
                RoundDecision::Finish(status) => {
                    info!("Queue drained after round {}: {}", round, status.code());
                    return Ok(ledger.into_summary(status, round, started.elapsed()));
                }
                RoundDecision::Retry => {
                    warn!("{} suite(s) failed in round {}, retrying", failing, round);
                    items = ledger.take_retry_items();
                    round += 1;
                }
            }
        }
    }

    async fn run_round(
        &self,
        round: u32,
        items: Vec<WorkItem>,
        ledger: &mut RunLedger,
    ) -> QueueResult<()> {
        let pending = Arc::new(Mutex::new(VecDeque::from(items)));
        let (tx, mut rx) = mpsc::unbounded_channel::<SuiteRun>();

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker in 0..self.concurrency {
            let pending = Arc::clone(&pending);
            let tx = tx.clone();
            let executor = Arc::clone(&self.executor);
            let base_args = Arc::clone(&self.base_args);
            let events = self.events.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let item = pending.lock().pop_front();
                    let Some(item) = item else { break };

                    events.emit(QueueEvent::SuiteStarted {
                        name: item.name.clone(),
                        round,
                        worker,
                        tests: item.tests.len(),
                    });
                    let run = executor.execute(&item, &base_args, round).await;
                    if tx.send(run).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        while let Some(run) = rx.recv().await {
            self.events.emit(QueueEvent::SuiteFinished {
                name: run.name.clone(),
                round: run.round,
                elapsed: run.elapsed,
                failed: run.failed.iter().map(|test| test.file.clone()).collect(),
            });
            ledger.record_suite(run);
        }

        for (worker, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!("Worker {} failed in round {}: {}", worker, round, e);
                return Err(QueueError::WorkerPanicked { worker, round });
            }
        }
        Ok(())
    }
}
