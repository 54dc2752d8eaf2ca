//! Structured progress events published by the scheduler
//!
//! The scheduler never formats console output itself; a presentation layer
//! subscribes with [`EventSink::channel`] and renders events as it likes.

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    RoundStarted {
        round: u32,
        suites: Vec<String>,
    },
    SuiteStarted {
        name: String,
        round: u32,
        worker: usize,
        tests: usize,
    },
    TestFinished {
        suite: String,
        round: u32,
        file: PathBuf,
        succeeded: bool,
        duration: Duration,
    },
    SuiteFinished {
        name: String,
        round: u32,
        elapsed: Duration,
        failed: Vec<PathBuf>,
    },
    RoundDrained {
        round: u32,
        failing_suites: usize,
    },
}

/// Optional event publisher. Sending never blocks and a dropped receiver is
/// ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<QueueEvent>>,
}

impl EventSink {
    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: QueueEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
