//! Error types for the queue runner

use std::path::PathBuf;
use thiserror::Error;

/// Harness-level faults.
///
/// Failures of the tests themselves are never represented here; they are
/// recorded as data on [`crate::runner::ExecutionOutcome`].
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Could not find the test binary. Tried: {}", display_candidates(.candidates))]
    BinaryNotFound { candidates: Vec<PathBuf> },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Config parse error in {}: {reason}", .path.display())]
    ConfigParse { path: PathBuf, reason: String },

    #[error("Worker {worker} panicked while running round {round}")]
    WorkerPanicked { worker: usize, round: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    /// Whether this error should abort the run before any work is scheduled
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            QueueError::BinaryNotFound { .. }
                | QueueError::Configuration(_)
                | QueueError::ConfigParse { .. }
        )
    }
}

fn display_candidates(candidates: &[PathBuf]) -> String {
    if candidates.is_empty() {
        return "<no candidates configured>".to_string();
    }
    candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_not_found_lists_candidates() {
        let err = QueueError::BinaryNotFound {
            candidates: vec![
                PathBuf::from("/usr/local/bin/casperjs"),
                PathBuf::from("node_modules/casperjs/bin/casperjs"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("/usr/local/bin/casperjs, node_modules/casperjs/bin/casperjs"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_candidates_message() {
        let err = QueueError::BinaryNotFound { candidates: vec![] };
        assert!(err.to_string().contains("<no candidates configured>"));
    }

    #[test]
    fn test_worker_panic_is_not_configuration() {
        let err = QueueError::WorkerPanicked { worker: 1, round: 0 };
        assert!(!err.is_configuration());
    }
}
