//! Error taxonomy for the harness.
//!
//! Run-level errors (`Selection`, `Configuration`) abort the whole run before
//! anything is measured. Everything else is scoped to one unit: the unit is
//! reported as failed and the remaining units still run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("no benchmark selected by filter {filter:?}")]
    Selection { filter: Option<String> },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("benchmark '{unit}' failed: {message}")]
    Execution { unit: String, message: String },

    #[error("benchmark '{unit}' incomplete: expected {expected} samples, got {actual}")]
    IncompleteRun {
        unit: String,
        expected: usize,
        actual: usize,
    },

    #[error("fork protocol error: {0}")]
    Ipc(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Coarse category of a unit failure, carried in reports and over IPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The benchmark body panicked.
    Execution,
    /// Fewer samples than configured, including timeouts.
    Incomplete,
    /// The forked worker died or spoke garbage.
    Crashed,
}

impl HarnessError {
    /// Whether this error aborts the whole run rather than a single unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::Selection { .. } | HarnessError::Configuration(_)
        )
    }

    /// Failure category used when this error is recorded against a unit.
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::IncompleteRun { .. } => FailureKind::Incomplete,
            HarnessError::Ipc(_) | HarnessError::Io(_) => FailureKind::Crashed,
            _ => FailureKind::Execution,
        }
    }

    pub(crate) fn execution(unit: &str, message: impl Into<String>) -> Self {
        HarnessError::Execution {
            unit: unit.to_string(),
            message: message.into(),
        }
    }
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_treat_selection_and_configuration_as_fatal() {
        assert!(HarnessError::Selection { filter: None }.is_fatal());
        assert!(HarnessError::Configuration("x".into()).is_fatal());
        assert!(!HarnessError::execution("a", "boom").is_fatal());
    }

    #[test]
    fn should_classify_incomplete_runs() {
        let err = HarnessError::IncompleteRun {
            unit: "a".into(),
            expected: 5,
            actual: 3,
        };
        assert_eq!(err.kind(), FailureKind::Incomplete);
        assert_eq!(
            err.to_string(),
            "benchmark 'a' incomplete: expected 5 samples, got 3"
        );
    }

    #[test]
    fn should_extract_message_when_panic_payload_is_string() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bad"));
        assert_eq!(panic_message(payload.as_ref()), "bad");
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
