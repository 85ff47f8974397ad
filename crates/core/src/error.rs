//! Error types shared by every lexdecode crate

use thiserror::Error;

use crate::types::FrameIdx;

/// Decoder errors
///
/// Load-time errors (`ModelInconsistency`) abort startup. The per-utterance kinds
/// (`PropagationFailure`, `ResourceLimitExceeded`, `NoRecognition`) are caught at the
/// utterance boundary by the session driver.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Model inconsistency: {0}")]
    ModelInconsistency(String),

    #[error("Propagation failure at frame {frame}: {message}")]
    PropagationFailure { frame: FrameIdx, message: String },

    #[error("Resource limit exceeded: {resource} reached the configured limit of {limit}")]
    ResourceLimitExceeded { resource: &'static str, limit: usize },

    #[error("No recognition: no hypothesis survived to the end of the utterance")]
    NoRecognition,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Acoustic scorer error: {0}")]
    Scorer(String),

    #[error("Lattice format error: {0}")]
    LatticeFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Helper for building a propagation failure
    pub fn propagation(frame: FrameIdx, message: impl Into<String>) -> Self {
        Error::PropagationFailure {
            frame,
            message: message.into(),
        }
    }

    /// Errors that must stop the process (malformed models, dictionaries)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ModelInconsistency(_))
    }

    /// Errors that end the current utterance but leave the session usable
    pub fn aborts_utterance(&self) -> bool {
        matches!(
            self,
            Error::PropagationFailure { .. } | Error::Scorer(_) | Error::InvalidState(_)
        )
    }

    /// Short stable label for counters and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ModelInconsistency(_) => "model_inconsistency",
            Error::PropagationFailure { .. } => "propagation_failure",
            Error::ResourceLimitExceeded { .. } => "resource_limit_exceeded",
            Error::NoRecognition => "no_recognition",
            Error::InvalidState(_) => "invalid_state",
            Error::Scorer(_) => "scorer",
            Error::LatticeFormat(_) => "lattice_format",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::ModelInconsistency("empty pronunciation".into()).is_fatal());
        assert!(Error::propagation(3, "dangling history").aborts_utterance());
        assert!(!Error::NoRecognition.aborts_utterance());
        assert_eq!(
            Error::ResourceLimitExceeded {
                resource: "lattice edges",
                limit: 10
            }
            .kind(),
            "resource_limit_exceeded"
        );
    }
}
