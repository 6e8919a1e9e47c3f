//! Error types for the RL core library

use std::time::Duration;

use thiserror::Error;

/// Core error type for RL operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Environment-related errors
    #[error("Environment error: {0}")]
    Environment(String),

    /// Agent-related errors
    #[error("Agent error: {0}")]
    Agent(String),

    /// Invalid action
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A probability vector that is not a distribution over the vocabulary
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),

    /// An action was looked up in the registry before it was registered
    #[error("No probability registered for action {action:?} in state {state:?}")]
    MissingProbability {
        /// Joined state string
        state: String,
        /// Action token
        action: char,
    },

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Training called with nothing to train on
    #[error("Empty batch: {0}")]
    EmptyBatch(String),

    /// Non-finite loss or gradient, or an undefined normalization
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// A gathering worker failed
    #[error("Worker error: {0}")]
    Worker(String),

    /// Nothing arrived on the gathering queue in time
    #[error("Queue starved: no unit received within {0:?}")]
    QueueStarved(Duration),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RLError {
    /// Whether the failed update can be skipped and training continued.
    ///
    /// Only numerical problems qualify; violated invariants stop the run.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NumericalInstability(_))
    }
}

/// Result type alias for RL operations
pub type Result<T> = std::result::Result<T, RLError>;
