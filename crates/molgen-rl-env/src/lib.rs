//! Environments for sequence-generating agents
//!
//! This crate provides:
//! - A token-by-token sequence environment with pluggable rewards
//! - A syntax-level SMILES validity oracle

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod sequence;
pub mod validity;

// Re-export environments
pub use sequence::{SequenceEnv, SequenceEnvConfig};
pub use validity::SmilesSyntaxOracle;

// Re-export core types
pub use molgen_rl_core::{
    Environment, Reward, SequenceReward, SequenceState, Step, TrackedEnvironment, ValidityOracle,
    Vocabulary,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{SequenceEnv, SequenceEnvConfig, SmilesSyntaxOracle};
    pub use molgen_rl_core::prelude::*;
}
