//! Core reinforcement learning traits and types for molecular generation
//!
//! Generation is framed as an episodic decision process over token
//! sequences: the state is the prefix generated so far, an action appends
//! one token from a [`Vocabulary`], and the episode ends at the end symbol
//! or a length limit. This crate holds the shared vocabulary, state and
//! trajectory types along with the traits that agents, networks and
//! environments implement.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod demonstration;
pub mod encoding;
pub mod environment;
pub mod error;
pub mod network;
pub mod reward;
pub mod snapshot;
pub mod state;
pub mod trajectory;
pub mod vocab;

// Re-export core traits and types
pub use agent::{Agent, AgentConfig};
pub use demonstration::{DemonstrationSource, InMemoryDemonstrations};
pub use encoding::{EncodedBatch, SequenceEncoder};
pub use environment::{Environment, Episode, Step, StepInfo, TrackedEnvironment};
pub use error::{RLError, Result};
pub use network::{Distribution, Memory, Parameterized, PolicyNetwork, PolicyOutput, ScalarNetwork};
pub use reward::{Reward, RewardOracle, SequenceReward, ValidityOracle};
pub use snapshot::{snapshot_channel, Snapshot, SnapshotPublisher};
pub use state::SequenceState;
pub use trajectory::{EpisodeStep, Experience, ExperienceEpisode, Trajectory};
pub use vocab::{Token, Vocabulary};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Agent, Environment, EpisodeStep, Experience, PolicyNetwork, Result, ScalarNetwork,
        SequenceEncoder, SequenceState, Step, Token, Trajectory, Vocabulary,
    };
}
