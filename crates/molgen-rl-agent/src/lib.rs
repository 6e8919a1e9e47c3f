//! Trajectory-driven training engine for sequence-generating agents
//!
//! This crate provides:
//! - Policy inference: probability-proportional action selection, the
//!   per-episode probability registry and the policy agent
//! - Pure ndarray MLP networks and SGD/Adam optimizers
//! - REINFORCE, PPO with GAE, and guided-cost-learning IRL
//! - A reward orchestrator with Monte Carlo tree search
//! - A single-consumer trainer fed by one or many gathering workers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod buffer;
pub mod config;
pub mod irl;
pub mod mcts;
pub mod optim;
pub mod parallel;
pub mod policy;
pub mod ppo;
pub mod registry;
pub mod reinforce;
pub mod reward;
pub mod selector;
pub mod source;
pub mod trainer;
pub mod utils;

// Re-export learners
pub use irl::{GuidedRewardLearningIrl, IrlConfig};
pub use ppo::{Ppo, PpoConfig, PpoStats};
pub use reinforce::{Reinforce, ReinforceConfig};

// Re-export inference components
pub use agent::PolicyAgent;
pub use registry::StateActionProbRegistry;
pub use selector::ProbabilityActionSelector;

// Re-export reward components
pub use mcts::{MctsConfig, MonteCarloTreeSearch};
pub use reward::{RewardConfig, RewardFunction, TerminalScorer};

// Re-export training loop
pub use buffer::TrajectoriesBuffer;
pub use config::{PolicyAlgorithm, TrainingConfig};
pub use parallel::{GathererConfig, ParallelGatherer, WorkerMessage};
pub use source::{ExperienceSource, GatherUnit};
pub use trainer::{
    BestWeights, LearnerWeights, PolicyLearner, PolicyUpdate, RewardLearner, Trainer, TrainerConfig,
    TrainingReport,
};

// Re-export networks and optimizers
pub use optim::{clip_grad_norm, Adam, Optimizer, OptimizerConfig, Sgd};
pub use policy::{Featurizer, Init, Mlp, MlpConfig, MlpPolicy, MlpScalarNet};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ExperienceSource, GuidedRewardLearningIrl, MlpConfig, MlpPolicy, MlpScalarNet,
        OptimizerConfig, PolicyAgent, Ppo, PpoConfig, ProbabilityActionSelector, Reinforce,
        ReinforceConfig, RewardFunction, Trainer, TrainerConfig, TrainingConfig,
    };
    pub use molgen_rl_core::prelude::*;
}
