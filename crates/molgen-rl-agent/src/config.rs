//! Aggregate training configuration loaded from JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use molgen_rl_core::{AgentConfig, RLError, Result};

use crate::irl::IrlConfig;
use crate::mcts::MctsConfig;
use crate::optim::OptimizerConfig;
use crate::parallel::GathererConfig;
use crate::policy::MlpConfig;
use crate::ppo::PpoConfig;
use crate::reinforce::ReinforceConfig;
use crate::reward::RewardConfig;
use crate::trainer::TrainerConfig;

/// Which policy-gradient learner drives training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAlgorithm {
    /// Monte Carlo policy gradient
    Reinforce,
    /// Clipped actor-critic
    Ppo,
}

/// Every setting of a training run; missing sections take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Policy learner
    pub algorithm: PolicyAlgorithm,
    /// Learn the reward from demonstrations
    pub use_irl: bool,
    /// Agent settings shared by environment and gatherers
    pub agent: AgentConfig,
    /// REINFORCE settings
    pub reinforce: ReinforceConfig,
    /// PPO settings
    pub ppo: PpoConfig,
    /// IRL settings
    pub irl: IrlConfig,
    /// Reward function settings
    pub reward: RewardConfig,
    /// Tree search settings
    pub mcts: MctsConfig,
    /// Policy network shape
    pub policy_net: MlpConfig,
    /// Critic network shape
    pub critic_net: MlpConfig,
    /// Reward network shape
    pub reward_net: MlpConfig,
    /// Policy (actor) optimizer
    pub policy_optimizer: OptimizerConfig,
    /// Critic optimizer
    pub critic_optimizer: OptimizerConfig,
    /// Reward network optimizer
    pub reward_optimizer: OptimizerConfig,
    /// Parallel gathering
    pub gatherer: GathererConfig,
    /// Training loop
    pub trainer: TrainerConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            algorithm: PolicyAlgorithm::Ppo,
            use_irl: true,
            agent: AgentConfig::default(),
            reinforce: ReinforceConfig::default(),
            ppo: PpoConfig::default(),
            irl: IrlConfig::default(),
            reward: RewardConfig::default(),
            mcts: MctsConfig::default(),
            policy_net: MlpConfig::default(),
            critic_net: MlpConfig::default(),
            reward_net: MlpConfig::default(),
            policy_optimizer: OptimizerConfig::default(),
            critic_optimizer: OptimizerConfig::default(),
            reward_optimizer: OptimizerConfig::default(),
            gatherer: GathererConfig::default(),
            trainer: TrainerConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&text)
    }

    /// Reject out-of-range values in every section
    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        self.reinforce.validate()?;
        self.ppo.validate()?;
        self.irl.validate()?;
        self.mcts.validate()?;
        self.policy_net.validate()?;
        self.critic_net.validate()?;
        self.reward_net.validate()?;
        self.policy_optimizer.validate()?;
        self.critic_optimizer.validate()?;
        self.reward_optimizer.validate()?;
        self.gatherer.validate()?;
        self.trainer.validate()?;
        if self.reward.use_search && self.mcts.max_len < self.agent.max_len {
            return Err(RLError::Config(format!(
                "search max_len {} is shorter than the episode limit {}",
                self.mcts.max_len, self.agent.max_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrainingConfig::default().validate().unwrap();
        let config = TrainingConfig::from_json_str("{}").unwrap();
        assert_eq!(config.algorithm, PolicyAlgorithm::Ppo);
        assert_eq!(config.irl.k, 10);
        assert!((config.reward.invalid_penalty + 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sections_override_defaults() {
        let json = r#"{
            "algorithm": "reinforce",
            "ppo": { "gamma": 0.9, "clip_eps": 0.1 },
            "policy_optimizer": { "type": "sgd", "lr": 0.01 },
            "gatherer": { "workers": 4 }
        }"#;
        let config = TrainingConfig::from_json_str(json).unwrap();
        assert_eq!(config.algorithm, PolicyAlgorithm::Reinforce);
        assert!((config.ppo.gamma - 0.9).abs() < f64::EPSILON);
        assert!((config.ppo.clip_eps - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.ppo.epochs, 10);
        assert_eq!(
            config.policy_optimizer,
            OptimizerConfig::Sgd {
                lr: 0.01,
                weight_decay: 0.0
            }
        );
        assert_eq!(config.gatherer.capacity(), 4);
    }

    #[test]
    fn partial_ppo_section_keeps_its_discount() {
        let config = TrainingConfig::from_json_str(r#"{ "ppo": { "clip_eps": 0.1 } }"#).unwrap();
        assert!((config.ppo.gamma - 0.99).abs() < f64::EPSILON);
        assert!((config.ppo.clip_eps - 0.1).abs() < f64::EPSILON);
        assert!((config.reinforce.base.gamma - 0.97).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = TrainingConfig::from_json_str(r#"{ "ppo": { "gae_lambda": 1.5 } }"#).unwrap_err();
        assert!(matches!(err, RLError::Config(_)));
        let err = TrainingConfig::from_json_str(r#"{ "gatherer": { "workers": 0 } }"#).unwrap_err();
        assert!(matches!(err, RLError::Config(_)));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let path = std::env::temp_dir().join(format!("molgen-rl-config-{}.json", std::process::id()));
        tokio::fs::write(&path, r#"{ "use_irl": false }"#).await.unwrap();
        let config = TrainingConfig::load(&path).await.unwrap();
        assert!(!config.use_irl);
        tokio::fs::remove_file(&path).await.unwrap();
    }
}
