//! Agent traits and shared configuration

use serde::{Deserialize, Serialize};

use crate::network::Memory;
use crate::state::SequenceState;
use crate::vocab::Token;

/// Configuration shared by agents and training algorithms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Discount factor
    pub gamma: f64,
    /// Seed for every random number generator derived from this config
    pub seed: u64,
    /// Maximum generated sequence length
    pub max_len: usize,
    /// Completed episodes gathered between training updates
    pub episodes_to_train: usize,
    /// Additional parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            gamma: 0.97,
            seed: 1,
            max_len: 100,
            episodes_to_train: 10,
            params: serde_json::Map::new(),
        }
    }
}

impl AgentConfig {
    /// Reject out-of-range values
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(crate::RLError::Config(format!(
                "gamma must be in (0, 1], got {}",
                self.gamma
            )));
        }
        if self.max_len == 0 || self.episodes_to_train == 0 {
            return Err(crate::RLError::Config(
                "max_len and episodes_to_train must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Core agent trait: picks the next token for a state
pub trait Agent: Send {
    /// Memory to start an episode with
    fn initial_memory(&self) -> Option<Memory>;

    /// Select an action, returning it with the memory for the next call
    fn act(
        &mut self,
        state: &SequenceState,
        memory: Option<Memory>,
    ) -> crate::Result<(Token, Option<Memory>)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_round_trips() {
        let config = AgentConfig::default();
        config.validate().unwrap();

        let json = r#"{"gamma": 0.9, "seed": 7, "custom": true}"#;
        let parsed: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.seed, 7);
        assert_eq!(parsed.max_len, 100);
        assert_eq!(parsed.params.get("custom"), Some(&serde_json::Value::Bool(true)));
    }

    #[test]
    fn rejects_bad_gamma() {
        let config = AgentConfig {
            gamma: 1.5,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
