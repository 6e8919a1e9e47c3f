//! Token-by-token sequence generation environment

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use molgen_rl_core::{
    Environment, RLError, Result, Reward, SequenceReward, SequenceState, Step, StepInfo, Token,
    Vocabulary,
};

/// Configuration for sequence environments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEnvConfig {
    /// Maximum sequence length, start symbol included
    pub max_len: usize,
}

impl Default for SequenceEnvConfig {
    fn default() -> Self {
        Self { max_len: 100 }
    }
}

/// Environment whose state is the sequence generated so far.
///
/// Each action appends one token. The episode ends when the end symbol is
/// appended or the sequence reaches `max_len` (truncation). Rewards come
/// from a [`SequenceReward`], told whether the step ended the episode.
pub struct SequenceEnv {
    config: SequenceEnvConfig,
    vocab: Arc<Vocabulary>,
    reward: Box<dyn SequenceReward>,
    state: SequenceState,
    done: bool,
}

impl SequenceEnv {
    /// Create a new sequence environment
    pub fn new(
        config: SequenceEnvConfig,
        vocab: Arc<Vocabulary>,
        reward: Box<dyn SequenceReward>,
    ) -> Result<Self> {
        let start_len = usize::from(vocab.start().is_some());
        if config.max_len <= start_len {
            return Err(RLError::Config(format!(
                "max_len {} leaves no room for generated tokens",
                config.max_len
            )));
        }
        let state = SequenceState::initial(&vocab);
        Ok(Self {
            config,
            vocab,
            reward,
            state,
            done: false,
        })
    }

    /// The vocabulary actions are drawn from
    #[must_use]
    pub fn vocab(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    /// The sequence generated so far
    #[must_use]
    pub fn state(&self) -> &SequenceState {
        &self.state
    }
}

#[async_trait]
impl Environment for SequenceEnv {
    async fn reset(&mut self) -> Result<SequenceState> {
        self.state = SequenceState::initial(&self.vocab);
        self.done = false;
        Ok(self.state.clone())
    }

    async fn step(&mut self, action: Token) -> Result<Step> {
        if self.done {
            return Err(RLError::Environment(
                "episode is finished; call reset before stepping".into(),
            ));
        }
        if !self.vocab.contains(action) {
            return Err(RLError::InvalidAction(format!(
                "token {action:?} is not in the vocabulary"
            )));
        }

        self.state = self.state.advance(action);
        let ended = action == self.vocab.end();
        let truncated = !ended && self.state.len() >= self.config.max_len;
        self.done = ended || truncated;

        let reward = self.reward.reward(&self.state, self.done)?;
        if self.done {
            trace!(sequence = %self.state.key(), reward, truncated, "sequence finished");
        }

        let mut info = StepInfo::default();
        info.fields
            .insert("length".into(), serde_json::Value::from(self.state.len()));

        Ok(Step {
            state: self.state.clone(),
            reward: Reward::new(reward),
            done: self.done,
            truncated,
            info,
        })
    }
}
