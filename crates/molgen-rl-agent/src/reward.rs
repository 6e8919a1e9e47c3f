//! Reward orchestration: learned reward network, tree search or expert
//! oracle, chosen per call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use molgen_rl_core::{
    PolicyNetwork, RLError, Result, RewardOracle, ScalarNetwork, SequenceEncoder, SequenceReward,
    SequenceState, Snapshot, ValidityOracle, Vocabulary,
};

use crate::mcts::MonteCarloTreeSearch;

/// Reward function configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Estimate partial sequences with tree search
    pub use_search: bool,
    /// Reward of an invalid finished sequence
    pub invalid_penalty: f64,
    /// Reward of a partial sequence when search is disabled
    pub partial_fill_value: f64,
    /// Score finished sequences with the expert oracle instead of the
    /// learned reward network
    pub use_true_reward: bool,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            use_search: false,
            invalid_penalty: -10.0,
            partial_fill_value: 0.0,
            use_true_reward: false,
        }
    }
}

/// Scores finished sequences
pub struct TerminalScorer<R> {
    vocab: Arc<Vocabulary>,
    reward_net: Snapshot<R>,
    validity: Arc<dyn ValidityOracle>,
    expert: Option<Arc<dyn RewardOracle>>,
    use_true_reward: bool,
    invalid_penalty: f64,
}

impl<R: ScalarNetwork> TerminalScorer<R> {
    /// Score a generated string.
    ///
    /// Invalid strings get the penalty; valid ones are scored in canonical
    /// form, wrapped in start/end symbols, by the reward network or the
    /// expert oracle.
    pub fn score(&self, sequence: &str) -> Result<f64> {
        let stripped = self.vocab.strip(sequence);
        let Some(canonical) = self.validity.canonicalize(&stripped) else {
            trace!(sequence, "invalid sequence penalized");
            return Ok(self.invalid_penalty);
        };
        if canonical.is_empty() {
            return Ok(self.invalid_penalty);
        }

        if self.use_true_reward {
            let expert = self.expert.as_ref().ok_or_else(|| {
                RLError::Config("true reward requested but no expert oracle configured".into())
            })?;
            return expert
                .score(&[canonical])?
                .first()
                .copied()
                .ok_or_else(|| RLError::Agent("expert oracle returned no score".into()));
        }

        let wrapped = self.vocab.wrap(&canonical);
        let width = wrapped.chars().count();
        let batch = SequenceEncoder::new(Arc::clone(&self.vocab), width).encode_strings(&[wrapped])?;
        let values = self.reward_net.current().values(&batch)?;
        values
            .first()
            .copied()
            .ok_or_else(|| RLError::Agent("reward network returned no value".into()))
    }

    /// Score a state as a finished sequence
    pub fn score_state(&self, state: &SequenceState) -> Result<f64> {
        self.score(&state.key())
    }
}

/// Per-step reward of the generation environment.
///
/// Finished sequences go to the [`TerminalScorer`]. Partial sequences get
/// the tree-search estimate when search is enabled, the fill value
/// otherwise.
pub struct RewardFunction<P, R> {
    scorer: TerminalScorer<R>,
    search: Option<MonteCarloTreeSearch<P>>,
    use_search: bool,
    partial_fill_value: f64,
}

impl<P: PolicyNetwork, R: ScalarNetwork> RewardFunction<P, R> {
    /// Create a reward function reading the reward network from `reward_net`
    pub fn new(
        config: &RewardConfig,
        vocab: Arc<Vocabulary>,
        reward_net: Snapshot<R>,
        validity: Arc<dyn ValidityOracle>,
    ) -> Self {
        Self {
            scorer: TerminalScorer {
                vocab,
                reward_net,
                validity,
                expert: None,
                use_true_reward: config.use_true_reward,
                invalid_penalty: config.invalid_penalty,
            },
            search: None,
            use_search: config.use_search,
            partial_fill_value: config.partial_fill_value,
        }
    }

    /// Attach the search used for partial sequences
    #[must_use]
    pub fn with_search(mut self, search: MonteCarloTreeSearch<P>) -> Self {
        self.search = Some(search);
        self
    }

    /// Attach an expert oracle for true-reward scoring
    #[must_use]
    pub fn with_expert(mut self, expert: Arc<dyn RewardOracle>) -> Self {
        self.scorer.expert = Some(expert);
        self
    }

    /// The terminal scorer
    #[must_use]
    pub fn scorer(&self) -> &TerminalScorer<R> {
        &self.scorer
    }

    /// Reward of `state`: the search estimate rooted at it when `use_search`
    /// is set, its terminal score otherwise.
    pub fn evaluate(&mut self, state: &SequenceState, use_search: bool) -> Result<f64> {
        if !use_search {
            return self.scorer.score_state(state);
        }
        let search = self
            .search
            .as_mut()
            .ok_or_else(|| RLError::Config("search requested but no search attached".into()))?;
        let scorer = &self.scorer;
        search.search(state, |finished| scorer.score_state(finished))
    }
}

impl<P: PolicyNetwork, R: ScalarNetwork> SequenceReward for RewardFunction<P, R> {
    fn reward(&mut self, state: &SequenceState, terminal: bool) -> Result<f64> {
        if terminal {
            self.evaluate(state, false)
        } else if self.use_search {
            self.evaluate(state, true)
        } else {
            Ok(self.partial_fill_value)
        }
    }
}
