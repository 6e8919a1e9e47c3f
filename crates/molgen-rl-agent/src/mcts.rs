//! Monte Carlo tree search over token sequences
//!
//! A flat-arena PUCT search: nodes live in one `Vec`, children of a node are
//! stored contiguously, and every simulation walks down by the PUCT score,
//! expands the leaf with the policy's most likely tokens, completes the
//! sequence with a policy rollout and backs the terminal score up to the
//! root.

use serde::{Deserialize, Serialize};
use tracing::debug;

use molgen_rl_core::{Agent, PolicyNetwork, RLError, Result, SequenceState, Snapshot, Token};

use crate::agent::PolicyAgent;

/// Search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MctsConfig {
    /// Simulations per search
    pub simulations: usize,
    /// PUCT exploration constant
    pub exploration: f64,
    /// Number of most likely tokens added as children on expansion
    pub expansion_width: usize,
    /// Length at which a rollout is cut
    pub max_len: usize,
}

impl Default for MctsConfig {
    fn default() -> Self {
        Self {
            simulations: 10,
            exploration: 1.0,
            expansion_width: 5,
            max_len: 100,
        }
    }
}

impl MctsConfig {
    /// Reject empty searches
    pub fn validate(&self) -> Result<()> {
        if self.simulations == 0 || self.expansion_width == 0 || self.max_len == 0 {
            return Err(RLError::Config(
                "simulations, expansion_width and max_len must be positive".into(),
            ));
        }
        if !(self.exploration >= 0.0) {
            return Err(RLError::Config("exploration must be non-negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    visits: u32,
    value_sum: f64,
    prior: f64,
    token: Option<Token>,
    parent: usize,
    children_head: usize,
    num_children: usize,
}

impl Node {
    fn new(token: Option<Token>, parent: usize, prior: f64) -> Self {
        Self {
            visits: 0,
            value_sum: 0.0,
            prior,
            token,
            parent,
            children_head: 0,
            num_children: 0,
        }
    }

    fn q_value(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            self.value_sum / f64::from(self.visits)
        }
    }
}

/// Lookahead estimator of a partial sequence's eventual reward
pub struct MonteCarloTreeSearch<P> {
    config: MctsConfig,
    agent: PolicyAgent<P>,
}

impl<P: PolicyNetwork> MonteCarloTreeSearch<P> {
    /// Create a search driven by `agent`; it never records probabilities.
    pub fn new(config: MctsConfig, agent: PolicyAgent<P>) -> Self {
        Self { config, agent }
    }

    /// Search configuration
    #[must_use]
    pub fn config(&self) -> &MctsConfig {
        &self.config
    }

    /// Switch the rollout policy to another parameter snapshot
    pub fn set_policy(&mut self, policy: Snapshot<P>) {
        self.agent.set_policy(policy);
    }

    fn is_terminal(&self, state: &SequenceState) -> bool {
        state.last() == Some(self.agent.encoder().vocab().end()) || state.len() >= self.config.max_len
    }

    /// Mean backed-up value at `root` after the configured simulations.
    ///
    /// `terminal_value` scores finished sequences.
    pub fn search<F>(&mut self, root: &SequenceState, mut terminal_value: F) -> Result<f64>
    where
        F: FnMut(&SequenceState) -> Result<f64>,
    {
        if self.is_terminal(root) {
            return terminal_value(root);
        }

        let mut tree = vec![Node::new(None, 0, 1.0)];

        for _ in 0..self.config.simulations {
            // Selection
            let mut node_idx = 0;
            let mut state = root.clone();
            while tree[node_idx].num_children > 0 {
                let current = &tree[node_idx];
                let sqrt_visits = f64::from(current.visits.max(1)).sqrt();
                let head = current.children_head;
                let mut best = head;
                let mut best_score = f64::NEG_INFINITY;
                for child_idx in head..head + current.num_children {
                    let child = &tree[child_idx];
                    let score = child.q_value()
                        + self.config.exploration * child.prior * sqrt_visits
                            / (1.0 + f64::from(child.visits));
                    if score > best_score {
                        best_score = score;
                        best = child_idx;
                    }
                }
                node_idx = best;
                if let Some(token) = tree[node_idx].token {
                    state = state.advance(token);
                }
            }

            // Expansion and rollout
            let value = if self.is_terminal(&state) {
                terminal_value(&state)?
            } else {
                let children = self.expand(&state, node_idx)?;
                let head = tree.len();
                tree[node_idx].children_head = head;
                tree[node_idx].num_children = children.len();
                tree.extend(children);

                let finished = self.rollout(state)?;
                terminal_value(&finished)?
            };

            // Backpropagation
            let mut curr = node_idx;
            loop {
                let node = &mut tree[curr];
                node.visits += 1;
                node.value_sum += value;
                if curr == 0 {
                    break;
                }
                curr = node.parent;
            }
        }

        debug!(
            simulations = self.config.simulations,
            nodes = tree.len(),
            value = tree[0].q_value(),
            "search finished"
        );
        Ok(tree[0].q_value())
    }

    /// Children for the most likely next tokens, with the policy's priors
    fn expand(&self, state: &SequenceState, parent: usize) -> Result<Vec<Node>> {
        let memory = self.agent.initial_memory();
        let (probs, _) = self.agent.distribution(state, memory.as_ref())?;
        let vocab = self.agent.encoder().vocab();

        let mut order: Vec<usize> = (0..probs.len()).filter(|&i| probs[i] > 0.0).collect();
        order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));
        order.truncate(self.config.expansion_width);

        order
            .into_iter()
            .map(|i| {
                let token = vocab.token_at(i).ok_or(RLError::DimensionMismatch {
                    expected: vocab.len(),
                    actual: i,
                })?;
                Ok(Node::new(Some(token), parent, probs[i]))
            })
            .collect()
    }

    /// Complete `state` by sampling from the policy
    fn rollout(&mut self, mut state: SequenceState) -> Result<SequenceState> {
        let mut memory = self.agent.initial_memory();
        while !self.is_terminal(&state) {
            let (action, next_memory) = self.agent.act_with(&state, memory, false)?;
            state = state.advance(action);
            memory = next_memory;
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Init, MlpConfig, MlpPolicy};
    use crate::selector::ProbabilityActionSelector;
    use approx::assert_abs_diff_eq;
    use molgen_rl_core::{SequenceEncoder, Vocabulary};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn search(simulations: usize) -> MonteCarloTreeSearch<MlpPolicy> {
        let vocab = Arc::new(Vocabulary::new(vec!['A', 'B', '>'], '>', None, None).unwrap());
        let config = MlpConfig {
            hidden_dims: vec![],
            context: 2,
            init: Init::Zeros,
        };
        let policy = MlpPolicy::new(3, &config, &mut StdRng::seed_from_u64(0));
        let agent = PolicyAgent::new(
            Snapshot::fixed(policy),
            SequenceEncoder::new(vocab.clone(), 4),
            ProbabilityActionSelector::new(vocab, 9),
        );
        MonteCarloTreeSearch::new(
            MctsConfig {
                simulations,
                max_len: 3,
                ..MctsConfig::default()
            },
            agent,
        )
    }

    #[test]
    fn constant_scorer_gives_constant_value() {
        let mut mcts = search(16);
        let value = mcts.search(&SequenceState::from("A"), |_| Ok(2.5)).unwrap();
        assert_abs_diff_eq!(value, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn value_lies_within_scorer_range() {
        let mut mcts = search(32);
        let value = mcts
            .search(&SequenceState::default(), |s| {
                Ok(if s.key() == "AB>" { 1.0 } else { 0.0 })
            })
            .unwrap();
        assert!((0.0..=1.0).contains(&value));
    }

    #[test]
    fn terminal_root_is_scored_directly() {
        let mut mcts = search(8);
        let mut calls = 0;
        let value = mcts
            .search(&SequenceState::from("AB>"), |_| {
                calls += 1;
                Ok(-1.0)
            })
            .unwrap();
        assert_abs_diff_eq!(value, -1.0);
        assert_eq!(calls, 1);
    }
}
