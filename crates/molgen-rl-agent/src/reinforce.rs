//! REINFORCE policy-gradient learner

use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use molgen_rl_core::network::{load_parameters, log_softmax_rows};
use molgen_rl_core::trajectory::episode_rewards;
use molgen_rl_core::{
    snapshot_channel, AgentConfig, ExperienceEpisode, PolicyNetwork, RLError, Result,
    SequenceEncoder, SequenceState, Snapshot, SnapshotPublisher, Token, Vocabulary,
};

use crate::optim::{clip_grad_norm, Optimizer, OptimizerConfig};
use crate::utils::calc_q_vals;

/// REINFORCE configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinforceConfig {
    /// Base agent configuration
    #[serde(flatten)]
    pub base: AgentConfig,
    /// Gradient norm limit, no clipping when absent
    #[serde(default)]
    pub max_grad_norm: Option<f64>,
}

impl Default for ReinforceConfig {
    fn default() -> Self {
        Self {
            base: AgentConfig::default(),
            max_grad_norm: None,
        }
    }
}

impl ReinforceConfig {
    /// Reject out-of-range values
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if matches!(self.max_grad_norm, Some(n) if !(n > 0.0)) {
            return Err(RLError::Config("max_grad_norm must be positive".into()));
        }
        Ok(())
    }
}

/// Steps of a batch flattened into parallel arrays
#[derive(Default)]
pub(crate) struct FlatBatch<'a> {
    pub states: Vec<&'a SequenceState>,
    pub actions: Vec<usize>,
}

impl<'a> FlatBatch<'a> {
    pub(crate) fn push(&mut self, vocab: &Vocabulary, state: &'a SequenceState, action: Token) -> Result<()> {
        self.states.push(state);
        self.actions.push(vocab.require_index(action)?);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    /// Encode the states at the width of the longest one
    pub(crate) fn encoder(&self, vocab: &Arc<Vocabulary>) -> SequenceEncoder {
        let width = self.states.iter().map(|s| s.len()).max().unwrap_or(0).max(1);
        SequenceEncoder::new(Arc::clone(vocab), width)
    }
}

/// Monte Carlo policy gradient.
///
/// Each update maximizes `mean(G_t * log pi(a_t | s_t))` over every step of
/// the batch, with `G_t` the discounted return from step `t`.
pub struct Reinforce<P> {
    config: ReinforceConfig,
    policy: P,
    optimizer: Box<dyn Optimizer>,
    vocab: Arc<Vocabulary>,
    publisher: SnapshotPublisher<P>,
}

impl<P: PolicyNetwork + Clone> Reinforce<P> {
    /// Create a learner owning `policy`
    pub fn new(
        config: ReinforceConfig,
        policy: P,
        optimizer: &OptimizerConfig,
        vocab: Arc<Vocabulary>,
    ) -> Result<Self> {
        config.validate()?;
        optimizer.validate()?;
        let optimizer = optimizer.build(policy.num_parameters());
        let (publisher, _) = snapshot_channel(policy.clone());
        Ok(Self {
            config,
            policy,
            optimizer,
            vocab,
            publisher,
        })
    }

    /// A read-only view of the policy that follows every update
    #[must_use]
    pub fn subscribe(&self) -> Snapshot<P> {
        self.publisher.subscribe()
    }

    /// The policy being trained
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ReinforceConfig {
        &self.config
    }

    /// Replace the policy parameters with `saved` and publish them
    pub fn load_policy(&mut self, saved: &[f64]) -> Result<()> {
        load_parameters(&mut self.policy, saved)?;
        self.publisher.publish(self.policy.clone());
        Ok(())
    }

    /// One gradient step over every step of `episodes`.
    ///
    /// Returns the (non-negated) surrogate `mean(G * log pi)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(&mut self, episodes: &[ExperienceEpisode]) -> Result<f64> {
        let mut flat = FlatBatch::default();
        let mut returns = Vec::new();
        for episode in episodes {
            let q_vals = calc_q_vals(&episode_rewards(episode), self.config.base.gamma);
            for (exp, g) in episode.iter().zip(q_vals) {
                flat.push(&self.vocab, &exp.state, exp.action)?;
                returns.push(g);
            }
        }
        if flat.len() == 0 {
            return Err(RLError::EmptyBatch("no experience steps to train on".into()));
        }

        let batch = flat.encoder(&self.vocab).encode_states(flat.states.iter().copied())?;
        let log_probs = log_softmax_rows(&self.policy.logits(&batch)?);
        let n = flat.len() as f64;

        let mut loss = 0.0;
        let mut d_logits = Array2::zeros(log_probs.raw_dim());
        for (i, (&action, &g)) in flat.actions.iter().zip(&returns).enumerate() {
            loss += g * log_probs[[i, action]];
            let scale = -g / n;
            for (j, d) in d_logits.row_mut(i).iter_mut().enumerate() {
                let indicator = if j == action { 1.0 } else { 0.0 };
                *d = scale * (indicator - log_probs[[i, j]].exp());
            }
        }
        loss /= n;
        if !loss.is_finite() {
            return Err(RLError::NumericalInstability(format!(
                "REINFORCE loss is {loss}"
            )));
        }

        self.optimizer.zero_grad();
        self.policy.backward(&batch, &d_logits, self.optimizer.grad_mut())?;
        if let Some(max_norm) = self.config.max_grad_norm {
            clip_grad_norm(self.optimizer.grad_mut(), max_norm);
        }
        self.optimizer.step(self.policy.parameters_mut())?;
        self.publisher.publish(self.policy.clone());

        debug!(loss, steps = flat.len(), "REINFORCE update");
        Ok(loss)
    }
}
