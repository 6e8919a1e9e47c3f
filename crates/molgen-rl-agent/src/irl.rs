//! Guided cost learning: inverse RL for the reward network
//!
//! Each inner iteration raises the reward of demonstration sequences and
//! lowers a partition-function estimate built from sampled sequences:
//!
//! `J = mean(r(D_demo)) - log(mean(z * exp(r(D_samp))))`
//!
//! When the sampled batch is small, the demonstration scores are appended
//! to the sampled ones before the partition term is estimated.

use std::sync::Arc;

use ndarray::Array1;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::debug;

use molgen_rl_core::network::load_parameters;
use molgen_rl_core::{
    snapshot_channel, DemonstrationSource, EncodedBatch, RLError, Result, ScalarNetwork,
    SequenceEncoder, Snapshot, SnapshotPublisher, Trajectory, Vocabulary,
};

use crate::buffer::TrajectoriesBuffer;
use crate::optim::{clip_grad_norm, Optimizer, OptimizerConfig};

/// Below this many sampled sequences the demonstrations join the
/// partition-function estimate.
pub const DEMO_AUGMENT_LIMIT: usize = 1000;

/// IRL configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrlConfig {
    /// Reward-network updates per call
    pub k: usize,
    /// Replay past trajectories alongside the fresh batch
    pub use_buffer: bool,
    /// Replay buffer capacity
    pub buffer_size: usize,
    /// Trajectories drawn from the buffer per call
    pub buffer_batch_size: usize,
    /// Demonstrations drawn per inner iteration
    pub demo_batch_size: usize,
    /// Gradient norm limit, no clipping when absent
    pub max_grad_norm: Option<f64>,
}

impl Default for IrlConfig {
    fn default() -> Self {
        Self {
            k: 10,
            use_buffer: true,
            buffer_size: 1000,
            buffer_batch_size: 100,
            demo_batch_size: 32,
            max_grad_norm: None,
        }
    }
}

impl IrlConfig {
    /// Reject zero sizes
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 || self.demo_batch_size == 0 {
            return Err(RLError::Config("k and demo_batch_size must be positive".into()));
        }
        if self.use_buffer && (self.buffer_size == 0 || self.buffer_batch_size == 0) {
            return Err(RLError::Config(
                "buffer_size and buffer_batch_size must be positive".into(),
            ));
        }
        if matches!(self.max_grad_norm, Some(n) if !(n > 0.0)) {
            return Err(RLError::Config("max_grad_norm must be positive".into()));
        }
        Ok(())
    }
}

/// Encode strings at the width of the longest one
fn encode(vocab: &Arc<Vocabulary>, sequences: &[String]) -> Result<EncodedBatch> {
    let width = sequences
        .iter()
        .map(|s| s.chars().count())
        .max()
        .unwrap_or(0)
        .max(1);
    SequenceEncoder::new(Arc::clone(vocab), width).encode_strings(sequences)
}

/// Reward learner contrasting demonstrations with sampled trajectories
pub struct GuidedRewardLearningIrl<R> {
    config: IrlConfig,
    reward_net: R,
    optimizer: Box<dyn Optimizer>,
    vocab: Arc<Vocabulary>,
    demos: Box<dyn DemonstrationSource>,
    buffer: Option<TrajectoriesBuffer>,
    rng: StdRng,
    publisher: SnapshotPublisher<R>,
}

impl<R: ScalarNetwork + Clone> GuidedRewardLearningIrl<R> {
    /// Create a learner owning `reward_net`
    pub fn new(
        config: IrlConfig,
        reward_net: R,
        optimizer: &OptimizerConfig,
        vocab: Arc<Vocabulary>,
        demos: Box<dyn DemonstrationSource>,
        rng: StdRng,
    ) -> Result<Self> {
        config.validate()?;
        optimizer.validate()?;
        let buffer = if config.use_buffer {
            Some(TrajectoriesBuffer::new(config.buffer_size)?)
        } else {
            None
        };
        let optimizer = optimizer.build(reward_net.num_parameters());
        let (publisher, _) = snapshot_channel(reward_net.clone());
        Ok(Self {
            config,
            reward_net,
            optimizer,
            vocab,
            demos,
            buffer,
            rng,
            publisher,
        })
    }

    /// A read-only view of the reward network that follows every update
    #[must_use]
    pub fn subscribe(&self) -> Snapshot<R> {
        self.publisher.subscribe()
    }

    /// The reward network being trained
    #[must_use]
    pub fn reward_net(&self) -> &R {
        &self.reward_net
    }

    /// The replay buffer, when enabled
    #[must_use]
    pub fn buffer(&self) -> Option<&TrajectoriesBuffer> {
        self.buffer.as_ref()
    }

    /// Replace the reward network parameters with `saved` and publish them
    pub fn load_reward_net(&mut self, saved: &[f64]) -> Result<()> {
        load_parameters(&mut self.reward_net, saved)?;
        self.publisher.publish(self.reward_net.clone());
        Ok(())
    }

    /// Run `k` reward updates against `trajectories`.
    ///
    /// Returns the mean of the per-iteration objectives `J`.
    pub fn fit(&mut self, trajectories: &[Trajectory]) -> Result<f64> {
        let mut batch = trajectories.to_vec();
        if let Some(buffer) = self.buffer.as_mut() {
            batch.extend(buffer.sample(self.config.buffer_batch_size, &mut self.rng));
            buffer.populate(batch.iter().cloned());
        }
        if batch.is_empty() {
            return Err(RLError::EmptyBatch("no trajectories for reward learning".into()));
        }

        let sampled: Vec<String> = batch.iter().map(Trajectory::sequence).collect();
        let result = self.optimize(&sampled);
        self.publisher.publish(self.reward_net.clone());
        result
    }

    #[allow(clippy::cast_precision_loss)]
    fn optimize(&mut self, sampled: &[String]) -> Result<f64> {
        let samp_batch = encode(&self.vocab, sampled)?;
        let mut objectives = Vec::with_capacity(self.config.k);

        for _ in 0..self.config.k {
            let demos = self.demos.sample(self.config.demo_batch_size, &mut self.rng)?;
            if demos.is_empty() {
                return Err(RLError::EmptyBatch("demonstration source returned nothing".into()));
            }
            let demo_batch = encode(&self.vocab, &demos)?;

            let r_demo = self.reward_net.values(&demo_batch)?;
            let r_samp = self.reward_net.values(&samp_batch)?;
            let n_demo = r_demo.len();
            let n_samp = r_samp.len();

            let augment = n_samp < DEMO_AUGMENT_LIMIT;
            let mut scores = r_samp.to_vec();
            if augment {
                scores.extend(r_demo.iter());
            }
            // TODO: importance weights are uniform; correct them with each
            // trajectory's traj_prob under the sampling policy.
            let z = vec![1.0; scores.len()];

            // Weighted log-mean-exp and its softmax weights
            let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let scaled: Vec<f64> = scores
                .iter()
                .zip(&z)
                .map(|(s, w)| w * (s - max).exp())
                .collect();
            let total: f64 = scaled.iter().sum();
            let log_partition = max + (total / scores.len() as f64).ln();

            let objective = r_demo.iter().mean() - log_partition
                + Self::internal_diversity(sampled);
            if !objective.is_finite() {
                return Err(RLError::NumericalInstability(format!(
                    "IRL objective is {objective}"
                )));
            }

            // Gradients of -J with respect to each score
            let weights: Vec<f64> = scaled.iter().map(|s| s / total).collect();
            let d_samp = Array1::from(weights[..n_samp].to_vec());
            let mut d_demo = Array1::from_elem(n_demo, -1.0 / n_demo as f64);
            if augment {
                for (d, w) in d_demo.iter_mut().zip(&weights[n_samp..]) {
                    *d += w;
                }
            }

            self.optimizer.zero_grad();
            self.reward_net
                .backward(&samp_batch, &d_samp, self.optimizer.grad_mut())?;
            self.reward_net
                .backward(&demo_batch, &d_demo, self.optimizer.grad_mut())?;
            if let Some(max_norm) = self.config.max_grad_norm {
                clip_grad_norm(self.optimizer.grad_mut(), max_norm);
            }
            self.optimizer.step(self.reward_net.parameters_mut())?;

            objectives.push(objective);
        }

        let mean = objectives.iter().mean();
        debug!(objective = mean, sampled = sampled.len(), "IRL update");
        Ok(mean)
    }

    /// Diversity bonus over the sampled sequences; not used yet.
    fn internal_diversity(_sequences: &[String]) -> f64 {
        0.0
    }
}
