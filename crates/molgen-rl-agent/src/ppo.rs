//! Proximal Policy Optimization (PPO) actor-critic learner

use std::sync::Arc;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use molgen_rl_core::network::{load_parameters, log_softmax_rows};
use molgen_rl_core::trajectory::episode_rewards;
use molgen_rl_core::{
    snapshot_channel, EncodedBatch, Experience, ExperienceEpisode, Parameterized, PolicyNetwork,
    RLError, Result, ScalarNetwork, SequenceEncoder, SequenceState, Snapshot, SnapshotPublisher,
    Vocabulary,
};

use crate::optim::{clip_grad_norm, Optimizer, OptimizerConfig};
use crate::reinforce::FlatBatch;
use crate::utils::{compute_gae, normalize_advantages};

/// PPO-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    /// Discount factor
    pub gamma: f64,
    /// GAE lambda
    pub gae_lambda: f64,
    /// Clipping parameter for the probability ratio
    pub clip_eps: f64,
    /// Passes over each batch
    pub epochs: usize,
    /// Steps per gradient update
    pub minibatch_size: usize,
    /// Gradient norm limit for both networks, no clipping when absent
    pub max_grad_norm: Option<f64>,
    /// Standardize advantages across the batch
    pub normalize_advantages: bool,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_eps: 0.2,
            epochs: 10,
            minibatch_size: 64,
            max_grad_norm: None,
            normalize_advantages: true,
        }
    }
}

impl PpoConfig {
    /// Reject out-of-range values
    pub fn validate(&self) -> Result<()> {
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(RLError::Config(format!(
                "gamma must be in (0, 1], got {}",
                self.gamma
            )));
        }
        if !(self.gae_lambda > 0.0 && self.gae_lambda <= 1.0) {
            return Err(RLError::Config(format!(
                "gae_lambda must be in (0, 1], got {}",
                self.gae_lambda
            )));
        }
        if !(self.clip_eps > 0.0) {
            return Err(RLError::Config("clip_eps must be positive".into()));
        }
        if self.epochs == 0 || self.minibatch_size == 0 {
            return Err(RLError::Config("epochs and minibatch_size must be positive".into()));
        }
        if matches!(self.max_grad_norm, Some(n) if !(n > 0.0)) {
            return Err(RLError::Config("max_grad_norm must be positive".into()));
        }
        Ok(())
    }
}

/// Mean losses of one PPO call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PpoStats {
    /// Clipped surrogate loss of the actor
    pub actor_loss: f64,
    /// Mean squared error of the critic
    pub critic_loss: f64,
}

/// PPO learner owning an actor and a critic
pub struct Ppo<P, C> {
    config: PpoConfig,
    actor: P,
    critic: C,
    actor_opt: Box<dyn Optimizer>,
    critic_opt: Box<dyn Optimizer>,
    vocab: Arc<Vocabulary>,
    publisher: SnapshotPublisher<P>,
}

impl<P, C> Ppo<P, C>
where
    P: PolicyNetwork + Clone,
    C: ScalarNetwork,
{
    /// Create a learner owning `actor` and `critic`
    pub fn new(
        config: PpoConfig,
        actor: P,
        critic: C,
        actor_opt: &OptimizerConfig,
        critic_opt: &OptimizerConfig,
        vocab: Arc<Vocabulary>,
    ) -> Result<Self> {
        config.validate()?;
        actor_opt.validate()?;
        critic_opt.validate()?;
        let actor_opt = actor_opt.build(actor.num_parameters());
        let critic_opt = critic_opt.build(critic.num_parameters());
        let (publisher, _) = snapshot_channel(actor.clone());
        Ok(Self {
            config,
            actor,
            critic,
            actor_opt,
            critic_opt,
            vocab,
            publisher,
        })
    }

    /// A read-only view of the actor that follows every update
    #[must_use]
    pub fn subscribe(&self) -> Snapshot<P> {
        self.publisher.subscribe()
    }

    /// The actor being trained
    #[must_use]
    pub fn actor(&self) -> &P {
        &self.actor
    }

    /// The critic being trained
    #[must_use]
    pub fn critic(&self) -> &C {
        &self.critic
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    /// Replace actor and critic parameters with saved copies and publish
    /// the actor
    pub fn load(&mut self, actor: &[f64], critic: &[f64]) -> Result<()> {
        load_parameters(&mut self.actor, actor)?;
        load_parameters(&mut self.critic, critic)?;
        self.publisher.publish(self.actor.clone());
        Ok(())
    }

    /// GAE advantages and reference values `A + V` for one episode.
    ///
    /// The step that ended the episode has no bootstrap value; an episode
    /// whose last step still has a successor is bootstrapped with the
    /// critic's value of that successor.
    pub fn advantages(&self, episode: &[Experience]) -> Result<(Vec<f64>, Vec<f64>)> {
        let Some(last) = episode.last() else {
            return Ok((Vec::new(), Vec::new()));
        };

        let mut states: Vec<&SequenceState> = episode.iter().map(|e| &e.state).collect();
        if let Some(next) = last.last_state.as_ref() {
            states.push(next);
        }
        let width = states.iter().map(|s| s.len()).max().unwrap_or(0).max(1);
        let batch = SequenceEncoder::new(Arc::clone(&self.vocab), width).encode_states(states)?;
        let mut values = self.critic.values(&batch)?.to_vec();
        let next_value = if last.is_terminal() {
            0.0
        } else {
            values.pop().unwrap_or(0.0)
        };

        let advantages = compute_gae(
            &episode_rewards(episode),
            &values,
            next_value,
            self.config.gamma,
            self.config.gae_lambda,
        );
        let references = advantages.iter().zip(&values).map(|(a, v)| a + v).collect();
        Ok((advantages, references))
    }

    /// Run the configured epochs of clipped-surrogate updates over `episodes`.
    pub fn fit(&mut self, episodes: &[ExperienceEpisode]) -> Result<PpoStats> {
        let mut flat = FlatBatch::default();
        let mut advantages = Vec::new();
        let mut references = Vec::new();
        for episode in episodes {
            let (adv, reference) = self.advantages(episode)?;
            for exp in episode {
                flat.push(&self.vocab, &exp.state, exp.action)?;
            }
            advantages.extend(adv);
            references.extend(reference);
        }
        if flat.len() == 0 {
            return Err(RLError::EmptyBatch("no experience steps to train on".into()));
        }
        if self.config.normalize_advantages {
            normalize_advantages(&mut advantages)?;
        }

        let batch = flat.encoder(&self.vocab).encode_states(flat.states.iter().copied())?;

        // Frozen reference for the importance ratio
        let old_log_probs: Vec<f64> = {
            let log_probs = log_softmax_rows(&self.actor.logits(&batch)?);
            flat.actions
                .iter()
                .enumerate()
                .map(|(i, &a)| log_probs[[i, a]])
                .collect()
        };

        let result = self.optimize(&batch, &flat.actions, &old_log_probs, &advantages, &references);
        self.publisher.publish(self.actor.clone());
        result
    }

    #[allow(clippy::cast_precision_loss)]
    fn optimize(
        &mut self,
        batch: &EncodedBatch,
        actions: &[usize],
        old_log_probs: &[f64],
        advantages: &[f64],
        references: &[f64],
    ) -> Result<PpoStats> {
        let n = actions.len();
        let eps = self.config.clip_eps;
        let mut sum_actor = 0.0;
        let mut sum_critic = 0.0;
        let mut updates = 0_usize;

        for _ in 0..self.config.epochs {
            for start in (0..n).step_by(self.config.minibatch_size) {
                let rows: Vec<usize> = (start..(start + self.config.minibatch_size).min(n)).collect();
                let mini = batch.select(&rows);
                let m = rows.len() as f64;

                // Critic: mean squared error against the references
                let values = self.critic.values(&mini)?;
                let mut critic_loss = 0.0;
                let mut d_values = Array1::zeros(rows.len());
                for (k, &r) in rows.iter().enumerate() {
                    let diff = values[k] - references[r];
                    critic_loss += diff * diff;
                    d_values[k] = 2.0 * diff / m;
                }
                critic_loss /= m;

                // Actor: clipped surrogate
                let log_probs = log_softmax_rows(&self.actor.logits(&mini)?);
                let mut actor_loss = 0.0;
                let mut d_logits = Array2::zeros(log_probs.raw_dim());
                for (k, &r) in rows.iter().enumerate() {
                    let action = actions[r];
                    let ratio = (log_probs[[k, action]] - old_log_probs[r]).exp();
                    let surr1 = ratio * advantages[r];
                    let surr2 = ratio.clamp(1.0 - eps, 1.0 + eps) * advantages[r];
                    actor_loss -= surr1.min(surr2);

                    // The clipped branch carries no gradient.
                    let coef = if surr1 <= surr2 {
                        -ratio * advantages[r] / m
                    } else {
                        0.0
                    };
                    for (j, d) in d_logits.row_mut(k).iter_mut().enumerate() {
                        let indicator = if j == action { 1.0 } else { 0.0 };
                        *d = coef * (indicator - log_probs[[k, j]].exp());
                    }
                }
                actor_loss /= m;

                if !actor_loss.is_finite() || !critic_loss.is_finite() {
                    return Err(RLError::NumericalInstability(format!(
                        "PPO losses are actor={actor_loss}, critic={critic_loss}"
                    )));
                }

                self.critic_opt.zero_grad();
                self.critic.backward(&mini, &d_values, self.critic_opt.grad_mut())?;
                if let Some(max_norm) = self.config.max_grad_norm {
                    clip_grad_norm(self.critic_opt.grad_mut(), max_norm);
                }
                self.critic_opt.step(self.critic.parameters_mut())?;

                self.actor_opt.zero_grad();
                self.actor.backward(&mini, &d_logits, self.actor_opt.grad_mut())?;
                if let Some(max_norm) = self.config.max_grad_norm {
                    clip_grad_norm(self.actor_opt.grad_mut(), max_norm);
                }
                self.actor_opt.step(self.actor.parameters_mut())?;

                sum_actor += actor_loss;
                sum_critic += critic_loss;
                updates += 1;
            }
        }

        let stats = PpoStats {
            actor_loss: sum_actor / updates as f64,
            critic_loss: sum_critic / updates as f64,
        };
        debug!(
            actor_loss = stats.actor_loss,
            critic_loss = stats.critic_loss,
            steps = n,
            updates,
            "PPO update"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Init, MlpConfig, MlpPolicy, MlpScalarNet};
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sgd() -> OptimizerConfig {
        OptimizerConfig::Sgd {
            lr: 0.5,
            weight_decay: 0.0,
        }
    }

    fn learner(config: PpoConfig, critic_bias: f64) -> Ppo<MlpPolicy, MlpScalarNet> {
        learner_with(config, critic_bias, &sgd())
    }

    fn learner_with(
        config: PpoConfig,
        critic_bias: f64,
        actor_opt: &OptimizerConfig,
    ) -> Ppo<MlpPolicy, MlpScalarNet> {
        let vocab = Arc::new(Vocabulary::new(vec!['A', 'B', '>'], '>', None, None).unwrap());
        let net = MlpConfig {
            hidden_dims: vec![],
            context: 2,
            init: Init::Zeros,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let actor = MlpPolicy::new(3, &net, &mut rng);
        let mut critic = MlpScalarNet::new(3, &net, &mut rng);
        let n = critic.num_parameters();
        critic.parameters_mut()[n - 1] = critic_bias;
        Ppo::new(config, actor, critic, actor_opt, &sgd(), vocab).unwrap()
    }

    fn step(state: &str, action: char, reward: f64, terminal: bool) -> Experience {
        let state = SequenceState::from(state);
        let last_state = (!terminal).then(|| state.advance(action));
        Experience {
            state,
            action,
            reward,
            last_state,
        }
    }

    #[test]
    fn two_step_advantages_match_hand_computation() {
        let config = PpoConfig {
            gamma: 0.9,
            gae_lambda: 0.9,
            ..PpoConfig::default()
        };
        let ppo = learner(config, 0.5);
        let episode = vec![step("", 'A', 1.0, false), step("A", '>', 2.0, true)];

        let (adv, refs) = ppo.advantages(&episode).unwrap();
        assert_abs_diff_eq!(adv[1], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(adv[0], 2.165, epsilon = 1e-12);
        assert_abs_diff_eq!(refs[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(refs[0], 2.665, epsilon = 1e-12);
    }

    #[test]
    fn single_step_batch_cannot_be_normalized() {
        let mut ppo = learner(PpoConfig::default(), 0.0);
        let err = ppo.fit(&[vec![step("", 'A', 1.0, true)]]).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn positive_advantage_raises_action_probability() {
        let config = PpoConfig {
            epochs: 1,
            normalize_advantages: false,
            ..PpoConfig::default()
        };
        let mut ppo = learner(config, 0.0);
        let snapshot = ppo.subscribe();

        let stats = ppo.fit(&[vec![step("", 'B', 1.0, true)]]).unwrap();
        assert_abs_diff_eq!(stats.critic_loss, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.actor_loss, -1.0, epsilon = 1e-12);

        let encoder = SequenceEncoder::new(Arc::clone(&ppo.vocab), 1);
        let batch = encoder.encode_state(&SequenceState::default()).unwrap();
        let probs = snapshot
            .current()
            .forward(&batch, None)
            .unwrap()
            .distribution
            .into_probabilities();
        assert!(probs[1] > 1.0 / 3.0);
        assert!(ppo.critic().values(&batch).unwrap()[0] > 0.0);
    }

    #[test]
    fn clipped_ratio_stops_the_actor() {
        let config = PpoConfig {
            epochs: 3,
            normalize_advantages: false,
            ..PpoConfig::default()
        };
        let big_step = OptimizerConfig::Sgd {
            lr: 10.0,
            weight_decay: 0.0,
        };
        let mut three = learner_with(config.clone(), 0.0, &big_step);
        let mut one = learner_with(
            PpoConfig {
                epochs: 1,
                ..config
            },
            0.0,
            &big_step,
        );
        let batch = [vec![step("", 'A', 1.0, true)]];

        // The first epoch pushes the ratio far past 1 + eps, so the later
        // epochs sit on the clipped branch and leave the actor untouched.
        let stats = three.fit(&batch).unwrap();
        one.fit(&batch).unwrap();
        assert_eq!(three.actor().parameters(), one.actor().parameters());

        // Unclipped -A in the first epoch, then -(1 + eps) * A twice
        assert_abs_diff_eq!(stats.actor_loss, (-1.0 - 1.2 - 1.2) / 3.0, epsilon = 1e-12);

        let encoder = SequenceEncoder::new(Arc::clone(&three.vocab), 1);
        let state = encoder.encode_state(&SequenceState::default()).unwrap();
        let p_new = three
            .actor()
            .forward(&state, None)
            .unwrap()
            .distribution
            .into_probabilities()[0];
        assert!(p_new / (1.0 / 3.0) > 1.2);
    }

    #[test]
    fn gamma_is_validated() {
        let config = PpoConfig {
            gamma: 0.0,
            ..PpoConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_restores_and_publishes_the_actor() {
        let mut ppo = learner(
            PpoConfig {
                epochs: 1,
                normalize_advantages: false,
                ..PpoConfig::default()
            },
            0.0,
        );
        let snapshot = ppo.subscribe();
        let actor = ppo.actor().parameters().to_vec();
        let critic = ppo.critic().parameters().to_vec();

        ppo.fit(&[vec![step("", 'B', 1.0, true)]]).unwrap();
        assert_ne!(ppo.actor().parameters(), actor.as_slice());

        ppo.load(&actor, &critic).unwrap();
        assert_eq!(ppo.actor().parameters(), actor.as_slice());
        assert_eq!(ppo.critic().parameters(), critic.as_slice());
        assert_eq!(snapshot.current().parameters(), actor.as_slice());
        assert!(ppo.load(&actor[1..], &critic).is_err());
    }

    #[test]
    fn rejects_bad_clip() {
        let config = PpoConfig {
            clip_eps: 0.0,
            ..PpoConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
