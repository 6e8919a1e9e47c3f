//! Training loop: consumes gathered units, runs reward and policy updates

use std::collections::HashMap;

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use molgen_rl_core::{
    AgentConfig, Environment, ExperienceEpisode, PolicyNetwork, RLError, Result, ScalarNetwork,
    Trajectory,
};

use crate::irl::GuidedRewardLearningIrl;
use crate::parallel::ParallelGatherer;
use crate::ppo::Ppo;
use crate::reinforce::Reinforce;
use crate::source::{ExperienceSource, GatherUnit};
use crate::utils::trailing_mean;

/// Losses of one policy update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    /// Policy (actor) loss
    pub loss: f64,
    /// Critic loss, for actor-critic learners
    pub critic_loss: Option<f64>,
}

/// Saved parameters of every network a learner owns, in a fixed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerWeights(pub Vec<Vec<f64>>);

impl LearnerWeights {
    fn networks<const N: usize>(&self) -> Result<&[Vec<f64>; N]> {
        <&[Vec<f64>; N]>::try_from(self.0.as_slice()).map_err(|_| RLError::DimensionMismatch {
            expected: N,
            actual: self.0.len(),
        })
    }
}

/// A policy-gradient learner the trainer can drive
pub trait PolicyLearner: Send {
    /// One update over completed episodes
    fn learn(&mut self, episodes: &[ExperienceEpisode]) -> Result<PolicyUpdate>;

    /// Copy of the current parameters
    fn weights(&self) -> LearnerWeights;

    /// Load parameters taken with [`PolicyLearner::weights`]
    fn restore(&mut self, weights: &LearnerWeights) -> Result<()>;
}

/// A reward learner the trainer can drive
pub trait RewardLearner: Send {
    /// One update over completed trajectories, returning its objective
    fn learn(&mut self, trajectories: &[Trajectory]) -> Result<f64>;

    /// Copy of the current parameters
    fn weights(&self) -> LearnerWeights;

    /// Load parameters taken with [`RewardLearner::weights`]
    fn restore(&mut self, weights: &LearnerWeights) -> Result<()>;
}

impl<P: PolicyNetwork + Clone> PolicyLearner for Reinforce<P> {
    fn learn(&mut self, episodes: &[ExperienceEpisode]) -> Result<PolicyUpdate> {
        Ok(PolicyUpdate {
            loss: self.fit(episodes)?,
            critic_loss: None,
        })
    }

    fn weights(&self) -> LearnerWeights {
        LearnerWeights(vec![self.policy().parameters().to_vec()])
    }

    fn restore(&mut self, weights: &LearnerWeights) -> Result<()> {
        let [policy] = weights.networks::<1>()?;
        self.load_policy(policy)
    }
}

impl<P: PolicyNetwork + Clone, C: ScalarNetwork> PolicyLearner for Ppo<P, C> {
    fn learn(&mut self, episodes: &[ExperienceEpisode]) -> Result<PolicyUpdate> {
        let stats = self.fit(episodes)?;
        Ok(PolicyUpdate {
            loss: stats.actor_loss,
            critic_loss: Some(stats.critic_loss),
        })
    }

    fn weights(&self) -> LearnerWeights {
        LearnerWeights(vec![
            self.actor().parameters().to_vec(),
            self.critic().parameters().to_vec(),
        ])
    }

    fn restore(&mut self, weights: &LearnerWeights) -> Result<()> {
        let [actor, critic] = weights.networks::<2>()?;
        self.load(actor, critic)
    }
}

impl<R: ScalarNetwork + Clone> RewardLearner for GuidedRewardLearningIrl<R> {
    fn learn(&mut self, trajectories: &[Trajectory]) -> Result<f64> {
        self.fit(trajectories)
    }

    fn weights(&self) -> LearnerWeights {
        LearnerWeights(vec![self.reward_net().parameters().to_vec()])
    }

    fn restore(&mut self, weights: &LearnerWeights) -> Result<()> {
        let [reward_net] = weights.networks::<1>()?;
        self.load_reward_net(reward_net)
    }
}

/// Trainer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Base agent configuration; `episodes_to_train` sets the update cadence
    #[serde(flatten)]
    pub base: AgentConfig,
    /// Stop after this many completed episodes
    pub n_episodes: usize,
    /// Total rewards averaged for the reported mean
    pub reward_window: usize,
    /// Load the parameters of the best trailing mean back when a run ends
    pub restore_best: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            base: AgentConfig::default(),
            n_episodes: 1000,
            reward_window: 100,
            restore_best: true,
        }
    }
}

impl TrainerConfig {
    /// Reject zero sizes
    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if self.n_episodes == 0 || self.reward_window == 0 {
            return Err(RLError::Config(
                "n_episodes and reward_window must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Summary of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Completed episodes
    pub episodes: usize,
    /// Policy updates applied
    pub updates: usize,
    /// Updates skipped on numerical instability
    pub skipped_updates: usize,
    /// Mean of the trailing reward window at the end
    pub mean_reward: Option<f64>,
    /// Best trailing mean seen
    pub best_mean_reward: Option<f64>,
    /// Episode count at which the best parameters were saved
    pub best_episode: Option<usize>,
    /// Total reward of every episode, in completion order
    pub total_rewards: Vec<f64>,
    /// Policy loss of every applied update
    pub policy_losses: Vec<f64>,
    /// IRL objective of every applied reward update
    pub irl_objectives: Vec<f64>,
}

/// Learner parameters saved at the best trailing mean reward
#[derive(Debug, Clone, PartialEq)]
pub struct BestWeights {
    /// Trailing mean when saved
    pub mean_reward: f64,
    /// Episode count when saved
    pub episode: usize,
    /// Policy learner parameters
    pub policy: LearnerWeights,
    /// Reward learner parameters, when one is attached
    pub reward: Option<LearnerWeights>,
}

/// Per-producer episode being assembled
#[derive(Debug, Default)]
struct InFlight {
    steps: ExperienceEpisode,
    finished: Option<ExperienceEpisode>,
    trajectory: Option<Trajectory>,
}

/// Single consumer of gathered units.
///
/// Assembles each producer's steps, trajectory and total reward into one
/// completed episode. After every `episodes_to_train` completed episodes it
/// runs the reward learner (if any) on their trajectories and then the
/// policy learner on their steps. Learners publish their new parameters
/// themselves.
///
/// Whenever the trailing mean reward matches or beats the best so far, the
/// parameters of both learners are saved; with `restore_best` they are
/// loaded back when a run ends.
pub struct Trainer {
    config: TrainerConfig,
    policy: Box<dyn PolicyLearner>,
    reward: Option<Box<dyn RewardLearner>>,
    in_flight: HashMap<usize, InFlight>,
    completed: Vec<(ExperienceEpisode, Trajectory)>,
    best: Option<BestWeights>,
    report: TrainingReport,
}

impl Trainer {
    /// Create a trainer around a policy learner
    pub fn new(config: TrainerConfig, policy: Box<dyn PolicyLearner>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            policy,
            reward: None,
            in_flight: HashMap::new(),
            completed: Vec::new(),
            best: None,
            report: TrainingReport::default(),
        })
    }

    /// Learn the reward with `reward` before each policy update
    #[must_use]
    pub fn with_reward_learner(mut self, reward: Box<dyn RewardLearner>) -> Self {
        self.reward = Some(reward);
        self
    }

    /// Whether the episode budget is spent
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.report.episodes >= self.config.n_episodes
    }

    /// Progress so far
    #[must_use]
    pub fn report(&self) -> &TrainingReport {
        &self.report
    }

    /// Parameters saved at the best trailing mean so far
    #[must_use]
    pub fn best_weights(&self) -> Option<&BestWeights> {
        self.best.as_ref()
    }

    /// Account for one unit produced by `worker`.
    ///
    /// A worker sends the steps of an episode, then its trajectory, then
    /// its total reward. The total reward completes the episode.
    pub fn consume(&mut self, worker: usize, unit: GatherUnit) -> Result<()> {
        match unit {
            GatherUnit::Step(exp) => {
                let terminal = exp.is_terminal();
                let slot = self.in_flight.entry(worker).or_default();
                slot.steps.push(exp);
                if terminal {
                    slot.finished = Some(std::mem::take(&mut slot.steps));
                }
            }
            GatherUnit::Trajectory(trajectory) => {
                self.in_flight.entry(worker).or_default().trajectory = Some(trajectory);
            }
            GatherUnit::TotalReward(total) => {
                let slot = self.in_flight.entry(worker).or_default();
                let (Some(episode), Some(trajectory)) = (slot.finished.take(), slot.trajectory.take())
                else {
                    return Err(RLError::Worker(format!(
                        "worker {worker} sent a total reward for an unfinished episode"
                    )));
                };
                self.completed.push((episode, trajectory));
                self.record_total_reward(total);
                if self.completed.len() >= self.config.base.episodes_to_train {
                    self.train()?;
                }
            }
            GatherUnit::Failed(message) => {
                return Err(RLError::Worker(format!("worker {worker} failed: {message}")));
            }
        }
        Ok(())
    }

    fn record_total_reward(&mut self, total: f64) {
        let report = &mut self.report;
        report.episodes += 1;
        report.total_rewards.push(total);
        report.mean_reward = trailing_mean(&report.total_rewards, self.config.reward_window);

        if let Some(mean) = report.mean_reward {
            if report.best_mean_reward.map_or(true, |best| mean >= best) {
                report.best_mean_reward = Some(mean);
                report.best_episode = Some(report.episodes);
                self.best = Some(BestWeights {
                    mean_reward: mean,
                    episode: report.episodes,
                    policy: self.policy.weights(),
                    reward: self.reward.as_ref().map(|r| r.weights()),
                });
            }
            gauge!("molgen_rl_mean_reward", mean);
        }
        counter!("molgen_rl_episodes_total", 1);
    }

    fn train(&mut self) -> Result<()> {
        let (episodes, trajectories): (Vec<_>, Vec<_>) = self
            .completed
            .drain(..self.config.base.episodes_to_train)
            .unzip();

        if let Some(reward) = self.reward.as_mut() {
            match reward.learn(&trajectories) {
                Ok(objective) => {
                    self.report.irl_objectives.push(objective);
                    gauge!("molgen_rl_irl_objective", objective);
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "skipping reward update");
                    self.report.skipped_updates += 1;
                    counter!("molgen_rl_skipped_updates_total", 1);
                }
                Err(e) => return Err(e),
            }
        }

        match self.policy.learn(&episodes) {
            Ok(update) => {
                self.report.updates += 1;
                self.report.policy_losses.push(update.loss);
                counter!("molgen_rl_updates_total", 1);
                gauge!("molgen_rl_policy_loss", update.loss);
                if let Some(critic_loss) = update.critic_loss {
                    gauge!("molgen_rl_critic_loss", critic_loss);
                }
                info!(
                    episodes = self.report.episodes,
                    batch = episodes.len(),
                    loss = update.loss,
                    critic_loss = ?update.critic_loss,
                    mean_reward = ?self.report.mean_reward,
                    best_mean_reward = ?self.report.best_mean_reward,
                    "policy updated"
                );
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "skipping policy update");
                self.report.skipped_updates += 1;
                counter!("molgen_rl_skipped_updates_total", 1);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Load the best saved parameters back into the learners.
    ///
    /// Returns `false` when nothing has been saved yet.
    pub fn restore_best(&mut self) -> Result<bool> {
        let Some(best) = self.best.as_ref() else {
            return Ok(false);
        };
        self.policy.restore(&best.policy)?;
        if let (Some(reward), Some(saved)) = (self.reward.as_mut(), best.reward.as_ref()) {
            reward.restore(saved)?;
        }
        info!(
            mean_reward = best.mean_reward,
            episode = best.episode,
            "restored best parameters"
        );
        Ok(true)
    }

    fn finish(&mut self) -> Result<TrainingReport> {
        if self.config.restore_best {
            self.restore_best()?;
        }
        info!(episodes = self.report.episodes, updates = self.report.updates, "training finished");
        Ok(self.report.clone())
    }

    /// Train from a single experience source until the episode budget is spent
    pub async fn run<E, P>(&mut self, source: &mut ExperienceSource<E, P>) -> Result<TrainingReport>
    where
        E: Environment,
        P: PolicyNetwork,
    {
        info!(n_episodes = self.config.n_episodes, "training started");
        while !self.is_finished() {
            for unit in source.next_units().await? {
                self.consume(0, unit)?;
            }
        }
        self.finish()
    }

    /// Train from parallel workers; the workers are shut down on return.
    pub async fn run_parallel(&mut self, gatherer: &mut ParallelGatherer) -> Result<TrainingReport> {
        info!(
            n_episodes = self.config.n_episodes,
            workers = gatherer.workers(),
            "parallel training started"
        );
        let result = self.drain(gatherer).await;
        gatherer.shutdown().await;
        result?;
        self.finish()
    }

    async fn drain(&mut self, gatherer: &mut ParallelGatherer) -> Result<()> {
        while !self.is_finished() {
            let message = gatherer.recv().await?;
            self.consume(message.worker, message.unit)?;
        }
        Ok(())
    }
}
