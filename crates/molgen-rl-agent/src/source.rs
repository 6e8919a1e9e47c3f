//! Experience source: drives one environment with one agent

use serde::{Deserialize, Serialize};
use tracing::debug;

use molgen_rl_core::{
    Agent, Environment, EpisodeStep, Experience, Memory, PolicyNetwork, RLError, Result,
    SequenceState, Trajectory,
};

use crate::agent::PolicyAgent;

/// One unit of gathered data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatherUnit {
    /// A single transition
    Step(Experience),
    /// A finished episode's trajectory
    Trajectory(Trajectory),
    /// A finished episode's total reward
    TotalReward(f64),
    /// The producer failed and stopped
    Failed(String),
}

/// Yields first/last experience steps from an environment/agent pair.
///
/// At each terminal step it also yields the episode's [`Trajectory`], whose
/// probability is the product of the registry probabilities of every action
/// taken, and the episode's total reward.
pub struct ExperienceSource<E, P> {
    env: E,
    agent: PolicyAgent<P>,
    state: Option<SequenceState>,
    memory: Option<Memory>,
    traj_prob: f64,
    total_reward: f64,
    steps: usize,
}

impl<E: Environment, P: PolicyNetwork> ExperienceSource<E, P> {
    /// Create a source; the agent gets a probability registry.
    pub fn new(env: E, agent: PolicyAgent<P>) -> Self {
        Self {
            env,
            agent: agent.with_registry(),
            state: None,
            memory: None,
            traj_prob: 1.0,
            total_reward: 0.0,
            steps: 0,
        }
    }

    /// The driving agent
    #[must_use]
    pub fn agent(&self) -> &PolicyAgent<P> {
        &self.agent
    }

    /// The environment
    #[must_use]
    pub fn env(&self) -> &E {
        &self.env
    }

    async fn begin_episode(&mut self) -> Result<SequenceState> {
        let state = self.env.reset().await?;
        self.memory = self.agent.initial_memory();
        self.traj_prob = 1.0;
        self.total_reward = 0.0;
        self.steps = 0;
        if let Some(registry) = self.agent.registry_mut() {
            registry.clear();
        }
        Ok(state)
    }

    /// Take one environment step and return the units it produced
    pub async fn next_units(&mut self) -> Result<Vec<GatherUnit>> {
        let state = match self.state.take() {
            Some(state) => state,
            None => self.begin_episode().await?,
        };

        let (action, memory) = self.agent.act(&state, self.memory.take())?;
        let prob = self
            .agent
            .registry()
            .ok_or_else(|| RLError::Agent("experience source agent has no registry".into()))?
            .get(&state, action)?;
        self.traj_prob *= prob;

        let step = self.env.step(action).await?;
        let reward = step.reward.value();
        self.total_reward += reward;
        self.steps += 1;

        if !step.done {
            self.memory = memory;
            self.state = Some(step.state.clone());
            return Ok(vec![GatherUnit::Step(Experience {
                state,
                action,
                reward,
                last_state: Some(step.state),
            })]);
        }

        // Underflow on long sequences must not produce a zero probability.
        let traj_prob = self.traj_prob.max(f64::MIN_POSITIVE);
        let trajectory = Trajectory::new(EpisodeStep::new(state.clone(), action), traj_prob)?;
        if let Some(registry) = self.agent.registry_mut() {
            registry.clear();
        }
        debug!(
            episode_id = ?self.env.episode_info().map(|e| e.id),
            total_reward = self.total_reward,
            steps = self.steps,
            truncated = step.truncated,
            sequence = %trajectory.sequence(),
            "episode finished"
        );

        Ok(vec![
            GatherUnit::Step(Experience {
                state,
                action,
                reward,
                last_state: None,
            }),
            GatherUnit::Trajectory(trajectory),
            GatherUnit::TotalReward(self.total_reward),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Init, MlpConfig, MlpPolicy};
    use crate::selector::ProbabilityActionSelector;
    use async_trait::async_trait;
    use molgen_rl_core::{
        Reward, SequenceEncoder, Snapshot, Step, StepInfo, Token, TrackedEnvironment, Vocabulary,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    /// Ends after two tokens, rewarding one per token
    struct TwoSteps {
        state: SequenceState,
    }

    #[async_trait]
    impl Environment for TwoSteps {
        async fn reset(&mut self) -> Result<SequenceState> {
            self.state = SequenceState::default();
            Ok(self.state.clone())
        }

        async fn step(&mut self, action: Token) -> Result<Step> {
            self.state = self.state.advance(action);
            Ok(Step {
                state: self.state.clone(),
                reward: Reward::new(1.0),
                done: self.state.len() == 2,
                truncated: false,
                info: StepInfo::default(),
            })
        }
    }

    fn uniform_agent() -> PolicyAgent<MlpPolicy> {
        let vocab = Arc::new(Vocabulary::new(vec!['A', 'B', '>'], '>', None, None).unwrap());
        let config = MlpConfig {
            hidden_dims: vec![],
            context: 2,
            init: Init::Zeros,
        };
        let policy = MlpPolicy::new(3, &config, &mut StdRng::seed_from_u64(0));
        PolicyAgent::new(
            Snapshot::fixed(policy),
            SequenceEncoder::new(Arc::clone(&vocab), 4),
            ProbabilityActionSelector::new(vocab, 11),
        )
    }

    #[tokio::test]
    async fn emits_steps_then_trajectory_and_total() {
        let env = TwoSteps {
            state: SequenceState::default(),
        };
        let mut source = ExperienceSource::new(env, uniform_agent());

        let first = source.next_units().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(matches!(&first[0], GatherUnit::Step(e) if !e.is_terminal()));

        let second = source.next_units().await.unwrap();
        assert_eq!(second.len(), 3);
        assert!(matches!(&second[0], GatherUnit::Step(e) if e.is_terminal()));
        match &second[1] {
            GatherUnit::Trajectory(t) => {
                assert!((t.traj_prob - 1.0 / 9.0).abs() < 1e-12);
                assert_eq!(t.sequence().chars().count(), 2);
            }
            other => panic!("expected a trajectory, got {other:?}"),
        }
        assert_eq!(second[2], GatherUnit::TotalReward(2.0));
        assert!(source.agent().registry().unwrap().is_empty());

        // The next call starts a fresh episode.
        let third = source.next_units().await.unwrap();
        assert!(matches!(&third[0], GatherUnit::Step(e) if e.state.is_empty()));
    }

    #[tokio::test]
    async fn tracked_environment_sees_each_episode() {
        let env = TrackedEnvironment::new(TwoSteps {
            state: SequenceState::default(),
        });
        let mut source = ExperienceSource::new(env, uniform_agent());

        source.next_units().await.unwrap();
        let units = source.next_units().await.unwrap();
        assert_eq!(units[2], GatherUnit::TotalReward(2.0));
        let first = source.env().episode_info().unwrap();
        assert_eq!(first.steps, 2);
        assert!((first.total_reward - 2.0).abs() < 1e-12);
        assert!(first.end_time.is_some());

        source.next_units().await.unwrap();
        let second = source.env().episode_info().unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(second.steps, 1);
        assert!(second.end_time.is_none());
    }
}
