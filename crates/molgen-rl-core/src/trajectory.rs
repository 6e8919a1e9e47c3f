//! Episode steps, trajectories and experience records

use serde::{Deserialize, Serialize};

use crate::state::SequenceState;
use crate::vocab::Token;
use crate::{RLError, Result};

/// A decision point: the state and the action chosen in it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStep {
    /// State at which the action was chosen
    pub state: SequenceState,
    /// Chosen action
    pub action: Token,
}

impl EpisodeStep {
    /// Create a new episode step
    #[must_use]
    pub fn new(state: SequenceState, action: Token) -> Self {
        Self { state, action }
    }
}

/// A completed episode: its terminal step and the joint probability of
/// every action taken along the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Last decision of the episode
    pub terminal_state: EpisodeStep,
    /// Product of per-step selection probabilities, in `(0, 1]`
    pub traj_prob: f64,
}

impl Trajectory {
    /// Create a trajectory, rejecting probabilities outside `(0, 1]`.
    pub fn new(terminal_state: EpisodeStep, traj_prob: f64) -> Result<Self> {
        if !(traj_prob > 0.0 && traj_prob <= 1.0) {
            return Err(RLError::InvalidState(format!(
                "trajectory probability {traj_prob} outside (0, 1]"
            )));
        }
        Ok(Self {
            terminal_state,
            traj_prob,
        })
    }

    /// The full generated sequence: terminal state plus terminal action
    #[must_use]
    pub fn sequence(&self) -> String {
        let mut s = self.terminal_state.state.key();
        s.push(self.terminal_state.action);
        s
    }
}

/// A single first/last transition.
///
/// `last_state` is `None` on the step that ended the episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    /// State the action was taken in
    pub state: SequenceState,
    /// Action taken
    pub action: Token,
    /// Reward received for the transition
    pub reward: f64,
    /// Resulting state, absent at termination
    pub last_state: Option<SequenceState>,
}

impl Experience {
    /// Whether this step ended the episode
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.last_state.is_none()
    }
}

/// All experience steps of one episode, in order
pub type ExperienceEpisode = Vec<Experience>;

/// Rewards of an episode, in step order
#[must_use]
pub fn episode_rewards(episode: &[Experience]) -> Vec<f64> {
    episode.iter().map(|e| e.reward).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trajectory_probability_must_be_in_unit_interval() {
        let step = EpisodeStep::new(SequenceState::from("<CC"), '>');
        assert!(Trajectory::new(step.clone(), 0.0).is_err());
        assert!(Trajectory::new(step.clone(), 1.5).is_err());
        assert!(Trajectory::new(step.clone(), f64::NAN).is_err());

        let traj = Trajectory::new(step, 0.25).unwrap();
        assert_eq!(traj.sequence(), "<CC>");
    }
}
