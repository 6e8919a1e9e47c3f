//! Reward signals and the reward-side collaborator contracts

use serde::{Deserialize, Serialize};

use crate::state::SequenceState;

/// Reward signal from the environment
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Reward(pub f64);

impl Reward {
    /// Create a new reward
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// Get the reward value
    #[must_use]
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl From<f64> for Reward {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl From<Reward> for f64 {
    fn from(reward: Reward) -> Self {
        reward.0
    }
}

impl std::ops::Add for Reward {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self(self.0 + other.0)
    }
}

/// Reward assigned to a (possibly partial) generated sequence.
///
/// `terminal` is true when the sequence ended the episode.
pub trait SequenceReward: Send {
    /// Compute the reward of `state`
    fn reward(&mut self, state: &SequenceState, terminal: bool) -> crate::Result<f64>;
}

impl<F> SequenceReward for F
where
    F: FnMut(&SequenceState, bool) -> crate::Result<f64> + Send,
{
    fn reward(&mut self, state: &SequenceState, terminal: bool) -> crate::Result<f64> {
        self(state, terminal)
    }
}

/// Syntactic validity check for generated strings.
pub trait ValidityOracle: Send + Sync {
    /// Canonical form of `sequence` if it is well formed, `None` otherwise
    fn canonicalize(&self, sequence: &str) -> Option<String>;

    /// Whether `sequence` is well formed
    fn is_valid(&self, sequence: &str) -> bool {
        self.canonicalize(sequence).is_some()
    }
}

/// External scorer (expert model / true reward) over a batch of strings.
pub trait RewardOracle: Send + Sync {
    /// One score per input string
    fn score(&self, sequences: &[String]) -> crate::Result<Vec<f64>>;
}

impl<F> RewardOracle for F
where
    F: Fn(&[String]) -> crate::Result<Vec<f64>> + Send + Sync,
{
    fn score(&self, sequences: &[String]) -> crate::Result<Vec<f64>> {
        self(sequences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_act_as_rewards_and_oracles() {
        let mut reward = |s: &SequenceState, terminal: bool| -> crate::Result<f64> {
            Ok(if terminal { s.len() as f64 } else { 0.0 })
        };
        assert_eq!(reward.reward(&SequenceState::from("AB"), true).unwrap(), 2.0);
        assert_eq!(reward.reward(&SequenceState::from("A"), false).unwrap(), 0.0);

        let oracle =
            |xs: &[String]| -> crate::Result<Vec<f64>> { Ok(xs.iter().map(|x| x.len() as f64).collect()) };
        assert_eq!(oracle.score(&["CCO".to_string()]).unwrap(), vec![3.0]);
    }
}
