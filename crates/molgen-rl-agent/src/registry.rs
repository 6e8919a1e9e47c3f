//! Per-episode lookup of action selection probabilities

use std::collections::HashMap;

use molgen_rl_core::{RLError, Result, SequenceState, Token};

/// Maps `(state, action)` to the probability with which the action was
/// selected in that state.
///
/// One registry per gathering stream; it is cleared at every episode
/// boundary, after the trajectory probability has been assembled.
#[derive(Debug, Clone, Default)]
pub struct StateActionProbRegistry {
    probs: HashMap<(String, Token), f64>,
}

impl StateActionProbRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the probability of `action` in `state`
    pub fn add(&mut self, state: &SequenceState, action: Token, prob: f64) {
        self.probs.insert((state.key(), action), prob);
    }

    /// Probability recorded for `action` in `state`.
    ///
    /// A missing entry means the action was never selected through a
    /// recording agent, which is an ordering bug in the caller.
    pub fn get(&self, state: &SequenceState, action: Token) -> Result<f64> {
        let key = (state.key(), action);
        self.probs
            .get(&key)
            .copied()
            .ok_or(RLError::MissingProbability {
                state: key.0,
                action,
            })
    }

    /// Forget every entry
    pub fn clear(&mut self) {
        self.probs.clear();
    }

    /// Number of recorded entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.probs.len()
    }

    /// Whether nothing is recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_exactly_what_was_added() {
        let mut reg = StateActionProbRegistry::new();
        let state = SequenceState::from("<CC");
        reg.add(&state, 'O', 0.123_456_789);
        assert_eq!(reg.get(&state, 'O').unwrap(), 0.123_456_789);
        assert!(reg.get(&state, 'N').is_err());
    }

    #[test]
    fn clear_forgets_previous_keys() {
        let mut reg = StateActionProbRegistry::new();
        let state = SequenceState::from("<");
        reg.add(&state, 'C', 0.5);
        reg.clear();
        assert!(reg.is_empty());
        assert!(matches!(
            reg.get(&state, 'C'),
            Err(RLError::MissingProbability { action: 'C', .. })
        ));
    }
}
