//! Sequence states

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vocab::{Token, Vocabulary};

/// The tokens generated so far in an episode.
///
/// A state is an immutable snapshot; advancing produces a new state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceState {
    tokens: Vec<Token>,
}

impl SequenceState {
    /// Create a state from a token sequence
    #[must_use]
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    /// The state an episode starts in: the start symbol, or nothing.
    #[must_use]
    pub fn initial(vocab: &Vocabulary) -> Self {
        Self {
            tokens: vocab.start().into_iter().collect(),
        }
    }

    /// Tokens of the state
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Number of tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no token has been generated yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Most recent token
    #[must_use]
    pub fn last(&self) -> Option<Token> {
        self.tokens.last().copied()
    }

    /// New state with `token` appended
    #[must_use]
    pub fn advance(&self, token: Token) -> Self {
        let mut tokens = Vec::with_capacity(self.tokens.len() + 1);
        tokens.extend_from_slice(&self.tokens);
        tokens.push(token);
        Self { tokens }
    }

    /// String-joined state, the key used by the probability registry
    #[must_use]
    pub fn key(&self) -> String {
        self.tokens.iter().collect()
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.tokens {
            write!(f, "{t}")?;
        }
        Ok(())
    }
}

impl From<&str> for SequenceState {
    fn from(s: &str) -> Self {
        Self::new(s.chars().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_leaves_receiver_untouched() {
        let s = SequenceState::from("<C");
        let next = s.advance('O');
        assert_eq!(s.key(), "<C");
        assert_eq!(next.key(), "<CO");
        assert_eq!(next.last(), Some('O'));
    }

    #[test]
    fn initial_state_uses_start_symbol() {
        let smiles = Vocabulary::smiles().unwrap();
        assert_eq!(SequenceState::initial(&smiles).key(), "<");

        let toy = Vocabulary::new(vec!['A', 'B', '>'], '>', None, None).unwrap();
        assert!(SequenceState::initial(&toy).is_empty());
    }
}
