//! Token vocabulary (the discrete action space)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{RLError, Result};

/// A single generated symbol
pub type Token = char;

/// Default SMILES character set: pad, start, end, then the alphabet.
const SMILES_TOKENS: &str = " <>#%)(+-/.1032547698=A@CBFIHONPS[]\\celionpsr";

/// Ordered, duplicate-free set of tokens an agent may emit.
///
/// The index of a token is its action id; every policy distribution is
/// defined over `len()` entries in this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VocabularySpec", into = "VocabularySpec")]
pub struct Vocabulary {
    tokens: Vec<Token>,
    index: HashMap<Token, usize>,
    start: Option<Token>,
    end: Token,
    pad: Option<Token>,
}

/// Serialized form of a [`Vocabulary`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VocabularySpec {
    tokens: String,
    end: Token,
    #[serde(default)]
    start: Option<Token>,
    #[serde(default)]
    pad: Option<Token>,
}

impl TryFrom<VocabularySpec> for Vocabulary {
    type Error = RLError;

    fn try_from(spec: VocabularySpec) -> Result<Self> {
        Self::new(spec.tokens.chars().collect(), spec.end, spec.start, spec.pad)
    }
}

impl From<Vocabulary> for VocabularySpec {
    fn from(vocab: Vocabulary) -> Self {
        Self {
            tokens: vocab.tokens.iter().collect(),
            end: vocab.end,
            start: vocab.start,
            pad: vocab.pad,
        }
    }
}

impl Vocabulary {
    /// Create a vocabulary; `end`, `start` and `pad` must be members.
    pub fn new(
        tokens: Vec<Token>,
        end: Token,
        start: Option<Token>,
        pad: Option<Token>,
    ) -> Result<Self> {
        let mut index = HashMap::with_capacity(tokens.len());
        for (i, &t) in tokens.iter().enumerate() {
            if index.insert(t, i).is_some() {
                return Err(RLError::Config(format!("duplicate token {t:?} in vocabulary")));
            }
        }
        for special in std::iter::once(end).chain(start).chain(pad) {
            if !index.contains_key(&special) {
                return Err(RLError::Config(format!(
                    "special token {special:?} missing from vocabulary"
                )));
            }
        }
        Ok(Self {
            tokens,
            index,
            start,
            end,
            pad,
        })
    }

    /// The default SMILES vocabulary (`<` start, `>` end, space pad).
    pub fn smiles() -> Result<Self> {
        Self::new(SMILES_TOKENS.chars().collect(), '>', Some('<'), Some(' '))
    }

    /// Number of tokens (size of the action space)
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the vocabulary has no tokens
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// All tokens in action order
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Action id of a token
    #[must_use]
    pub fn index_of(&self, token: Token) -> Option<usize> {
        self.index.get(&token).copied()
    }

    /// Action id of a token, failing for tokens outside the vocabulary
    pub fn require_index(&self, token: Token) -> Result<usize> {
        self.index_of(token)
            .ok_or_else(|| RLError::InvalidAction(format!("token {token:?} not in vocabulary")))
    }

    /// Token for an action id
    #[must_use]
    pub fn token_at(&self, index: usize) -> Option<Token> {
        self.tokens.get(index).copied()
    }

    /// Check if a token is part of the vocabulary
    #[must_use]
    pub fn contains(&self, token: Token) -> bool {
        self.index.contains_key(&token)
    }

    /// Start-of-sequence token, if generation begins from one
    #[must_use]
    pub fn start(&self) -> Option<Token> {
        self.start
    }

    /// End-of-sequence token
    #[must_use]
    pub fn end(&self) -> Token {
        self.end
    }

    /// Padding token
    #[must_use]
    pub fn pad(&self) -> Option<Token> {
        self.pad
    }

    /// Index written into padded cells of an encoded batch
    #[must_use]
    pub fn pad_index(&self) -> usize {
        self.pad.and_then(|p| self.index_of(p)).unwrap_or(0)
    }

    /// Surround a raw string with the start and end symbols.
    #[must_use]
    pub fn wrap(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len() + 2);
        if let Some(start) = self.start {
            out.push(start);
        }
        out.push_str(raw);
        out.push(self.end);
        out
    }

    /// Remove start, end and pad symbols from a generated string.
    #[must_use]
    pub fn strip(&self, sequence: &str) -> String {
        sequence
            .chars()
            .filter(|&c| Some(c) != self.start && c != self.end && Some(c) != self.pad)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smiles_vocabulary_has_special_tokens() {
        let vocab = Vocabulary::smiles().unwrap();
        assert_eq!(vocab.start(), Some('<'));
        assert_eq!(vocab.end(), '>');
        assert_eq!(vocab.pad_index(), 0);
        assert!(vocab.contains('C'));
        assert_eq!(vocab.wrap("CCO"), "<CCO>");
        assert_eq!(vocab.strip("<CCO> "), "CCO");
    }

    #[test]
    fn rejects_duplicates_and_missing_specials() {
        assert!(Vocabulary::new(vec!['A', 'A', '>'], '>', None, None).is_err());
        assert!(Vocabulary::new(vec!['A', 'B'], '>', None, None).is_err());
        assert!(Vocabulary::new(vec!['A', 'B', '>'], '>', Some('<'), None).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let vocab = Vocabulary::new(vec!['A', 'B', '>'], '>', None, None).unwrap();
        let json = serde_json::to_string(&vocab).unwrap();
        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vocab);
        assert_eq!(back.index_of('B'), Some(1));
    }
}
