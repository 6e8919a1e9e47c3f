//! Demonstration data for reward learning

use std::path::Path;

use rand::seq::SliceRandom;
use rand::RngCore;

use crate::vocab::Vocabulary;
use crate::{RLError, Result};

/// Source of demonstration sequences (already wrapped in start/end symbols)
pub trait DemonstrationSource: Send {
    /// Draw a batch of demonstrations
    fn sample(&mut self, batch_size: usize, rng: &mut dyn RngCore) -> Result<Vec<String>>;
}

/// Demonstrations held in memory, sampled with replacement
#[derive(Debug, Clone)]
pub struct InMemoryDemonstrations {
    sequences: Vec<String>,
}

impl InMemoryDemonstrations {
    /// Wrap raw strings with the vocabulary's start/end symbols.
    ///
    /// Strings containing tokens outside the vocabulary are dropped.
    pub fn new<S: AsRef<str>>(vocab: &Vocabulary, raw: &[S]) -> Result<Self> {
        let sequences: Vec<String> = raw
            .iter()
            .map(AsRef::as_ref)
            .filter(|s| !s.is_empty() && s.chars().all(|c| vocab.contains(c)))
            .map(|s| vocab.wrap(s))
            .collect();
        if sequences.is_empty() {
            return Err(RLError::EmptyBatch("no usable demonstrations".into()));
        }
        if sequences.len() < raw.len() {
            tracing::warn!(
                dropped = raw.len() - sequences.len(),
                "dropped demonstrations with unknown tokens"
            );
        }
        Ok(Self { sequences })
    }

    /// Load the first tab-separated column of a file, skipping the header.
    pub async fn load(vocab: &Vocabulary, path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let raw: Vec<&str> = text
            .lines()
            .skip(1)
            .filter_map(|line| line.split('\t').next())
            .map(str::trim)
            .collect();
        Self::new(vocab, &raw)
    }

    /// Number of demonstrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether there are no demonstrations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

impl DemonstrationSource for InMemoryDemonstrations {
    fn sample(&mut self, batch_size: usize, rng: &mut dyn RngCore) -> Result<Vec<String>> {
        (0..batch_size)
            .map(|_| {
                self.sequences
                    .choose(rng)
                    .cloned()
                    .ok_or_else(|| RLError::EmptyBatch("no demonstrations".into()))
            })
            .collect()
    }
}
