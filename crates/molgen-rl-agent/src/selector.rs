//! Sampling of next-token actions from a policy distribution

use std::sync::Arc;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, WeightedIndex};

use molgen_rl_core::{RLError, Result, Token, Vocabulary};

/// Tolerance on the total mass of a probability vector
const SUM_TOLERANCE: f64 = 1e-6;

/// Samples a token proportionally to a probability vector over the vocabulary
#[derive(Debug, Clone)]
pub struct ProbabilityActionSelector {
    vocab: Arc<Vocabulary>,
    rng: StdRng,
}

impl ProbabilityActionSelector {
    /// Create a selector with its own seeded generator
    #[must_use]
    pub fn new(vocab: Arc<Vocabulary>, seed: u64) -> Self {
        Self::from_rng(vocab, StdRng::seed_from_u64(seed))
    }

    /// Create a selector drawing from an existing generator
    #[must_use]
    pub fn from_rng(vocab: Arc<Vocabulary>, rng: StdRng) -> Self {
        Self { vocab, rng }
    }

    /// The action space
    #[must_use]
    pub fn vocab(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    /// Sample an action, returning it with its selection probability.
    ///
    /// Fails on vectors of the wrong length, with negative or non-finite
    /// entries, or whose mass is not 1.
    pub fn select(&mut self, probs: &Array1<f64>) -> Result<(Token, f64)> {
        validate_distribution(probs, self.vocab.len())?;

        let dist = WeightedIndex::new(probs.iter())
            .map_err(|e| RLError::InvalidDistribution(e.to_string()))?;
        let index = dist.sample(&mut self.rng);
        let token = self.vocab.token_at(index).ok_or(RLError::DimensionMismatch {
            expected: self.vocab.len(),
            actual: index,
        })?;

        Ok((token, probs[index]))
    }
}

/// Check that `probs` is a distribution over `n` actions
pub fn validate_distribution(probs: &Array1<f64>, n: usize) -> Result<()> {
    if probs.len() != n {
        return Err(RLError::DimensionMismatch {
            expected: n,
            actual: probs.len(),
        });
    }
    if let Some(bad) = probs.iter().find(|p| !p.is_finite() || **p < 0.0) {
        return Err(RLError::InvalidDistribution(format!(
            "entry {bad} is not a probability"
        )));
    }
    let total = probs.sum();
    if (total - 1.0).abs() > SUM_TOLERANCE {
        return Err(RLError::InvalidDistribution(format!(
            "probabilities sum to {total}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn vocab() -> Arc<Vocabulary> {
        Arc::new(Vocabulary::new(vec!['A', 'B', '>'], '>', None, None).unwrap())
    }

    #[test]
    fn one_hot_always_selects_its_index() {
        let mut selector = ProbabilityActionSelector::new(vocab(), 11);
        for _ in 0..50 {
            let (token, p) = selector.select(&arr1(&[0.0, 1.0, 0.0])).unwrap();
            assert_eq!(token, 'B');
            assert_eq!(p, 1.0);
        }
    }

    #[test]
    fn rejects_malformed_distributions() {
        let mut selector = ProbabilityActionSelector::new(vocab(), 0);
        for bad in [
            arr1(&[f64::NAN, 0.5, 0.5]),
            arr1(&[-0.1, 0.6, 0.5]),
            arr1(&[0.2, 0.2, 0.2]),
        ] {
            assert!(matches!(
                selector.select(&bad),
                Err(RLError::InvalidDistribution(_))
            ));
        }
        assert!(matches!(
            selector.select(&arr1(&[0.5, 0.5])),
            Err(RLError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn same_seed_same_samples() {
        let probs = arr1(&[0.3, 0.3, 0.4]);
        let mut a = ProbabilityActionSelector::new(vocab(), 5);
        let mut b = ProbabilityActionSelector::new(vocab(), 5);
        for _ in 0..20 {
            assert_eq!(a.select(&probs).unwrap(), b.select(&probs).unwrap());
        }
    }
}
