//! Network abstractions: policy, critic and reward networks
//!
//! Networks are plain parameter vectors with a forward pass and a
//! hand-written backward pass. The training algorithms compute the
//! derivative of their loss with respect to the network *outputs* and hand
//! it to `backward`, which accumulates parameter gradients. Inference never
//! touches gradient buffers.

use ndarray::{Array1, Array2};

use crate::encoding::EncodedBatch;
use crate::{RLError, Result};

/// Recurrent or auxiliary memory carried between agent calls
pub type Memory = Array1<f64>;

/// Anything with a flat parameter vector an optimizer can update
pub trait Parameterized {
    /// Current parameters
    fn parameters(&self) -> &[f64];

    /// Mutable parameters
    fn parameters_mut(&mut self) -> &mut [f64];

    /// Number of parameters
    fn num_parameters(&self) -> usize {
        self.parameters().len()
    }
}

/// Output distribution of a policy network
#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    /// Unnormalized scores, softmax still to be applied
    Logits(Array1<f64>),
    /// Already normalized probabilities
    Probabilities(Array1<f64>),
}

impl Distribution {
    /// Normalized probabilities, applying a softmax to logits
    #[must_use]
    pub fn into_probabilities(self) -> Array1<f64> {
        match self {
            Self::Logits(logits) => softmax(&logits),
            Self::Probabilities(p) => p,
        }
    }
}

/// What a policy network returns for one state: a distribution over the
/// vocabulary and the memory to pass into the next call.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    /// Next-token distribution
    pub distribution: Distribution,
    /// Updated memory (`None` for memoryless networks)
    pub memory: Option<Memory>,
}

/// Generative (actor) network over the token vocabulary
pub trait PolicyNetwork: Parameterized + Send + Sync {
    /// Number of actions the network scores
    fn num_actions(&self) -> usize;

    /// Memory to start an episode with
    fn initial_memory(&self) -> Option<Memory> {
        None
    }

    /// Next-token distribution for a single encoded state
    fn forward(&self, state: &EncodedBatch, memory: Option<&Memory>) -> Result<PolicyOutput>;

    /// Logits at each row's final valid step, `[batch, num_actions]`
    fn logits(&self, batch: &EncodedBatch) -> Result<Array2<f64>>;

    /// Accumulate into `grad` the parameter gradient given `d_logits`,
    /// the loss derivative with respect to [`PolicyNetwork::logits`].
    fn backward(&self, batch: &EncodedBatch, d_logits: &Array2<f64>, grad: &mut [f64]) -> Result<()>;
}

/// Network mapping each encoded sequence to a scalar (critic, reward net)
pub trait ScalarNetwork: Parameterized + Send + Sync {
    /// One value per row
    fn values(&self, batch: &EncodedBatch) -> Result<Array1<f64>>;

    /// Accumulate into `grad` the parameter gradient given `d_values`
    fn backward(&self, batch: &EncodedBatch, d_values: &Array1<f64>, grad: &mut [f64]) -> Result<()>;
}

/// Numerically stable softmax
#[must_use]
pub fn softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let exp = logits.mapv(|x| (x - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Row-wise log-softmax of a `[batch, n]` matrix
#[must_use]
pub fn log_softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let lse = max + row.mapv(|x| (x - max).exp()).sum().ln();
        row.mapv_inplace(|x| x - lse);
    }
    out
}

/// Check that a gradient buffer matches a network's parameter count
pub fn check_grad_len(net: &dyn Parameterized, grad: &[f64]) -> Result<()> {
    if grad.len() != net.num_parameters() {
        return Err(RLError::DimensionMismatch {
            expected: net.num_parameters(),
            actual: grad.len(),
        });
    }
    Ok(())
}

/// Overwrite a network's parameters with a saved copy
pub fn load_parameters(net: &mut dyn Parameterized, saved: &[f64]) -> Result<()> {
    if saved.len() != net.num_parameters() {
        return Err(RLError::DimensionMismatch {
            expected: net.num_parameters(),
            actual: saved.len(),
        });
    }
    net.parameters_mut().copy_from_slice(saved);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn softmax_normalizes() {
        let p = softmax(&arr1(&[1.0, 2.0, 3.0]));
        assert!((p.sum() - 1.0).abs() < 1e-12);
        assert!(p[2] > p[1] && p[1] > p[0]);

        let uniform = Distribution::Logits(arr1(&[0.0, 0.0])).into_probabilities();
        assert_eq!(uniform, arr1(&[0.5, 0.5]));
    }

    #[test]
    fn log_softmax_rows_match_softmax() {
        let logits = arr2(&[[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
        let lp = log_softmax_rows(&logits);
        let p0 = softmax(&logits.row(0).to_owned());
        for j in 0..3 {
            assert!((lp[[0, j]].exp() - p0[j]).abs() < 1e-12);
            assert!((lp[[1, j]] - (1.0f64 / 3.0).ln()).abs() < 1e-12);
        }
    }

    struct Flat(Vec<f64>);

    impl Parameterized for Flat {
        fn parameters(&self) -> &[f64] {
            &self.0
        }

        fn parameters_mut(&mut self) -> &mut [f64] {
            &mut self.0
        }
    }

    #[test]
    fn load_parameters_checks_length() {
        let mut net = Flat(vec![0.0; 3]);
        load_parameters(&mut net, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(net.parameters(), &[1.0, 2.0, 3.0]);

        let err = load_parameters(&mut net, &[1.0]).unwrap_err();
        assert!(matches!(err, RLError::DimensionMismatch { expected: 3, actual: 1 }));
        assert_eq!(net.parameters(), &[1.0, 2.0, 3.0]);
    }
}
