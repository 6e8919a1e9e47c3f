//! Neural network policies, critics and reward networks
//!
//! Pure ndarray multi-layer perceptrons with tanh hidden layers and a
//! hand-written backward pass. All parameters live in one flat vector
//! (per layer: row-major weights, then biases) so optimizers and snapshots
//! treat every network the same way.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use molgen_rl_core::network::check_grad_len;
use molgen_rl_core::{
    Distribution, EncodedBatch, Memory, Parameterized, PolicyNetwork, PolicyOutput, RLError,
    Result, ScalarNetwork,
};

/// Weight initialization scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Init {
    /// Uniform Xavier/Glorot initialization
    Xavier,
    /// All weights zero (a linear zero-initialized policy is exactly uniform)
    Zeros,
}

/// MLP configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    /// Hidden layer sizes; empty for a linear model
    pub hidden_dims: Vec<usize>,
    /// Number of trailing tokens one-hot encoded by position
    pub context: usize,
    /// Weight initialization
    pub init: Init,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_dims: vec![64, 64],
            context: 8,
            init: Init::Xavier,
        }
    }
}

impl MlpConfig {
    /// Reject configurations that produce no input features
    pub fn validate(&self) -> Result<()> {
        if self.context == 0 {
            return Err(RLError::Config("context must be positive".into()));
        }
        if self.hidden_dims.contains(&0) {
            return Err(RLError::Config("hidden layers must be non-empty".into()));
        }
        Ok(())
    }
}

/// Turns encoded sequences into dense feature rows.
///
/// Features are the last `context` tokens one-hot encoded by distance from
/// the end, followed by the token frequencies of the whole sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Featurizer {
    vocab_len: usize,
    context: usize,
}

impl Featurizer {
    /// Create a featurizer for a vocabulary of `vocab_len` tokens
    #[must_use]
    pub fn new(vocab_len: usize, context: usize) -> Self {
        Self { vocab_len, context }
    }

    /// Width of a feature row
    #[must_use]
    pub fn dim(&self) -> usize {
        (self.context + 1) * self.vocab_len
    }

    /// Feature matrix `[batch, dim]`
    #[allow(clippy::cast_precision_loss)]
    pub fn features(&self, batch: &EncodedBatch) -> Result<Array2<f64>> {
        let v = self.vocab_len;
        let mut x = Array2::zeros((batch.len(), self.dim()));

        for (i, &len) in batch.lengths.iter().enumerate() {
            let row = batch.indices.row(i);
            for (t, &tok) in row.iter().take(len).enumerate() {
                if tok >= v {
                    return Err(RLError::DimensionMismatch {
                        expected: v,
                        actual: tok,
                    });
                }
                let back = len - 1 - t;
                if back < self.context {
                    x[[i, back * v + tok]] = 1.0;
                }
                x[[i, self.context * v + tok]] += 1.0 / len as f64;
            }
        }
        Ok(x)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Layer {
    fan_in: usize,
    fan_out: usize,
    offset: usize,
}

impl Layer {
    fn bias_offset(&self) -> usize {
        self.offset + self.fan_in * self.fan_out
    }

    fn end(&self) -> usize {
        self.bias_offset() + self.fan_out
    }
}

/// Multi-layer perceptron over a flat parameter vector
#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    layers: Vec<Layer>,
    params: Vec<f64>,
}

impl Mlp {
    /// Create an MLP mapping `input_dim` features to `output_dim` outputs
    pub fn new(
        input_dim: usize,
        hidden_dims: &[usize],
        output_dim: usize,
        init: Init,
        rng: &mut StdRng,
    ) -> Self {
        let mut layers = Vec::with_capacity(hidden_dims.len() + 1);
        let mut params = Vec::new();

        let mut prev_dim = input_dim;
        for &dim in hidden_dims.iter().chain(std::iter::once(&output_dim)) {
            let layer = Layer {
                fan_in: prev_dim,
                fan_out: dim,
                offset: params.len(),
            };
            match init {
                Init::Xavier => params.extend(Self::xavier_init(prev_dim, dim, rng)),
                Init::Zeros => params.extend(std::iter::repeat(0.0).take(prev_dim * dim)),
            }
            params.extend(std::iter::repeat(0.0).take(dim));
            layers.push(layer);
            prev_dim = dim;
        }

        Self { layers, params }
    }

    /// Xavier initialization for weights
    #[allow(clippy::cast_precision_loss)]
    fn xavier_init(in_dim: usize, out_dim: usize, rng: &mut StdRng) -> Vec<f64> {
        let limit = (6.0 / (in_dim + out_dim).max(1) as f64).sqrt();
        (0..in_dim * out_dim)
            .map(|_| rng.gen_range(-limit..limit))
            .collect()
    }

    /// Number of outputs
    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.fan_out)
    }

    fn weights(&self, layer: &Layer) -> Result<ArrayView2<'_, f64>> {
        ArrayView2::from_shape(
            (layer.fan_in, layer.fan_out),
            &self.params[layer.offset..layer.bias_offset()],
        )
        .map_err(|e| RLError::Other(e.into()))
    }

    fn bias(&self, layer: &Layer) -> ArrayView1<'_, f64> {
        ArrayView1::from(&self.params[layer.bias_offset()..layer.end()])
    }

    /// Input followed by the output of every layer
    fn activations(&self, x: &Array2<f64>) -> Result<Vec<Array2<f64>>> {
        let last = self.layers.len().saturating_sub(1);
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(x.clone());

        for (l, layer) in self.layers.iter().enumerate() {
            let input = &acts[l];
            if input.ncols() != layer.fan_in {
                return Err(RLError::DimensionMismatch {
                    expected: layer.fan_in,
                    actual: input.ncols(),
                });
            }
            let mut z = input.dot(&self.weights(layer)?) + &self.bias(layer);
            if l < last {
                z.mapv_inplace(f64::tanh);
            }
            acts.push(z);
        }
        Ok(acts)
    }

    /// Outputs `[batch, output_dim]`
    pub fn forward(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.activations(x)?
            .pop()
            .ok_or_else(|| RLError::Agent("network has no layers".into()))
    }

    /// Accumulate into `grad` the gradient given `d_out = dL/d(outputs)`
    pub fn backward(&self, x: &Array2<f64>, d_out: &Array2<f64>, grad: &mut [f64]) -> Result<()> {
        if grad.len() != self.params.len() {
            return Err(RLError::DimensionMismatch {
                expected: self.params.len(),
                actual: grad.len(),
            });
        }
        let acts = self.activations(x)?;
        if d_out.dim() != (x.nrows(), self.output_dim()) {
            return Err(RLError::DimensionMismatch {
                expected: x.nrows() * self.output_dim(),
                actual: d_out.len(),
            });
        }

        let mut delta = d_out.clone();
        for (l, layer) in self.layers.iter().enumerate().rev() {
            let d_w = acts[l].t().dot(&delta);
            let d_b = delta.sum_axis(Axis(0));

            for (g, d) in grad[layer.offset..layer.bias_offset()].iter_mut().zip(d_w.iter()) {
                *g += d;
            }
            for (g, d) in grad[layer.bias_offset()..layer.end()].iter_mut().zip(d_b.iter()) {
                *g += d;
            }

            if l > 0 {
                // tanh'(z) = 1 - tanh(z)^2
                delta = delta.dot(&self.weights(layer)?.t()) * acts[l].mapv(|a| 1.0 - a * a);
            }
        }
        Ok(())
    }
}

impl Parameterized for Mlp {
    fn parameters(&self) -> &[f64] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [f64] {
        &mut self.params
    }
}

/// Memoryless MLP policy emitting next-token logits
#[derive(Debug, Clone, PartialEq)]
pub struct MlpPolicy {
    featurizer: Featurizer,
    mlp: Mlp,
}

impl MlpPolicy {
    /// Create a policy over a vocabulary of `vocab_len` tokens
    pub fn new(vocab_len: usize, config: &MlpConfig, rng: &mut StdRng) -> Self {
        let featurizer = Featurizer::new(vocab_len, config.context);
        let mlp = Mlp::new(featurizer.dim(), &config.hidden_dims, vocab_len, config.init, rng);
        Self { featurizer, mlp }
    }
}

impl Parameterized for MlpPolicy {
    fn parameters(&self) -> &[f64] {
        self.mlp.parameters()
    }

    fn parameters_mut(&mut self) -> &mut [f64] {
        self.mlp.parameters_mut()
    }
}

impl PolicyNetwork for MlpPolicy {
    fn num_actions(&self) -> usize {
        self.mlp.output_dim()
    }

    fn forward(&self, state: &EncodedBatch, _memory: Option<&Memory>) -> Result<PolicyOutput> {
        let logits = self.logits(state)?;
        if logits.nrows() != 1 {
            return Err(RLError::DimensionMismatch {
                expected: 1,
                actual: logits.nrows(),
            });
        }
        Ok(PolicyOutput {
            distribution: Distribution::Logits(logits.row(0).to_owned()),
            memory: None,
        })
    }

    fn logits(&self, batch: &EncodedBatch) -> Result<Array2<f64>> {
        self.mlp.forward(&self.featurizer.features(batch)?)
    }

    fn backward(&self, batch: &EncodedBatch, d_logits: &Array2<f64>, grad: &mut [f64]) -> Result<()> {
        check_grad_len(self, grad)?;
        self.mlp.backward(&self.featurizer.features(batch)?, d_logits, grad)
    }
}

/// MLP mapping a sequence to one scalar: used as critic and reward network
#[derive(Debug, Clone, PartialEq)]
pub struct MlpScalarNet {
    featurizer: Featurizer,
    mlp: Mlp,
}

impl MlpScalarNet {
    /// Create a scalar network over a vocabulary of `vocab_len` tokens
    pub fn new(vocab_len: usize, config: &MlpConfig, rng: &mut StdRng) -> Self {
        let featurizer = Featurizer::new(vocab_len, config.context);
        let mlp = Mlp::new(featurizer.dim(), &config.hidden_dims, 1, config.init, rng);
        Self { featurizer, mlp }
    }
}

impl Parameterized for MlpScalarNet {
    fn parameters(&self) -> &[f64] {
        self.mlp.parameters()
    }

    fn parameters_mut(&mut self) -> &mut [f64] {
        self.mlp.parameters_mut()
    }
}

impl ScalarNetwork for MlpScalarNet {
    fn values(&self, batch: &EncodedBatch) -> Result<Array1<f64>> {
        let out = self.mlp.forward(&self.featurizer.features(batch)?)?;
        Ok(out.column(0).to_owned())
    }

    fn backward(&self, batch: &EncodedBatch, d_values: &Array1<f64>, grad: &mut [f64]) -> Result<()> {
        check_grad_len(self, grad)?;
        let d_out = d_values.clone().insert_axis(Axis(1));
        self.mlp.backward(&self.featurizer.features(batch)?, &d_out, grad)
    }
}
