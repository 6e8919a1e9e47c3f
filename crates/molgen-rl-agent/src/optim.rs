//! Gradient-descent optimizers over flat parameter vectors

use serde::{Deserialize, Serialize};

use molgen_rl_core::{RLError, Result};

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    /// Plain stochastic gradient descent
    Sgd {
        /// Learning rate
        lr: f64,
        /// L2 penalty added to the gradient
        #[serde(default)]
        weight_decay: f64,
    },
    /// Adam with bias-corrected moment estimates
    Adam {
        /// Learning rate
        lr: f64,
        /// First moment decay
        #[serde(default = "default_beta1")]
        beta1: f64,
        /// Second moment decay
        #[serde(default = "default_beta2")]
        beta2: f64,
        /// Denominator epsilon
        #[serde(default = "default_eps")]
        eps: f64,
        /// L2 penalty added to the gradient
        #[serde(default)]
        weight_decay: f64,
    },
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_eps() -> f64 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            lr: 1e-3,
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
            weight_decay: 0.0,
        }
    }
}

impl OptimizerConfig {
    /// Reject non-positive learning rates and decays outside `[0, 1)`
    pub fn validate(&self) -> Result<()> {
        let (lr, decays) = match *self {
            Self::Sgd { lr, .. } => (lr, vec![]),
            Self::Adam { lr, beta1, beta2, .. } => (lr, vec![beta1, beta2]),
        };
        if !(lr > 0.0 && lr.is_finite()) {
            return Err(RLError::Config(format!("learning rate must be positive, got {lr}")));
        }
        if decays.iter().any(|b| !(0.0..1.0).contains(b)) {
            return Err(RLError::Config("Adam betas must be in [0, 1)".into()));
        }
        Ok(())
    }

    /// Build an optimizer for a network with `num_params` parameters
    #[must_use]
    pub fn build(&self, num_params: usize) -> Box<dyn Optimizer> {
        match *self {
            Self::Sgd { lr, weight_decay } => Box::new(Sgd::new(num_params, lr, weight_decay)),
            Self::Adam {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Box::new(Adam {
                grad: vec![0.0; num_params],
                momentum: vec![0.0; num_params],
                velocity: vec![0.0; num_params],
                t: 0,
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            }),
        }
    }
}

/// Gradient-descent state bound to one network's parameters.
///
/// Gradients are accumulated into [`Optimizer::grad_mut`] between
/// [`Optimizer::zero_grad`] and [`Optimizer::step`].
pub trait Optimizer: Send + Sync {
    /// Reset the accumulated gradient
    fn zero_grad(&mut self);

    /// Accumulated gradient
    fn grad(&self) -> &[f64];

    /// Gradient buffer to accumulate into
    fn grad_mut(&mut self) -> &mut [f64];

    /// Apply the accumulated gradient to `params`.
    ///
    /// A non-finite gradient fails with `NumericalInstability` and leaves
    /// `params` untouched.
    fn step(&mut self, params: &mut [f64]) -> Result<()>;
}

fn check_step(grad: &[f64], params: &[f64]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(RLError::DimensionMismatch {
            expected: grad.len(),
            actual: params.len(),
        });
    }
    if grad.iter().any(|g| !g.is_finite()) {
        return Err(RLError::NumericalInstability("non-finite gradient".into()));
    }
    Ok(())
}

/// Stochastic gradient descent
#[derive(Debug, Clone)]
pub struct Sgd {
    grad: Vec<f64>,
    lr: f64,
    weight_decay: f64,
}

impl Sgd {
    /// Create an SGD optimizer
    #[must_use]
    pub fn new(num_params: usize, lr: f64, weight_decay: f64) -> Self {
        Self {
            grad: vec![0.0; num_params],
            lr,
            weight_decay,
        }
    }
}

impl Optimizer for Sgd {
    fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    fn grad(&self) -> &[f64] {
        &self.grad
    }

    fn grad_mut(&mut self) -> &mut [f64] {
        &mut self.grad
    }

    fn step(&mut self, params: &mut [f64]) -> Result<()> {
        check_step(&self.grad, params)?;
        for (p, g) in params.iter_mut().zip(&self.grad) {
            *p -= self.lr * (g + self.weight_decay * *p);
        }
        Ok(())
    }
}

/// Adam optimizer
#[derive(Debug, Clone)]
pub struct Adam {
    grad: Vec<f64>,
    momentum: Vec<f64>,
    velocity: Vec<f64>,
    t: i32,
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
}

impl Optimizer for Adam {
    fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    fn grad(&self) -> &[f64] {
        &self.grad
    }

    fn grad_mut(&mut self) -> &mut [f64] {
        &mut self.grad
    }

    fn step(&mut self, params: &mut [f64]) -> Result<()> {
        check_step(&self.grad, params)?;

        self.t = self.t.saturating_add(1);
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        for (i, p) in params.iter_mut().enumerate() {
            let g = self.grad[i] + self.weight_decay * *p;
            self.momentum[i] = self.beta1 * self.momentum[i] + (1.0 - self.beta1) * g;
            self.velocity[i] = self.beta2 * self.velocity[i] + (1.0 - self.beta2) * g * g;

            let m_hat = self.momentum[i] / bias1;
            let v_hat = self.velocity[i] / bias2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
        Ok(())
    }
}

/// Rescale `grad` in place so its L2 norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(grad: &mut [f64], max_norm: f64) -> f64 {
    let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for g in grad.iter_mut() {
            *g *= scale;
        }
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sgd_moves_against_the_gradient() {
        let mut opt = OptimizerConfig::Sgd {
            lr: 0.5,
            weight_decay: 0.0,
        }
        .build(2);
        let mut params = vec![1.0, -1.0];
        opt.zero_grad();
        opt.grad_mut().copy_from_slice(&[2.0, -4.0]);
        opt.step(&mut params).unwrap();
        assert_abs_diff_eq!(params[0], 0.0);
        assert_abs_diff_eq!(params[1], 1.0);
    }

    #[test]
    fn adam_first_step_is_lr_sized() {
        let mut opt = OptimizerConfig::default().build(1);
        let mut params = vec![0.0];
        opt.grad_mut()[0] = 3.0;
        opt.step(&mut params).unwrap();
        assert_abs_diff_eq!(params[0], -1e-3, epsilon = 1e-9);
    }

    #[test]
    fn non_finite_gradient_leaves_params_untouched() {
        let mut opt = OptimizerConfig::default().build(2);
        let mut params = vec![0.25, 0.5];
        opt.grad_mut()[1] = f64::NAN;
        let err = opt.step(&mut params).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(params, vec![0.25, 0.5]);
    }

    #[test]
    fn clipping_caps_the_norm() {
        let mut grad = vec![3.0, 4.0];
        let before = clip_grad_norm(&mut grad, 1.0);
        assert_abs_diff_eq!(before, 5.0);
        assert_abs_diff_eq!(grad[0], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[1], 0.8, epsilon = 1e-12);

        let mut small = vec![0.1];
        clip_grad_norm(&mut small, 1.0);
        assert_abs_diff_eq!(small[0], 0.1);
    }

    #[test]
    fn config_is_tagged() {
        let cfg: OptimizerConfig = serde_json::from_str(r#"{"type": "sgd", "lr": 0.01}"#).unwrap();
        assert_eq!(
            cfg,
            OptimizerConfig::Sgd {
                lr: 0.01,
                weight_decay: 0.0
            }
        );
        assert!(OptimizerConfig::Sgd {
            lr: 0.0,
            weight_decay: 0.0
        }
        .validate()
        .is_err());
    }
}
