//! Return, advantage and normalization helpers for the training algorithms

use statrs::statistics::Statistics;

use molgen_rl_core::{RLError, Result};

/// Added to the standard deviation when normalizing advantages
pub const NORMALIZATION_EPS: f64 = 1e-8;

/// Discounted returns: `G_t = r_t + gamma * G_{t+1}`, with `G_T = r_T`.
#[must_use]
pub fn calc_q_vals(rewards: &[f64], gamma: f64) -> Vec<f64> {
    let mut returns = vec![0.0; rewards.len()];
    let mut running_return = 0.0;

    for i in (0..rewards.len()).rev() {
        running_return = rewards[i] + gamma * running_return;
        returns[i] = running_return;
    }

    returns
}

/// Compute GAE (Generalized Advantage Estimation)
///
/// `next_value` bootstraps the step after the last one; pass `0.0` when the
/// last step ended the episode, giving `delta = r - V` there.
#[must_use]
pub fn compute_gae(
    rewards: &[f64],
    values: &[f64],
    next_value: f64,
    gamma: f64,
    lambda: f64,
) -> Vec<f64> {
    let mut advantages = vec![0.0; rewards.len()];
    let mut running_advantage = 0.0;

    for i in (0..rewards.len()).rev() {
        let next_v = if i == rewards.len() - 1 {
            next_value
        } else {
            values[i + 1]
        };

        let td_error = rewards[i] + gamma * next_v - values[i];
        running_advantage = td_error + gamma * lambda * running_advantage;
        advantages[i] = running_advantage;
    }

    advantages
}

/// Standardize advantages in place with the batch mean and sample standard
/// deviation.
///
/// Fails with `NumericalInstability` when fewer than two values are given
/// or the statistics are not finite.
pub fn normalize_advantages(advantages: &mut [f64]) -> Result<()> {
    if advantages.len() < 2 {
        return Err(RLError::NumericalInstability(format!(
            "cannot normalize {} advantage(s)",
            advantages.len()
        )));
    }

    let mean = advantages.iter().mean();
    let std = advantages.iter().std_dev();
    if !mean.is_finite() || !std.is_finite() {
        return Err(RLError::NumericalInstability(
            "advantage statistics are not finite".into(),
        ));
    }

    for adv in advantages.iter_mut() {
        *adv = (*adv - mean) / (std + NORMALIZATION_EPS);
    }
    Ok(())
}

/// Mean of the last `window` values, `None` when empty
#[must_use]
pub fn trailing_mean(values: &[f64], window: usize) -> Option<f64> {
    if values.is_empty() || window == 0 {
        return None;
    }
    let start = values.len().saturating_sub(window);
    Some(values[start..].iter().mean())
}
