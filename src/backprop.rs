//! Differentiable scalar primitives shared by the blocks.
//!
//! # Blame and Update Primitives
//!
//! **Key Features:**
//! - **Elementwise activations:** [`ActivationFn`] evaluates a transfer function
//!   and its derivative, expressed in terms of both the pre-activation `x` and the
//!   already computed activation `y` so the backward pass never recomputes `f(x)`.
//! - **Squared-error blame:** [`squared_error_blame`] writes `target - output`.
//! - **Optimizer step:** [`momentum_step`] applies classical momentum ascent on
//!   the blame direction: `w += lr * g; g *= momentum`.
//!
//! ## Sign convention
//!
//! Blame is the *negative* loss gradient, so a step *adds* `lr * gradient` to
//! the weights. This holds for every block and for the network as a whole.

use serde::{Deserialize, Serialize};

/// Logistic sigmoid `1 / (1 + e^-x)`.
#[inline]
pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Elementwise transfer functions available to activation blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFn {
    Identity,
    Tanh,
    Logistic,
    /// LeCun's `1.7159 * tanh(2x / 3)`.
    ScaledTanh,
    BentIdentity,
    /// `e^x - 1` below zero, `x` above.
    SigExp,
    Gaussian,
    Sine,
    SoftPlus,
    /// `sign(x) * (sqrt(|x| + 1) - 1)`.
    SoftRoot,
    Rectifier,
    LeakyRectifier,
}

impl ActivationFn {
    /// Every supported function, in declaration order.
    pub const ALL: [ActivationFn; 12] = [
        Self::Identity,
        Self::Tanh,
        Self::Logistic,
        Self::ScaledTanh,
        Self::BentIdentity,
        Self::SigExp,
        Self::Gaussian,
        Self::Sine,
        Self::SoftPlus,
        Self::SoftRoot,
        Self::Rectifier,
        Self::LeakyRectifier,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Tanh => "tanh",
            Self::Logistic => "logistic",
            Self::ScaledTanh => "scaled_tanh",
            Self::BentIdentity => "bent_identity",
            Self::SigExp => "sig_exp",
            Self::Gaussian => "gaussian",
            Self::Sine => "sine",
            Self::SoftPlus => "soft_plus",
            Self::SoftRoot => "soft_root",
            Self::Rectifier => "rectifier",
            Self::LeakyRectifier => "leaky_rectifier",
        }
    }

    /// `f(x)`.
    pub fn eval(self, x: f64) -> f64 {
        match self {
            Self::Identity => x,
            Self::Tanh => x.tanh(),
            Self::Logistic => logistic(x),
            Self::ScaledTanh => 1.7159 * (2.0 / 3.0 * x).tanh(),
            Self::BentIdentity => ((x * x + 1.0).sqrt() - 1.0) * 0.5 + x,
            Self::SigExp => {
                if x <= 0.0 {
                    x.exp() - 1.0
                } else {
                    x
                }
            }
            Self::Gaussian => (-x * x).exp(),
            Self::Sine => x.sin(),
            Self::SoftPlus => {
                // ln(1 + e^x) without overflow for large x
                if x > 30.0 { x } else { x.exp().ln_1p() }
            }
            Self::SoftRoot => x.signum() * ((x.abs() + 1.0).sqrt() - 1.0),
            Self::Rectifier => x.max(0.0),
            Self::LeakyRectifier => {
                if x >= 0.0 {
                    x
                } else {
                    0.01 * x
                }
            }
        }
    }

    /// `f'(x)` given `y = f(x)`.
    pub fn derivative(self, x: f64, y: f64) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Tanh => 1.0 - y * y,
            Self::Logistic => y * (1.0 - y),
            Self::ScaledTanh => {
                let t = y / 1.7159;
                1.7159 * 2.0 / 3.0 * (1.0 - t * t)
            }
            Self::BentIdentity => x / (2.0 * (x * x + 1.0).sqrt()) + 1.0,
            Self::SigExp => {
                if x <= 0.0 {
                    y + 1.0
                } else {
                    1.0
                }
            }
            Self::Gaussian => -2.0 * x * y,
            Self::Sine => x.cos(),
            Self::SoftPlus => logistic(x),
            Self::SoftRoot => 0.5 / (x.abs() + 1.0).sqrt(),
            Self::Rectifier => {
                if x >= 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::LeakyRectifier => {
                if x >= 0.0 {
                    1.0
                } else {
                    0.01
                }
            }
        }
    }
}

/// Writes the squared-error blame `target - output` into `blame`.
pub fn squared_error_blame(output: &[f64], target: &[f64], blame: &mut [f64]) {
    for ((b, &y), &t) in blame.iter_mut().zip(output).zip(target) {
        *b = t - y;
    }
}

/// Classical momentum: `weights += lr * gradient`, then `gradient *= momentum`.
pub fn momentum_step(gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, momentum: f64) {
    debug_assert_eq!(gradient.len(), weights.len());
    for (w, g) in weights.iter_mut().zip(gradient.iter_mut()) {
        *w += learning_rate * *g;
        *g *= momentum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivatives_match_finite_differences() {
        let eps = 1e-6;
        for f in ActivationFn::ALL {
            for &x in &[-1.7, -0.3, 0.4, 1.9] {
                let numeric = (f.eval(x + eps) - f.eval(x - eps)) / (2.0 * eps);
                let analytic = f.derivative(x, f.eval(x));
                assert!(
                    (numeric - analytic).abs() < 1e-5,
                    "{} at {x}: {numeric} vs {analytic}",
                    f.name()
                );
            }
        }
    }

    #[test]
    fn test_momentum_step() {
        let mut g = vec![1.0, -2.0];
        let mut w = vec![0.5, 0.5];
        momentum_step(&mut g, &mut w, 0.1, 0.5);
        assert!((w[0] - 0.6).abs() < 1e-15 && (w[1] - 0.3).abs() < 1e-15);
        assert_eq!(g, vec![0.5, -1.0]);
    }
}
