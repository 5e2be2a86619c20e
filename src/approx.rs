//! Approximate floating point equality and finite-difference gradient checks.

use crate::config::NetConfig;
use crate::error::{NetError, NetResult};
use crate::network::Network;

/// The max epsilon accepted on `f64`s.
pub const F64_MAX_ERROR: f64 = 1e-3;

/// The expected minimum epsilon accepted on `f64`s.
pub const F64_AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon accepted on `f64`s.
pub const F64_MIN_ERROR: f64 = 1e-13;

/// Perturbation used by [`check_gradient`].
pub const GRADIENT_EPSILON: f64 = 1e-6;

/// Largest discrepancy [`check_gradient`] results are expected to stay under.
pub const GRADIENT_TOLERANCE: f64 = 1e-5;

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Very strong epsilon.
    Precise = 0,

    /// Good epsilon.
    Partial = 1,

    /// Acceptable epsilon
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

/// Checks the relative distance based off epsilon.
pub trait RelativeEq<Rhs: ?Sized> {
    /// Enumerates the equality of `self`
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq<Self> for f64 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        let dif = (self - rhs).abs();
        if dif < F64_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F64_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F64_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

/// Slices rate as their worst element; differing lengths are [`ApproxEquality::Scarce`].
impl RelativeEq<[f64]> for [f64] {
    fn approx_eq(&self, rhs: &[f64]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        self.iter()
            .zip(rhs)
            .map(|(a, b)| a.approx_eq(b))
            .max()
            .unwrap_or(ApproxEquality::Precise)
    }
}

/// True when `a` and `b` agree to at least [`ApproxEquality::Partial`].
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) <= ApproxEquality::Partial
}

/// `|a - b|` scaled down when both are large.
fn discrepancy(analytic: f64, numeric: f64) -> f64 {
    (analytic - numeric).abs() / analytic.abs().max(numeric.abs()).max(1.0)
}

/// Compares the network's backpropagated derivatives of every output with
/// respect to every weight and every input against central differences, and
/// returns the largest (relative) discrepancy.
///
/// Each gradient term is compared against the weight it differentiates
/// (see [`Network::gradient_targets`]), so blocks that keep fewer gradient
/// terms than weights are checked on the weights they do train. The blame
/// floor is disabled for the duration of the check.
///
/// # Errors
/// Propagates any shape error from the network.
pub fn check_gradient(net: &mut Network, weights: &[f64], input: &[f64]) -> NetResult<f64> {
    let saved = *net.config();
    net.set_config(NetConfig { blame_floor: 0.0 });
    let result = measure_gradient_error(net, weights, input);
    net.set_config(saved);
    result
}

fn measure_gradient_error(net: &mut Network, weights: &[f64], input: &[f64]) -> NetResult<f64> {
    NetError::check_len("weight vector", net.weight_count(), weights.len())?;
    let mut worst: f64 = 0.0;

    for k in 0..net.outputs() {
        let mut target = net.forward_prop(weights, input)?.to_vec();
        target[k] += 1.0;
        net.compute_blame(&target)?;
        let mut in_blame = vec![0.0; input.len()];
        net.backpropagate(weights, Some(&mut in_blame))?;
        let mut scratch = weights.to_vec();
        let mut gradient = vec![0.0; net.grad_count()];
        net.update_gradient(&mut scratch, &mut gradient)?;

        let targets = net.gradient_targets();
        let mut probe = weights.to_vec();
        for (&j, &analytic) in targets.iter().zip(&gradient) {
            probe[j] = weights[j] + GRADIENT_EPSILON;
            let high = net.forward_prop(&probe, input)?[k];
            probe[j] = weights[j] - GRADIENT_EPSILON;
            let low = net.forward_prop(&probe, input)?[k];
            probe[j] = weights[j];
            worst = worst.max(discrepancy(analytic, (high - low) / (2.0 * GRADIENT_EPSILON)));
        }

        let mut probe = input.to_vec();
        for (j, &analytic) in in_blame.iter().enumerate() {
            probe[j] = input[j] + GRADIENT_EPSILON;
            let high = net.forward_prop(weights, &probe)?[k];
            probe[j] = input[j] - GRADIENT_EPSILON;
            let low = net.forward_prop(weights, &probe)?[k];
            probe[j] = input[j];
            worst = worst.max(discrepancy(analytic, (high - low) / (2.0 * GRADIENT_EPSILON)));
        }
    }
    // leave the network's activations at the unperturbed point
    net.forward_prop(weights, input)?;
    Ok(worst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_rating_is_worst_element() {
        let a = [1.0, 2.0, 3.0];
        assert_eq!(a[..].approx_eq(&[1.0, 2.0, 3.0][..]), ApproxEquality::Precise);
        assert_eq!(a[..].approx_eq(&[1.0, 2.0 + 1e-8, 3.0][..]), ApproxEquality::Partial);
        assert_eq!(a[..].approx_eq(&[1.0, 2.0, 3.1][..]), ApproxEquality::Scarce);
        assert_eq!(a[..].approx_eq(&[1.0, 2.0][..]), ApproxEquality::Scarce);
        assert!(approx_eq(&1.0, &(1.0 + 1e-9)));
    }
}
