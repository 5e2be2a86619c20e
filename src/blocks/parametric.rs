//! Elementwise blocks with learnable shape parameters.
//!
//! Each unit owns one parameter per plane: the weight slice is laid out as
//! consecutive planes of `units` values (`[alpha.. | beta..]` for the hinge,
//! a single plane for the others). All of them can compute the identity,
//! so they support insertion and width surgery with equal input and output
//! deltas.

use rand::RngCore;

use super::{clamp_all, Backward, Block, BlockKind, BlockSpec, Forward, Trace};
use crate::backprop::momentum_step;
use crate::error::{NetError, NetResult};
use crate::tensors::fill_uniform;

/// Copies `before` into `after`, growing every plane by `fills.len()`-indexed
/// default values for the new units.
fn widen_planes(
    kind: BlockKind,
    units: usize,
    new_inputs: usize,
    new_outputs: usize,
    fills: &[f64],
    before: &[f64],
    after: &mut [f64],
) -> NetResult<()> {
    if new_inputs != new_outputs {
        return Err(NetError::Topology(format!(
            "{kind} blocks must keep as many inputs as outputs"
        )));
    }
    NetError::check_len("elementwise weights before widening", units * fills.len(), before.len())?;
    let grown = units + new_outputs;
    NetError::check_len("elementwise weights after widening", grown * fills.len(), after.len())?;
    for (p, &fill) in fills.iter().enumerate() {
        after[p * grown..p * grown + units].copy_from_slice(&before[p * units..(p + 1) * units]);
        after[p * grown + units..(p + 1) * grown].fill(fill);
    }
    Ok(())
}

/// Copies `before` into `after` without unit `unit` in any plane.
fn narrow_planes(
    kind: BlockKind,
    units: usize,
    planes: usize,
    input: Option<usize>,
    output: Option<usize>,
    before: &[f64],
    after: &mut [f64],
) -> NetResult<()> {
    if input != output {
        return Err(NetError::Topology(format!(
            "{kind} blocks can only drop matching inputs and outputs"
        )));
    }
    NetError::check_len("elementwise weights before narrowing", units * planes, before.len())?;
    let Some(unit) = output else {
        NetError::check_len("elementwise weights after narrowing", before.len(), after.len())?;
        after.copy_from_slice(before);
        return Ok(());
    };
    NetError::check_len("elementwise weights after narrowing", units.saturating_sub(1) * planes, after.len())?;
    let kept = before
        .chunks_exact(units)
        .flat_map(|plane| plane[..unit].iter().chain(&plane[unit + 1..]));
    for (a, &b) in after.iter_mut().zip(kept) {
        *a = b;
    }
    Ok(())
}

/// `y = α(√(x² + β²) - β) + x` with `α ∈ [-1, 1]`, `β ≥ 0`.
///
/// `β` sets the softness of the bend and `α` its direction; `α = 0` is the
/// identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Hinge {
    units: usize,
}

impl Hinge {
    pub fn new(units: usize) -> Self {
        Self { units }
    }

    fn params(&self, weights: &[f64], i: usize) -> (f64, f64) {
        (weights[i].clamp(-1.0, 1.0), weights[self.units + i].max(0.0))
    }
}

impl Block for Hinge {
    fn kind(&self) -> BlockKind {
        BlockKind::Hinge
    }

    fn inputs(&self) -> usize {
        self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        2 * self.units
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Hinge
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        for (i, (y, &x)) in io.output.iter_mut().zip(io.input).enumerate() {
            let (alpha, beta) = self.params(weights, i);
            *y = alpha * ((x * x + beta * beta).sqrt() - beta) + x;
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        for i in 0..self.units {
            let (alpha, beta) = self.params(weights, i);
            let x = io.input[i];
            io.in_blame[i] += io.out_blame[i] * (alpha * x / ((x * x + beta * beta).sqrt() + 1e-8) + 1.0);
        }
    }

    fn update_gradient(&mut self, io: Trace<'_>, weights: &mut [f64], gradient: &mut [f64]) {
        let n = self.units;
        for i in 0..n {
            let (alpha, beta) = self.params(weights, i);
            let x = io.input[i];
            let ob = io.out_blame[i];
            let root = (x * x + beta * beta).sqrt();
            gradient[i] += ob * (root - beta);
            gradient[n + i] += ob * alpha * (beta / (root + 1e-8) - 1.0);
        }
    }

    fn step(&mut self, _io: Trace<'_>, gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, momentum: f64) {
        momentum_step(gradient, weights, learning_rate, momentum);
        let (alpha, beta) = weights.split_at_mut(self.units);
        clamp_all(alpha, -1.0, 1.0);
        clamp_all(beta, 0.0, f64::INFINITY);
    }

    fn init_weights(&self, _rng: &mut dyn RngCore, weights: &mut [f64]) {
        weights[..self.units].fill(0.0);
        weights[self.units..].fill(0.1);
    }

    fn init_identity(&self, weights: &mut [f64]) -> NetResult<()> {
        NetError::check_len("hinge weights", self.weight_count(), weights.len())?;
        weights[..self.units].fill(0.0);
        weights[self.units..].fill(0.1);
        Ok(())
    }

    fn is_identity(&self, weights: &[f64]) -> bool {
        weights[..self.units].iter().all(|&a| a == 0.0)
    }

    fn adjusted_weight_count(&self, _in_delta: isize, out_delta: isize) -> NetResult<usize> {
        Ok(2 * (self.units as isize + out_delta).max(0) as usize)
    }

    fn add_units(
        &mut self,
        new_inputs: usize,
        new_outputs: usize,
        before: &[f64],
        after: &mut [f64],
        _rng: &mut dyn RngCore,
    ) -> NetResult<()> {
        widen_planes(self.kind(), self.units, new_inputs, new_outputs, &[0.0, 0.1], before, after)?;
        self.units += new_outputs;
        Ok(())
    }

    fn drop_unit(&mut self, input: Option<usize>, output: Option<usize>, before: &[f64], after: &mut [f64]) -> NetResult<()> {
        narrow_planes(self.kind(), self.units, 2, input, output, before, after)?;
        self.units -= usize::from(output.is_some());
        Ok(())
    }
}

/// `y = sign(a)(e^{ax} - 1 - ax) + x` where `ax < 0`, else `y = x`.
///
/// A smooth one-sided bend whose curvature is learned per unit; `a = 0` is the
/// identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Elbow {
    units: usize,
}

impl Elbow {
    pub fn new(units: usize) -> Self {
        Self { units }
    }
}

impl Block for Elbow {
    fn kind(&self) -> BlockKind {
        BlockKind::Elbow
    }

    fn inputs(&self) -> usize {
        self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        self.units
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Elbow
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        for ((y, &x), &a) in io.output.iter_mut().zip(io.input).zip(weights) {
            let ax = a * x;
            *y = if ax < 0.0 { a.signum() * (ax.exp() - 1.0 - ax) + x } else { x };
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        for i in 0..self.units {
            let (a, x) = (weights[i], io.input[i]);
            let ax = a * x;
            let slope = if ax < 0.0 { a.signum() * a * (ax.exp() - 1.0) + 1.0 } else { 1.0 };
            io.in_blame[i] += io.out_blame[i] * slope;
        }
    }

    fn update_gradient(&mut self, io: Trace<'_>, weights: &mut [f64], gradient: &mut [f64]) {
        for i in 0..self.units {
            let (a, x) = (weights[i], io.input[i]);
            let ax = a * x;
            if ax < 0.0 {
                gradient[i] += io.out_blame[i] * a.signum() * x * (ax.exp() - 1.0);
            }
        }
    }

    fn step(&mut self, _io: Trace<'_>, gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, momentum: f64) {
        momentum_step(gradient, weights, learning_rate, momentum);
        clamp_all(weights, -1.0, 1.0);
    }

    fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) {
        fill_uniform(rng, weights, -1.0, 1.0);
    }

    fn init_identity(&self, weights: &mut [f64]) -> NetResult<()> {
        NetError::check_len("elbow weights", self.units, weights.len())?;
        weights.fill(0.0);
        Ok(())
    }

    fn is_identity(&self, weights: &[f64]) -> bool {
        weights.iter().all(|&a| a == 0.0)
    }

    fn adjusted_weight_count(&self, _in_delta: isize, out_delta: isize) -> NetResult<usize> {
        Ok((self.units as isize + out_delta).max(0) as usize)
    }

    fn add_units(
        &mut self,
        new_inputs: usize,
        new_outputs: usize,
        before: &[f64],
        after: &mut [f64],
        _rng: &mut dyn RngCore,
    ) -> NetResult<()> {
        widen_planes(self.kind(), self.units, new_inputs, new_outputs, &[0.0], before, after)?;
        self.units += new_outputs;
        Ok(())
    }

    fn drop_unit(&mut self, input: Option<usize>, output: Option<usize>, before: &[f64], after: &mut [f64]) -> NetResult<()> {
        narrow_planes(self.kind(), self.units, 1, input, output, before, after)?;
        self.units -= usize::from(output.is_some());
        Ok(())
    }
}

/// `y = (1 - a)x + a·tanh(x)` with `a ∈ [0, 1]`: blends identity and tanh.
#[derive(Debug, Clone, PartialEq)]
pub struct LeakyTanh {
    units: usize,
}

impl LeakyTanh {
    pub fn new(units: usize) -> Self {
        Self { units }
    }
}

impl Block for LeakyTanh {
    fn kind(&self) -> BlockKind {
        BlockKind::LeakyTanh
    }

    fn inputs(&self) -> usize {
        self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        self.units
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::LeakyTanh
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        for ((y, &x), &a) in io.output.iter_mut().zip(io.input).zip(weights) {
            *y = (1.0 - a) * x + a * x.tanh();
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        for i in 0..self.units {
            let t = io.input[i].tanh();
            let a = weights[i];
            io.in_blame[i] += io.out_blame[i] * ((1.0 - a) + a * (1.0 - t * t));
        }
    }

    fn update_gradient(&mut self, io: Trace<'_>, _weights: &mut [f64], gradient: &mut [f64]) {
        for ((g, &x), &ob) in gradient.iter_mut().zip(io.input).zip(io.out_blame) {
            *g += ob * (x.tanh() - x);
        }
    }

    fn step(&mut self, _io: Trace<'_>, gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, momentum: f64) {
        momentum_step(gradient, weights, learning_rate, momentum);
        clamp_all(weights, 0.0, 1.0);
    }

    fn init_weights(&self, _rng: &mut dyn RngCore, weights: &mut [f64]) {
        weights.fill(0.0);
    }

    fn init_identity(&self, weights: &mut [f64]) -> NetResult<()> {
        NetError::check_len("leaky tanh weights", self.units, weights.len())?;
        weights.fill(0.0);
        Ok(())
    }

    fn is_identity(&self, weights: &[f64]) -> bool {
        weights.iter().all(|&a| a == 0.0)
    }

    fn adjusted_weight_count(&self, _in_delta: isize, out_delta: isize) -> NetResult<usize> {
        Ok((self.units as isize + out_delta).max(0) as usize)
    }

    fn add_units(
        &mut self,
        new_inputs: usize,
        new_outputs: usize,
        before: &[f64],
        after: &mut [f64],
        _rng: &mut dyn RngCore,
    ) -> NetResult<()> {
        widen_planes(self.kind(), self.units, new_inputs, new_outputs, &[0.0], before, after)?;
        self.units += new_outputs;
        Ok(())
    }

    fn drop_unit(&mut self, input: Option<usize>, output: Option<usize>, before: &[f64], after: &mut [f64]) -> NetResult<()> {
        narrow_planes(self.kind(), self.units, 1, input, output, before, after)?;
        self.units -= usize::from(output.is_some());
        Ok(())
    }
}

/// Soft exponential with offset `β`: interpolates between logarithmic
/// (`α < 0`), identity (`α = 0`) and exponential (`α > 0`) responses.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftExp {
    units: usize,
    beta: f64,
}

/// `|α|` below this is treated as exactly zero.
const SOFT_EXP_DEAD_ZONE: f64 = 1e-7;
/// Exponent cap keeping `e^{αx}` finite.
const SOFT_EXP_MAX_EXPONENT: f64 = 4.6;

impl SoftExp {
    pub fn new(units: usize, beta: f64) -> Self {
        Self { units, beta }
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    fn eval(&self, alpha: f64, x: f64) -> f64 {
        if alpha > SOFT_EXP_DEAD_ZONE {
            ((alpha * x).min(SOFT_EXP_MAX_EXPONENT).exp() - 1.0) / alpha + alpha * self.beta
        } else if alpha < -SOFT_EXP_DEAD_ZONE {
            -(alpha * (-self.beta * alpha - x) + 1.0).max(1e-43).ln() / alpha
        } else {
            x
        }
    }

    /// `dy/dx`.
    fn slope(&self, alpha: f64, x: f64) -> f64 {
        if alpha > SOFT_EXP_DEAD_ZONE {
            if alpha * x < SOFT_EXP_MAX_EXPONENT { (alpha * x).exp() } else { 0.0 }
        } else if alpha < -SOFT_EXP_DEAD_ZONE {
            let u = alpha * (-self.beta * alpha - x) + 1.0;
            if u > 1e-43 { 1.0 / u } else { 0.0 }
        } else {
            1.0
        }
    }

    /// `dy/dα`.
    fn shape_gradient(&self, alpha: f64, x: f64) -> f64 {
        let beta = self.beta;
        if alpha > SOFT_EXP_DEAD_ZONE {
            let ax = alpha * x;
            if ax < SOFT_EXP_MAX_EXPONENT {
                (alpha * alpha * beta + (ax - 1.0) * ax.exp() + 1.0) / (alpha * alpha)
            } else {
                beta - (SOFT_EXP_MAX_EXPONENT.exp() - 1.0) / (alpha * alpha)
            }
        } else if alpha < -SOFT_EXP_DEAD_ZONE {
            let u = (alpha * (-beta * alpha - x) + 1.0).max(1e-43);
            u.ln() / (alpha * alpha) + (2.0 * alpha * beta + x) / (alpha * u)
        } else {
            0.5 * x * x + beta
        }
    }
}

impl Block for SoftExp {
    fn kind(&self) -> BlockKind {
        BlockKind::SoftExp
    }

    fn inputs(&self) -> usize {
        self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        self.units
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::SoftExp { beta: self.beta }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        for ((y, &x), &w) in io.output.iter_mut().zip(io.input).zip(weights) {
            *y = self.eval(w.clamp(-1.0, 1.0), x);
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        for i in 0..self.units {
            let alpha = weights[i].clamp(-1.0, 1.0);
            io.in_blame[i] += io.out_blame[i] * self.slope(alpha, io.input[i]);
        }
    }

    fn update_gradient(&mut self, io: Trace<'_>, weights: &mut [f64], gradient: &mut [f64]) {
        for i in 0..self.units {
            let alpha = weights[i].clamp(-1.0, 1.0);
            gradient[i] += io.out_blame[i] * self.shape_gradient(alpha, io.input[i]);
        }
    }

    fn step(&mut self, _io: Trace<'_>, gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, momentum: f64) {
        momentum_step(gradient, weights, learning_rate, momentum);
        clamp_all(weights, -1.0, 1.0);
    }

    fn init_weights(&self, _rng: &mut dyn RngCore, weights: &mut [f64]) {
        weights.fill(0.0);
    }

    fn init_identity(&self, weights: &mut [f64]) -> NetResult<()> {
        NetError::check_len("soft exp weights", self.units, weights.len())?;
        weights.fill(0.0);
        Ok(())
    }

    fn is_identity(&self, weights: &[f64]) -> bool {
        weights.iter().all(|&a| a == 0.0)
    }

    fn adjusted_weight_count(&self, _in_delta: isize, out_delta: isize) -> NetResult<usize> {
        Ok((self.units as isize + out_delta).max(0) as usize)
    }

    fn add_units(
        &mut self,
        new_inputs: usize,
        new_outputs: usize,
        before: &[f64],
        after: &mut [f64],
        _rng: &mut dyn RngCore,
    ) -> NetResult<()> {
        widen_planes(self.kind(), self.units, new_inputs, new_outputs, &[0.0], before, after)?;
        self.units += new_outputs;
        Ok(())
    }

    fn drop_unit(&mut self, input: Option<usize>, output: Option<usize>, before: &[f64], after: &mut [f64]) -> NetResult<()> {
        narrow_planes(self.kind(), self.units, 1, input, output, before, after)?;
        self.units -= usize::from(output.is_some());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_hinge_drop_unit_removes_from_both_planes() {
        let mut hinge = Hinge::new(3);
        let before = [0.1, 0.2, 0.3, 1.0, 2.0, 3.0];
        let mut after = [0.0; 4];
        hinge.drop_unit(Some(1), Some(1), &before, &mut after).unwrap();
        assert_eq!(after, [0.1, 0.3, 1.0, 3.0]);
        assert_eq!(hinge.outputs(), 2);
    }

    #[test]
    fn test_hinge_rejects_unbalanced_widening() {
        let mut hinge = Hinge::new(2);
        let mut rng = StdRng::seed_from_u64(1);
        let mut after = [0.0; 6];
        assert!(hinge.add_units(0, 1, &[0.0; 4], &mut after, &mut rng).is_err());
        hinge.add_units(1, 1, &[0.5, -0.5, 0.2, 0.3], &mut after, &mut rng).unwrap();
        assert_eq!(after, [0.5, -0.5, 0.0, 0.2, 0.3, 0.1]);
    }

    #[test]
    fn test_soft_exp_is_continuous_through_zero() {
        let block = SoftExp::new(1, 0.3);
        for &x in &[-2.0, -0.5, 0.0, 0.7, 2.5] {
            let below = block.eval(-2e-7, x);
            let above = block.eval(2e-7, x);
            assert!((below - x).abs() < 1e-5 && (above - x).abs() < 1e-5);
        }
    }

    #[test]
    fn test_elbow_step_clamps() {
        let mut elbow = Elbow::new(2);
        let mut w = vec![0.9, -0.9];
        let mut g = vec![10.0, -10.0];
        let trace = Trace { input: &[0.0; 2], output: &[0.0; 2], out_blame: &[0.0; 2] };
        elbow.step(trace, &mut g, &mut w, 1.0, 0.0);
        assert_eq!(w, vec![1.0, -1.0]);
    }
}
