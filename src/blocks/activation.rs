//! Weightless elementwise blocks.

use super::{Backward, Block, BlockKind, BlockSpec, Forward};
use crate::backprop::{squared_error_blame, ActivationFn};
use crate::error::{NetError, NetResult};

/// Applies one [`ActivationFn`] to every unit: `y_i = f(x_i)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    function: ActivationFn,
    units: usize,
}

impl Activation {
    pub fn new(function: ActivationFn, units: usize) -> Self {
        Self { function, units }
    }

    pub fn tanh(units: usize) -> Self {
        Self::new(ActivationFn::Tanh, units)
    }

    pub fn function(&self) -> ActivationFn {
        self.function
    }
}

impl Block for Activation {
    fn kind(&self) -> BlockKind {
        BlockKind::Activation
    }

    fn inputs(&self) -> usize {
        self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        0
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Activation {
            function: self.function,
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, _weights: &[f64]) {
        for (y, &x) in io.output.iter_mut().zip(io.input) {
            *y = self.function.eval(x);
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, _weights: &[f64]) {
        let f = self.function;
        for (((b, &ob), &x), &y) in io.in_blame.iter_mut().zip(io.out_blame).zip(io.input).zip(io.output) {
            *b += ob * f.derivative(x, y);
        }
    }

    fn init_identity(&self, weights: &mut [f64]) -> NetResult<()> {
        if self.function == ActivationFn::Identity && weights.is_empty() {
            Ok(())
        } else {
            Err(NetError::unsupported(self.function.name(), "init_identity"))
        }
    }

    fn is_identity(&self, _weights: &[f64]) -> bool {
        self.function == ActivationFn::Identity
    }

    fn resize(&mut self, inputs: usize, outputs: usize) -> NetResult<()> {
        NetError::check_len("elementwise activation arity", inputs, outputs)?;
        self.units = outputs;
        Ok(())
    }

    fn describe(&self, _weights: Option<&[f64]>) -> String {
        format!("[{}: {}]", self.function.name(), self.units)
    }
}

/// Normalized exponentials, paired with cross-entropy.
///
/// Because the blame is `target - output`, which is already the cross-entropy
/// gradient with respect to the *pre*-softmax values, the backward pass passes
/// blame through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftMax {
    units: usize,
}

impl SoftMax {
    pub fn new(units: usize) -> Self {
        Self { units }
    }
}

impl Block for SoftMax {
    fn kind(&self) -> BlockKind {
        BlockKind::SoftMax
    }

    fn inputs(&self) -> usize {
        self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        0
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::SoftMax
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, _weights: &[f64]) {
        let max = io.input.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for (y, &x) in io.output.iter_mut().zip(io.input) {
            *y = (x - max).exp();
            sum += *y;
        }
        if sum > 0.0 {
            io.output.iter_mut().for_each(|y| *y /= sum);
        }
    }

    fn compute_blame(&self, output: &[f64], target: &[f64], out_blame: &mut [f64]) {
        squared_error_blame(output, target, out_blame);
    }

    fn back_prop(&mut self, io: Backward<'_>, _weights: &[f64]) {
        for (b, &ob) in io.in_blame.iter_mut().zip(io.out_blame) {
            *b += ob;
        }
    }

    fn resize(&mut self, inputs: usize, outputs: usize) -> NetResult<()> {
        NetError::check_len("softmax arity", inputs, outputs)?;
        self.units = outputs;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let mut out = [0.0; 3];
        SoftMax::new(3).forward_prop(Forward { input: &[1000.0, 1001.0, 999.0], output: &mut out }, &[]);
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(out[1] > out[0] && out[0] > out[2]);
    }

    #[test]
    fn test_only_identity_activation_inserts_as_identity() {
        assert!(Activation::new(ActivationFn::Identity, 4).init_identity(&mut []).is_ok());
        assert!(Activation::tanh(4).init_identity(&mut []).is_err());
    }
}
