//! Normalization against running input statistics.

use rand::RngCore;

use super::{Backward, Block, BlockKind, BlockSpec, Forward, Trace};

const VARIANCE_EPSILON: f64 = 1e-8;

/// Per-unit normalization against exponentially decayed running statistics,
/// followed by a learned affine map `y = γ x̂ + β`.
///
/// Each unit owns four consecutive weights `[Σx, Σx², γ, β]`. The sums are
/// not trained by gradient; [`Block::step`] folds the current input into them
/// with decay `1 - 1/batch_size`. Only `β` accumulates a gradient, so
/// `grad_count == units`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningNormalizer {
    units: usize,
    batch_size: f64,
}

impl RunningNormalizer {
    pub fn new(units: usize, batch_size: f64) -> Self {
        Self {
            units,
            batch_size: batch_size.max(1.0),
        }
    }

    pub fn batch_size(&self) -> f64 {
        self.batch_size
    }

    /// `(mean, 1 / deviation)` of unit `i`.
    fn stats(&self, weights: &[f64], i: usize) -> (f64, f64) {
        let mean = weights[4 * i] / self.batch_size;
        let var = (weights[4 * i + 1] / self.batch_size - mean * mean).max(0.0);
        (mean, 1.0 / (var + VARIANCE_EPSILON).sqrt())
    }
}

impl Block for RunningNormalizer {
    fn kind(&self) -> BlockKind {
        BlockKind::RunningNormalizer
    }

    fn inputs(&self) -> usize {
        self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        4 * self.units
    }

    fn grad_count(&self) -> usize {
        self.units
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::RunningNormalizer {
            batch_size: self.batch_size,
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        for (i, (y, &x)) in io.output.iter_mut().zip(io.input).enumerate() {
            let (mean, inv_dev) = self.stats(weights, i);
            *y = weights[4 * i + 2] * (x - mean) * inv_dev + weights[4 * i + 3];
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        for i in 0..self.units {
            let (_, inv_dev) = self.stats(weights, i);
            io.in_blame[i] += io.out_blame[i] * weights[4 * i + 2] * inv_dev;
        }
    }

    fn update_gradient(&mut self, io: Trace<'_>, _weights: &mut [f64], gradient: &mut [f64]) {
        for (g, &ob) in gradient.iter_mut().zip(io.out_blame) {
            *g += ob;
        }
    }

    fn gradient_target(&self, _input: &[f64], term: usize) -> usize {
        4 * term + 3
    }

    fn step(&mut self, io: Trace<'_>, gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, momentum: f64) {
        let decay = 1.0 - 1.0 / self.batch_size;
        for i in 0..self.units {
            let x = io.input[i];
            let (mean, inv_dev) = self.stats(weights, i);
            let normalized = (x - mean) * inv_dev;
            let unit = &mut weights[4 * i..4 * i + 4];
            unit[0] = unit[0] * decay + x;
            unit[1] = unit[1] * decay + x * x;
            unit[2] += learning_rate * io.out_blame[i] * normalized;
            unit[3] += learning_rate * gradient[i];
            gradient[i] *= momentum;
        }
    }

    fn init_weights(&self, _rng: &mut dyn RngCore, weights: &mut [f64]) {
        for unit in weights.chunks_exact_mut(4) {
            unit.copy_from_slice(&[0.0, self.batch_size, 1.0, 0.0]);
        }
    }

    fn bias_mask(&self, mask: &mut [f64]) {
        for unit in mask.chunks_exact_mut(4) {
            unit.copy_from_slice(&[0.0, 0.0, 0.0, 1.0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_fresh_normalizer_is_identity() {
        let mut block = RunningNormalizer::new(2, 10.0);
        let mut w = vec![0.0; 8];
        block.init_weights(&mut StdRng::seed_from_u64(0), &mut w);
        let mut y = [0.0; 2];
        block.forward_prop(Forward { input: &[0.5, -3.0], output: &mut y }, &w);
        assert!((y[0] - 0.5).abs() < 1e-6 && (y[1] + 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_statistics_converge_to_input_distribution() {
        let mut block = RunningNormalizer::new(1, 20.0);
        let mut w = vec![0.0; 4];
        block.init_weights(&mut StdRng::seed_from_u64(0), &mut w);
        let mut g = vec![0.0];
        for k in 0..2000 {
            let x = if k % 2 == 0 { 5.0 } else { 7.0 };
            let trace = Trace { input: &[x], output: &[0.0], out_blame: &[0.0] };
            block.step(trace, &mut g, &mut w, 0.0, 0.0);
        }
        let (mean, inv_dev) = block.stats(&w, 0);
        assert!((mean - 6.0).abs() < 0.1);
        assert!((1.0 / inv_dev - 1.0).abs() < 0.1);
    }
}
