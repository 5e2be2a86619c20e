//! Sparsely connected blocks.

use rand::RngCore;

use super::{Backward, Block, BlockKind, BlockSpec, Forward, Trace};
use crate::tensors::fill_normal;

/// Number of hypercube dimensions needed to index `n` units: `ceil(log2 n)`.
fn hypercube_dims(n: usize) -> usize {
    n.next_power_of_two().trailing_zeros() as usize
}

/// Connects unit `i` of the wider side to units `(i ^ 2^k) mod narrow` of the
/// narrower side, for every `2^k` below the wider size.
///
/// Weights are `[bias_0 .. bias_out | edges]`, with the edges of wide unit `i`
/// stored contiguously, one per hypercube dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct HypercubeEdges {
    inputs: usize,
    outputs: usize,
}

impl HypercubeEdges {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self { inputs, outputs }
    }

    fn wide(&self) -> usize {
        self.inputs.max(self.outputs)
    }

    /// Every `(input, output, weight index)` edge.
    fn edges(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        let dims = hypercube_dims(self.wide());
        let fan_out = self.inputs < self.outputs;
        (0..self.wide()).flat_map(move |i| {
            (0..dims).map(move |k| {
                let w = self.outputs + i * dims + k;
                if fan_out {
                    ((i ^ (1 << k)) % self.inputs, i, w)
                } else {
                    (i, (i ^ (1 << k)) % self.outputs, w)
                }
            })
        })
    }
}

impl Block for HypercubeEdges {
    fn kind(&self) -> BlockKind {
        BlockKind::HypercubeEdges
    }

    fn inputs(&self) -> usize {
        self.inputs
    }

    fn outputs(&self) -> usize {
        self.outputs
    }

    fn weight_count(&self) -> usize {
        self.outputs + self.wide() * hypercube_dims(self.wide())
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::HypercubeEdges
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        io.output.copy_from_slice(&weights[..self.outputs]);
        for (i, o, w) in self.edges() {
            io.output[o] += weights[w] * io.input[i];
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        for (i, o, w) in self.edges() {
            io.in_blame[i] += weights[w] * io.out_blame[o];
        }
    }

    fn update_gradient(&mut self, io: Trace<'_>, _weights: &mut [f64], gradient: &mut [f64]) {
        for (g, &ob) in gradient.iter_mut().zip(io.out_blame) {
            *g += ob;
        }
        for (i, o, w) in self.edges() {
            gradient[w] += io.out_blame[o] * io.input[i];
        }
    }

    fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) {
        let dims = hypercube_dims(self.wide()).max(1);
        fill_normal(rng, weights, 0.3 / dims as f64);
    }

    fn bias_mask(&self, mask: &mut [f64]) {
        mask.fill(0.0);
        mask[..self.outputs].fill(1.0);
    }
}

/// Embeds a categorical input: the single input, truncated to an index in
/// `0..value_count`, selects one row of `units` learned outputs.
///
/// Only the selected row moves on a step, so the gradient buffer holds one
/// row and is cleared after each step.
#[derive(Debug, Clone, PartialEq)]
pub struct CatIn {
    value_count: usize,
    units: usize,
}

impl CatIn {
    pub fn new(value_count: usize, units: usize) -> Self {
        Self {
            value_count: value_count.max(1),
            units,
        }
    }

    pub fn value_count(&self) -> usize {
        self.value_count
    }

    fn row(&self, x: f64) -> usize {
        (x as usize).min(self.value_count - 1)
    }
}

impl Block for CatIn {
    fn kind(&self) -> BlockKind {
        BlockKind::CatIn
    }

    fn inputs(&self) -> usize {
        1
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        self.value_count * self.units
    }

    fn grad_count(&self) -> usize {
        self.units
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::CatIn {
            value_count: self.value_count,
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        let row = self.row(io.input[0]);
        io.output.copy_from_slice(&weights[row * self.units..(row + 1) * self.units]);
    }

    fn back_prop(&mut self, _io: Backward<'_>, _weights: &[f64]) {}

    fn update_gradient(&mut self, io: Trace<'_>, _weights: &mut [f64], gradient: &mut [f64]) {
        for (g, &ob) in gradient.iter_mut().zip(io.out_blame) {
            *g += ob;
        }
    }

    fn gradient_target(&self, input: &[f64], term: usize) -> usize {
        self.row(input[0]) * self.units + term
    }

    fn step(&mut self, io: Trace<'_>, gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, _momentum: f64) {
        let row = self.row(io.input[0]);
        for (w, g) in weights[row * self.units..(row + 1) * self.units].iter_mut().zip(gradient.iter_mut()) {
            *w += learning_rate * *g;
            *g = 0.0;
        }
    }

    fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) {
        fill_normal(rng, weights, 0.2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hypercube_fan_out_edges() {
        let block = HypercubeEdges::new(2, 4);
        assert_eq!(block.weight_count(), 4 + 4 * 2);
        let edges: Vec<(usize, usize)> = block.edges().map(|(i, o, _)| (i, o)).collect();
        assert_eq!(edges, vec![(1, 0), (0, 0), (0, 1), (1, 1), (1, 2), (0, 2), (0, 3), (1, 3)]);
    }

    #[test]
    fn test_cat_in_selects_and_updates_one_row() {
        let mut block = CatIn::new(3, 2);
        let mut w = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let mut y = [0.0; 2];
        block.forward_prop(Forward { input: &[1.7], output: &mut y }, &w);
        assert_eq!(y, [2.0, 3.0]);
        block.forward_prop(Forward { input: &[9.0], output: &mut y }, &w);
        assert_eq!(y, [4.0, 5.0]);

        let mut g = vec![0.0; 2];
        let trace = Trace { input: &[0.0], output: &[0.0, 1.0], out_blame: &[1.0, -1.0] };
        block.update_gradient(trace, &mut w, &mut g);
        block.step(trace, &mut g, &mut w, 0.5, 0.9);
        assert_eq!(w, vec![0.5, 0.5, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(g, vec![0.0, 0.0]);
    }
}
