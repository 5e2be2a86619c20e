//! Parallel composition of blocks.
//!
//! A [`Layer`] owns one contiguous output buffer and one output-blame buffer
//! and partitions both among its blocks in declaration order. Each block reads
//! a window of the *previous* layer's output starting at its own `in_pos`, so
//! blocks may read overlapping or partial ranges. Weights and gradient terms
//! are partitioned the same way, through an offset table rebuilt by
//! [`Layer::recount`] whenever the block list or a block's shape changes.

use std::ops::Range;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::blocks::{Backward, Block, Forward, PlacedBlock, Trace};
use crate::error::{NetError, NetResult};

#[derive(Debug, Clone)]
struct Slot {
    block: Box<dyn Block>,
    in_pos: usize,
    out_start: usize,
    weights: Range<usize>,
    grads: Range<usize>,
}

impl Slot {
    fn input_range(&self) -> Range<usize> {
        self.in_pos..self.in_pos + self.block.inputs()
    }

    fn output_range(&self) -> Range<usize> {
        self.out_start..self.out_start + self.block.outputs()
    }
}

/// Persisted form of one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub blocks: Vec<PlacedBlock>,
}

/// Blocks sharing one depth of a network.
#[derive(Debug, Clone, Default)]
pub struct Layer {
    slots: Vec<Slot>,
    inputs: usize,
    weight_count: usize,
    grad_count: usize,
    output: Vec<f64>,
    out_blame: Vec<f64>,
}

impl Layer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a block reading the predecessor's output from `in_pos`.
    ///
    /// # Errors
    /// Returns [`NetError::EmptyBlock`] for a block with no outputs; the layer
    /// is left unchanged.
    pub fn add(&mut self, block: Box<dyn Block>, in_pos: usize) -> NetResult<()> {
        if block.outputs() == 0 {
            return Err(NetError::EmptyBlock);
        }
        self.slots.push(Slot {
            block,
            in_pos,
            out_start: 0,
            weights: 0..0,
            grads: 0..0,
        });
        self.recount()
    }

    /// Removes the most recently added block.
    pub(crate) fn pop(&mut self) -> Option<Box<dyn Block>> {
        let slot = self.slots.pop()?;
        self.recount().ok()?;
        Some(slot.block)
    }

    /// Rebuilds the offset table and resizes the signal buffers.
    ///
    /// # Errors
    /// Returns [`NetError::EmptyBlock`] if any block reports zero outputs.
    pub fn recount(&mut self) -> NetResult<()> {
        let (mut outputs, mut weights, mut grads, mut inputs) = (0, 0, 0, 0);
        for slot in &mut self.slots {
            if slot.block.outputs() == 0 {
                return Err(NetError::EmptyBlock);
            }
            slot.out_start = outputs;
            slot.weights = weights..weights + slot.block.weight_count();
            slot.grads = grads..grads + slot.block.grad_count();
            outputs += slot.block.outputs();
            weights = slot.weights.end;
            grads = slot.grads.end;
            inputs = inputs.max(slot.in_pos + slot.block.inputs());
        }
        self.inputs = inputs;
        self.weight_count = weights;
        self.grad_count = grads;
        self.output.resize(outputs, 0.0);
        self.out_blame.resize(outputs, 0.0);
        Ok(())
    }

    /// Recounts and, unless this is the first layer, checks that every block's
    /// input window lies inside the predecessor's `prev_outputs` values.
    pub fn attach(&mut self, prev_outputs: Option<usize>) -> NetResult<()> {
        self.recount()?;
        if let Some(available) = prev_outputs {
            for slot in &self.slots {
                let end = slot.input_range().end;
                if end > available {
                    return Err(NetError::ShapeMismatch {
                        context: "block input window past the previous layer's outputs",
                        expected: available,
                        got: end,
                    });
                }
            }
        }
        Ok(())
    }

    /// Width of the input this layer reads: the furthest end of any block's
    /// input window.
    #[must_use]
    pub fn inputs(&self) -> usize {
        self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> usize {
        self.output.len()
    }

    #[must_use]
    pub fn weight_count(&self) -> usize {
        self.weight_count
    }

    #[must_use]
    pub fn grad_count(&self) -> usize {
        self.grad_count
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.slots.len()
    }

    /// The `i`-th block and the position it reads from.
    pub fn block(&self, i: usize) -> Option<(&dyn Block, usize)> {
        self.slots.get(i).map(|s| (&*s.block, s.in_pos))
    }

    pub(crate) fn block_mut(&mut self, i: usize) -> Option<&mut (dyn Block + 'static)> {
        self.slots.get_mut(i).map(|s| &mut *s.block)
    }

    /// The weight range of block `i`, relative to the layer's weight slice.
    pub fn weight_range(&self, i: usize) -> Option<Range<usize>> {
        self.slots.get(i).map(|s| s.weights.clone())
    }

    #[must_use]
    pub fn output(&self) -> &[f64] {
        &self.output
    }

    #[must_use]
    pub fn out_blame(&self) -> &[f64] {
        &self.out_blame
    }

    pub fn out_blame_mut(&mut self) -> &mut [f64] {
        &mut self.out_blame
    }

    /// The output (read) and its blame (write) at once, for the backward
    /// pass of the following layer.
    pub(crate) fn signals_mut(&mut self) -> (&[f64], &mut [f64]) {
        (&self.output, &mut self.out_blame)
    }

    pub fn forward_prop(&mut self, input: &[f64], weights: &[f64]) {
        for slot in &mut self.slots {
            let io = Forward {
                input: &input[slot.input_range()],
                output: &mut self.output[slot.out_start..slot.out_start + slot.block.outputs()],
            };
            slot.block.forward_prop(io, &weights[slot.weights.clone()]);
        }
    }

    pub fn compute_blame(&mut self, target: &[f64]) {
        for slot in &self.slots {
            let range = slot.output_range();
            slot.block.compute_blame(
                &self.output[range.clone()],
                &target[range.clone()],
                &mut self.out_blame[range],
            );
        }
    }

    /// Accumulates blame into `in_blame`, visiting blocks in reverse.
    pub fn back_prop(&mut self, input: &[f64], weights: &[f64], in_blame: &mut [f64]) {
        for slot in self.slots.iter_mut().rev() {
            let inputs = slot.input_range();
            let outputs = slot.output_range();
            let io = Backward {
                input: &input[inputs.clone()],
                output: &self.output[outputs.clone()],
                out_blame: &self.out_blame[outputs],
                in_blame: &mut in_blame[inputs],
            };
            slot.block.back_prop(io, &weights[slot.weights.clone()]);
        }
    }

    pub fn update_gradient(&mut self, input: &[f64], weights: &mut [f64], gradient: &mut [f64]) {
        for slot in &mut self.slots {
            let outputs = slot.output_range();
            let io = Trace {
                input: &input[slot.input_range()],
                output: &self.output[outputs.clone()],
                out_blame: &self.out_blame[outputs],
            };
            slot.block
                .update_gradient(io, &mut weights[slot.weights.clone()], &mut gradient[slot.grads.clone()]);
        }
    }

    /// Sign-normalized counterpart of [`Layer::update_gradient`].
    ///
    /// # Errors
    /// Fails on the first block without a normalized gradient; blocks before
    /// it have already accumulated.
    pub fn update_gradient_normalized(&mut self, input: &[f64], gradient: &mut [f64]) -> NetResult<()> {
        for slot in &mut self.slots {
            let outputs = slot.output_range();
            let io = Trace {
                input: &input[slot.input_range()],
                output: &self.output[outputs.clone()],
                out_blame: &self.out_blame[outputs],
            };
            slot.block.update_gradient_normalized(io, &mut gradient[slot.grads.clone()])?;
        }
        Ok(())
    }

    /// Appends, for every gradient term of this layer, the layer-relative
    /// weight it differentiates.
    pub fn gradient_targets(&self, input: &[f64], targets: &mut Vec<usize>) {
        for slot in &self.slots {
            let input = &input[slot.input_range()];
            targets.extend(
                (0..slot.block.grad_count()).map(|t| slot.weights.start + slot.block.gradient_target(input, t)),
            );
        }
    }

    pub fn step(&mut self, input: &[f64], gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, momentum: f64) {
        for slot in &mut self.slots {
            let outputs = slot.output_range();
            let io = Trace {
                input: &input[slot.input_range()],
                output: &self.output[outputs.clone()],
                out_blame: &self.out_blame[outputs],
            };
            slot.block.step(
                io,
                &mut gradient[slot.grads.clone()],
                &mut weights[slot.weights.clone()],
                learning_rate,
                momentum,
            );
        }
    }

    pub fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) {
        for slot in &self.slots {
            slot.block.init_weights(rng, &mut weights[slot.weights.clone()]);
        }
    }

    pub fn bias_mask(&self, mask: &mut [f64]) {
        for slot in &self.slots {
            slot.block.bias_mask(&mut mask[slot.weights.clone()]);
        }
    }

    pub fn reset_state(&mut self) {
        self.slots.iter_mut().for_each(|s| s.block.reset_state());
    }

    pub fn advance_state(&mut self, steps: usize) {
        self.slots.iter_mut().for_each(|s| s.block.advance_state(steps));
    }

    pub fn to_spec(&self) -> LayerSpec {
        LayerSpec {
            blocks: self
                .slots
                .iter()
                .map(|s| PlacedBlock::describe(&*s.block, s.in_pos))
                .collect(),
        }
    }

    /// Rebuilds a layer from its persisted form.
    pub fn from_spec(spec: &LayerSpec) -> NetResult<Self> {
        let mut layer = Self::new();
        for placed in &spec.blocks {
            layer.add(placed.build()?, placed.inpos)?;
        }
        Ok(layer)
    }

    pub fn describe(&self, weights: Option<&[f64]>) -> String {
        self.slots
            .iter()
            .map(|s| {
                let text = s.block.describe(weights.map(|w| &w[s.weights.clone()]));
                if s.in_pos == 0 { text } else { format!("@{} {text}", s.in_pos) }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{Activation, Linear};

    #[test]
    fn test_offsets_follow_declaration_order() {
        let mut layer = Layer::new();
        layer.add(Box::new(Linear::new(2, 3)), 0).unwrap();
        layer.add(Box::new(Activation::tanh(2)), 1).unwrap();
        layer.add(Box::new(Linear::new(1, 1)), 2).unwrap();
        assert_eq!(layer.outputs(), 6);
        assert_eq!(layer.inputs(), 3);
        assert_eq!(layer.weight_count(), 9 + 0 + 2);
        assert_eq!(layer.weight_range(2), Some(9..11));
        assert!(layer.attach(Some(3)).is_ok());
        assert!(matches!(layer.attach(Some(2)), Err(NetError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_overlapping_windows_accumulate_blame() {
        let mut layer = Layer::new();
        layer.add(Box::new(Activation::new(crate::backprop::ActivationFn::Identity, 2)), 0).unwrap();
        layer.add(Box::new(Activation::new(crate::backprop::ActivationFn::Identity, 2)), 1).unwrap();
        let input = [1.0, 2.0, 3.0];
        layer.forward_prop(&input, &[]);
        assert_eq!(layer.output(), &[1.0, 2.0, 2.0, 3.0]);
        layer.out_blame_mut().copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let mut in_blame = [0.0; 3];
        layer.back_prop(&input, &[], &mut in_blame);
        assert_eq!(in_blame, [1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_rejects_empty_block() {
        let mut layer = Layer::new();
        assert!(matches!(layer.add(Box::new(Linear::new(3, 0)), 0), Err(NetError::EmptyBlock)));
        assert_eq!(layer.block_count(), 0);
    }
}
