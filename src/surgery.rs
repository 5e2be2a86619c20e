//! Topology surgery that preserves the computed function.
//!
//! Every operation takes the current weight vector and returns the weight
//! vector of the new topology. The edit is applied to a copy of the network
//! and only swapped in once every block has accepted it, so a failed call
//! leaves both the network and the caller's weights untouched.

use log::debug;
use rand::RngCore;

use crate::blocks::Block;
use crate::error::{NetError, NetResult};
use crate::layer::Layer;
use crate::network::Network;

impl Network {
    fn check_index(&self, index: usize) -> NetResult<()> {
        if index < self.layer_count() {
            Ok(())
        } else {
            Err(NetError::LayerIndex {
                index,
                count: self.layer_count(),
            })
        }
    }

    fn only_block(&self, index: usize) -> NetResult<&dyn Block> {
        let layer = self.layer(index)?;
        match (layer.block_count(), layer.block(0)) {
            (1, Some((block, _))) => Ok(block),
            (count, _) => Err(NetError::Topology(format!(
                "layer {index} holds {count} blocks; width surgery needs exactly one"
            ))),
        }
    }

    /// Inserts `block` as a new single-block layer before layer `position`
    /// (or after the last layer when `position == layer_count()`).
    ///
    /// The block must map the width flowing into that position onto itself
    /// and must be able to compute the identity, which its new weights are
    /// set to.
    pub fn insert(&mut self, position: usize, block: Box<dyn Block>, old_weights: &[f64]) -> NetResult<Vec<f64>> {
        NetError::check_len("weight vector", self.weight_count(), old_weights.len())?;
        if position > self.layer_count() {
            return Err(NetError::LayerIndex {
                index: position,
                count: self.layer_count(),
            });
        }
        let width = if position < self.layer_count() {
            self.layer(position)?.inputs()
        } else {
            self.outputs()
        };
        NetError::check_len("inserted block inputs", width, block.inputs())?;
        NetError::check_len("inserted block outputs", width, block.outputs())?;
        let mut identity = vec![0.0; block.weight_count()];
        block.init_identity(&mut identity)?;

        let start = self.layer_start(position)?;
        let kind = block.kind();
        let mut next = self.clone();
        let mut layer = Layer::new();
        layer.add(block, 0)?;
        next.layers.insert(position, layer);
        next.reindex()?;

        let mut weights = Vec::with_capacity(next.weight_count());
        weights.extend_from_slice(&old_weights[..start]);
        weights.extend_from_slice(&identity);
        weights.extend_from_slice(&old_weights[start..]);
        debug!("inserted identity {kind} layer at {position}");
        *self = next;
        Ok(weights)
    }

    /// Removes layer `index`, which must map its input width onto itself and
    /// must not be the output layer.
    pub fn drop_layer(&mut self, index: usize, old_weights: &[f64]) -> NetResult<Vec<f64>> {
        NetError::check_len("weight vector", self.weight_count(), old_weights.len())?;
        self.check_index(index)?;
        if index + 1 == self.layer_count() {
            return Err(NetError::Topology("cannot drop the output layer".into()));
        }
        let layer = self.layer(index)?;
        if layer.inputs() != layer.outputs() {
            return Err(NetError::Topology(format!(
                "layer {index} maps {} inputs to {} outputs and cannot be dropped",
                layer.inputs(),
                layer.outputs()
            )));
        }
        let span = self.spans[index].weights.clone();
        let mut next = self.clone();
        next.layers.remove(index);
        next.reindex()?;

        let mut weights = Vec::with_capacity(next.weight_count());
        weights.extend_from_slice(&old_weights[..span.start]);
        weights.extend_from_slice(&old_weights[span.end..]);
        debug!("dropped layer {index} ({} weights)", span.len());
        *self = next;
        Ok(weights)
    }

    /// Widens the hidden units between layers `start` and `start + count` by
    /// `n`.
    ///
    /// Layer `i` gains `n` inputs when `start < i <= start + count` and `n`
    /// outputs when `start <= i < start + count`; every affected layer must
    /// hold exactly one block. Existing weights are kept verbatim and each
    /// block chooses values for the new ones.
    pub fn increase_width(
        &mut self,
        n: usize,
        old_weights: &[f64],
        start: usize,
        count: usize,
        rng: &mut dyn RngCore,
    ) -> NetResult<Vec<f64>> {
        NetError::check_len("weight vector", self.weight_count(), old_weights.len())?;
        self.check_index(start + count)?;
        for i in start..=start + count {
            self.only_block(i)?;
        }
        let mut next = self.clone();
        let mut weights = Vec::new();
        for i in 0..self.layer_count() {
            let old = &old_weights[self.spans[i].weights.clone()];
            if i < start || i > start + count {
                weights.extend_from_slice(old);
                continue;
            }
            let add_in = if i > start { n } else { 0 };
            let add_out = if i < start + count { n } else { 0 };
            let layer = &mut next.layers[i];
            let block = layer.block_mut(0).ok_or(NetError::EmptyBlock)?;
            let mut after = vec![0.0; block.adjusted_weight_count(add_in as isize, add_out as isize)?];
            block.add_units(add_in, add_out, old, &mut after, rng)?;
            layer.recount()?;
            weights.extend_from_slice(&after);
        }
        next.reindex()?;
        NetError::check_len("widened weight vector", next.weight_count(), weights.len())?;
        debug!("widened layers {start}..={} by {n}", start + count);
        *self = next;
        Ok(weights)
    }

    /// Removes one hidden unit between layers `start` and `start + count`.
    ///
    /// The unit removed from each hidden boundary is the first input of the
    /// following linear block whose outgoing weights are all exactly zero.
    /// When any linear block in `(start, start + count]` has no such input the
    /// call returns `Ok(None)` and nothing changes.
    pub fn decrement_width(&mut self, old_weights: &[f64], start: usize, count: usize) -> NetResult<Option<Vec<f64>>> {
        NetError::check_len("weight vector", self.weight_count(), old_weights.len())?;
        self.check_index(start + count)?;
        for i in start..=start + count {
            self.only_block(i)?;
        }

        let mut ignored = Vec::new();
        for i in start + 1..=start + count {
            if let Some(linear) = self.only_block(i)?.as_linear() {
                match linear.first_ignored_input(&old_weights[self.spans[i].weights.clone()])? {
                    Some(unit) => ignored.push(Some(unit)),
                    None => {
                        debug!("no removable unit feeds layer {i}; width unchanged");
                        return Ok(None);
                    }
                }
            }
        }
        ignored.push(None);

        let mut next = self.clone();
        let mut weights = Vec::new();
        let mut pending = ignored.into_iter();
        let mut unit = None;
        for i in 0..self.layer_count() {
            let old = &old_weights[self.spans[i].weights.clone()];
            if i < start || i > start + count {
                weights.extend_from_slice(old);
                continue;
            }
            let layer = &mut next.layers[i];
            let block = layer.block_mut(0).ok_or(NetError::EmptyBlock)?;
            let (input, output) = if block.as_linear().is_some() {
                let input = unit;
                unit = pending.next().flatten();
                (input, unit)
            } else {
                (unit, unit)
            };
            let mut after = vec![
                0.0;
                block.adjusted_weight_count(-(input.is_some() as isize), -(output.is_some() as isize))?
            ];
            block.drop_unit(input, output, old, &mut after)?;
            layer.recount()?;
            weights.extend_from_slice(&after);
        }
        next.reindex()?;
        NetError::check_len("narrowed weight vector", next.weight_count(), weights.len())?;
        debug!("narrowed layers {start}..={} by one unit", start + count);
        *self = next;
        Ok(Some(weights))
    }

    /// Applies [`Linear::regularize_square`](crate::blocks::Linear::regularize_square)
    /// to every square single-block linear layer, blending toward layer
    /// `i + 2` when that layer is a linear block of the same shape.
    pub fn regularize_square(&self, lambda: f64, weights: &mut [f64]) -> NetResult<()> {
        NetError::check_len("weight vector", self.weight_count(), weights.len())?;
        let square = |i: usize| {
            self.layers
                .get(i)
                .filter(|l| l.block_count() == 1)
                .and_then(|l| l.block(0))
                .and_then(|(b, _)| b.as_linear())
                .filter(|l| l.inputs() == l.outputs())
        };
        for i in 0..self.layer_count() {
            let Some(linear) = square(i) else { continue };
            let here = self.spans[i].weights.clone();
            match square(i + 2).filter(|next| next.outputs() == linear.outputs()) {
                Some(_) => {
                    let there = self.spans[i + 2].weights.clone();
                    let (lo, hi) = weights.split_at_mut(there.start);
                    linear.regularize_square(lambda, &mut lo[here], Some(&hi[..there.len()]))?;
                }
                None => linear.regularize_square(lambda, &mut weights[here], None)?,
            }
        }
        Ok(())
    }
}
