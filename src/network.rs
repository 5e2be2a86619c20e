//! Sequential composition of layers and the global weight-vector contract.
//!
//! A [`Network`] never owns its parameters. The caller keeps one flat weight
//! vector of length [`Network::weight_count`] and one gradient vector of length
//! [`Network::grad_count`]; both are partitioned layer by layer, block by
//! block, in declaration order. The partition is cached in an offset table
//! that every structural change rebuilds, so propagation never re-walks the
//! topology to find a block's slice.
//!
//! # Example
//!
//! ```rust
//! use briny_net::blocks::{Activation, Linear};
//! use briny_net::network::Network;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut net = Network::new();
//! net.add(Linear::new(2, 4)).unwrap();
//! net.add(Activation::tanh(4)).unwrap();
//! net.add(Linear::new(4, 1)).unwrap();
//!
//! let mut weights = vec![0.0; net.weight_count()];
//! net.init_weights(&mut StdRng::seed_from_u64(7), &mut weights).unwrap();
//! let y = net.forward_prop(&weights, &[0.5, -0.5]).unwrap();
//! assert_eq!(y.len(), 1);
//! ```

use std::ops::Range;

use log::trace;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::blocks::{Block, BlockKind};
use crate::config::{NetConfig, StepConfig};
use crate::error::{NetError, NetResult};
use crate::layer::{Layer, LayerSpec};
use crate::tensors::{scale, squared_magnitude, WithGrad};

/// Persisted topology, optionally with weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub layers: Vec<LayerSpec>,
    #[serde(default)]
    pub config: NetConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Span {
    pub(crate) weights: Range<usize>,
    pub(crate) grads: Range<usize>,
}

/// Layers in sequence; see the module documentation.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub(crate) layers: Vec<Layer>,
    pub(crate) spans: Vec<Span>,
    input: Vec<f64>,
    in_blame: Vec<f64>,
    config: NetConfig,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: NetConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: NetConfig) {
        self.config = config;
    }

    /// Appends `block` as a new single-block layer.
    pub fn add(&mut self, block: impl Block + 'static) -> NetResult<()> {
        self.add_boxed(Box::new(block))
    }

    pub fn add_boxed(&mut self, block: Box<dyn Block>) -> NetResult<()> {
        let mut layer = Layer::new();
        layer.add(block, 0)?;
        layer.attach(self.layers.last().map(Layer::outputs))?;
        self.layers.push(layer);
        self.reindex()
    }

    /// Adds `block` to the last layer, reading that layer's input from `in_pos`.
    pub fn concat(&mut self, block: impl Block + 'static, in_pos: usize) -> NetResult<()> {
        let created = self.layers.is_empty();
        if created {
            self.layers.push(Layer::new());
        }
        let last = self.layers.len() - 1;
        let prev = last.checked_sub(1).map(|i| self.layers[i].outputs());
        let layer = &mut self.layers[last];
        if let Err(e) = layer.add(Box::new(block), in_pos) {
            if created {
                self.layers.pop();
            }
            return Err(e);
        }
        if let Err(e) = layer.attach(prev) {
            layer.pop();
            if created {
                self.layers.pop();
            }
            return Err(e);
        }
        self.reindex()
    }

    /// Re-attaches every layer and rebuilds the offset table.
    pub(crate) fn reindex(&mut self) -> NetResult<()> {
        let mut prev = None;
        for layer in &mut self.layers {
            layer.attach(prev)?;
            prev = Some(layer.outputs());
        }
        self.spans.clear();
        let (mut w, mut g) = (0, 0);
        for layer in &self.layers {
            let span = Span {
                weights: w..w + layer.weight_count(),
                grads: g..g + layer.grad_count(),
            };
            w = span.weights.end;
            g = span.grads.end;
            self.spans.push(span);
        }
        let inputs = self.inputs();
        self.input.resize(inputs, 0.0);
        self.in_blame.resize(inputs, 0.0);
        Ok(())
    }

    #[must_use]
    pub fn inputs(&self) -> usize {
        self.layers.first().map_or(0, Layer::inputs)
    }

    #[must_use]
    pub fn outputs(&self) -> usize {
        self.layers.last().map_or(0, Layer::outputs)
    }

    #[must_use]
    pub fn weight_count(&self) -> usize {
        self.spans.last().map_or(0, |s| s.weights.end)
    }

    #[must_use]
    pub fn grad_count(&self) -> usize {
        self.spans.last().map_or(0, |s| s.grads.end)
    }

    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, i: usize) -> NetResult<&Layer> {
        self.layers.get(i).ok_or(NetError::LayerIndex {
            index: i,
            count: self.layers.len(),
        })
    }

    /// Offset of layer `i` in the weight vector; `layer_start(layer_count())`
    /// is the total weight count.
    pub fn layer_start(&self, i: usize) -> NetResult<usize> {
        match self.spans.get(i) {
            Some(span) => Ok(span.weights.start),
            None if i == self.spans.len() => Ok(self.weight_count()),
            None => Err(NetError::LayerIndex {
                index: i,
                count: self.layers.len(),
            }),
        }
    }

    fn check_weights(&self, weights: &[f64]) -> NetResult<()> {
        if self.layers.is_empty() {
            return Err(NetError::EmptyNetwork);
        }
        NetError::check_len("weight vector", self.weight_count(), weights.len())
    }

    /// Draws initial weights for every block.
    ///
    /// # Errors
    /// Fails on a wrong-length vector or if some layer's outputs differ from
    /// the next layer's inputs.
    pub fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) -> NetResult<()> {
        self.check_weights(weights)?;
        for pair in self.layers.windows(2) {
            NetError::check_len("adjacent layer arity", pair[0].outputs(), pair[1].inputs())?;
        }
        for (layer, span) in self.layers.iter().zip(&self.spans) {
            layer.init_weights(rng, &mut weights[span.weights.clone()]);
        }
        Ok(())
    }

    /// Runs every layer in order and returns the network output.
    pub fn forward_prop(&mut self, weights: &[f64], input: &[f64]) -> NetResult<&[f64]> {
        self.check_weights(weights)?;
        NetError::check_len("network input", self.inputs(), input.len())?;
        self.input.copy_from_slice(input);
        for i in 0..self.layers.len() {
            let w = &weights[self.spans[i].weights.clone()];
            let (prev, rest) = self.layers.split_at_mut(i);
            let signal = prev.last().map_or(self.input.as_slice(), Layer::output);
            rest[0].forward_prop(signal, w);
        }
        Ok(self.output())
    }

    /// The output of the last forward pass.
    #[must_use]
    pub fn output(&self) -> &[f64] {
        self.layers.last().map(Layer::output).unwrap_or_default()
    }

    /// Writes the output blame for `target` (squared error unless the output
    /// blocks say otherwise).
    pub fn compute_blame(&mut self, target: &[f64]) -> NetResult<()> {
        NetError::check_len("target", self.outputs(), target.len())?;
        self.layers.last_mut().ok_or(NetError::EmptyNetwork)?.compute_blame(target);
        Ok(())
    }

    /// The output blame, for callers that supply a custom loss gradient.
    pub fn output_blame_mut(&mut self) -> NetResult<&mut [f64]> {
        Ok(self.layers.last_mut().ok_or(NetError::EmptyNetwork)?.out_blame_mut())
    }

    /// Propagates the output blame back to every layer and, if given, into
    /// `input_blame` (overwritten).
    ///
    /// A hidden layer's blame whose squared magnitude falls below
    /// `config.blame_floor` times the output blame's is scaled up to that
    /// level; a floor of zero leaves blame untouched. The factor is
    /// `sqrt(floor / sq)`, which lands the squared magnitude exactly on the
    /// floor rather than scaling the blame by the squared-magnitude ratio.
    pub fn backpropagate(&mut self, weights: &[f64], input_blame: Option<&mut [f64]>) -> NetResult<()> {
        self.check_weights(weights)?;
        let n = self.layers.len();
        let floor = squared_magnitude(self.layers[n - 1].out_blame()) * self.config.blame_floor;
        for i in (1..n).rev() {
            let w = &weights[self.spans[i].weights.clone()];
            let (prev, rest) = self.layers.split_at_mut(i);
            let (input, blame) = prev[i - 1].signals_mut();
            blame.fill(0.0);
            rest[0].back_prop(input, w, blame);
            let sq = squared_magnitude(blame);
            if sq > 0.0 && sq < floor {
                trace!("rescaling vanishing blame into layer {} ({sq:e} < {floor:e})", i - 1);
                scale(blame, (floor / sq).sqrt());
            }
        }
        let buffer = match input_blame {
            Some(b) => {
                NetError::check_len("input blame", self.inputs(), b.len())?;
                b
            }
            None => self.in_blame.as_mut_slice(),
        };
        buffer.fill(0.0);
        self.layers[0].back_prop(&self.input, &weights[self.spans[0].weights.clone()], buffer);
        Ok(())
    }

    /// Accumulates every block's gradient terms into `gradient`.
    pub fn update_gradient(&mut self, weights: &mut [f64], gradient: &mut [f64]) -> NetResult<()> {
        self.check_weights(weights)?;
        NetError::check_len("gradient vector", self.grad_count(), gradient.len())?;
        for i in 0..self.layers.len() {
            let span = &self.spans[i];
            let (prev, rest) = self.layers.split_at_mut(i);
            let signal = prev.last().map_or(self.input.as_slice(), Layer::output);
            rest[0].update_gradient(signal, &mut weights[span.weights.clone()], &mut gradient[span.grads.clone()]);
        }
        Ok(())
    }

    /// Like [`Network::update_gradient`], but every block sees the sign of
    /// each input activation instead of its value.
    ///
    /// # Errors
    /// Returns [`NetError::Unsupported`] if a weighted block has no
    /// normalized gradient. Only [`Linear`](crate::blocks::Linear) has one.
    pub fn update_gradient_normalized(&mut self, weights: &[f64], gradient: &mut [f64]) -> NetResult<()> {
        self.check_weights(weights)?;
        NetError::check_len("gradient vector", self.grad_count(), gradient.len())?;
        for i in 0..self.layers.len() {
            let span = &self.spans[i];
            let (prev, rest) = self.layers.split_at_mut(i);
            let signal = prev.last().map_or(self.input.as_slice(), Layer::output);
            rest[0].update_gradient_normalized(signal, &mut gradient[span.grads.clone()])?;
        }
        Ok(())
    }

    /// For every gradient term, the index of the weight it differentiates at
    /// the input of the last forward pass.
    #[must_use]
    pub fn gradient_targets(&self) -> Vec<usize> {
        let mut targets = Vec::with_capacity(self.grad_count());
        for (i, (layer, span)) in self.layers.iter().zip(&self.spans).enumerate() {
            let signal = match i {
                0 => self.input.as_slice(),
                _ => self.layers[i - 1].output(),
            };
            let start = targets.len();
            layer.gradient_targets(signal, &mut targets);
            targets[start..].iter_mut().for_each(|t| *t += span.weights.start);
        }
        targets
    }

    /// Applies one update, by default `weights += lr * gradient` followed by
    /// `gradient *= momentum`.
    pub fn step(&mut self, gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, momentum: f64) -> NetResult<()> {
        self.check_weights(weights)?;
        NetError::check_len("gradient vector", self.grad_count(), gradient.len())?;
        for i in 0..self.layers.len() {
            let span = &self.spans[i];
            let (prev, rest) = self.layers.split_at_mut(i);
            let signal = prev.last().map_or(self.input.as_slice(), Layer::output);
            rest[0].step(
                signal,
                &mut gradient[span.grads.clone()],
                &mut weights[span.weights.clone()],
                learning_rate,
                momentum,
            );
        }
        Ok(())
    }

    /// One presentation of one example: forward, blame, backward, gradient,
    /// step.
    pub fn train_step(
        &mut self,
        params: &mut WithGrad<Vec<f64>>,
        input: &[f64],
        target: &[f64],
        config: &StepConfig,
    ) -> NetResult<()> {
        self.forward_prop(&params.value, input)?;
        self.compute_blame(target)?;
        self.backpropagate(&params.value, None)?;
        self.update_gradient(&mut params.value, &mut params.grad)?;
        self.step(&mut params.grad, &mut params.value, config.learning_rate, config.momentum)
    }

    /// Sum of squared and sum of absolute errors over row-major `features`
    /// and `labels`.
    pub fn measure_loss(&mut self, weights: &[f64], features: &[f64], labels: &[f64]) -> NetResult<(f64, f64)> {
        let (ins, outs) = (self.inputs().max(1), self.outputs().max(1));
        if features.len() % ins != 0 {
            return Err(NetError::ShapeMismatch {
                context: "feature matrix length, a multiple of the input width",
                expected: features.len().next_multiple_of(ins),
                got: features.len(),
            });
        }
        if labels.len() % outs != 0 {
            return Err(NetError::ShapeMismatch {
                context: "label matrix length, a multiple of the output width",
                expected: labels.len().next_multiple_of(outs),
                got: labels.len(),
            });
        }
        NetError::check_len("loss row count", features.len() / ins, labels.len() / outs)?;
        let (mut sse, mut sae) = (0.0, 0.0);
        for (x, t) in features.chunks_exact(ins).zip(labels.chunks_exact(outs)) {
            for (y, t) in self.forward_prop(weights, x)?.iter().zip(t) {
                let d = t - y;
                sse += d * d;
                sae += d.abs();
            }
        }
        Ok((sse, sae))
    }

    /// Writes `1` at every bias position of the weight vector, `0` elsewhere.
    pub fn bias_mask(&self, mask: &mut [f64]) -> NetResult<()> {
        self.check_weights(mask)?;
        for (layer, span) in self.layers.iter().zip(&self.spans) {
            layer.bias_mask(&mut mask[span.weights.clone()]);
        }
        Ok(())
    }

    /// Collapses recurrent blocks to a single instance with zeroed state.
    pub fn reset_state(&mut self) {
        self.layers.iter_mut().for_each(Layer::reset_state);
    }

    /// Moves recurrent blocks one step forward in time, unrolled over `steps`
    /// instances.
    pub fn advance_state(&mut self, steps: usize) {
        self.layers.iter_mut().for_each(|l| l.advance_state(steps));
    }

    /// Multi-line text dump, one block per line (with weights if given).
    pub fn describe(&self, weights: Option<&[f64]>) -> NetResult<String> {
        if let Some(w) = weights {
            self.check_weights(w)?;
        }
        let mut out = format!(
            "network: {} -> {}, {} layers, {} weights",
            self.inputs(),
            self.outputs(),
            self.layers.len(),
            self.weight_count()
        );
        for (i, (layer, span)) in self.layers.iter().zip(&self.spans).enumerate() {
            out.push_str(&format!("\nlayer {i}:\n"));
            out.push_str(&layer.describe(weights.map(|w| &w[span.weights.clone()])));
        }
        Ok(out)
    }

    pub fn to_spec(&self, weights: Option<&[f64]>) -> NetResult<NetworkSpec> {
        if let Some(w) = weights {
            self.check_weights(w)?;
        }
        Ok(NetworkSpec {
            layers: self.layers.iter().map(Layer::to_spec).collect(),
            config: self.config,
            weights: weights.map(<[f64]>::to_vec),
        })
    }

    /// Rebuilds a network, returning the persisted weights if present.
    pub fn from_spec(spec: &NetworkSpec) -> NetResult<(Self, Option<Vec<f64>>)> {
        let mut net = Self::with_config(spec.config);
        for layer in &spec.layers {
            net.layers.push(Layer::from_spec(layer)?);
        }
        net.reindex()?;
        if let Some(w) = &spec.weights {
            net.check_weights(w)?;
        }
        Ok((net, spec.weights.clone()))
    }

    pub fn to_json(&self, weights: Option<&[f64]>) -> NetResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_spec(weights)?)?)
    }

    /// Parses a JSON topology document.
    ///
    /// # Errors
    /// Returns [`NetError::UnknownBlock`] for any block `type` tag missing from
    /// the registry, before attempting to decode the rest of the document.
    pub fn from_json(text: &str) -> NetResult<(Self, Option<Vec<f64>>)> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let tags = value["layers"]
            .as_array()
            .into_iter()
            .flatten()
            .flat_map(|layer| layer["blocks"].as_array().into_iter().flatten())
            .filter_map(|block| block["type"].as_str());
        for tag in tags {
            if BlockKind::from_tag(tag).is_none() {
                return Err(NetError::UnknownBlock(tag.to_owned()));
            }
        }
        let spec: NetworkSpec = serde_json::from_value(value)?;
        Self::from_spec(&spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{Activation, Linear};

    #[test]
    fn test_offset_table() {
        let mut net = Network::new();
        net.add(Linear::new(2, 3)).unwrap();
        net.add(Activation::tanh(3)).unwrap();
        net.add(Linear::new(3, 1)).unwrap();
        assert_eq!(net.weight_count(), 9 + 4);
        assert_eq!(net.layer_start(2).unwrap(), 9);
        assert_eq!(net.layer_start(3).unwrap(), 13);
        assert!(net.layer_start(4).is_err());
    }

    #[test]
    fn test_concat_rolls_back_on_bad_window() {
        let mut net = Network::new();
        net.add(Linear::new(2, 3)).unwrap();
        net.add(Linear::new(3, 1)).unwrap();
        assert!(net.concat(Linear::new(2, 1), 2).is_err());
        assert_eq!(net.outputs(), 1);
        net.concat(Linear::new(2, 1), 1).unwrap();
        assert_eq!(net.outputs(), 2);
        assert_eq!(net.weight_count(), 9 + 4 + 3);
    }

    #[test]
    fn test_empty_network_reports_error() {
        let mut net = Network::new();
        assert!(matches!(net.forward_prop(&[], &[]), Err(NetError::EmptyNetwork)));
    }
}
