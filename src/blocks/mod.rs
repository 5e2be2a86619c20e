//! Blocks: the atomic differentiable units of a network.
//!
//! A block computes a fixed-arity function of its input and of a slice of the
//! global weight vector. It owns **no** parameter storage: every operation
//! receives the weight (and gradient) slice explicitly, sized by
//! [`Block::weight_count`] and [`Block::grad_count`]. Signal buffers are owned
//! by the enclosing [`Layer`](crate::layer::Layer) and lent to the block for the
//! duration of one call through [`Forward`], [`Backward`] and [`Trace`].
//!
//! # Lifecycle of one training example
//!
//! 1. [`Block::forward_prop`] writes `output` from `input` and weights.
//! 2. [`Block::compute_blame`] (output layer only) writes `out_blame`.
//! 3. [`Block::back_prop`] accumulates into `in_blame`.
//! 4. [`Block::update_gradient`] accumulates into the gradient slice (or
//!    [`Block::update_gradient_normalized`], for sign-only input scaling).
//! 5. [`Block::step`] applies the update (classical momentum by default).
//!
//! # Topology surgery
//!
//! The mutation primitives (`init_identity`, `add_units`, `drop_unit`, ...)
//! default to [`NetError::Unsupported`]. Blocks opt in by overriding them.

use std::fmt;

use rand::RngCore;

use crate::backprop::{momentum_step, squared_error_blame};
use crate::error::{NetError, NetResult};

mod activation;
mod combine;
mod conv;
mod linear;
mod lstm;
mod normalize;
mod parametric;
mod pooling;
mod sparse;
mod spec;

pub use activation::{Activation, SoftMax};
pub use combine::{Repeater, ScalarProduct, ScalarSum, Spectral, Spreader, Switch};
pub use conv::Conv;
pub use linear::{Linear, TemperedLinear};
pub use lstm::Lstm;
pub use normalize::RunningNormalizer;
pub use parametric::{Elbow, Hinge, LeakyTanh, SoftExp};
pub use pooling::MaxPooling2D;
pub use sparse::{CatIn, HypercubeEdges};
pub use spec::{BlockSpec, PlacedBlock};

/// Views lent to a block for its forward pass.
#[derive(Debug)]
pub struct Forward<'a> {
    pub input: &'a [f64],
    pub output: &'a mut [f64],
}

/// Views lent to a block for its backward pass.
///
/// `in_blame` is shared by every block reading the same input range, so blocks
/// must accumulate into it and never overwrite it.
#[derive(Debug)]
pub struct Backward<'a> {
    pub input: &'a [f64],
    pub output: &'a [f64],
    pub out_blame: &'a [f64],
    pub in_blame: &'a mut [f64],
}

/// Remembered activations and blame, lent for gradient accumulation and steps.
#[derive(Debug, Clone, Copy)]
pub struct Trace<'a> {
    pub input: &'a [f64],
    pub output: &'a [f64],
    pub out_blame: &'a [f64],
}

/// Closed set of block variants, with the tags used in persisted descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Linear,
    TemperedLinear,
    Activation,
    SoftMax,
    Spectral,
    Repeater,
    Spreader,
    ScalarSum,
    ScalarProduct,
    Switch,
    Hinge,
    Elbow,
    LeakyTanh,
    SoftExp,
    RunningNormalizer,
    Conv,
    MaxPooling2D,
    HypercubeEdges,
    CatIn,
    Lstm,
}

impl BlockKind {
    /// The registration table: every kind, in tag order of declaration.
    pub const ALL: [BlockKind; 20] = [
        Self::Linear,
        Self::TemperedLinear,
        Self::Activation,
        Self::SoftMax,
        Self::Spectral,
        Self::Repeater,
        Self::Spreader,
        Self::ScalarSum,
        Self::ScalarProduct,
        Self::Switch,
        Self::Hinge,
        Self::Elbow,
        Self::LeakyTanh,
        Self::SoftExp,
        Self::RunningNormalizer,
        Self::Conv,
        Self::MaxPooling2D,
        Self::HypercubeEdges,
        Self::CatIn,
        Self::Lstm,
    ];

    /// The `type` tag written to persisted descriptions.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::TemperedLinear => "tempered_linear",
            Self::Activation => "activation",
            Self::SoftMax => "soft_max",
            Self::Spectral => "spectral",
            Self::Repeater => "repeater",
            Self::Spreader => "spreader",
            Self::ScalarSum => "scalar_sum",
            Self::ScalarProduct => "scalar_product",
            Self::Switch => "switch",
            Self::Hinge => "hinge",
            Self::Elbow => "elbow",
            Self::LeakyTanh => "leaky_tanh",
            Self::SoftExp => "soft_exp",
            Self::RunningNormalizer => "running_normalizer",
            Self::Conv => "conv",
            Self::MaxPooling2D => "max_pooling_2d",
            Self::HypercubeEdges => "hypercube_edges",
            Self::CatIn => "cat_in",
            Self::Lstm => "lstm",
        }
    }

    /// Looks a persisted tag up in the registration table.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The contract every block variant implements.
pub trait Block: fmt::Debug {
    fn kind(&self) -> BlockKind;
    fn inputs(&self) -> usize;
    fn outputs(&self) -> usize;

    /// Number of weights this block reads, a pure function of its shape.
    fn weight_count(&self) -> usize;

    /// Number of gradient terms this block accumulates.
    fn grad_count(&self) -> usize {
        self.weight_count()
    }

    /// The persisted description of this block (sizes excluded).
    fn to_spec(&self) -> BlockSpec;

    fn box_clone(&self) -> Box<dyn Block>;

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]);

    /// Writes the output blame for `target`. Defaults to `target - output`.
    fn compute_blame(&self, output: &[f64], target: &[f64], out_blame: &mut [f64]) {
        squared_error_blame(output, target, out_blame);
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]);

    /// Accumulates into `gradient`. Weightless blocks do nothing.
    ///
    /// `weights` is writable because a few blocks renormalize their own
    /// parameters while they observe activations.
    fn update_gradient(&mut self, io: Trace<'_>, weights: &mut [f64], gradient: &mut [f64]) {
        let _ = (io, weights, gradient);
    }

    /// Accumulates a sign-normalized gradient: every input activation is
    /// replaced by its sign, so the step no longer scales with the input.
    /// Weightless blocks do nothing.
    fn update_gradient_normalized(&mut self, io: Trace<'_>, gradient: &mut [f64]) -> NetResult<()> {
        let _ = (io, gradient);
        if self.weight_count() == 0 {
            Ok(())
        } else {
            Err(NetError::unsupported(self.kind().tag(), "update_gradient_normalized"))
        }
    }

    /// The weight that gradient term `term` differentiates, given the input
    /// remembered from the last forward pass. One term per weight by default.
    fn gradient_target(&self, input: &[f64], term: usize) -> usize {
        let _ = input;
        term
    }

    /// Applies one update from `gradient` to `weights`.
    fn step(&mut self, io: Trace<'_>, gradient: &mut [f64], weights: &mut [f64], learning_rate: f64, momentum: f64) {
        let _ = io;
        momentum_step(gradient, weights, learning_rate, momentum);
    }

    /// Draws initial weights.
    fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) {
        let _ = (rng, weights);
    }

    /// Writes weights that make this block compute the identity function.
    fn init_identity(&self, weights: &mut [f64]) -> NetResult<()> {
        let _ = weights;
        Err(NetError::unsupported(self.kind().tag(), "init_identity"))
    }

    fn is_identity(&self, weights: &[f64]) -> bool {
        let _ = weights;
        false
    }

    /// The weight count after adding `in_delta` inputs and `out_delta` outputs.
    fn adjusted_weight_count(&self, in_delta: isize, out_delta: isize) -> NetResult<usize> {
        let _ = (in_delta, out_delta);
        if self.weight_count() == 0 {
            Ok(0)
        } else {
            Err(NetError::unsupported(self.kind().tag(), "adjusted_weight_count"))
        }
    }

    /// Grows the block, copying `before` into the larger `after`.
    fn add_units(
        &mut self,
        new_inputs: usize,
        new_outputs: usize,
        before: &[f64],
        after: &mut [f64],
        rng: &mut dyn RngCore,
    ) -> NetResult<()> {
        let _ = (after, rng);
        if !before.is_empty() {
            return Err(NetError::unsupported(self.kind().tag(), "add_units"));
        }
        self.resize(self.inputs() + new_inputs, self.outputs() + new_outputs)
    }

    /// Removes one input and/or one output, copying the surviving weights.
    fn drop_unit(&mut self, input: Option<usize>, output: Option<usize>, before: &[f64], after: &mut [f64]) -> NetResult<()> {
        let _ = after;
        if !before.is_empty() {
            return Err(NetError::unsupported(self.kind().tag(), "drop_unit"));
        }
        self.resize(
            self.inputs().saturating_sub(usize::from(input.is_some())),
            self.outputs().saturating_sub(usize::from(output.is_some())),
        )
    }

    /// Changes the arity of a weightless block.
    fn resize(&mut self, inputs: usize, outputs: usize) -> NetResult<()> {
        let _ = (inputs, outputs);
        Err(NetError::unsupported(self.kind().tag(), "resizing"))
    }

    /// The first input whose outgoing weights are all exactly zero.
    fn first_ignored_input(&self, weights: &[f64]) -> NetResult<Option<usize>> {
        let _ = weights;
        Err(NetError::unsupported(self.kind().tag(), "first_ignored_input"))
    }

    /// Writes `1` at bias positions and `0` elsewhere.
    fn bias_mask(&self, mask: &mut [f64]) {
        mask.fill(0.0);
    }

    fn reset_state(&mut self) {}

    /// Unrolls a recurrent block to `steps` instances and moves time forward.
    fn advance_state(&mut self, steps: usize) {
        let _ = steps;
    }

    /// Downcast used by structural regularizers.
    fn as_linear(&self) -> Option<&Linear> {
        None
    }

    /// One-line (or, with weights, multi-line) human readable dump.
    fn describe(&self, weights: Option<&[f64]>) -> String {
        let mut s = format!(
            "[{}: {}->{}, weights={}]",
            self.kind(),
            self.inputs(),
            self.outputs(),
            self.weight_count()
        );
        if let Some(w) = weights {
            s.push_str(&format!("\n  {w:?}"));
        }
        s
    }
}

impl Clone for Box<dyn Block> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Clamps every element of `v` into `[lo, hi]`.
pub(crate) fn clamp_all(v: &mut [f64], lo: f64, hi: f64) {
    v.iter_mut().for_each(|x| *x = x.clamp(lo, hi));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_round_trip() {
        for kind in BlockKind::ALL {
            assert_eq!(BlockKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(BlockKind::from_tag("pal"), None);
    }
}
