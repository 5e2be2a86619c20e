//! Fully connected blocks.
//!
//! Weight layout for `in` inputs and `out` outputs:
//!
//! ```text
//! [ b_0 .. b_out | W[0][0..out] | W[1][0..out] | ... | W[in-1][0..out] ]
//! ```
//!
//! so `W[i][j]`, the weight from input `i` to output `j`, lives at
//! `out + i * out + j` and `weight_count = (in + 1) * out`.

use rand::{Rng, RngCore};
use rand_distr::StandardNormal;

use super::{Backward, Block, BlockKind, BlockSpec, Forward, Trace};
use crate::error::{NetError, NetResult};
use crate::tensors::{dot, fill_normal, squared_magnitude};

fn linear_forward(inputs: usize, outputs: usize, io: Forward<'_>, weights: &[f64]) {
    io.output.copy_from_slice(&weights[..outputs]);
    for (i, &x) in io.input.iter().enumerate().take(inputs) {
        let row = &weights[outputs * (i + 1)..outputs * (i + 2)];
        for (y, &w) in io.output.iter_mut().zip(row) {
            *y += x * w;
        }
    }
}

fn linear_back_prop(outputs: usize, io: Backward<'_>, weights: &[f64]) {
    for (i, b) in io.in_blame.iter_mut().enumerate() {
        *b += dot(io.out_blame, &weights[outputs * (i + 1)..outputs * (i + 2)]);
    }
}

fn linear_gradient(outputs: usize, io: Trace<'_>, gradient: &mut [f64]) {
    accumulate_outer(outputs, io, gradient, |x| x);
}

/// Bias terms take the raw blame; weight `W[i][j]` takes `blame[j] * act(input[i])`.
fn accumulate_outer(outputs: usize, io: Trace<'_>, gradient: &mut [f64], act: impl Fn(f64) -> f64) {
    for (g, &ob) in gradient[..outputs].iter_mut().zip(io.out_blame) {
        *g += ob;
    }
    for (i, &x) in io.input.iter().enumerate() {
        let a = act(x);
        let row = &mut gradient[outputs * (i + 1)..outputs * (i + 2)];
        for (g, &ob) in row.iter_mut().zip(io.out_blame) {
            *g += ob * a;
        }
    }
}

fn describe_linear(kind: BlockKind, inputs: usize, outputs: usize, weights: Option<&[f64]>) -> String {
    let mut s = format!("[{kind}: {inputs}->{outputs}, weights={}]", (inputs + 1) * outputs);
    if let Some(w) = weights {
        s.push_str(&format!("\n  bias: {:?}", &w[..outputs]));
        for i in 0..inputs {
            s.push_str(&format!("\n  in {i}: {:?}", &w[outputs * (i + 1)..outputs * (i + 2)]));
        }
    }
    s
}

/// `y = W x + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    inputs: usize,
    outputs: usize,
}

impl Linear {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self { inputs, outputs }
    }

    /// Pushes a square block toward an anti-symmetric weight matrix and,
    /// when `next` holds the weights of a same-shaped linear block, toward
    /// those weights (biases excluded).
    ///
    /// # Errors
    /// Fails for non-square blocks and mismatched weight lengths.
    pub fn regularize_square(&self, lambda: f64, weights: &mut [f64], next: Option<&[f64]>) -> NetResult<()> {
        if self.inputs != self.outputs {
            return Err(NetError::Topology(format!(
                "regularize_square needs a square block, got {}->{}",
                self.inputs, self.outputs
            )));
        }
        NetError::check_len("regularize_square weights", self.weight_count(), weights.len())?;
        if let Some(next) = next {
            NetError::check_len("regularize_square next weights", weights.len(), next.len())?;
        }
        let n = self.outputs;
        for i in 0..n {
            for j in i + 1..n {
                let ii = n * (i + 1) + j;
                let jj = n * (j + 1) + i;
                let (a, b) = (weights[ii], weights[jj]);
                weights[ii] = (1.0 - lambda) * a - lambda * b;
                weights[jj] = (1.0 - lambda) * b - lambda * a;
            }
        }
        if let Some(next) = next {
            for (w, &v) in weights.iter_mut().zip(next).skip(n) {
                *w = (1.0 - lambda) * *w + lambda * v;
            }
        }
        Ok(())
    }

    /// Rewrites the weights so that feeding input `input_index` rescaled from
    /// `[old_min, old_max]` to `[new_min, new_max]` computes the same function.
    pub fn adjust_input_range(
        &self,
        weights: &mut [f64],
        input_index: usize,
        old_min: f64,
        old_max: f64,
        new_min: f64,
        new_max: f64,
    ) {
        let scalar = (old_max - old_min) / (new_max - new_min);
        let n = self.outputs;
        for j in 0..n {
            let pos = n * (input_index + 1) + j;
            let old = weights[pos];
            let new = old * scalar;
            weights[pos] = new;
            weights[j] += old_min * old - new_min * new;
        }
    }
}

impl Block for Linear {
    fn kind(&self) -> BlockKind {
        BlockKind::Linear
    }

    fn inputs(&self) -> usize {
        self.inputs
    }

    fn outputs(&self) -> usize {
        self.outputs
    }

    fn weight_count(&self) -> usize {
        (self.inputs + 1) * self.outputs
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Linear
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        linear_forward(self.inputs, self.outputs, io, weights);
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        linear_back_prop(self.outputs, io, weights);
    }

    fn update_gradient(&mut self, io: Trace<'_>, _weights: &mut [f64], gradient: &mut [f64]) {
        linear_gradient(self.outputs, io, gradient);
    }

    fn update_gradient_normalized(&mut self, io: Trace<'_>, gradient: &mut [f64]) -> NetResult<()> {
        // -0.0 counts as negative
        accumulate_outer(self.outputs, io, gradient, |x| if x.is_sign_negative() { -1.0 } else { 1.0 });
        Ok(())
    }

    fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) {
        fill_normal(rng, weights, 1.0 / self.inputs.max(1) as f64);
    }

    fn init_identity(&self, weights: &mut [f64]) -> NetResult<()> {
        NetError::check_len("linear identity weights", self.weight_count(), weights.len())?;
        let n = self.outputs;
        weights[..n].fill(0.0);
        for i in 0..self.inputs {
            for j in 0..n {
                weights[n * (i + 1) + j] = if i == j { 1.0 } else { 0.0 };
            }
        }
        Ok(())
    }

    fn is_identity(&self, weights: &[f64]) -> bool {
        if self.inputs != self.outputs || weights.len() != self.weight_count() {
            return false;
        }
        let n = self.outputs;
        weights[..n].iter().all(|&b| b == 0.0)
            && (0..n).all(|i| (0..n).all(|j| weights[n * (i + 1) + j] == if i == j { 1.0 } else { 0.0 }))
    }

    fn adjusted_weight_count(&self, in_delta: isize, out_delta: isize) -> NetResult<usize> {
        let inputs = self.inputs as isize + in_delta + 1;
        let outputs = self.outputs as isize + out_delta;
        Ok((inputs.max(0) * outputs.max(0)) as usize)
    }

    fn add_units(
        &mut self,
        new_inputs: usize,
        new_outputs: usize,
        before: &[f64],
        after: &mut [f64],
        rng: &mut dyn RngCore,
    ) -> NetResult<()> {
        NetError::check_len("linear weights before widening", self.weight_count(), before.len())?;
        let total_outputs = self.outputs + new_outputs;
        NetError::check_len(
            "linear weights after widening",
            (self.inputs + new_inputs + 1) * total_outputs,
            after.len(),
        )?;
        let dev = 1.0 / (self.inputs + new_inputs).max(1) as f64;
        let n = self.outputs;
        let mut fresh = || dev * rng.sample::<f64, _>(StandardNormal);

        after[..n].copy_from_slice(&before[..n]);
        after[n..total_outputs].fill(0.0);
        let mut pos = total_outputs;
        for i in 0..self.inputs {
            after[pos..pos + n].copy_from_slice(&before[n * (i + 1)..n * (i + 2)]);
            pos += n;
            for _ in 0..new_outputs {
                after[pos] = fresh();
                pos += 1;
            }
        }
        for _ in 0..new_inputs {
            after[pos..pos + n].fill(0.0);
            pos += n;
            for _ in 0..new_outputs {
                after[pos] = fresh();
                pos += 1;
            }
        }
        debug_assert_eq!(pos, after.len());
        self.inputs += new_inputs;
        self.outputs = total_outputs;
        Ok(())
    }

    fn drop_unit(&mut self, input: Option<usize>, output: Option<usize>, before: &[f64], after: &mut [f64]) -> NetResult<()> {
        NetError::check_len("linear weights before narrowing", self.weight_count(), before.len())?;
        let new_in = self.inputs - usize::from(input.is_some());
        let new_out = self.outputs - usize::from(output.is_some());
        NetError::check_len("linear weights after narrowing", (new_in + 1) * new_out, after.len())?;
        let n = self.outputs;
        let keep_rows = std::iter::once(None).chain((0..self.inputs).map(Some));
        let mut pos = 0;
        for (r, row) in keep_rows.enumerate() {
            if row.is_some() && row == input {
                continue;
            }
            for j in 0..n {
                if Some(j) != output {
                    after[pos] = before[r * n + j];
                    pos += 1;
                }
            }
        }
        debug_assert_eq!(pos, after.len());
        self.inputs = new_in;
        self.outputs = new_out;
        Ok(())
    }

    fn first_ignored_input(&self, weights: &[f64]) -> NetResult<Option<usize>> {
        NetError::check_len("linear weights", self.weight_count(), weights.len())?;
        let n = self.outputs;
        Ok((0..self.inputs).find(|&i| squared_magnitude(&weights[n * (i + 1)..n * (i + 2)]) == 0.0))
    }

    fn bias_mask(&self, mask: &mut [f64]) {
        mask.fill(0.0);
        mask[..self.outputs].fill(1.0);
    }

    fn as_linear(&self) -> Option<&Linear> {
        Some(self)
    }

    fn describe(&self, weights: Option<&[f64]>) -> String {
        describe_linear(self.kind(), self.inputs, self.outputs, weights)
    }
}

/// A linear block that keeps each output's spread in check.
///
/// While accumulating gradients it tracks exponentially decayed first and
/// second moments of every output and, whenever an output's running
/// deviation exceeds `deviation_cap`, shrinks that output's incoming weights
/// by `deviation_cap / deviation`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperedLinear {
    inputs: usize,
    outputs: usize,
    deviation_cap: f64,
    forget_rate: f64,
    moment1: Vec<f64>,
    moment2: Vec<f64>,
}

impl TemperedLinear {
    pub fn new(inputs: usize, outputs: usize, deviation_cap: f64, forget_rate: f64) -> Self {
        Self {
            inputs,
            outputs,
            deviation_cap,
            forget_rate,
            moment1: vec![0.0; outputs],
            moment2: vec![0.0; outputs],
        }
    }

    /// Restores a block together with its running moments.
    ///
    /// # Errors
    /// Fails if a moment vector's length differs from `outputs`.
    pub fn with_moments(
        inputs: usize,
        outputs: usize,
        deviation_cap: f64,
        forget_rate: f64,
        moment1: Vec<f64>,
        moment2: Vec<f64>,
    ) -> NetResult<Self> {
        NetError::check_len("tempered linear first moments", outputs, moment1.len())?;
        NetError::check_len("tempered linear second moments", outputs, moment2.len())?;
        Ok(Self {
            inputs,
            outputs,
            deviation_cap,
            forget_rate,
            moment1,
            moment2,
        })
    }

    pub fn moments(&self) -> (&[f64], &[f64]) {
        (&self.moment1, &self.moment2)
    }
}

impl Block for TemperedLinear {
    fn kind(&self) -> BlockKind {
        BlockKind::TemperedLinear
    }

    fn inputs(&self) -> usize {
        self.inputs
    }

    fn outputs(&self) -> usize {
        self.outputs
    }

    fn weight_count(&self) -> usize {
        (self.inputs + 1) * self.outputs
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::TemperedLinear {
            deviation_cap: self.deviation_cap,
            forget_rate: self.forget_rate,
            moment1: self.moment1.clone(),
            moment2: self.moment2.clone(),
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        linear_forward(self.inputs, self.outputs, io, weights);
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        linear_back_prop(self.outputs, io, weights);
    }

    fn update_gradient(&mut self, io: Trace<'_>, weights: &mut [f64], gradient: &mut [f64]) {
        let n = self.outputs;
        let cap_sq = self.deviation_cap * self.deviation_cap;
        for j in 0..n {
            let y = io.output[j];
            self.moment1[j] = (1.0 - self.forget_rate) * self.moment1[j] + self.forget_rate * y;
            self.moment2[j] = (1.0 - self.forget_rate) * self.moment2[j] + self.forget_rate * y * y;
            let var = self.moment2[j] - self.moment1[j] * self.moment1[j];
            if var > cap_sq {
                let shrink = self.deviation_cap / var.sqrt();
                for i in 0..self.inputs {
                    weights[n * (i + 1) + j] *= shrink;
                }
            }
        }
        linear_gradient(n, io, gradient);
    }

    fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) {
        fill_normal(rng, weights, 1.0 / self.inputs.max(1) as f64);
    }

    fn bias_mask(&self, mask: &mut [f64]) {
        mask.fill(0.0);
        mask[..self.outputs].fill(1.0);
    }

    fn describe(&self, weights: Option<&[f64]>) -> String {
        describe_linear(self.kind(), self.inputs, self.outputs, weights)
    }
}
