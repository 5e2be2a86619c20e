//! A peephole LSTM unrolled over a short window of past time steps.
//!
//! Every unit has three gates, each with a bias, one weight per input, and a
//! scalar weight on its own previous output and previous cell value:
//!
//! ```text
//! f = σ(z_f)          forget
//! t = tanh(z_t)       candidate
//! o = σ(z_o)          output
//! c = f c_prev + (1 - f) t
//! h = o tanh(c)
//! ```
//!
//! The weights of gate `g` (0 = f, 1 = t, 2 = o) of unit `i` start at
//! `(g * out + i) * (in + 3)` and read `[bias, w_x.., u_h, v_c]`.
//!
//! The block keeps an arena of instances, one per unrolled time step, and a
//! ring of indices into it ordered oldest to current. Forward propagation
//! replays the whole window with the current weights; backpropagation runs
//! through time over the same window.

use std::collections::VecDeque;

use log::trace;
use rand::RngCore;

use super::{Backward, Block, BlockKind, BlockSpec, Forward, Trace};
use crate::backprop::logistic;
use crate::tensors::fill_normal;

const GATES: usize = 3;

/// Everything one time step needs to replay itself and be backpropagated.
#[derive(Debug, Clone, PartialEq)]
struct LstmState {
    x: Vec<f64>,
    h_prev: Vec<f64>,
    c_prev: Vec<f64>,
    f: Vec<f64>,
    t: Vec<f64>,
    o: Vec<f64>,
    c: Vec<f64>,
    dz: [Vec<f64>; GATES],
    blame_h: Vec<f64>,
    blame_c: Vec<f64>,
}

impl LstmState {
    fn new(inputs: usize, units: usize) -> Self {
        let zeros = || vec![0.0; units];
        Self {
            x: vec![0.0; inputs],
            h_prev: zeros(),
            c_prev: zeros(),
            f: zeros(),
            t: zeros(),
            o: zeros(),
            c: zeros(),
            dz: [zeros(), zeros(), zeros()],
            blame_h: zeros(),
            blame_c: zeros(),
        }
    }

    fn clear_history(&mut self) {
        self.h_prev.fill(0.0);
        self.c_prev.fill(0.0);
        self.c.fill(0.0);
    }

    fn h(&self, i: usize) -> f64 {
        self.c[i].tanh() * self.o[i]
    }

    /// Recomputes gates and cell values from `x`, `h_prev` and `c_prev`.
    fn activate(&mut self, weights: &[f64]) {
        let (inputs, units) = (self.x.len(), self.c.len());
        let stride = inputs + 3;
        let z = |g: usize, i: usize| {
            let w = &weights[(g * units + i) * stride..(g * units + i + 1) * stride];
            let mut z = w[0] + w[inputs + 1] * self.h_prev[i] + w[inputs + 2] * self.c_prev[i];
            for (wx, x) in w[1..=inputs].iter().zip(&self.x) {
                z += wx * x;
            }
            z
        };
        for i in 0..units {
            let (zf, zt, zo) = (z(0, i), z(1, i), z(2, i));
            self.f[i] = logistic(zf);
            self.t[i] = zt.tanh();
            self.o[i] = logistic(zo);
        }
        for i in 0..units {
            self.c[i] = self.f[i] * self.c_prev[i] + (1.0 - self.f[i]) * self.t[i];
        }
    }
}

/// Two distinct elements of a slice, mutably.
fn pair_mut<T>(v: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b);
    if a < b {
        let (lo, hi) = v.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = v.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

/// Recurrent block; see the module documentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Lstm {
    inputs: usize,
    units: usize,
    arena: Vec<LstmState>,
    /// Indices into `arena`, oldest first; the back is the current instance.
    ring: VecDeque<usize>,
    /// Arena slots not currently in the ring.
    spare: Vec<usize>,
}

impl Lstm {
    pub fn new(inputs: usize, units: usize) -> Self {
        Self {
            inputs,
            units,
            arena: vec![LstmState::new(inputs, units)],
            ring: VecDeque::from([0]),
            spare: Vec::new(),
        }
    }

    /// Number of unrolled time steps currently held.
    pub fn instances(&self) -> usize {
        self.ring.len()
    }

    fn current(&self) -> usize {
        self.ring[self.ring.len() - 1]
    }

    fn stride(&self) -> usize {
        self.inputs + 3
    }

    /// Feeds the output and cell of instance `from` into instance `to`.
    fn step_in_time(&mut self, from: usize, to: usize) {
        if from == to {
            let s = &mut self.arena[from];
            for i in 0..s.c.len() {
                s.h_prev[i] = s.h(i);
                s.c_prev[i] = s.c[i];
            }
            return;
        }
        let (src, dst) = pair_mut(&mut self.arena, from, to);
        for i in 0..src.c.len() {
            dst.h_prev[i] = src.h(i);
            dst.c_prev[i] = src.c[i];
        }
    }

    fn take_spare(&mut self) -> usize {
        self.spare.pop().unwrap_or_else(|| {
            self.arena.push(LstmState::new(self.inputs, self.units));
            self.arena.len() - 1
        })
    }
}

impl Block for Lstm {
    fn kind(&self) -> BlockKind {
        BlockKind::Lstm
    }

    fn inputs(&self) -> usize {
        self.inputs
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        GATES * self.units * self.stride()
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Lstm
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        let current = self.current();
        self.arena[current].x.copy_from_slice(io.input);
        for k in 0..self.ring.len() {
            let idx = self.ring[k];
            self.arena[idx].activate(weights);
            if k + 1 < self.ring.len() {
                self.step_in_time(idx, self.ring[k + 1]);
            }
        }
        let s = &self.arena[current];
        for (i, y) in io.output.iter_mut().enumerate() {
            *y = s.h(i);
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        let (inputs, units, stride) = (self.inputs, self.units, self.stride());
        for &idx in &self.ring {
            let s = &mut self.arena[idx];
            s.blame_h.fill(0.0);
            s.blame_c.fill(0.0);
        }
        let current = self.current();
        self.arena[current].blame_h.copy_from_slice(io.out_blame);

        for k in (0..self.ring.len()).rev() {
            let idx = self.ring[k];
            let s = &mut self.arena[idx];
            let mut dc = vec![0.0; units];
            for i in 0..units {
                let tc = s.c[i].tanh();
                let (f, t, o) = (s.f[i], s.t[i], s.o[i]);
                let bh = s.blame_h[i];
                dc[i] = bh * o * (1.0 - tc * tc) + s.blame_c[i];
                s.dz[2][i] = bh * tc * o * (1.0 - o);
                s.dz[0][i] = dc[i] * (s.c_prev[i] - t) * f * (1.0 - f);
                s.dz[1][i] = dc[i] * (1.0 - f) * (1.0 - t * t);
            }
            if k > 0 {
                let (s, prev) = pair_mut(&mut self.arena, idx, self.ring[k - 1]);
                for i in 0..units {
                    let mut bh = 0.0;
                    let mut bc = dc[i] * s.f[i];
                    for g in 0..GATES {
                        let base = (g * units + i) * stride;
                        bh += s.dz[g][i] * weights[base + inputs + 1];
                        bc += s.dz[g][i] * weights[base + inputs + 2];
                    }
                    prev.blame_h[i] += bh;
                    prev.blame_c[i] += bc;
                }
            }
        }

        let s = &self.arena[current];
        for g in 0..GATES {
            for i in 0..units {
                let base = (g * units + i) * stride + 1;
                let dz = s.dz[g][i];
                for (b, &w) in io.in_blame.iter_mut().zip(&weights[base..base + inputs]) {
                    *b += dz * w;
                }
            }
        }
    }

    fn update_gradient(&mut self, _io: Trace<'_>, _weights: &mut [f64], gradient: &mut [f64]) {
        let (inputs, units, stride) = (self.inputs, self.units, self.stride());
        for &idx in &self.ring {
            let s = &self.arena[idx];
            for g in 0..GATES {
                for i in 0..units {
                    let dz = s.dz[g][i];
                    let grad = &mut gradient[(g * units + i) * stride..(g * units + i + 1) * stride];
                    grad[0] += dz;
                    for (gx, &x) in grad[1..=inputs].iter_mut().zip(&s.x) {
                        *gx += dz * x;
                    }
                    grad[inputs + 1] += dz * s.h_prev[i];
                    grad[inputs + 2] += dz * s.c_prev[i];
                }
            }
        }
    }

    fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) {
        fill_normal(rng, weights, 1.0 / (self.stride() as f64).sqrt());
    }

    fn bias_mask(&self, mask: &mut [f64]) {
        for gate in mask.chunks_exact_mut(self.stride()) {
            gate.fill(0.0);
            gate[0] = 1.0;
        }
    }

    fn reset_state(&mut self) {
        let current = self.current();
        while self.ring.len() > 1 {
            if let Some(old) = self.ring.pop_front() {
                self.spare.push(old);
            }
        }
        self.arena[current].clear_history();
    }

    fn advance_state(&mut self, steps: usize) {
        let steps = steps.max(1);
        while self.ring.len() > steps {
            if let Some(old) = self.ring.pop_front() {
                self.spare.push(old);
            }
        }
        while self.ring.len() < steps {
            let fresh = self.take_spare();
            self.arena[fresh].clear_history();
            self.ring.push_front(fresh);
        }
        let current = self.current();
        if let Some(next) = self.ring.pop_front() {
            self.step_in_time(current, next);
            self.ring.push_back(next);
        }
        trace!("lstm advanced to {} unrolled steps", self.ring.len());
    }
}
