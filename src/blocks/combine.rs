//! Weightless blocks that route, mix or expand signals.

use std::f64::consts::PI;

use super::{Backward, Block, BlockKind, BlockSpec, Forward};
use crate::error::{NetError, NetResult};

/// Expands one scalar into `units / 2` sinusoid pairs `sin(ωx), cos(ωx)`.
///
/// The angular frequency starts at `2π / max_wavelength` and advances per pair
/// as `ω ← ω * scale + shift`, geometric (`shift = 0`) or linear (`scale = 1`).
#[derive(Debug, Clone, PartialEq)]
pub struct Spectral {
    units: usize,
    freq_start: f64,
    freq_scale: f64,
    freq_shift: f64,
}

impl Spectral {
    /// # Errors
    /// Fails if `units` is odd or zero.
    pub fn new(min_wavelength: f64, max_wavelength: f64, units: usize, linear_spacing: bool) -> NetResult<Self> {
        let pairs = units / 2;
        if pairs == 0 || pairs * 2 != units {
            return Err(NetError::Topology(format!(
                "spectral blocks need a positive even number of units, got {units}"
            )));
        }
        let freq_start = 1.0 / max_wavelength;
        let freq_end = 1.0 / min_wavelength;
        let steps = (pairs - 1).max(1) as f64;
        let (freq_scale, freq_shift) = if pairs == 1 {
            (1.0, 0.0)
        } else if linear_spacing {
            (1.0, ((freq_end - freq_start) / steps).min(1.0))
        } else {
            ((freq_end / freq_start).powf(1.0 / steps), 0.0)
        };
        Ok(Self {
            units,
            freq_start,
            freq_scale,
            freq_shift,
        })
    }

    /// Rebuilds a block from its persisted frequency schedule.
    pub fn from_schedule(units: usize, freq_start: f64, freq_scale: f64, freq_shift: f64) -> Self {
        Self {
            units,
            freq_start,
            freq_scale,
            freq_shift,
        }
    }

    fn frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        std::iter::successors(Some(2.0 * PI * self.freq_start), |f| Some(f * self.freq_scale + self.freq_shift))
            .take(self.units / 2)
    }
}

impl Block for Spectral {
    fn kind(&self) -> BlockKind {
        BlockKind::Spectral
    }

    fn inputs(&self) -> usize {
        1
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        0
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Spectral {
            start: self.freq_start,
            scale: self.freq_scale,
            shift: self.freq_shift,
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, _weights: &[f64]) {
        let x = io.input[0];
        for (pair, freq) in io.output.chunks_exact_mut(2).zip(self.frequencies()) {
            pair[0] = (freq * x).sin();
            pair[1] = (freq * x).cos();
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, _weights: &[f64]) {
        let x = io.input[0];
        let mut blame = 0.0;
        for (ob, freq) in io.out_blame.chunks_exact(2).zip(self.frequencies()) {
            blame += freq * (ob[0] * (freq * x).cos() - ob[1] * (freq * x).sin());
        }
        io.in_blame[0] += blame;
    }
}

/// Tiles its input across a wider output: `y_i = x_{i mod in}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Repeater {
    inputs: usize,
    outputs: usize,
}

impl Repeater {
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self { inputs, outputs }
    }
}

impl Block for Repeater {
    fn kind(&self) -> BlockKind {
        BlockKind::Repeater
    }

    fn inputs(&self) -> usize {
        self.inputs
    }

    fn outputs(&self) -> usize {
        self.outputs
    }

    fn weight_count(&self) -> usize {
        0
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Repeater
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, _weights: &[f64]) {
        for (i, y) in io.output.iter_mut().enumerate() {
            *y = io.input[i % self.inputs];
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, _weights: &[f64]) {
        for (i, &ob) in io.out_blame.iter().enumerate() {
            io.in_blame[i % self.inputs] += ob;
        }
    }

    fn init_identity(&self, weights: &mut [f64]) -> NetResult<()> {
        NetError::check_len("repeater identity arity", self.inputs, self.outputs)?;
        NetError::check_len("repeater weights", 0, weights.len())
    }

    fn is_identity(&self, _weights: &[f64]) -> bool {
        self.inputs == self.outputs
    }
}

/// A fixed permutation that scatters neighbouring units `spread` apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Spreader {
    spread: usize,
    forward: Vec<usize>,
}

impl Spreader {
    pub fn new(units: usize, spread: usize) -> Self {
        let mut taken = vec![false; units];
        let mut forward = Vec::with_capacity(units);
        let mut j = 0;
        for _ in 0..units {
            j %= units;
            while taken[j] {
                j = (j + 1) % units;
            }
            forward.push(j);
            taken[j] = true;
            j += spread;
        }
        Self { spread, forward }
    }

    /// Destination of each input unit.
    pub fn permutation(&self) -> &[usize] {
        &self.forward
    }
}

impl Block for Spreader {
    fn kind(&self) -> BlockKind {
        BlockKind::Spreader
    }

    fn inputs(&self) -> usize {
        self.forward.len()
    }

    fn outputs(&self) -> usize {
        self.forward.len()
    }

    fn weight_count(&self) -> usize {
        0
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Spreader { spread: self.spread }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, _weights: &[f64]) {
        for (&dest, &x) in self.forward.iter().zip(io.input) {
            io.output[dest] = x;
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, _weights: &[f64]) {
        for (b, &dest) in io.in_blame.iter_mut().zip(&self.forward) {
            *b += io.out_blame[dest];
        }
    }
}

macro_rules! pairwise_block {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            units: usize,
        }

        impl $name {
            pub fn new(units: usize) -> Self {
                Self { units }
            }
        }
    };
}

pairwise_block!(
    /// `y_i = a_i + b_i` over two stacked halves of the input.
    ScalarSum
);
pairwise_block!(
    /// `y_i = a_i * b_i` over two stacked halves of the input.
    ScalarProduct
);
pairwise_block!(
    /// A soft gate over three stacked thirds: `y_i = a_i b_i + (1 - a_i) c_i`.
    Switch
);

impl Block for ScalarSum {
    fn kind(&self) -> BlockKind {
        BlockKind::ScalarSum
    }

    fn inputs(&self) -> usize {
        2 * self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        0
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::ScalarSum
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, _weights: &[f64]) {
        let (a, b) = io.input.split_at(self.units);
        for ((y, &a), &b) in io.output.iter_mut().zip(a).zip(b) {
            *y = a + b;
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, _weights: &[f64]) {
        let (da, db) = io.in_blame.split_at_mut(self.units);
        for ((da, db), &ob) in da.iter_mut().zip(db).zip(io.out_blame) {
            *da += ob;
            *db += ob;
        }
    }
}

impl Block for ScalarProduct {
    fn kind(&self) -> BlockKind {
        BlockKind::ScalarProduct
    }

    fn inputs(&self) -> usize {
        2 * self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        0
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::ScalarProduct
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, _weights: &[f64]) {
        let (a, b) = io.input.split_at(self.units);
        for ((y, &a), &b) in io.output.iter_mut().zip(a).zip(b) {
            *y = a * b;
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, _weights: &[f64]) {
        let n = self.units;
        for i in 0..n {
            let ob = io.out_blame[i];
            io.in_blame[i] += ob * io.input[n + i];
            io.in_blame[n + i] += ob * io.input[i];
        }
    }
}

impl Block for Switch {
    fn kind(&self) -> BlockKind {
        BlockKind::Switch
    }

    fn inputs(&self) -> usize {
        3 * self.units
    }

    fn outputs(&self) -> usize {
        self.units
    }

    fn weight_count(&self) -> usize {
        0
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Switch
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, _weights: &[f64]) {
        let n = self.units;
        for (i, y) in io.output.iter_mut().enumerate() {
            let gate = io.input[i];
            *y = gate * io.input[n + i] + (1.0 - gate) * io.input[2 * n + i];
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, _weights: &[f64]) {
        let n = self.units;
        for i in 0..n {
            let ob = io.out_blame[i];
            let gate = io.input[i];
            io.in_blame[i] += (io.input[n + i] - io.input[2 * n + i]) * ob;
            io.in_blame[n + i] += gate * ob;
            io.in_blame[2 * n + i] += (1.0 - gate) * ob;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spreader_is_permutation() {
        for (units, spread) in [(7, 3), (8, 2), (5, 0), (4, 9)] {
            let mut perm = Spreader::new(units, spread).permutation().to_vec();
            perm.sort_unstable();
            assert_eq!(perm, (0..units).collect::<Vec<_>>());
        }
        assert_eq!(Spreader::new(6, 2).permutation(), &[0, 2, 4, 1, 3, 5]);
    }

    #[test]
    fn test_spectral_rejects_odd_units() {
        assert!(Spectral::new(0.1, 10.0, 5, false).is_err());
        assert!(Spectral::new(0.1, 10.0, 6, true).is_ok());
    }

    #[test]
    fn test_geometric_spectral_reaches_min_wavelength() {
        let s = Spectral::new(0.5, 8.0, 6, false).unwrap();
        let freqs: Vec<f64> = s.frequencies().collect();
        assert!((freqs[0] - 2.0 * PI / 8.0).abs() < 1e-12);
        assert!((freqs[2] - 2.0 * PI / 0.5).abs() < 1e-9);
    }
}
