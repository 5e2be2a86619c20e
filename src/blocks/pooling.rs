//! Spatial down-sampling.

use super::{Backward, Block, BlockKind, BlockSpec, Forward};
use crate::error::{NetError, NetResult};

/// 2x2 max pooling over `channels` planes of `width * height` values.
///
/// Values are laid out x fastest, then y, then channel. The backward pass
/// routes each output's blame to the first maximum of its window, visiting
/// `(x, y)`, `(x+1, y)`, `(x, y+1)`, `(x+1, y+1)` in that order.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxPooling2D {
    width: usize,
    height: usize,
    channels: usize,
    /// Input index that won each output window during the last forward pass.
    winners: Vec<usize>,
}

impl MaxPooling2D {
    /// # Errors
    /// Fails if `width` or `height` is odd.
    pub fn new(width: usize, height: usize, channels: usize) -> NetResult<Self> {
        if width % 2 != 0 || height % 2 != 0 {
            return Err(NetError::Topology(format!(
                "max pooling needs even planes, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            winners: vec![0; width * height * channels / 4],
        })
    }

    pub fn plane(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.channels)
    }
}

impl Block for MaxPooling2D {
    fn kind(&self) -> BlockKind {
        BlockKind::MaxPooling2D
    }

    fn inputs(&self) -> usize {
        self.width * self.height * self.channels
    }

    fn outputs(&self) -> usize {
        self.inputs() / 4
    }

    fn weight_count(&self) -> usize {
        0
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::MaxPooling2D {
            width: self.width,
            height: self.height,
            channels: self.channels,
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, _weights: &[f64]) {
        let (w, h) = (self.width, self.height);
        let mut out = 0;
        for c in 0..self.channels {
            for y in (0..h).step_by(2) {
                for x in (0..w).step_by(2) {
                    let corner = c * w * h + y * w + x;
                    let mut best = corner;
                    for cand in [corner + 1, corner + w, corner + w + 1] {
                        if io.input[cand] > io.input[best] {
                            best = cand;
                        }
                    }
                    self.winners[out] = best;
                    io.output[out] = io.input[best];
                    out += 1;
                }
            }
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, _weights: &[f64]) {
        for (&winner, &ob) in self.winners.iter().zip(io.out_blame) {
            io.in_blame[winner] += ob;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_and_routes_blame_to_first_max() {
        let mut pool = MaxPooling2D::new(4, 2, 1).unwrap();
        let input = [1.0, 3.0, 5.0, 5.0, 2.0, 3.0, 0.0, -1.0];
        let mut y = [0.0; 2];
        pool.forward_prop(Forward { input: &input, output: &mut y }, &[]);
        assert_eq!(y, [3.0, 5.0]);

        let mut blame = [0.0; 8];
        pool.back_prop(
            Backward { input: &input, output: &y, out_blame: &[1.0, 2.0], in_blame: &mut blame },
            &[],
        );
        assert_eq!(blame, [0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rejects_odd_planes() {
        assert!(MaxPooling2D::new(3, 4, 1).is_err());
        assert!(MaxPooling2D::new(4, 5, 2).is_err());
    }
}
