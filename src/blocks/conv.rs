//! N-dimensional convolution with a bank of filters.

use rand::RngCore;

use super::{Backward, Block, BlockKind, BlockSpec, Forward, Trace};
use crate::error::{NetError, NetResult};
use crate::tensors::{convolve, convolve_filter_gradient, convolve_transpose, fill_normal, TensorMut, TensorRef};

/// Correlates the input with `filter_count` filters, each producing one
/// contiguous output tensor.
///
/// Filter dimensions past the input's rank enumerate filters, so a `[3, 3, 8]`
/// filter shape over a `[28, 28]` input is a bank of eight 3x3 filters. Every
/// filter owns `1 + filter_size` weights: a bias, then the filter taps in
/// first-axis-fastest order.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv {
    input_shape: Vec<usize>,
    filter_shape: Vec<usize>,
    output_shape: Vec<usize>,
    /// `output_shape[..rank]`, padded with ones to the input rank.
    map_shape: Vec<usize>,
    filter_count: usize,
}

impl Conv {
    /// # Errors
    /// Fails when the filter has fewer dimensions than the input or the
    /// output cannot hold one map per filter.
    pub fn new(input_shape: Vec<usize>, filter_shape: Vec<usize>, output_shape: Vec<usize>) -> NetResult<Self> {
        let rank = input_shape.len();
        if filter_shape.len() < rank {
            return Err(NetError::Topology(format!(
                "conv filter rank {} is below input rank {rank}",
                filter_shape.len()
            )));
        }
        let filter_count: usize = filter_shape[rank..].iter().product();
        let map_shape: Vec<usize> = (0..rank).map(|d| output_shape.get(d).copied().unwrap_or(1)).collect();
        let outputs_per_filter: usize = map_shape.iter().product();
        NetError::check_len(
            "conv outputs",
            filter_count * outputs_per_filter,
            output_shape.iter().product(),
        )?;
        Ok(Self {
            input_shape,
            filter_shape,
            output_shape,
            map_shape,
            filter_count,
        })
    }

    pub fn filter_count(&self) -> usize {
        self.filter_count
    }

    fn rank(&self) -> usize {
        self.input_shape.len()
    }

    fn filter_size(&self) -> usize {
        self.filter_shape[..self.rank()].iter().product()
    }

    fn map_len(&self) -> usize {
        self.map_shape.iter().product()
    }
}

impl Block for Conv {
    fn kind(&self) -> BlockKind {
        BlockKind::Conv
    }

    fn inputs(&self) -> usize {
        self.input_shape.iter().product()
    }

    fn outputs(&self) -> usize {
        self.output_shape.iter().product()
    }

    fn weight_count(&self) -> usize {
        self.filter_count * (1 + self.filter_size())
    }

    fn to_spec(&self) -> BlockSpec {
        BlockSpec::Conv {
            input_shape: self.input_shape.clone(),
            filter_shape: self.filter_shape.clone(),
            output_shape: self.output_shape.clone(),
        }
    }

    fn box_clone(&self) -> Box<dyn Block> {
        Box::new(self.clone())
    }

    fn forward_prop(&mut self, io: Forward<'_>, weights: &[f64]) {
        let kernel = &self.filter_shape[..self.rank()];
        let input = TensorRef::new(&self.input_shape, io.input);
        let per_filter = 1 + self.filter_size();
        for (map, filter) in io.output.chunks_exact_mut(self.map_len()).zip(weights.chunks_exact(per_filter)) {
            map.fill(filter[0]);
            convolve(
                input,
                TensorRef::new(kernel, &filter[1..]),
                TensorMut::new(&self.map_shape, map),
                false,
                1,
            );
        }
    }

    fn back_prop(&mut self, io: Backward<'_>, weights: &[f64]) {
        let kernel = &self.filter_shape[..self.rank()];
        let per_filter = 1 + self.filter_size();
        for (map_blame, filter) in io.out_blame.chunks_exact(self.map_len()).zip(weights.chunks_exact(per_filter)) {
            convolve_transpose(
                TensorRef::new(&self.map_shape, map_blame),
                TensorRef::new(kernel, &filter[1..]),
                TensorMut::new(&self.input_shape, io.in_blame),
                false,
                1,
            );
        }
    }

    fn update_gradient(&mut self, io: Trace<'_>, _weights: &mut [f64], gradient: &mut [f64]) {
        let kernel = &self.filter_shape[..self.rank()];
        let input = TensorRef::new(&self.input_shape, io.input);
        let per_filter = 1 + self.filter_size();
        for (map_blame, grad) in io.out_blame.chunks_exact(self.map_len()).zip(gradient.chunks_exact_mut(per_filter)) {
            grad[0] += map_blame.iter().sum::<f64>();
            convolve_filter_gradient(
                input,
                TensorRef::new(&self.map_shape, map_blame),
                TensorMut::new(kernel, &mut grad[1..]),
                false,
                1,
            );
        }
    }

    fn init_weights(&self, rng: &mut dyn RngCore, weights: &mut [f64]) {
        fill_normal(rng, weights, 1.0 / self.filter_size().max(1) as f64);
    }

    fn bias_mask(&self, mask: &mut [f64]) {
        for filter in mask.chunks_exact_mut(1 + self.filter_size()) {
            filter.fill(0.0);
            filter[0] = 1.0;
        }
    }

    fn describe(&self, _weights: Option<&[f64]>) -> String {
        format!(
            "[conv: {:?} * {:?} -> {:?}, weights={}]",
            self.input_shape,
            self.filter_shape,
            self.output_shape,
            self.weight_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_dimensional_conv_with_padding() {
        let mut conv = Conv::new(vec![4], vec![3], vec![4]).unwrap();
        assert_eq!(conv.weight_count(), 4);
        let mut y = [0.0; 4];
        conv.forward_prop(Forward { input: &[2.0, 1.0, 0.0, 3.0], output: &mut y }, &[0.0, 1.0, 2.0, 0.0]);
        assert_eq!(y, [4.0, 4.0, 1.0, 6.0]);
    }

    #[test]
    fn test_filter_bank_shapes() {
        let conv = Conv::new(vec![5, 5], vec![3, 3, 4], vec![5, 5, 4]).unwrap();
        assert_eq!(conv.filter_count(), 4);
        assert_eq!(conv.weight_count(), 4 * 10);
        assert_eq!(conv.outputs(), 100);
        assert!(Conv::new(vec![5, 5], vec![3, 3, 4], vec![5, 5, 3]).is_err());
        assert!(Conv::new(vec![5, 5], vec![3], vec![5]).is_err());
    }
}
