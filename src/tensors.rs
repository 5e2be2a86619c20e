//! Tensor storage, shape-annotated views and n-dimensional convolution.
//!
//! # Core Tensor Utilities
//!
//! The engine keeps every parameter and activation in flat `f64` vectors.
//! This module adds just enough structure on top of those vectors for the
//! blocks that care about shape:
//!
//! - [`Tensor`]: an owned flat buffer with a shape.
//! - [`TensorRef`] / [`TensorMut`]: borrowed shape-annotated windows over any slice,
//!   typically a sub-range of the global weight vector or of a layer buffer.
//! - [`convolve`], [`convolve_transpose`] and [`convolve_filter_gradient`]:
//!   the n-dimensional correlation kernel and its two adjoints.
//! - [`WithGrad`]: pairs a value with its gradient accumulator.
//! - Small vector helpers (dot product, squared magnitude, random fills).
//!
//! ## Layout
//!
//! Unlike row-major matrices, shapes here list the **fastest-varying axis
//! first**: element `(x, y)` of a `[w, h]` tensor lives at `x + w * y`.
//!
//! ## Padding
//!
//! All three kernels share one tap enumeration. For axis `d` with input size
//! `I`, filter size `F`, output size `O` and stride `s`, the input is padded by
//! `(s * (O - 1) + F - I) / 2` on the leading side and taps falling outside
//! the input are skipped. Choosing `O = ceil(I / s)` (see
//! [`centered_output_shape`]) centers the filter on the input.
//!
//! ## Example
//!
//! ```rust
//! use briny_net::tensors::{convolve, Tensor};
//!
//! let input = Tensor::new(vec![5], vec![2.0, 3.0, 1.0, 0.0, 1.0]);
//! let filter = Tensor::new(vec![3], vec![1.0, 0.0, 2.0]);
//! let mut out = Tensor::zeros(vec![7]);
//! convolve(input.view(), filter.view(), out.view_mut(), true, 1);
//! assert_eq!(out.data, vec![2.0, 3.0, 5.0, 6.0, 3.0, 0.0, 2.0]);
//! ```

use rand::{Rng, RngCore};
use rand_distr::StandardNormal;

/// An owned N-dimensional tensor with a shape and flat data.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<f64>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// A tensor of the given shape filled with zeros.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn view(&self) -> TensorRef<'_> {
        TensorRef {
            shape: &self.shape,
            data: &self.data,
        }
    }

    pub fn view_mut(&mut self) -> TensorMut<'_> {
        TensorMut {
            shape: &self.shape,
            data: &mut self.data,
        }
    }
}

/// A read-only shape-annotated window over a slice.
#[derive(Debug, Clone, Copy)]
pub struct TensorRef<'a> {
    pub shape: &'a [usize],
    pub data: &'a [f64],
}

impl<'a> TensorRef<'a> {
    /// Wraps `data` with `shape`.
    ///
    /// # Panics
    /// Panics if the slice length does not match the shape product.
    pub fn new(shape: &'a [usize], data: &'a [f64]) -> Self {
        assert_eq!(shape.iter().product::<usize>(), data.len(), "view shape mismatch");
        Self { shape, data }
    }
}

/// A writable shape-annotated window over a slice.
#[derive(Debug)]
pub struct TensorMut<'a> {
    pub shape: &'a [usize],
    pub data: &'a mut [f64],
}

impl<'a> TensorMut<'a> {
    /// Wraps `data` with `shape`.
    ///
    /// # Panics
    /// Panics if the slice length does not match the shape product.
    pub fn new(shape: &'a [usize], data: &'a mut [f64]) -> Self {
        assert_eq!(shape.iter().product::<usize>(), data.len(), "view shape mismatch");
        Self { shape, data }
    }
}

/// A container pairing a value with its gradient accumulator.
///
/// Typically used as `WithGrad<Vec<f64>>` to hold a network's weight vector
/// next to the gradient vector of matching length.
#[derive(Debug, Clone, PartialEq)]
pub struct WithGrad<T> {
    pub value: T,
    pub grad: T,
}

impl WithGrad<Vec<f64>> {
    /// Wraps `value` with a zeroed gradient of length `grad_len`.
    pub fn zeroed(value: Vec<f64>, grad_len: usize) -> Self {
        Self {
            value,
            grad: vec![0.0; grad_len],
        }
    }
}

/// `ceil(I / stride)` for every axis: the output shape that centers a filter.
///
/// # Panics
/// Panics if `stride` is zero.
pub fn centered_output_shape(input_shape: &[usize], stride: usize) -> Vec<usize> {
    assert!(stride > 0, "stride must be positive");
    input_shape.iter().map(|&i| i.div_ceil(stride)).collect()
}

/// Walks every `(input, filter, output)` index triple that contributes to a
/// correlation of `in_shape` with `filter_shape` into `out_shape`.
fn for_each_tap(
    in_shape: &[usize],
    filter_shape: &[usize],
    out_shape: &[usize],
    flip: bool,
    stride: usize,
    mut tap: impl FnMut(usize, usize, usize),
) {
    assert!(
        in_shape.len() == filter_shape.len() && in_shape.len() == out_shape.len(),
        "convolution operands must share a rank"
    );
    assert!(stride > 0, "stride must be positive");
    let rank = in_shape.len();
    let filter_len: usize = filter_shape.iter().product();
    let out_len: usize = out_shape.iter().product();
    if filter_len == 0 || out_len == 0 {
        return;
    }
    let pads: Vec<isize> = (0..rank)
        .map(|d| {
            (stride as isize * (out_shape[d] as isize - 1) + filter_shape[d] as isize
                - in_shape[d] as isize)
                / 2
        })
        .collect();

    let mut out_coord = vec![0usize; rank];
    let mut filt_coord = vec![0usize; rank];
    for out_index in 0..out_len {
        filt_coord.iter_mut().for_each(|c| *c = 0);
        for filt_index in 0..filter_len {
            let mut in_index = 0usize;
            let mut step = 1usize;
            let mut inside = true;
            for d in 0..rank {
                let pos = (out_coord[d] * stride + filt_coord[d]) as isize - pads[d];
                if pos < 0 || pos >= in_shape[d] as isize {
                    inside = false;
                    break;
                }
                in_index += pos as usize * step;
                step *= in_shape[d];
            }
            if inside {
                let k = if flip { filter_len - 1 - filt_index } else { filt_index };
                tap(in_index, k, out_index);
            }
            advance(&mut filt_coord, filter_shape);
        }
        advance(&mut out_coord, out_shape);
    }
}

/// Odometer increment with the first axis fastest.
fn advance(coord: &mut [usize], shape: &[usize]) {
    for (c, &n) in coord.iter_mut().zip(shape) {
        *c += 1;
        if *c < n {
            return;
        }
        *c = 0;
    }
}

/// Accumulates the correlation of `input` with `filter` into `output`.
///
/// With `flip` set, the filter is traversed back to front, which turns the
/// correlation into a true convolution.
///
/// # Panics
/// Panics if the three operands do not share a rank or `stride` is zero.
pub fn convolve(input: TensorRef<'_>, filter: TensorRef<'_>, output: TensorMut<'_>, flip: bool, stride: usize) {
    let TensorMut { shape: out_shape, data: out } = output;
    for_each_tap(input.shape, filter.shape, out_shape, flip, stride, |i, k, o| {
        out[o] += input.data[i] * filter.data[k];
    });
}

/// Adjoint of [`convolve`] with respect to its input: scatters `out_blame`
/// back through `filter` into `in_blame` (accumulating).
///
/// For any `x`, `y`: `<convolve(x, k), y> == <x, convolve_transpose(y, k)>`.
pub fn convolve_transpose(
    out_blame: TensorRef<'_>,
    filter: TensorRef<'_>,
    in_blame: TensorMut<'_>,
    flip: bool,
    stride: usize,
) {
    let TensorMut { shape: in_shape, data: in_b } = in_blame;
    for_each_tap(in_shape, filter.shape, out_blame.shape, flip, stride, |i, k, o| {
        in_b[i] += out_blame.data[o] * filter.data[k];
    });
}

/// Adjoint of [`convolve`] with respect to its filter: accumulates
/// `d<convolve(input, k), out_blame> / dk` into `filter_grad`.
pub fn convolve_filter_gradient(
    input: TensorRef<'_>,
    out_blame: TensorRef<'_>,
    filter_grad: TensorMut<'_>,
    flip: bool,
    stride: usize,
) {
    let TensorMut { shape: filter_shape, data: grad } = filter_grad;
    for_each_tap(input.shape, filter_shape, out_blame.shape, flip, stride, |i, k, o| {
        grad[k] += input.data[i] * out_blame.data[o];
    });
}

/// Dot product of two equally sized slices.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn squared_magnitude(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

pub fn scale(v: &mut [f64], factor: f64) {
    v.iter_mut().for_each(|x| *x *= factor);
}

/// Fills `v` with normal draws of mean 0 and the given deviation.
pub fn fill_normal(rng: &mut dyn RngCore, v: &mut [f64], deviation: f64) {
    for x in v {
        *x = deviation * rng.sample::<f64, _>(StandardNormal);
    }
}

/// Fills `v` with uniform draws from `[lo, hi)`.
pub fn fill_uniform(rng: &mut dyn RngCore, v: &mut [f64], lo: f64, hi: f64) {
    for x in v {
        *x = lo + (hi - lo) * rng.random::<f64>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convolve_2d_sobel() {
        let input = Tensor::new(vec![3, 3], (1..=9).map(f64::from).collect());
        let filter = Tensor::new(vec![3, 3], vec![1.0, 2.0, 1.0, 0.0, 0.0, 0.0, -1.0, -2.0, -1.0]);
        let mut out = Tensor::zeros(vec![3, 3]);
        convolve(input.view(), filter.view(), out.view_mut(), false, 1);
        assert_eq!(
            out.data,
            vec![-13.0, -20.0, -17.0, -18.0, -24.0, -18.0, 13.0, 20.0, 17.0]
        );
    }

    #[test]
    fn test_centered_output_shape() {
        assert_eq!(centered_output_shape(&[7, 8, 1], 2), vec![4, 4, 1]);
        assert_eq!(centered_output_shape(&[5], 1), vec![5]);
    }

    #[test]
    fn test_view_shape_mismatch_panics() {
        let data = [1.0, 2.0, 3.0];
        let result = std::panic::catch_unwind(|| {
            TensorRef::new(&[2, 2], &data);
        });
        assert!(result.is_err());
    }
}
