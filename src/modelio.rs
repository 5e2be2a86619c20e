//! Saving and loading weight vectors and network topologies.
//!
//! # `.bpat` weight files
//!
//! Weight vectors are stored in the compact `.bpat` binary format:
//!
//! ```text
//! ┌────────────┬────────────┬─────────────────────┐
//! │ Header     │ Tensor N   │ Tensor N+1 …        │
//! ├────────────┼────────────┼─────────────────────┤
//! │ "bpat"[4]  │ u64: ndim  │ u64: ndim           │
//! │ u8: count  │ [u64; ndim] shape                │
//! │            │ [f64; prod(shape)] data          │
//! └────────────┴──────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian. A flat weight vector is a
//! one-dimensional tensor; its order is exactly the network's addressing
//! order, so a topology saved with [`save_network`] and weights saved with
//! [`save_weights`] can be reloaded separately and zipped back together.
//!
//! Every record read back is checked with `briny`'s [`Validate`] before it is
//! trusted.
//!
//! # JSON topology files
//!
//! [`save_network`] writes the document produced by
//! [`Network::to_json`], optionally with the weights inline.
//!
//! # Example
//!
//! ```rust
//! use briny_net::modelio::{load_weights, save_weights};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let path = std::env::temp_dir().join("briny_net_doc.bpat");
//!     save_weights(&path, &[0.5, -1.25, 3.0])?;
//!     assert_eq!(load_weights(&path)?, vec![0.5, -1.25, 3.0]);
//!     Ok(())
//! }
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use briny::prelude::*;
use log::debug;

use crate::error::{NetError, NetResult};
use crate::network::Network;
use crate::tensors::Tensor;

const BPAT_MAGIC: &[u8; 4] = b"bpat";

/// A tensor record as read from disk, before validation.
struct PackedTensor {
    shape: Vec<u64>,
    data: Vec<f64>,
}

impl Validate for PackedTensor {
    fn validate(&self) -> Result<(), ValidationError> {
        let expected = self
            .shape
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))
            .ok_or(ValidationError)?;
        if self.data.len() as u64 != expected {
            return Err(ValidationError);
        }
        Ok(())
    }
}

fn read_u64(file: &mut impl Read) -> NetResult<u64> {
    let mut buf8 = [0u8; 8];
    file.read_exact(&mut buf8)?;
    Ok(u64::from_le_bytes(buf8))
}

/// Writes tensors to a `.bpat` file.
///
/// # Errors
/// Fails on I/O errors or when asked to write more than 255 tensors.
pub fn save_tensors(path: impl AsRef<Path>, tensors: &[Tensor]) -> NetResult<()> {
    let count = u8::try_from(tensors.len()).map_err(|_| NetError::ShapeMismatch {
        context: "bpat tensor count",
        expected: u8::MAX as usize,
        got: tensors.len(),
    })?;
    let mut file = BufWriter::new(File::create(path.as_ref())?);
    file.write_all(BPAT_MAGIC)?;
    file.write_all(&[count])?;
    for tensor in tensors {
        file.write_all(&(tensor.shape.len() as u64).to_le_bytes())?;
        for &dim in &tensor.shape {
            file.write_all(&(dim as u64).to_le_bytes())?;
        }
        for &val in &tensor.data {
            file.write_all(&val.to_le_bytes())?;
        }
    }
    file.flush()?;
    debug!("wrote {count} tensors to {}", path.as_ref().display());
    Ok(())
}

/// Reads every tensor of a `.bpat` file.
///
/// # Errors
/// Fails on I/O errors, a bad magic header, truncation, or a record whose
/// data does not fill its shape.
pub fn load_tensors(path: impl AsRef<Path>) -> NetResult<Vec<Tensor>> {
    let mut file = BufReader::new(File::open(path.as_ref())?);

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != BPAT_MAGIC {
        return Err(NetError::Corrupt("invalid magic header"));
    }
    let mut count = [0u8; 1];
    file.read_exact(&mut count)?;

    let mut tensors = Vec::with_capacity(count[0] as usize);
    for _ in 0..count[0] {
        let ndim = read_u64(&mut file)?;
        let shape = (0..ndim).map(|_| read_u64(&mut file)).collect::<NetResult<Vec<_>>>()?;
        let size = shape
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))
            .ok_or(NetError::Corrupt("tensor shape overflows"))?;
        let data = (0..size)
            .map(|_| read_u64(&mut file).map(f64::from_bits))
            .collect::<NetResult<Vec<_>>>()?;

        let trusted = TrustedData::new(PackedTensor { shape, data })
            .map_err(|_| NetError::Corrupt("tensor data does not match its shape"))?;
        let inner = trusted.into_inner();
        let shape: Vec<usize> = inner.shape.iter().map(|&d| d as usize).collect();
        tensors.push(Tensor::new(shape, inner.data));
    }
    Ok(tensors)
}

/// Writes flat vectors, each as a one-dimensional tensor.
pub fn save_vectors(path: impl AsRef<Path>, vectors: &[&[f64]]) -> NetResult<()> {
    let tensors: Vec<Tensor> = vectors.iter().map(|v| Tensor::new(vec![v.len()], v.to_vec())).collect();
    save_tensors(path, &tensors)
}

/// Reads every tensor of a `.bpat` file as a flat vector.
pub fn load_vectors(path: impl AsRef<Path>) -> NetResult<Vec<Vec<f64>>> {
    Ok(load_tensors(path)?.into_iter().map(|t| t.data).collect())
}

pub fn save_weights(path: impl AsRef<Path>, weights: &[f64]) -> NetResult<()> {
    save_vectors(path, &[weights])
}

/// Reads a file holding exactly one weight vector.
pub fn load_weights(path: impl AsRef<Path>) -> NetResult<Vec<f64>> {
    let mut vectors = load_vectors(path)?;
    match vectors.len() {
        1 => Ok(vectors.remove(0)),
        _ => Err(NetError::Corrupt("expected exactly one weight vector")),
    }
}

/// Writes the network's JSON topology document, with inline weights if given.
pub fn save_network(path: impl AsRef<Path>, net: &Network, weights: Option<&[f64]>) -> NetResult<()> {
    fs::write(path.as_ref(), net.to_json(weights)?)?;
    debug!("wrote {}-layer topology to {}", net.layer_count(), path.as_ref().display());
    Ok(())
}

/// Reads a JSON topology document, returning inline weights if present.
pub fn load_network(path: impl AsRef<Path>) -> NetResult<(Network, Option<Vec<f64>>)> {
    Network::from_json(&fs::read_to_string(path)?)
}
