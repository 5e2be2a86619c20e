//! Error taxonomy for the engine.
//!
//! Shape mismatches, unsupported topology operations and unknown persisted
//! block tags are fatal and surface as [`NetError`]. The one expected failure,
//! an infeasible width decrement, is reported as `Ok(None)` by
//! [`Network::decrement_width`](crate::network::Network::decrement_width)
//! rather than through this type.

use thiserror::Error;

/// Everything that can go wrong while building, running or reshaping a network.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{block} does not support {operation}")]
    Unsupported {
        block: &'static str,
        operation: &'static str,
    },

    #[error("unrecognized block type `{0}`")]
    UnknownBlock(String),

    #[error("a layer contains a block with no outputs")]
    EmptyBlock,

    #[error("the network has no layers")]
    EmptyNetwork,

    #[error("layer {index} is out of range for a network with {count} layers")]
    LayerIndex { index: usize, count: usize },

    #[error("invalid topology: {0}")]
    Topology(String),

    #[error("corrupt weight file: {0}")]
    Corrupt(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl NetError {
    /// Shorthand for a [`NetError::ShapeMismatch`] when `got != expected`.
    pub(crate) fn check_len(context: &'static str, expected: usize, got: usize) -> NetResult<()> {
        if expected == got {
            Ok(())
        } else {
            Err(Self::ShapeMismatch {
                context,
                expected,
                got,
            })
        }
    }

    pub(crate) fn unsupported(block: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { block, operation }
    }
}

/// Result alias used across the crate.
pub type NetResult<T> = Result<T, NetError>;
