//! Propagation and training configuration.
//!
//! The vanishing-blame floor has a process-wide default stored in an atomic so
//! it can be tuned once at startup, the same way a compute backend would be
//! selected. Every [`Network`](crate::network::Network) copies the default
//! into its own [`NetConfig`] when it is created and can be overridden per
//! instance afterwards.
//!
//! # Example
//!
//! ```
//! use briny_net::config::{default_blame_floor, set_default_blame_floor, NetConfig};
//!
//! set_default_blame_floor(1e-6);
//! assert_eq!(NetConfig::default().blame_floor, 1e-6);
//! set_default_blame_floor(1e-4);
//! assert_eq!(default_blame_floor(), 1e-4);
//! ```

use core::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};

/// The relative squared-magnitude floor below which propagated blame is rescaled.
pub const DEFAULT_BLAME_FLOOR: f64 = 1e-4;

/// `DEFAULT_BLAME_FLOOR` as raw bits; `f64::to_bits` is not usable in a static initializer.
static GLOBAL_BLAME_FLOOR: AtomicU64 = AtomicU64::new(0x3F1A_36E2_EB1C_432D);

/// Sets the blame floor used by networks created from now on.
///
/// Negative or non-finite values disable rescaling (stored as `0`).
pub fn set_default_blame_floor(floor: f64) {
    let floor = if floor.is_finite() && floor > 0.0 { floor } else { 0.0 };
    GLOBAL_BLAME_FLOOR.store(floor.to_bits(), Ordering::Relaxed);
}

/// Returns the current process-wide blame floor.
pub fn default_blame_floor() -> f64 {
    f64::from_bits(GLOBAL_BLAME_FLOOR.load(Ordering::Relaxed))
}

/// Per-network propagation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// During the backward pass, any layer whose blame has a squared magnitude
    /// smaller than `blame_floor` times the output blame's squared magnitude is
    /// scaled up to that level. `0` disables the heuristic.
    pub blame_floor: f64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            blame_floor: default_blame_floor(),
        }
    }
}

/// Hyperparameters for [`Network::train_step`](crate::network::Network::train_step).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    pub learning_rate: f64,
    pub momentum: f64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_floor_bits() {
        assert_eq!(f64::from_bits(0x3F1A_36E2_EB1C_432D), DEFAULT_BLAME_FLOOR);
    }

    #[test]
    fn test_config_from_partial_json() {
        let cfg: StepConfig = serde_json::from_str(r#"{ "momentum": 0.9 }"#).unwrap();
        assert_eq!(cfg.learning_rate, 0.01);
        assert_eq!(cfg.momentum, 0.9);
    }
}
