//! briny_net: a composable, differentiable block engine for neural networks.
//!
//! Networks are built from small hand-differentiated *blocks* (linear maps,
//! activations, convolution, pooling, normalization, an LSTM cell,
//! embeddings...), composed in parallel into *layers* and in sequence into a
//! [`Network`](network::Network). Backpropagation is explicit: every block
//! carries its own derivative math, and the engine threads blame backwards
//! through the layers.
//!
//! # Features
//!
//! - One flat weight vector and one flat gradient vector per network, owned by
//!   the caller and addressed through a cached offset table.
//! - Forward propagation, blame (error signal) propagation with a
//!   vanishing-blame floor, gradient accumulation and momentum steps.
//! - Recurrent blocks unrolled over a window of past time steps.
//! - Function-preserving topology surgery: insert identity layers, drop
//!   layers, widen and narrow hidden layers.
//! - JSON topology documents and `.bpat` binary weight files.
//!
//! # Goals
//!
//! - Keep parameter storage decoupled from topology so that any optimizer can
//!   work over heterogeneous blocks uniformly.
//! - Prefer explicit, checkable index arithmetic over hidden ownership.
//! - Report every shape violation as an error instead of truncating silently.
//!
//! # Modules
//!
//! - [`error`]: the [`NetError`](error::NetError) taxonomy.
//! - [`config`]: process-wide and per-network propagation settings.
//! - [`tensors`]: shaped views and n-dimensional convolution.
//! - [`backprop`]: scalar activations with derivatives and the momentum step.
//! - [`approx`]: approximate equality and finite-difference gradient checks.
//! - [`blocks`]: the [`Block`](blocks::Block) trait and every block variant.
//! - [`layer`]: parallel composition.
//! - [`network`]: sequential composition, propagation and persistence.
//! - [`surgery`]: topology edits on a [`Network`](network::Network).
//! - [`modelio`]: weight and topology files.
//!
//! # Example
//!
//! ```rust
//! use briny_net::blocks::{Activation, Linear};
//! use briny_net::config::StepConfig;
//! use briny_net::network::Network;
//! use briny_net::tensors::WithGrad;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let mut net = Network::new();
//! net.add(Linear::new(1, 3)).unwrap();
//! net.add(Activation::tanh(3)).unwrap();
//! net.add(Linear::new(3, 1)).unwrap();
//!
//! let mut weights = vec![0.0; net.weight_count()];
//! net.init_weights(&mut StdRng::seed_from_u64(1), &mut weights).unwrap();
//! let mut params = WithGrad::zeroed(weights, net.grad_count());
//!
//! let config = StepConfig { learning_rate: 0.05, momentum: 0.0 };
//! for _ in 0..200 {
//!     net.train_step(&mut params, &[0.5], &[0.25], &config).unwrap();
//! }
//! let y = net.forward_prop(&params.value, &[0.5]).unwrap()[0];
//! assert!((y - 0.25).abs() < 0.05);
//! ```

pub mod approx;
pub mod backprop;
pub mod blocks;
pub mod config;
pub mod error;
pub mod layer;
pub mod modelio;
pub mod network;
pub mod surgery;
pub mod tensors;

pub use error::{NetError, NetResult};
pub use network::Network;
