//! # flowsnip-nn
//!
//! Invertible flow layers for flowsnip.
//!
//! 1. **Module trait** — named parameters, exported and restored by name
//! 2. **Flow trait** — `transform` / `inverse_transform` returning a log-det
//! 3. **ActNorm** — per-channel affine flow with data-dependent initialization
//! 4. **Composition** — `SequentialFlow` and `InvertFlow`
//!
//! Layers never own an optimizer: the host reads `trainable_parameters()` and
//! writes results back through `load_state_dict()` / `update_parameter()`.

pub mod act_norm;
pub mod flow;
pub mod module;

pub use act_norm::{act_norm, ActNorm, ActNormConfig, ScaleType, DEFAULT_EPSILON};
pub use flow::{Flow, InvertFlow, SequentialFlow};
pub use module::Module;
