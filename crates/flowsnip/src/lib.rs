//! # flowsnip
//!
//! Reusable building blocks for normalizing-flow models.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use flowsnip::prelude::*;
//!
//! let layer = ActNorm::new(ActNormConfig::default().axis([-1]).value_ndims(1))?;
//! let x = Tensor::from_f64_slice(&[0.0, 1.0, 2.0, 4.0, 6.0, 8.0], (3, 2), DType::F64)?;
//! let (y, log_det) = layer.transform(&x)?;
//! assert_eq!(y.dims(), &[3, 2]);
//! assert_eq!(log_det.dims(), &[3]);
//! # Ok::<(), flowsnip::Error>(())
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `flowsnip-core` | Tensor, Shape, Layout, DType, symbolic shapes, Error |
//! | `flowsnip-nn` | Module and Flow traits, ActNorm, SequentialFlow, InvertFlow |

/// Re-export core types.
pub use flowsnip_core::{
    DType, Error, Layout, ResolvedDim, ResolvedShape, Result, Shape, SymDim, SymbolicShape,
    Tensor, WithDType,
};

/// Re-export flow layers.
pub mod nn {
    pub use flowsnip_nn::*;
}

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::nn::{
        act_norm, ActNorm, ActNormConfig, Flow, InvertFlow, Module, ScaleType, SequentialFlow,
    };
    pub use crate::{DType, Error, Result, Shape, SymbolicShape, Tensor};
}
