//! # flowsnip-core
//!
//! Core tensor primitives and types for flowsnip.
//!
//! This crate provides:
//! - [`Tensor`] — contiguous f32/f64 array with broadcasting and reductions
//! - [`Shape`] / [`Layout`] — shape, strides and strided views
//! - [`SymbolicShape`] / [`ResolvedShape`] — static vs. runtime shape knowledge
//! - [`DType`] — data types (F32, F64)
//! - [`Error`] / [`Result`] — the single error type shared by all crates

pub mod dtype;
pub mod dynamic_shape;
pub mod error;
pub mod layout;
pub mod shape;
pub mod tensor;

pub use dtype::{DType, WithDType};
pub use dynamic_shape::{ResolvedDim, ResolvedShape, SymDim, SymbolicShape};
pub use error::{Error, Result};
pub use layout::Layout;
pub use shape::Shape;
pub use tensor::{Storage, Tensor};
