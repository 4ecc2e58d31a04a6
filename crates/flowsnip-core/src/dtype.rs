use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tensor::Storage;

// DType — Supported floating-point data types
//
// Flow parameters are fitted to the statistics of real data and are stored in
// the same precision as that data, so only the two IEEE float widths are
// supported:
//
//   F32  — 32-bit float, the default workhorse
//   F64  — 64-bit float, for high-precision work and reference checks

/// Enum of all supported element data types.
///
/// This is stored inside every tensor so we can dispatch operations
/// to the correct typed implementation at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

// WithDType — Trait that connects Rust types to the DType enum
//
// Every numeric kernel in `tensor.rs` is written once, generic over
// `T: WithDType`, and instantiated for f32 and f64 by matching on `Storage`.

/// Trait implemented by Rust float types that can be stored in a tensor.
pub trait WithDType:
    num_traits::Float + Copy + Send + Sync + 'static + std::fmt::Debug + std::iter::Sum
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64 (for generic numeric code).
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;

    /// Wrap a vector of this type into tensor storage.
    fn into_storage(data: Vec<Self>) -> Storage;

    /// Borrow the storage as a slice of this type, if the dtypes agree.
    fn slice_of(storage: &Storage) -> Option<&[Self]>;
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::F32(data)
    }
    fn slice_of(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::F32(v) => Some(v),
            _ => None,
        }
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::F64(data)
    }
    fn slice_of(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::F64(v) => Some(v),
            _ => None,
        }
    }
}
