use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::shape::Shape;

// Tensor — contiguous n-dimensional array on the CPU
//
// A Tensor is a flat buffer plus a Shape. Storage is always contiguous and
// row-major; views (broadcast, permute, reductions) are expressed as Layouts
// over that buffer and materialized by the kernels below.
//
// MEMORY MODEL:
//
//   Storage sits behind an Arc, so cloning a Tensor is cheap and a parameter
//   handed out by a layer shares its buffer with the layer. Tensors are
//   immutable: every op returns a new tensor.
//
// DTYPES:
//
//   Storage is an enum over f32/f64. Each kernel is written once, generic
//   over `T: WithDType`, and dispatched by matching on the enum. Binary ops
//   never promote: mixing f32 and f64 is a DTypeMismatch.

/// Typed flat buffer backing a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Storage {
    pub fn dtype(&self) -> DType {
        match self {
            Storage::F32(_) => DType::F32,
            Storage::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn from_f64_slice(data: &[f64], dtype: DType) -> Self {
        match dtype {
            DType::F32 => Storage::F32(data.iter().map(|&v| v as f32).collect()),
            DType::F64 => Storage::F64(data.to_vec()),
        }
    }
}

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Square,
    Recip,
}

/// Reduction operations over a set of dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Mean,
}

// Apply `$body` to the typed vector inside a Storage, rewrapping the result.
macro_rules! map_storage {
    ($storage:expr, |$v:ident| $body:expr) => {
        match $storage {
            Storage::F32($v) => Storage::F32($body),
            Storage::F64($v) => Storage::F64($body),
        }
    };
}

// Kernels

fn unary_value<T: WithDType>(op: UnaryOp, v: T) -> T {
    match op {
        UnaryOp::Neg => -v,
        UnaryOp::Abs => v.abs(),
        UnaryOp::Exp => v.exp(),
        UnaryOp::Log => v.ln(),
        UnaryOp::Sqrt => v.sqrt(),
        UnaryOp::Square => v * v,
        UnaryOp::Recip => v.recip(),
    }
}

fn binary_value<T: WithDType>(op: BinaryOp, a: T, b: T) -> T {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
    }
}

fn unary_kernel<T: WithDType>(data: &[T], op: UnaryOp) -> Vec<T> {
    data.iter().map(|&v| unary_value(op, v)).collect()
}

fn affine_kernel<T: WithDType>(data: &[T], mul: f64, add: f64) -> Vec<T> {
    let (m, a) = (T::from_f64(mul), T::from_f64(add));
    data.iter().map(|&v| v * m + a).collect()
}

fn binary_kernel<T: WithDType>(
    lhs: &[T],
    lhs_layout: &Layout,
    rhs: &[T],
    rhs_layout: &Layout,
    op: BinaryOp,
) -> Vec<T> {
    lhs_layout
        .strided_indices()
        .zip(rhs_layout.strided_indices())
        .map(|(i, j)| binary_value(op, lhs[i], rhs[j]))
        .collect()
}

fn gather_kernel<T: WithDType>(data: &[T], layout: &Layout) -> Vec<T> {
    layout.strided_indices().map(|i| data[i]).collect()
}

/// Reduce `data` (contiguous, shaped `input`) into `kept`, which equals
/// `input` with every reduced dim set to 1.
///
/// Each input element is routed to its output slot by reading the output
/// buffer through a broadcast layout (stride 0 on reduced dims).
fn reduce_kernel<T: WithDType>(
    data: &[T],
    input: &Shape,
    kept: &Shape,
    op: ReduceOp,
) -> Result<Vec<T>> {
    let mut out = vec![T::zero(); kept.elem_count()];
    let routing = Layout::broadcast(kept, input)?;
    for (&v, o) in data.iter().zip(routing.strided_indices()) {
        out[o] = out[o] + v;
    }
    if op == ReduceOp::Mean {
        let count = T::from_f64((input.elem_count() / kept.elem_count().max(1)) as f64);
        for v in out.iter_mut() {
            *v = *v / count;
        }
    }
    Ok(out)
}

/// An n-dimensional array of f32 or f64 values.
///
/// # Example
/// ```
/// use flowsnip_core::{DType, Tensor};
///
/// let a = Tensor::from_vec(vec![1.0f64, 2.0, 3.0, 4.0], (2, 2))?;
/// let b = Tensor::ones(2, DType::F64)?;
/// let c = a.add(&b)?; // broadcasts [2] over [2, 2]
/// assert_eq!(c.to_f64_vec(), vec![2.0, 3.0, 4.0, 5.0]);
/// # Ok::<(), flowsnip_core::Error>(())
/// ```
#[derive(Clone)]
pub struct Tensor {
    storage: Arc<Storage>,
    shape: Shape,
    /// Whether this tensor is a trainable variable.
    is_variable: bool,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, variable={})",
            self.shape,
            self.dtype(),
            self.is_variable
        )
    }
}

impl Tensor {
    // Constructors

    fn from_storage(storage: Storage, shape: Shape) -> Result<Self> {
        let expected = shape.elem_count();
        if storage.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: storage.len(),
            });
        }
        Ok(Tensor {
            storage: Arc::new(storage),
            shape,
            is_variable: false,
        })
    }

    /// Create a tensor from a typed vector; the dtype follows `T`.
    pub fn from_vec<T: WithDType>(data: Vec<T>, shape: impl Into<Shape>) -> Result<Self> {
        Self::from_storage(T::into_storage(data), shape.into())
    }

    /// Create a tensor from f64 values, converting to `dtype`.
    pub fn from_f64_slice(data: &[f64], shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        Self::from_storage(Storage::from_f64_slice(data, dtype), shape.into())
    }

    /// Create a tensor filled with `val`.
    pub fn full(shape: impl Into<Shape>, val: f64, dtype: DType) -> Result<Self> {
        let shape = shape.into();
        let data = vec![val; shape.elem_count()];
        Self::from_storage(Storage::from_f64_slice(&data, dtype), shape)
    }

    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        Self::full(shape, 0.0, dtype)
    }

    pub fn ones(shape: impl Into<Shape>, dtype: DType) -> Result<Self> {
        Self::full(shape, 1.0, dtype)
    }

    /// Samples from N(0, 1) drawn from `rng`.
    pub fn randn<R: Rng + ?Sized>(
        shape: impl Into<Shape>,
        dtype: DType,
        rng: &mut R,
    ) -> Result<Self> {
        let shape = shape.into();
        let data: Vec<f64> = (0..shape.elem_count())
            .map(|_| StandardNormal.sample(rng))
            .collect();
        Self::from_storage(Storage::from_f64_slice(&data, dtype), shape)
    }

    // Accessors

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Whether this tensor is a trainable variable.
    pub fn is_variable(&self) -> bool {
        self.is_variable
    }

    /// Mark this tensor as a trainable variable (shares storage).
    pub fn set_variable(self) -> Self {
        Tensor {
            is_variable: true,
            ..self
        }
    }

    /// Same data, but `is_variable = false`.
    pub fn freeze(&self) -> Self {
        Tensor {
            storage: Arc::clone(&self.storage),
            shape: self.shape.clone(),
            is_variable: false,
        }
    }

    /// Copy the values out as f64, in row-major order.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &*self.storage {
            Storage::F32(v) => v.iter().map(|&x| x as f64).collect(),
            Storage::F64(v) => v.clone(),
        }
    }

    /// Copy the values out as `T`; `T` must match the tensor's dtype.
    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        T::slice_of(&self.storage)
            .map(<[T]>::to_vec)
            .ok_or(Error::DTypeMismatch {
                expected: T::DTYPE,
                got: self.dtype(),
            })
    }

    /// The single value of a one-element tensor.
    pub fn to_scalar_f64(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::msg(format!(
                "not a scalar: tensor has shape {}",
                self.shape
            )));
        }
        Ok(self.to_f64_vec()[0])
    }

    /// True when no element is NaN or infinite.
    pub fn all_finite(&self) -> bool {
        match &*self.storage {
            Storage::F32(v) => v.iter().all(|x| x.is_finite()),
            Storage::F64(v) => v.iter().all(|x| x.is_finite()),
        }
    }

    // Shape manipulation

    /// Reinterpret the data with a new shape of the same element count.
    pub fn reshape(&self, new_shape: impl Into<Shape>) -> Result<Self> {
        let new_shape = new_shape.into();
        if new_shape.elem_count() != self.elem_count() {
            return Err(Error::ReshapeElementMismatch {
                src: self.elem_count(),
                dst: new_shape.elem_count(),
                dst_shape: new_shape,
            });
        }
        Ok(Tensor {
            storage: Arc::clone(&self.storage),
            shape: new_shape,
            is_variable: self.is_variable,
        })
    }

    /// Reorder dimensions: output dim `i` is input dim `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        let layout = Layout::contiguous(self.shape.clone()).permute(perm)?;
        let storage = map_storage!(&*self.storage, |v| gather_kernel(v, &layout));
        Self::from_storage(storage, layout.shape().clone())
    }

    /// Materialize this tensor expanded (NumPy-broadcast) to `target`.
    pub fn broadcast_as(&self, target: impl Into<Shape>) -> Result<Self> {
        let target = target.into();
        let layout = Layout::broadcast(&self.shape, &target)?;
        let storage = map_storage!(&*self.storage, |v| gather_kernel(v, &layout));
        Self::from_storage(storage, target)
    }

    // Element-wise ops

    fn binary(&self, rhs: &Self, op: BinaryOp) -> Result<Self> {
        let out_shape = Shape::broadcast_shape(&self.shape, &rhs.shape)?;
        let ll = Layout::broadcast(&self.shape, &out_shape)?;
        let rl = Layout::broadcast(&rhs.shape, &out_shape)?;
        let storage = match (&*self.storage, &*rhs.storage) {
            (Storage::F32(a), Storage::F32(b)) => Storage::F32(binary_kernel(a, &ll, b, &rl, op)),
            (Storage::F64(a), Storage::F64(b)) => Storage::F64(binary_kernel(a, &ll, b, &rl, op)),
            _ => {
                return Err(Error::DTypeMismatch {
                    expected: self.dtype(),
                    got: rhs.dtype(),
                })
            }
        };
        Self::from_storage(storage, out_shape)
    }

    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOp::Add)
    }

    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOp::Sub)
    }

    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOp::Mul)
    }

    pub fn div(&self, rhs: &Self) -> Result<Self> {
        self.binary(rhs, BinaryOp::Div)
    }

    fn unary(&self, op: UnaryOp) -> Result<Self> {
        let storage = map_storage!(&*self.storage, |v| unary_kernel(v, op));
        Self::from_storage(storage, self.shape.clone())
    }

    pub fn neg(&self) -> Result<Self> {
        self.unary(UnaryOp::Neg)
    }

    pub fn abs(&self) -> Result<Self> {
        self.unary(UnaryOp::Abs)
    }

    pub fn exp(&self) -> Result<Self> {
        self.unary(UnaryOp::Exp)
    }

    pub fn log(&self) -> Result<Self> {
        self.unary(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> Result<Self> {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn square(&self) -> Result<Self> {
        self.unary(UnaryOp::Square)
    }

    /// Element-wise `1 / x`.
    pub fn recip(&self) -> Result<Self> {
        self.unary(UnaryOp::Recip)
    }

    /// Element-wise `x * mul + add`, with the constants cast to this dtype.
    pub fn affine(&self, mul: f64, add: f64) -> Result<Self> {
        let storage = map_storage!(&*self.storage, |v| affine_kernel(v, mul, add));
        Self::from_storage(storage, self.shape.clone())
    }

    // Reductions

    fn reduce(&self, dims: &[usize], keep_dim: bool, op: ReduceOp) -> Result<Self> {
        let rank = self.rank();
        if let Some(&bad) = dims.iter().find(|&&d| d >= rank) {
            return Err(Error::DimOutOfRange { dim: bad, rank });
        }
        let kept = Shape::new(
            self.dims()
                .iter()
                .enumerate()
                .map(|(i, &d)| if dims.contains(&i) { 1 } else { d })
                .collect(),
        );
        let storage = match &*self.storage {
            Storage::F32(v) => Storage::F32(reduce_kernel(v, &self.shape, &kept, op)?),
            Storage::F64(v) => Storage::F64(reduce_kernel(v, &self.shape, &kept, op)?),
        };
        let out_shape = if keep_dim {
            kept
        } else {
            Shape::new(
                self.dims()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !dims.contains(i))
                    .map(|(_, &d)| d)
                    .collect(),
            )
        };
        Self::from_storage(storage, out_shape)
    }

    /// Sum over `dims`. With `keep_dim` the reduced dims stay as size 1.
    pub fn sum_axes(&self, dims: &[usize], keep_dim: bool) -> Result<Self> {
        self.reduce(dims, keep_dim, ReduceOp::Sum)
    }

    /// Mean over `dims`. With `keep_dim` the reduced dims stay as size 1.
    pub fn mean_axes(&self, dims: &[usize], keep_dim: bool) -> Result<Self> {
        self.reduce(dims, keep_dim, ReduceOp::Mean)
    }
}
