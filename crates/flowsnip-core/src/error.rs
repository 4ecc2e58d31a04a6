use crate::shape::Shape;

/// All errors that can occur within flowsnip.
///
/// Configuration mistakes are reported when a layer is constructed, state and
/// shape mistakes when it is called. Nothing here is transient: an error means
/// the call had no effect.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A constructor argument is outside its allowed set.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The call is not allowed in the current state of the layer.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Shape mismatch between two tensors, or between a tensor and a layer.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// DType mismatch between tensors, or between a tensor and a layer.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        expected: crate::DType,
        got: crate::DType,
    },

    /// A (possibly negative) axis that does not exist for the given rank.
    #[error("axis {axis} out of range for tensor with {rank} dimensions")]
    AxisOutOfRange { axis: isize, rank: usize },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Element count mismatch when creating from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Cannot reshape because element counts differ.
    #[error(
        "cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements"
    )]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// Two shapes that cannot be broadcast against each other.
    #[error("shapes {lhs} and {rhs} are not broadcast-compatible")]
    BroadcastMismatch { lhs: Shape, rhs: Shape },

    /// A named parameter that the module does not own.
    #[error("unknown parameter `{name}`")]
    UnknownParameter { name: String },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn invalid_configuration(s: impl Into<String>) -> Self {
        Error::InvalidConfiguration(s.into())
    }

    pub fn invalid_operation(s: impl Into<String>) -> Self {
        Error::InvalidOperation(s.into())
    }
}

/// Convenience Result type used throughout flowsnip.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
