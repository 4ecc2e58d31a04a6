use std::fmt;

use crate::error::{Error, Result};

// Shape — N-dimensional shape representation
//
// A Shape describes the size of each dimension of a tensor.
// For example:
//   - Scalar: Shape([])          — 0 dimensions, 1 element
//   - Vector: Shape([5])         — 1 dimension, 5 elements
//   - Batch:  Shape([2, 3, 4])   — 3 dimensions, 24 elements
//
// Flows address dimensions with possibly-negative axes ("-1 is the channel
// axis"), so the shape also owns the rules for resolving those against a
// concrete rank.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions (0 for scalar, 1 for vector, 2 for matrix, etc.).
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements (product of all dimensions).
    /// A scalar shape [] has 1 element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    /// Compute the contiguous (row-major / C-order) strides for this shape.
    ///
    /// For shape [2, 3, 4], strides are [12, 4, 1].
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> Result<usize> {
        self.0.get(d).copied().ok_or(Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    // Axis resolution

    /// Resolve a possibly-negative axis against `rank`.
    ///
    /// `-1` is the last axis, `-rank` the first; anything outside
    /// `-rank..rank` is an error.
    pub fn normalize_axis(axis: isize, rank: usize) -> Result<usize> {
        let r = rank as isize;
        let resolved = if axis < 0 { axis + r } else { axis };
        if resolved < 0 || resolved >= r {
            return Err(Error::AxisOutOfRange { axis, rank });
        }
        Ok(resolved as usize)
    }

    /// Resolve a list of axes into sorted, de-duplicated non-negative indices.
    pub fn normalize_axes(axes: &[isize], rank: usize) -> Result<Vec<usize>> {
        let mut out = axes
            .iter()
            .map(|&a| Self::normalize_axis(a, rank))
            .collect::<Result<Vec<_>>>()?;
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    // Broadcasting

    /// Compute the broadcast output shape from two input shapes.
    ///
    /// NumPy-style broadcasting rules:
    ///   1. Align shapes from the right (trailing dimensions).
    ///   2. Dimensions are compatible if they are equal or one of them is 1.
    ///   3. Missing leading dimensions are treated as 1.
    ///
    /// Examples:
    ///   [3, 4] and [4]       → [3, 4]
    ///   [5, 3, 1] and [3, 4] → [5, 3, 4]
    ///   [3] and [4]          → Error
    pub fn broadcast_shape(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        let l = lhs.dims();
        let r = rhs.dims();
        let max_rank = l.len().max(r.len());
        let mut result = Vec::with_capacity(max_rank);

        for i in 0..max_rank {
            // Index from the right. If i >= len, treat as 1.
            let ld = if i < l.len() { l[l.len() - 1 - i] } else { 1 };
            let rd = if i < r.len() { r[r.len() - 1 - i] } else { 1 };

            if ld == rd || rd == 1 {
                result.push(ld);
            } else if ld == 1 {
                result.push(rd);
            } else {
                return Err(Error::BroadcastMismatch {
                    lhs: lhs.clone(),
                    rhs: rhs.clone(),
                });
            }
        }

        result.reverse();
        Ok(Shape::new(result))
    }

    /// Return the strides that read this (contiguous) shape as if it had
    /// been expanded to `target`.
    ///
    /// Dimensions of size 1 that are stretched, and missing leading
    /// dimensions, get stride 0 so the same element is repeated.
    pub fn broadcast_strides(&self, target: &Shape) -> Result<Vec<usize>> {
        if Shape::broadcast_shape(self, target)? != *target {
            return Err(Error::BroadcastMismatch {
                lhs: self.clone(),
                rhs: target.clone(),
            });
        }
        let self_dims = self.dims();
        let target_dims = target.dims();
        let self_strides = self.stride_contiguous();

        let mut result = vec![0usize; target_dims.len()];
        let offset = target_dims.len() - self_dims.len();

        for i in 0..self_dims.len() {
            if self_dims[i] == target_dims[i + offset] {
                result[i + offset] = self_strides[i];
            }
        }
        Ok(result)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

// These let you write: Shape::from((3, 4)) instead of Shape::new(vec![3, 4])

impl From<()> for Shape {
    /// Scalar shape (0 dimensions).
    fn from(_: ()) -> Self {
        Shape(vec![])
    }
}

impl From<usize> for Shape {
    /// 1-D shape.
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape(dims.to_vec())
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(s: &Shape) -> Self {
        s.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::from(());
        assert_eq!(s.rank(), 0);
        assert_eq!(s.elem_count(), 1);
        assert_eq!(s.stride_contiguous(), Vec::<usize>::new());
    }

    #[test]
    fn test_3d_strides() {
        let s = Shape::from((2, 3, 4));
        assert_eq!(s.stride_contiguous(), vec![12, 4, 1]);
        assert_eq!(s.elem_count(), 24);
    }

    #[test]
    fn test_normalize_axes() {
        assert_eq!(Shape::normalize_axes(&[-1, -3], 5).unwrap(), vec![2, 4]);
        assert_eq!(Shape::normalize_axes(&[4, -1, 2], 5).unwrap(), vec![2, 4]);
        assert!(matches!(
            Shape::normalize_axis(-6, 5),
            Err(Error::AxisOutOfRange { axis: -6, rank: 5 })
        ));
        assert!(Shape::normalize_axis(5, 5).is_err());
    }

    #[test]
    fn test_broadcast_shape() {
        let a = Shape::from((5, 3, 1));
        let b = Shape::from((3, 4));
        assert_eq!(Shape::broadcast_shape(&a, &b).unwrap(), Shape::from((5, 3, 4)));
        assert!(Shape::broadcast_shape(&Shape::from(3), &Shape::from(4)).is_err());
    }

    #[test]
    fn test_broadcast_strides() {
        // [5, 1, 7] read as [4, 5, 6, 7]
        let s = Shape::from((5, 1, 7));
        let target = Shape::from([4, 5, 6, 7]);
        assert_eq!(s.broadcast_strides(&target).unwrap(), vec![0, 7, 0, 1]);
        // cannot shrink
        assert!(target.broadcast_strides(&s).is_err());
    }

    #[test]
    fn test_display() {
        let s = Shape::from((3, 4));
        assert_eq!(format!("{}", s), "[3, 4]");
    }
}
