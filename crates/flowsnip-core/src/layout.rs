use crate::error::{Error, Result};
use crate::shape::Shape;

// Layout — how a logical shape maps onto flat storage
//
// Tensors in flowsnip always own contiguous storage, but every kernel that
// broadcasts, reduces or permutes reads that storage through a *view*: the
// same flat buffer with different strides.
//
//   - Broadcasting [5, 1, 7] against [4, 5, 6, 7] reads the small buffer
//     with strides [0, 7, 0, 1]: stretched dims repeat the same element.
//   - Permuting [2, 3] to [3, 2] swaps the strides to [1, 3].
//   - Reducing over some dims maps every input element to its output slot
//     by reading the output buffer with stride 0 on the reduced dims.
//
// Walking a view in logical order is `strided_indices()`.

/// Layout describes how a tensor's logical shape maps to flat storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
    /// Offset into the storage buffer where this view's data starts.
    offset: usize,
}

impl Layout {
    /// Create a new contiguous layout for the given shape.
    pub fn contiguous(shape: Shape) -> Self {
        let strides = shape.stride_contiguous();
        Layout {
            shape,
            strides,
            offset: 0,
        }
    }

    /// Create a layout with explicit strides and offset.
    pub fn new(shape: Shape, strides: Vec<usize>, offset: usize) -> Self {
        Layout {
            shape,
            strides,
            offset,
        }
    }

    /// View a contiguous `source` shape as if broadcast to `target`.
    pub fn broadcast(source: &Shape, target: &Shape) -> Result<Self> {
        let strides = source.broadcast_strides(target)?;
        Ok(Layout::new(target.clone(), strides, 0))
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// A layout is contiguous if its strides equal the default strides
    /// for its shape and the offset is 0.
    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.strides == self.shape.stride_contiguous()
    }

    /// Reorder dimensions: output dim `i` is input dim `perm[i]`.
    ///
    /// Example: [2, 3, 4] permute([2, 0, 1]) → [4, 2, 3]
    ///          strides [12, 4, 1]          → [1, 12, 4]
    pub fn permute(&self, perm: &[usize]) -> Result<Layout> {
        let rank = self.rank();
        if perm.len() != rank {
            return Err(Error::RankMismatch {
                expected: rank,
                got: perm.len(),
            });
        }
        let mut seen = vec![false; rank];
        for &p in perm {
            if p >= rank {
                return Err(Error::DimOutOfRange { dim: p, rank });
            }
            if seen[p] {
                return Err(Error::msg(format!(
                    "permutation {:?} repeats dimension {}",
                    perm, p
                )));
            }
            seen[p] = true;
        }
        let dims = perm.iter().map(|&p| self.dims()[p]).collect();
        let strides = perm.iter().map(|&p| self.strides[p]).collect();
        Ok(Layout::new(Shape::new(dims), strides, self.offset))
    }

    /// flat_index = offset + sum(index[i] * stride[i])
    pub fn flat_index(&self, index: &[usize]) -> usize {
        let mut flat = self.offset;
        for (i, &idx) in index.iter().enumerate() {
            flat += idx * self.strides[i];
        }
        flat
    }

    /// Iterator over all flat indices of this layout, in logical order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }
}

// StridedIter — Iterates over flat storage indices respecting strides
//
// For a contiguous layout this counts 0, 1, 2, ...; for a broadcast or
// permuted view it jumps around (or stays put) following the strides.

/// Iterator that yields flat storage indices for each element of a Layout.
pub struct StridedIter {
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    /// Flat index of `current`, updated incrementally.
    position: usize,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        let rank = layout.rank();
        StridedIter {
            current: vec![0; rank],
            dims: layout.dims().to_vec(),
            strides: layout.strides().to_vec(),
            position: layout.offset(),
            remaining: layout.elem_count(),
            started: false,
        }
    }

    /// Advance the multi-dimensional index by one (rightmost dimension first).
    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            self.position += self.strides[i];
            if self.current[i] < self.dims[i] {
                return;
            }
            self.position -= self.current[i] * self.strides[i];
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.position)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_indices() {
        let layout = Layout::contiguous(Shape::from((2, 3)));
        assert!(layout.is_contiguous());
        let indices: Vec<usize> = layout.strided_indices().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_permute_indices() {
        // [[0, 1, 2],
        //  [3, 4, 5]] read transposed: 0, 3, 1, 4, 2, 5
        let layout = Layout::contiguous(Shape::from((2, 3)));
        let t = layout.permute(&[1, 0]).unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(t.strides(), &[1, 3]);
        assert!(!t.is_contiguous());
        let indices: Vec<usize> = t.strided_indices().collect();
        assert_eq!(indices, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_permute_rejects_bad_perm() {
        let layout = Layout::contiguous(Shape::from((2, 3, 4)));
        assert!(layout.permute(&[0, 1]).is_err());
        assert!(layout.permute(&[0, 0, 1]).is_err());
        assert!(layout.permute(&[0, 1, 3]).is_err());
    }

    #[test]
    fn test_broadcast_indices() {
        // [3] broadcast to [2, 3] repeats the row
        let layout = Layout::broadcast(&Shape::from(3), &Shape::from((2, 3))).unwrap();
        let indices: Vec<usize> = layout.strided_indices().collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);

        // [2, 1] broadcast to [2, 3] repeats each element
        let layout = Layout::broadcast(&Shape::from((2, 1)), &Shape::from((2, 3))).unwrap();
        let indices: Vec<usize> = layout.strided_indices().collect();
        assert_eq!(indices, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_scalar_layout_yields_one_index() {
        let layout = Layout::contiguous(Shape::from(()));
        let indices: Vec<usize> = layout.strided_indices().collect();
        assert_eq!(indices, vec![0]);
    }

    #[test]
    fn test_flat_index() {
        let layout = Layout::contiguous(Shape::from((2, 3, 4)));
        assert_eq!(layout.flat_index(&[1, 2, 3]), 23);
        assert_eq!(layout.flat_index(&[0, 0, 0]), 0);
    }
}
