// Dynamic Shapes — static shape knowledge vs. runtime shape values
//
// A layer is often configured before any data exists. What it knows at that
// point is a *pattern*: some dims are fixed (the channel count), others are
// only known once a batch arrives (batch size, spatial extent).
//
//   SymDim         — one dimension: Fixed(n) or Dynamic
//   SymbolicShape  — a pattern of SymDims, e.g. [?, ?, 5, ?, 7]
//   ResolvedDim    — static size (if the pattern knew it) + runtime size
//   ResolvedShape  — a SymbolicShape resolved against a concrete Shape,
//                    produced once per call
//
// EXAMPLE:
//
//   let declared = SymbolicShape::from(vec![None, None, Some(5), None, Some(7)]);
//   let resolved = ResolvedShape::resolve(Some(&declared), x.shape())?;
//   resolved.static_size(2) == Some(5)   // known at configuration time
//   resolved.static_size(0) == None      // batch dim, runtime only
//   resolved.size(0) == 3                // runtime value

use std::fmt;

use crate::error::{Error, Result};
use crate::shape::Shape;

/// A dimension that is either known up front or only at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymDim {
    /// Known at configuration time.
    Fixed(usize),
    /// Unknown until a concrete tensor arrives; matches any size.
    Dynamic,
}

impl SymDim {
    pub fn is_fixed(&self) -> bool {
        matches!(self, SymDim::Fixed(_))
    }

    /// The static size, if known.
    pub fn size(&self) -> Option<usize> {
        match self {
            SymDim::Fixed(n) => Some(*n),
            SymDim::Dynamic => None,
        }
    }

    /// Check if a concrete value matches this dimension pattern.
    pub fn matches(&self, value: usize) -> bool {
        match self {
            SymDim::Fixed(n) => value == *n,
            SymDim::Dynamic => true,
        }
    }
}

impl fmt::Display for SymDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymDim::Fixed(n) => write!(f, "{n}"),
            SymDim::Dynamic => write!(f, "?"),
        }
    }
}

impl From<usize> for SymDim {
    fn from(n: usize) -> Self {
        SymDim::Fixed(n)
    }
}

impl From<Option<usize>> for SymDim {
    fn from(n: Option<usize>) -> Self {
        n.map_or(SymDim::Dynamic, SymDim::Fixed)
    }
}

/// A shape pattern mixing fixed and dynamic dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicShape {
    dims: Vec<SymDim>,
}

impl SymbolicShape {
    pub fn new(dims: Vec<SymDim>) -> Self {
        Self { dims }
    }

    /// A fully-fixed pattern from a concrete shape.
    pub fn from_shape(shape: &Shape) -> Self {
        Self {
            dims: shape.dims().iter().map(|&d| SymDim::Fixed(d)).collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[SymDim] {
        &self.dims
    }

    /// Check if all dimensions are fixed.
    pub fn is_concrete(&self) -> bool {
        self.dims.iter().all(|d| d.is_fixed())
    }

    /// Check if a concrete shape matches this pattern.
    pub fn matches(&self, shape: &Shape) -> bool {
        self.rank() == shape.rank()
            && self
                .dims
                .iter()
                .zip(shape.dims())
                .all(|(pattern, &value)| pattern.matches(value))
    }

    /// The pattern as `Option<usize>` per dim (`None` = dynamic).
    pub fn to_options(&self) -> Vec<Option<usize>> {
        self.dims.iter().map(|d| d.size()).collect()
    }
}

impl fmt::Display for SymbolicShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<SymDim>> for SymbolicShape {
    fn from(dims: Vec<SymDim>) -> Self {
        Self::new(dims)
    }
}

impl From<Vec<Option<usize>>> for SymbolicShape {
    fn from(dims: Vec<Option<usize>>) -> Self {
        Self::new(dims.into_iter().map(SymDim::from).collect())
    }
}

/// Static and runtime knowledge about one dimension of a concrete input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDim {
    /// Size known before data arrived, if any.
    pub static_size: Option<usize>,
    /// Size of the tensor actually passed in.
    pub size: usize,
}

/// A concrete shape annotated with what was statically known about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShape {
    dims: Vec<ResolvedDim>,
}

impl ResolvedShape {
    /// Resolve `actual` against an optional pattern.
    ///
    /// Without a pattern every dim of a concrete tensor counts as static.
    /// With one, `actual` must match it and only `Fixed` dims are static.
    pub fn resolve(pattern: Option<&SymbolicShape>, actual: &Shape) -> Result<Self> {
        let dims = match pattern {
            None => actual
                .dims()
                .iter()
                .map(|&d| ResolvedDim {
                    static_size: Some(d),
                    size: d,
                })
                .collect(),
            Some(p) => {
                if !p.matches(actual) {
                    return Err(Error::msg(format!(
                        "input shape {} does not match the declared shape {}",
                        actual, p
                    )));
                }
                p.dims()
                    .iter()
                    .zip(actual.dims())
                    .map(|(sym, &d)| ResolvedDim {
                        static_size: sym.size(),
                        size: d,
                    })
                    .collect()
            }
        };
        Ok(Self { dims })
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[ResolvedDim] {
        &self.dims
    }

    /// Runtime size of dimension `d`.
    pub fn size(&self, d: usize) -> usize {
        self.dims[d].size
    }

    /// Static size of dimension `d`, `None` when it was dynamic.
    pub fn static_size(&self, d: usize) -> Option<usize> {
        self.dims[d].static_size
    }

    /// The runtime shape.
    pub fn shape(&self) -> Shape {
        Shape::new(self.dims.iter().map(|d| d.size).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matching() {
        let p = SymbolicShape::from(vec![None, Some(5), None, Some(7)]);
        assert_eq!(p.to_string(), "[?, 5, ?, 7]");
        assert!(!p.is_concrete());
        assert!(p.matches(&Shape::from([4, 5, 6, 7])));
        assert!(p.matches(&Shape::from([1, 5, 1, 7])));
        assert!(!p.matches(&Shape::from([4, 6, 6, 7])));
        assert!(!p.matches(&Shape::from([5, 6, 7])));
    }

    #[test]
    fn test_resolve_with_pattern() {
        let p = SymbolicShape::from(vec![None, Some(5), None, Some(7)]);
        let r = ResolvedShape::resolve(Some(&p), &Shape::from([4, 5, 6, 7])).unwrap();
        assert_eq!(r.static_size(0), None);
        assert_eq!(r.size(0), 4);
        assert_eq!(r.static_size(1), Some(5));
        assert_eq!(r.shape(), Shape::from([4, 5, 6, 7]));

        assert!(ResolvedShape::resolve(Some(&p), &Shape::from([4, 6, 6, 7])).is_err());
    }

    #[test]
    fn test_resolve_without_pattern_is_static() {
        let r = ResolvedShape::resolve(None, &Shape::from((2, 3))).unwrap();
        assert_eq!(r.rank(), 2);
        assert!(r.dims().iter().all(|d| d.static_size == Some(d.size)));
    }

    #[test]
    fn test_from_shape_is_concrete() {
        let p = SymbolicShape::from_shape(&Shape::from((2, 3)));
        assert!(p.is_concrete());
        assert_eq!(p.to_options(), vec![Some(2), Some(3)]);
    }
}
