// Flow — invertible transforms with a tractable Jacobian
//
// A flow maps x → y and reports log|det(dy/dx)| alongside. Composing flows
// and summing their log-determinants gives the change-of-variables term of a
// normalizing-flow likelihood.
//
// VALUE NDIMS:
//
//   The trailing `value_ndims` axes of an input form one "value"; the
//   log-det is summed over them. For value_ndims = k the log-det of an input
//   shaped [*, d1..dk] is shaped [*].
//
// Both entry points return `(output, log_det)`. The log-det of
// `inverse_transform` is that of the inverse map, i.e. the negation of the
// forward log-det at the corresponding point.

use flowsnip_core::{Error, Result, Tensor};

use crate::module::Module;

/// An invertible transform with a Jacobian log-determinant.
pub trait Flow: Module + Send + Sync {
    /// Event ndims of the input `x`.
    fn x_value_ndims(&self) -> usize;

    /// Event ndims of the output `y`.
    fn y_value_ndims(&self) -> usize;

    /// Whether `inverse_transform` is available in closed form.
    fn explicitly_invertible(&self) -> bool;

    /// Compute `(y, log_det)` for `x`.
    fn transform(&self, x: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Compute `(x, log_det)` for `y`.
    fn inverse_transform(&self, y: &Tensor) -> Result<(Tensor, Tensor)>;
}

impl<F: Flow + ?Sized> Module for Box<F> {
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        (**self).named_parameters()
    }

    fn load_state_dict(&self, state: &[(String, Tensor)]) -> Result<()> {
        (**self).load_state_dict(state)
    }
}

impl<F: Flow + ?Sized> Flow for Box<F> {
    fn x_value_ndims(&self) -> usize {
        (**self).x_value_ndims()
    }

    fn y_value_ndims(&self) -> usize {
        (**self).y_value_ndims()
    }

    fn explicitly_invertible(&self) -> bool {
        (**self).explicitly_invertible()
    }

    fn transform(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        (**self).transform(x)
    }

    fn inverse_transform(&self, y: &Tensor) -> Result<(Tensor, Tensor)> {
        (**self).inverse_transform(y)
    }
}

/// Runs a flow backwards: `transform` is the wrapped flow's inverse.
#[derive(Debug)]
pub struct InvertFlow<F: Flow> {
    flow: F,
}

impl<F: Flow> InvertFlow<F> {
    /// Wrap `flow`, which must be explicitly invertible.
    pub fn new(flow: F) -> Result<Self> {
        if !flow.explicitly_invertible() {
            return Err(Error::invalid_configuration(
                "InvertFlow requires an explicitly invertible flow",
            ));
        }
        Ok(Self { flow })
    }

    pub fn inner(&self) -> &F {
        &self.flow
    }

    pub fn into_inner(self) -> F {
        self.flow
    }
}

impl<F: Flow> Module for InvertFlow<F> {
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.flow.named_parameters()
    }

    fn load_state_dict(&self, state: &[(String, Tensor)]) -> Result<()> {
        self.flow.load_state_dict(state)
    }
}

impl<F: Flow> Flow for InvertFlow<F> {
    fn x_value_ndims(&self) -> usize {
        self.flow.y_value_ndims()
    }

    fn y_value_ndims(&self) -> usize {
        self.flow.x_value_ndims()
    }

    fn explicitly_invertible(&self) -> bool {
        true
    }

    fn transform(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        self.flow.inverse_transform(x)
    }

    fn inverse_transform(&self, y: &Tensor) -> Result<(Tensor, Tensor)> {
        self.flow.transform(y)
    }
}

/// A chain of flows applied in order; log-dets are summed.
pub struct SequentialFlow {
    flows: Vec<Box<dyn Flow>>,
}

impl std::fmt::Debug for SequentialFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SequentialFlow(len={})", self.flows.len())
    }
}

impl SequentialFlow {
    /// Chain `flows`. Adjacent flows must agree on value ndims.
    pub fn new(flows: Vec<Box<dyn Flow>>) -> Result<Self> {
        if flows.is_empty() {
            return Err(Error::invalid_configuration("`flows` must not be empty"));
        }
        for (i, pair) in flows.windows(2).enumerate() {
            if pair[0].y_value_ndims() != pair[1].x_value_ndims() {
                return Err(Error::invalid_configuration(format!(
                    "flow {} has y_value_ndims {} but flow {} has x_value_ndims {}",
                    i,
                    pair[0].y_value_ndims(),
                    i + 1,
                    pair[1].x_value_ndims()
                )));
            }
        }
        Ok(Self { flows })
    }

    pub fn flows(&self) -> &[Box<dyn Flow>] {
        &self.flows
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

fn accumulate(total: Option<Tensor>, log_det: Tensor) -> Result<Option<Tensor>> {
    Ok(Some(match total {
        Some(t) => t.add(&log_det)?,
        None => log_det,
    }))
}

impl Module for SequentialFlow {
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.flows
            .iter()
            .enumerate()
            .flat_map(|(i, f)| {
                f.named_parameters()
                    .into_iter()
                    .map(move |(name, p)| (format!("{i}.{name}"), p))
            })
            .collect()
    }

    fn load_state_dict(&self, state: &[(String, Tensor)]) -> Result<()> {
        let mut per_flow: Vec<Vec<(String, Tensor)>> = vec![Vec::new(); self.flows.len()];
        for (name, tensor) in state {
            let unknown = || Error::UnknownParameter { name: name.clone() };
            let (index, rest) = name.split_once('.').ok_or_else(unknown)?;
            let index: usize = index.parse().map_err(|_| unknown())?;
            per_flow
                .get_mut(index)
                .ok_or_else(unknown)?
                .push((rest.to_string(), tensor.clone()));
        }
        for (flow, sub) in self.flows.iter().zip(per_flow) {
            if !sub.is_empty() {
                flow.load_state_dict(&sub)?;
            }
        }
        Ok(())
    }
}

impl Flow for SequentialFlow {
    fn x_value_ndims(&self) -> usize {
        self.flows[0].x_value_ndims()
    }

    fn y_value_ndims(&self) -> usize {
        self.flows[self.flows.len() - 1].y_value_ndims()
    }

    fn explicitly_invertible(&self) -> bool {
        self.flows.iter().all(|f| f.explicitly_invertible())
    }

    fn transform(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut value = x.clone();
        let mut total = None;
        for flow in &self.flows {
            let (y, log_det) = flow.transform(&value)?;
            value = y;
            total = accumulate(total, log_det)?;
        }
        let total = total.ok_or_else(|| Error::msg("empty SequentialFlow"))?;
        Ok((value, total))
    }

    fn inverse_transform(&self, y: &Tensor) -> Result<(Tensor, Tensor)> {
        if !self.explicitly_invertible() {
            return Err(Error::invalid_operation(
                "SequentialFlow contains a flow that is not explicitly invertible",
            ));
        }
        let mut value = y.clone();
        let mut total = None;
        for flow in self.flows.iter().rev() {
            let (x, log_det) = flow.inverse_transform(&value)?;
            value = x;
            total = accumulate(total, log_det)?;
        }
        let total = total.ok_or_else(|| Error::msg("empty SequentialFlow"))?;
        Ok((value, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsnip_core::DType;

    /// y = x + 1, log_det = 0; optionally claims not to be invertible.
    struct Shift {
        invertible: bool,
        ndims: usize,
    }

    impl Module for Shift {
        fn named_parameters(&self) -> Vec<(String, Tensor)> {
            Vec::new()
        }

        fn load_state_dict(&self, state: &[(String, Tensor)]) -> Result<()> {
            match state.first() {
                Some((name, _)) => Err(Error::UnknownParameter { name: name.clone() }),
                None => Ok(()),
            }
        }
    }

    impl Flow for Shift {
        fn x_value_ndims(&self) -> usize {
            self.ndims
        }
        fn y_value_ndims(&self) -> usize {
            self.ndims
        }
        fn explicitly_invertible(&self) -> bool {
            self.invertible
        }
        fn transform(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
            Ok((x.affine(1.0, 1.0)?, Tensor::zeros(x.shape(), x.dtype())?))
        }
        fn inverse_transform(&self, y: &Tensor) -> Result<(Tensor, Tensor)> {
            Ok((y.affine(1.0, -1.0)?, Tensor::zeros(y.shape(), y.dtype())?))
        }
    }

    fn shift(invertible: bool, ndims: usize) -> Box<dyn Flow> {
        Box::new(Shift { invertible, ndims })
    }

    #[test]
    fn test_invert_flow_swaps_directions() {
        let flow = InvertFlow::new(Shift {
            invertible: true,
            ndims: 0,
        })
        .unwrap();
        let x = Tensor::from_f64_slice(&[1.0, 2.0], 2, DType::F64).unwrap();
        let (y, _) = flow.transform(&x).unwrap();
        assert_eq!(y.to_f64_vec(), vec![0.0, 1.0]);
        let (back, _) = flow.inverse_transform(&y).unwrap();
        assert_eq!(back.to_f64_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_invert_flow_requires_invertible() {
        let r = InvertFlow::new(Shift {
            invertible: false,
            ndims: 0,
        });
        assert!(matches!(r, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_sequential_validation() {
        assert!(SequentialFlow::new(vec![]).is_err());
        assert!(SequentialFlow::new(vec![shift(true, 1), shift(true, 2)]).is_err());
        assert!(SequentialFlow::new(vec![shift(true, 1), shift(true, 1)]).is_ok());
    }

    #[test]
    fn test_sequential_chains_in_order() {
        let seq = SequentialFlow::new(vec![shift(true, 0), shift(true, 0)]).unwrap();
        let x = Tensor::from_f64_slice(&[0.0, 5.0], 2, DType::F64).unwrap();
        let (y, log_det) = seq.transform(&x).unwrap();
        assert_eq!(y.to_f64_vec(), vec![2.0, 7.0]);
        assert_eq!(log_det.to_f64_vec(), vec![0.0, 0.0]);
        let (back, _) = seq.inverse_transform(&y).unwrap();
        assert_eq!(back.to_f64_vec(), vec![0.0, 5.0]);
    }

    #[test]
    fn test_sequential_inverse_needs_all_invertible() {
        let seq = SequentialFlow::new(vec![shift(true, 0), shift(false, 0)]).unwrap();
        assert!(!seq.explicitly_invertible());
        let y = Tensor::zeros(2, DType::F64).unwrap();
        assert!(matches!(
            seq.inverse_transform(&y),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_sequential_rejects_unknown_names() {
        let seq = SequentialFlow::new(vec![shift(true, 0)]).unwrap();
        let t = Tensor::zeros(1, DType::F64).unwrap();
        for name in ["bias", "x.bias", "3.bias", "0.bias"] {
            let r = seq.load_state_dict(&[(name.to_string(), t.clone())]);
            assert!(matches!(r, Err(Error::UnknownParameter { .. })), "{name}");
        }
    }
}
