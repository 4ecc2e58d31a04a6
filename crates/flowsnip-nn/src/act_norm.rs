// ActNorm — Activation Normalization
//
// A per-channel affine flow whose parameters are fitted to the first batch it
// sees, so that its output starts out with zero mean and unit variance.
//
// FORMULA:
//   y = (x + bias) * scale            (forward)
//   x = y / scale - bias              (inverse)
//   log|det J| = sum over value axes of log|scale|
//
// DATA-DEPENDENT INITIALIZATION (first forward call):
//   mean  = mean(x)                      over every axis NOT in `axis`
//   var   = mean((x - mean)^2)           over the same axes
//   bias  = -mean
//   scale = 1 / sqrt(var + epsilon)
//
// `scale_type = exp` stores log(scale) instead of scale, so that an optimizer
// can never push the scale through zero.
//
// SHAPES:
//   `axis` picks the channel axes, e.g. [-1, -3] on a [3, 4, 5, 6, 7] input.
//   Parameters have shape var_shape = [5, 7]. To broadcast them back onto x
//   they are reshaped to the aligned shape [5, 1, 7]: the trailing dims from
//   the first channel axis onward, with non-channel dims set to 1.
//
// STATE:
//   Uninitialized --transform--> Initialized   (statistics from the batch)
//   Declared      --any call --> Initialized   (identity parameters)
//   any     --load_state_dict--> Initialized   (restored parameters)
//
// The state sits behind an RwLock: initialized layers only take the read
// lock, and the first call takes the write lock and re-checks, so exactly one
// caller computes the statistics while the others wait for it.

use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use flowsnip_core::{DType, Error, ResolvedShape, Result, Shape, SymbolicShape, Tensor};

use crate::flow::Flow;
use crate::module::Module;

/// Default value added to the variance before the reciprocal square root.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// How the learned scale is parameterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ScaleType {
    /// The parameter is the scale itself, exported as `scale`.
    #[default]
    Linear,
    /// The parameter is log(scale), exported as `log_scale`.
    Exp,
}

impl ScaleType {
    /// Name under which the scale parameter is exported.
    pub fn param_name(&self) -> &'static str {
        match self {
            ScaleType::Linear => "scale",
            ScaleType::Exp => "log_scale",
        }
    }
}

impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleType::Linear => write!(f, "linear"),
            ScaleType::Exp => write!(f, "exp"),
        }
    }
}

impl FromStr for ScaleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(ScaleType::Linear),
            "exp" => Ok(ScaleType::Exp),
            other => Err(Error::invalid_configuration(format!(
                "Invalid value for argument `scale_type`: expected one of {{linear, exp}}, got {other:?}"
            ))),
        }
    }
}

impl TryFrom<String> for ScaleType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Static configuration of an [`ActNorm`] layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActNormConfig {
    /// Channel axes; negative values count from the end of each input.
    pub axis: Vec<isize>,
    /// Trailing axes summed into one log-det value.
    pub value_ndims: usize,
    pub scale_type: ScaleType,
    /// Whether the parameters are exposed to an optimizer.
    pub trainable: bool,
    /// Skip data-dependent initialization; parameters start at identity.
    pub initialized: bool,
    /// Added to the variance before `1 / sqrt(..)`. Zero disables it.
    pub epsilon: f64,
    /// Declared input shape, `None` entries being dynamic.
    pub input_shape: Option<Vec<Option<usize>>>,
}

impl Default for ActNormConfig {
    fn default() -> Self {
        Self {
            axis: vec![-1],
            value_ndims: 0,
            scale_type: ScaleType::Linear,
            trainable: true,
            initialized: false,
            epsilon: DEFAULT_EPSILON,
            input_shape: None,
        }
    }
}

impl ActNormConfig {
    pub fn axis(mut self, axis: impl Into<Vec<isize>>) -> Self {
        self.axis = axis.into();
        self
    }

    pub fn value_ndims(mut self, n: usize) -> Self {
        self.value_ndims = n;
        self
    }

    pub fn scale_type(mut self, s: ScaleType) -> Self {
        self.scale_type = s;
        self
    }

    pub fn trainable(mut self, t: bool) -> Self {
        self.trainable = t;
        self
    }

    pub fn initialized(mut self, i: bool) -> Self {
        self.initialized = i;
        self
    }

    pub fn epsilon(mut self, eps: f64) -> Self {
        self.epsilon = eps;
        self
    }

    pub fn input_shape(mut self, shape: impl Into<Vec<Option<usize>>>) -> Self {
        self.input_shape = Some(shape.into());
        self
    }
}

/// The two parameter tensors, both shaped `var_shape`.
#[derive(Debug, Clone)]
struct ActNormParams {
    /// scale (linear) or log(scale) (exp)
    pre_scale: Tensor,
    bias: Tensor,
}

#[derive(Debug)]
enum ActNormState {
    /// Waiting for the first batch to compute statistics from.
    Uninitialized,
    /// Declared initialized; identity parameters are created on first use.
    Declared,
    Initialized(ActNormParams),
}

/// Axis bookkeeping for one input, resolved once per call.
#[derive(Debug)]
struct Geometry {
    shape: Shape,
    /// Sorted, non-negative channel axes.
    axis: Vec<usize>,
    var_shape: Shape,
    aligned: Shape,
    reduce_axis: Vec<usize>,
}

/// Activation normalization flow.
///
/// # Example
/// ```
/// use flowsnip_core::{DType, Tensor};
/// use flowsnip_nn::{ActNorm, ActNormConfig, Flow};
///
/// let layer = ActNorm::new(ActNormConfig::default().axis([-1]))?;
/// let x = Tensor::from_f64_slice(&[1.0, 10.0, 3.0, 30.0], (2, 2), DType::F64)?;
/// let (y, log_det) = layer.transform(&x)?; // initializes from x
/// assert_eq!(log_det.dims(), &[2, 2]);
/// let (x_back, _) = layer.inverse_transform(&y)?;
/// assert_eq!(x_back.dims(), x.dims());
/// # Ok::<(), flowsnip_core::Error>(())
/// ```
#[derive(Debug)]
pub struct ActNorm {
    config: ActNormConfig,
    declared_shape: Option<SymbolicShape>,
    state: RwLock<ActNormState>,
}

impl ActNorm {
    /// Validate `config` and create the layer.
    pub fn new(config: ActNormConfig) -> Result<Self> {
        if config.axis.is_empty() {
            return Err(Error::invalid_configuration("`axis` must not be empty"));
        }
        if !config.epsilon.is_finite() || config.epsilon < 0.0 {
            return Err(Error::invalid_configuration(format!(
                "`epsilon` must be a finite non-negative number, got {}",
                config.epsilon
            )));
        }
        let declared_shape = config.input_shape.clone().map(SymbolicShape::from);
        if let Some(declared) = &declared_shape {
            for a in Shape::normalize_axes(&config.axis, declared.rank())? {
                if !declared.dims()[a].is_fixed() {
                    return Err(Error::invalid_configuration(format!(
                        "the size of axis {a} must be static, but the declared input shape is {declared}"
                    )));
                }
            }
        }
        let state = if config.initialized {
            ActNormState::Declared
        } else {
            ActNormState::Uninitialized
        };
        Ok(Self {
            config,
            declared_shape,
            state: RwLock::new(state),
        })
    }

    pub fn config(&self) -> &ActNormConfig {
        &self.config
    }

    pub fn scale_type(&self) -> ScaleType {
        self.config.scale_type
    }

    /// Whether parameters exist (fitted, identity or loaded).
    pub fn is_initialized(&self) -> bool {
        matches!(&*self.read_state(), ActNormState::Initialized(_))
    }

    /// Shape of the parameters, once they exist.
    pub fn var_shape(&self) -> Option<Shape> {
        self.params().map(|p| p.bias.shape().clone())
    }

    /// Parameter dtype, once the parameters exist.
    pub fn dtype(&self) -> Option<DType> {
        self.params().map(|p| p.bias.dtype())
    }

    /// The stored scale parameter: scale (linear) or log-scale (exp).
    pub fn pre_scale(&self) -> Option<Tensor> {
        self.params().map(|p| p.pre_scale)
    }

    pub fn bias(&self) -> Option<Tensor> {
        self.params().map(|p| p.bias)
    }

    /// The effective scale, `exp`-ed for the exp parameterization.
    pub fn scale(&self) -> Result<Option<Tensor>> {
        self.params()
            .map(|p| self.scale_from(&p.pre_scale))
            .transpose()
    }

    /// Replace one parameter, e.g. after an optimizer step.
    ///
    /// Only trainable, initialized layers accept updates.
    pub fn update_parameter(&self, name: &str, value: Tensor) -> Result<()> {
        if !self.config.trainable {
            return Err(Error::invalid_operation(
                "the parameters of a non-trainable ActNorm are fixed once initialized",
            ));
        }
        let mut state = self.write_state();
        let ActNormState::Initialized(params) = &mut *state else {
            return Err(Error::invalid_operation(
                "cannot update the parameters of an ActNorm before it has been initialized",
            ));
        };
        let slot = if name == self.config.scale_type.param_name() {
            &mut params.pre_scale
        } else if name == "bias" {
            &mut params.bias
        } else {
            return Err(Error::UnknownParameter {
                name: name.to_string(),
            });
        };
        check_like(slot, &value)?;
        *slot = value.set_variable();
        Ok(())
    }

    // State access. Transitions assign a fully-built state, so a poisoned
    // lock still holds a consistent value.

    fn read_state(&self) -> RwLockReadGuard<'_, ActNormState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ActNormState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn params(&self) -> Option<ActNormParams> {
        match &*self.read_state() {
            ActNormState::Initialized(p) => Some(p.clone()),
            _ => None,
        }
    }

    fn geometry(&self, x: &Tensor) -> Result<Geometry> {
        let rank = x.rank();
        let axis = Shape::normalize_axes(&self.config.axis, rank)?;
        if self.config.value_ndims > rank {
            return Err(Error::invalid_operation(format!(
                "`value_ndims` is {}, but the input only has {} dimensions",
                self.config.value_ndims, rank
            )));
        }
        let resolved = ResolvedShape::resolve(self.declared_shape.as_ref(), x.shape())?;
        let mut var_dims = Vec::with_capacity(axis.len());
        for &a in &axis {
            let size = resolved.static_size(a).ok_or_else(|| {
                Error::invalid_configuration(format!("the size of axis {a} must be static"))
            })?;
            var_dims.push(size);
        }
        let aligned = (axis[0]..rank)
            .map(|a| if axis.contains(&a) { resolved.size(a) } else { 1 })
            .collect();
        let reduce_axis = (0..rank).filter(|a| !axis.contains(a)).collect();
        Ok(Geometry {
            shape: resolved.shape(),
            axis,
            var_shape: Shape::new(var_dims),
            aligned: Shape::new(aligned),
            reduce_axis,
        })
    }

    /// Mark freshly built parameters trainable or frozen.
    fn wrap(&self, pre_scale: Tensor, bias: Tensor) -> ActNormParams {
        if self.config.trainable {
            ActNormParams {
                pre_scale: pre_scale.set_variable(),
                bias: bias.set_variable(),
            }
        } else {
            ActNormParams {
                pre_scale: pre_scale.freeze(),
                bias: bias.freeze(),
            }
        }
    }

    fn initialize(&self, x: &Tensor, geo: &Geometry) -> Result<ActNormParams> {
        // the statistics need a leading sample axis ahead of every channel axis
        if geo.axis[0] == 0 {
            return Err(Error::invalid_operation(
                "Initializing ActNorm requires multiple `x` samples, thus `x` must have \
                 at least one more dimension than the variable shape",
            ));
        }
        let mean = x.mean_axes(&geo.reduce_axis, true)?;
        let var = x.sub(&mean)?.square()?.mean_axes(&geo.reduce_axis, true)?;
        let scale = var
            .affine(1.0, self.config.epsilon)?
            .sqrt()?
            .recip()?
            .reshape(&geo.var_shape)?;
        let bias = mean.neg()?.reshape(&geo.var_shape)?;
        let pre_scale = match self.config.scale_type {
            ScaleType::Linear => scale,
            ScaleType::Exp => scale.log()?,
        };
        if !pre_scale.all_finite() {
            tracing::warn!(
                var_shape = %geo.var_shape,
                epsilon = self.config.epsilon,
                "act_norm initialized with a non-finite scale; the input has zero variance along some channel"
            );
        }
        tracing::debug!(
            var_shape = %geo.var_shape,
            scale_type = %self.config.scale_type,
            dtype = %x.dtype(),
            "act_norm initialized from data"
        );
        Ok(self.wrap(pre_scale, bias))
    }

    fn identity(&self, dtype: DType, geo: &Geometry) -> Result<ActNormParams> {
        let pre_scale = match self.config.scale_type {
            ScaleType::Linear => Tensor::ones(&geo.var_shape, dtype)?,
            ScaleType::Exp => Tensor::zeros(&geo.var_shape, dtype)?,
        };
        let bias = Tensor::zeros(&geo.var_shape, dtype)?;
        tracing::debug!(var_shape = %geo.var_shape, dtype = %dtype, "act_norm built with identity parameters");
        Ok(self.wrap(pre_scale, bias))
    }

    /// Fetch the parameters for an input, building them if needed.
    ///
    /// Data-dependent initialization only runs when `allow_init` is set.
    fn params_for(&self, x: &Tensor, geo: &Geometry, allow_init: bool) -> Result<ActNormParams> {
        {
            let state = self.read_state();
            match &*state {
                ActNormState::Initialized(p) => return Ok(p.clone()),
                ActNormState::Uninitialized if !allow_init => {
                    return Err(Error::invalid_operation(
                        "`inverse_transform` cannot be called before the ActNorm has been initialized",
                    ))
                }
                _ => {}
            }
        }
        let mut state = self.write_state();
        let params = match &*state {
            // another caller won the race
            ActNormState::Initialized(p) => return Ok(p.clone()),
            ActNormState::Uninitialized => {
                if !allow_init {
                    return Err(Error::invalid_operation(
                        "`inverse_transform` cannot be called before the ActNorm has been initialized",
                    ));
                }
                self.initialize(x, geo)?
            }
            ActNormState::Declared => self.identity(x.dtype(), geo)?,
        };
        *state = ActNormState::Initialized(params.clone());
        Ok(params)
    }

    fn check_input(&self, params: &ActNormParams, x: &Tensor, geo: &Geometry) -> Result<()> {
        if x.dtype() != params.bias.dtype() {
            return Err(Error::DTypeMismatch {
                expected: params.bias.dtype(),
                got: x.dtype(),
            });
        }
        if *params.bias.shape() != geo.var_shape {
            return Err(Error::ShapeMismatch {
                expected: params.bias.shape().clone(),
                got: geo.var_shape.clone(),
            });
        }
        Ok(())
    }

    fn scale_from(&self, pre_scale: &Tensor) -> Result<Tensor> {
        match self.config.scale_type {
            ScaleType::Linear => Ok(pre_scale.clone()),
            ScaleType::Exp => pre_scale.exp(),
        }
    }

    /// log|scale| broadcast to the input and summed over the value axes.
    fn log_det(&self, params: &ActNormParams, geo: &Geometry) -> Result<Tensor> {
        let log_scale = match self.config.scale_type {
            ScaleType::Linear => params.pre_scale.abs()?.log()?,
            ScaleType::Exp => params.pre_scale.clone(),
        };
        let full = log_scale
            .reshape(&geo.aligned)?
            .broadcast_as(&geo.shape)?;
        let k = self.config.value_ndims;
        if k == 0 {
            return Ok(full);
        }
        let rank = geo.shape.rank();
        let value_axes: Vec<usize> = (rank - k..rank).collect();
        full.sum_axes(&value_axes, false)
    }

    /// Apply to a batch, fitting the parameters to it if this is the first one.
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let geo = self.geometry(x)?;
        let params = self.params_for(x, &geo, true)?;
        self.check_input(&params, x, &geo)?;
        tracing::trace!(shape = %geo.shape, axis = ?geo.axis, "act_norm transform");

        let bias = params.bias.reshape(&geo.aligned)?;
        let scale = self.scale_from(&params.pre_scale)?.reshape(&geo.aligned)?;
        let y = x.add(&bias)?.mul(&scale)?;
        let log_det = self.log_det(&params, &geo)?;
        Ok((y, log_det))
    }

    /// Undo [`forward`](Self::forward). Never initializes.
    pub fn inverse(&self, y: &Tensor) -> Result<(Tensor, Tensor)> {
        let geo = self.geometry(y)?;
        let params = self.params_for(y, &geo, false)?;
        self.check_input(&params, y, &geo)?;
        tracing::trace!(shape = %geo.shape, axis = ?geo.axis, "act_norm inverse transform");

        let bias = params.bias.reshape(&geo.aligned)?;
        let scale = self.scale_from(&params.pre_scale)?.reshape(&geo.aligned)?;
        let x = y.div(&scale)?.sub(&bias)?;
        let log_det = self.log_det(&params, &geo)?.neg()?;
        Ok((x, log_det))
    }
}

/// Same shape and dtype, or an error naming the difference.
fn check_like(current: &Tensor, new: &Tensor) -> Result<()> {
    if current.dtype() != new.dtype() {
        return Err(Error::DTypeMismatch {
            expected: current.dtype(),
            got: new.dtype(),
        });
    }
    if current.shape() != new.shape() {
        return Err(Error::ShapeMismatch {
            expected: current.shape().clone(),
            got: new.shape().clone(),
        });
    }
    Ok(())
}

impl Module for ActNorm {
    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        match self.params() {
            Some(p) => vec![
                (self.config.scale_type.param_name().to_string(), p.pre_scale),
                ("bias".to_string(), p.bias),
            ],
            None => Vec::new(),
        }
    }

    /// Restore both parameters; the layer counts as initialized afterwards.
    fn load_state_dict(&self, state: &[(String, Tensor)]) -> Result<()> {
        let scale_name = self.config.scale_type.param_name();
        let mut pre_scale = None;
        let mut bias = None;
        for (name, tensor) in state {
            if name == scale_name {
                pre_scale = Some(tensor.clone());
            } else if name == "bias" {
                bias = Some(tensor.clone());
            } else {
                return Err(Error::UnknownParameter { name: name.clone() });
            }
        }
        let missing = |n: &str| Error::invalid_operation(format!("missing parameter `{n}`"));
        let pre_scale = pre_scale.ok_or_else(|| missing(scale_name))?;
        let bias = bias.ok_or_else(|| missing("bias"))?;
        check_like(&bias, &pre_scale)?;

        let mut guard = self.write_state();
        if let ActNormState::Initialized(current) = &*guard {
            check_like(&current.bias, &bias)?;
        }
        *guard = ActNormState::Initialized(self.wrap(pre_scale, bias));
        Ok(())
    }
}

impl Flow for ActNorm {
    fn x_value_ndims(&self) -> usize {
        self.config.value_ndims
    }

    fn y_value_ndims(&self) -> usize {
        self.config.value_ndims
    }

    fn explicitly_invertible(&self) -> bool {
        true
    }

    fn transform(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        self.forward(x)
    }

    fn inverse_transform(&self, y: &Tensor) -> Result<(Tensor, Tensor)> {
        self.inverse(y)
    }
}

/// Build an [`ActNorm`], initialize it on `x`, and return `y` with the layer.
///
/// The functional counterpart of constructing the layer and calling
/// `transform` once; keep the returned layer to reuse its parameters.
pub fn act_norm(x: &Tensor, config: ActNormConfig) -> Result<(Tensor, ActNorm)> {
    let layer = ActNorm::new(config)?;
    let (y, _) = layer.forward(x)?;
    Ok((y, layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn t(data: &[f64], shape: impl Into<Shape>) -> Tensor {
        Tensor::from_f64_slice(data, shape, DType::F64).unwrap()
    }

    #[test]
    fn test_scale_type_parsing() {
        assert_eq!("linear".parse::<ScaleType>().unwrap(), ScaleType::Linear);
        assert_eq!("exp".parse::<ScaleType>().unwrap(), ScaleType::Exp);
        match "xyz".parse::<ScaleType>() {
            Err(Error::InvalidConfiguration(m)) => {
                assert!(m.contains("Invalid value for argument `scale_type`"));
                assert!(m.contains("{linear, exp}"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_config_errors() {
        match ActNorm::new(ActNormConfig::default().axis(Vec::<isize>::new())) {
            Err(Error::InvalidConfiguration(m)) => assert!(m.contains("`axis` must not be empty")),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(ActNorm::new(ActNormConfig::default().epsilon(-1.0)).is_err());
        assert!(ActNorm::new(ActNormConfig::default().epsilon(f64::NAN)).is_err());
    }

    #[test]
    fn test_config_from_json() {
        let cfg: ActNormConfig =
            serde_json::from_str(r#"{"axis": [-1, -3], "scale_type": "exp", "value_ndims": 2}"#)
                .unwrap();
        assert_eq!(cfg.axis, vec![-1, -3]);
        assert_eq!(cfg.scale_type, ScaleType::Exp);
        assert_eq!(cfg.value_ndims, 2);
        assert!(cfg.trainable);
        assert!(!cfg.initialized);
        assert_eq!(cfg.epsilon, DEFAULT_EPSILON);

        let bad = serde_json::from_str::<ActNormConfig>(r#"{"scale_type": "xyz"}"#);
        assert!(bad.unwrap_err().to_string().contains("scale_type"));

        let round: ActNormConfig =
            serde_json::from_str(&serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(round, cfg);
    }

    #[test]
    fn test_init_requires_leading_sample_axis() {
        let layer = ActNorm::new(ActNormConfig::default().axis([-3, -1])).unwrap();
        let x = Tensor::zeros((2, 3, 4), DType::F64).unwrap();
        match layer.transform(&x) {
            Err(Error::InvalidOperation(m)) => assert!(m.contains(
                "Initializing ActNorm requires multiple `x` samples, thus `x` must have \
                 at least one more dimension than the variable shape"
            )),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!layer.is_initialized());

        // axis 1 is reduced, but nothing precedes the channel axis 0
        let layer = ActNorm::new(ActNormConfig::default().axis([0, 2])).unwrap();
        assert!(matches!(layer.transform(&x), Err(Error::InvalidOperation(_))));
        assert!(!layer.is_initialized());
    }

    #[test]
    fn test_inverse_before_init_fails() {
        let layer = ActNorm::new(ActNormConfig::default()).unwrap();
        let y = t(&[1.0, 2.0, 3.0, 4.0], (2, 2));
        assert!(matches!(
            layer.inverse_transform(&y),
            Err(Error::InvalidOperation(_))
        ));
        assert!(!layer.is_initialized());
    }

    #[test]
    fn test_initialization_statistics() {
        // two channels: [1, 3] has mean 2, std 1; [10, 30] has mean 20, std 10
        let layer = ActNorm::new(ActNormConfig::default().epsilon(0.0)).unwrap();
        let x = t(&[1.0, 10.0, 3.0, 30.0], (2, 2));
        let (y, log_det) = layer.transform(&x).unwrap();

        assert_eq!(layer.bias().unwrap().to_f64_vec(), vec![-2.0, -20.0]);
        let scale = layer.scale().unwrap().unwrap().to_f64_vec();
        assert_abs_diff_eq!(scale[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scale[1], 0.1, epsilon = 1e-12);
        assert_eq!(y.to_f64_vec(), vec![-1.0, -1.0, 1.0, 1.0]);

        let ld = log_det.to_f64_vec();
        assert_eq!(log_det.dims(), &[2, 2]);
        assert_abs_diff_eq!(ld[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ld[1], 0.1f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_exp_scale_stores_log() {
        let layer = ActNorm::new(
            ActNormConfig::default()
                .scale_type(ScaleType::Exp)
                .epsilon(0.0),
        )
        .unwrap();
        let x = t(&[1.0, 10.0, 3.0, 30.0], (2, 2));
        layer.transform(&x).unwrap();
        let log_scale = layer.pre_scale().unwrap().to_f64_vec();
        assert_abs_diff_eq!(log_scale[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(log_scale[1], 0.1f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_statistics_computed_once() {
        let layer = ActNorm::new(ActNormConfig::default()).unwrap();
        layer.transform(&t(&[1.0, 10.0, 3.0, 30.0], (2, 2))).unwrap();
        let bias = layer.bias().unwrap().to_f64_vec();
        layer.transform(&t(&[100.0, 0.0, 300.0, 5.0], (2, 2))).unwrap();
        assert_eq!(layer.bias().unwrap().to_f64_vec(), bias);
    }

    #[test]
    fn test_declared_initialized_uses_identity() {
        let layer = ActNorm::new(ActNormConfig::default().initialized(true)).unwrap();
        let x = t(&[1.0, 2.0, 3.0, 4.0], (2, 2));
        let (y, log_det) = layer.inverse_transform(&x).unwrap();
        assert_eq!(y.to_f64_vec(), x.to_f64_vec());
        assert_eq!(log_det.to_f64_vec(), vec![0.0; 4]);
        assert_eq!(layer.var_shape(), Some(Shape::from(2)));
    }

    #[test]
    fn test_channel_size_must_stay_fixed() {
        let layer = ActNorm::new(ActNormConfig::default()).unwrap();
        layer.transform(&t(&[1.0, 2.0, 3.0, 4.0], (2, 2))).unwrap();
        let wider = Tensor::zeros((2, 3), DType::F64).unwrap();
        assert!(matches!(
            layer.transform(&wider),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_value_ndims_larger_than_rank() {
        let layer = ActNorm::new(ActNormConfig::default().value_ndims(3)).unwrap();
        let x = Tensor::zeros((2, 2), DType::F64).unwrap();
        assert!(matches!(layer.transform(&x), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_update_parameter() {
        let layer = ActNorm::new(ActNormConfig::default()).unwrap();
        assert!(layer
            .update_parameter("bias", Tensor::zeros(2, DType::F64).unwrap())
            .is_err());
        layer.transform(&t(&[1.0, 10.0, 3.0, 30.0], (2, 2))).unwrap();

        layer
            .update_parameter("bias", Tensor::zeros(2, DType::F64).unwrap())
            .unwrap();
        assert_eq!(layer.bias().unwrap().to_f64_vec(), vec![0.0, 0.0]);
        assert!(layer.bias().unwrap().is_variable());

        assert!(matches!(
            layer.update_parameter("log_scale", Tensor::zeros(2, DType::F64).unwrap()),
            Err(Error::UnknownParameter { .. })
        ));
        assert!(matches!(
            layer.update_parameter("scale", Tensor::zeros(3, DType::F64).unwrap()),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            layer.update_parameter("scale", Tensor::zeros(2, DType::F32).unwrap()),
            Err(Error::DTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_update_rejected_when_frozen() {
        let layer = ActNorm::new(ActNormConfig::default().trainable(false)).unwrap();
        layer.transform(&t(&[1.0, 10.0, 3.0, 30.0], (2, 2))).unwrap();
        assert!(matches!(
            layer.update_parameter("bias", Tensor::zeros(2, DType::F64).unwrap()),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_load_state_dict_validation() {
        let layer = ActNorm::new(ActNormConfig::default()).unwrap();
        let two = Tensor::zeros(2, DType::F64).unwrap();
        let three = Tensor::zeros(3, DType::F64).unwrap();

        let r = layer.load_state_dict(&[("weight".to_string(), two.clone())]);
        assert!(matches!(r, Err(Error::UnknownParameter { .. })));

        let r = layer.load_state_dict(&[("bias".to_string(), two.clone())]);
        assert!(matches!(r, Err(Error::InvalidOperation(_))));

        let r = layer.load_state_dict(&[
            ("scale".to_string(), three),
            ("bias".to_string(), two.clone()),
        ]);
        assert!(matches!(r, Err(Error::ShapeMismatch { .. })));
        assert!(!layer.is_initialized());

        let ones = Tensor::ones(2, DType::F64).unwrap();
        layer
            .load_state_dict(&[("scale".to_string(), ones), ("bias".to_string(), two)])
            .unwrap();
        assert!(layer.is_initialized());
        assert_eq!(layer.dtype(), Some(DType::F64));
    }

    #[test]
    fn test_act_norm_function_returns_layer() {
        let x = t(&[1.0, 10.0, 3.0, 30.0], (2, 2));
        let (y, layer) = act_norm(&x, ActNormConfig::default().epsilon(0.0)).unwrap();
        assert_eq!(y.to_f64_vec(), vec![-1.0, -1.0, 1.0, 1.0]);
        assert!(layer.is_initialized());
    }

    #[test]
    fn test_input_shape_axis_must_be_static() {
        let r = ActNorm::new(
            ActNormConfig::default()
                .axis([-1])
                .input_shape(vec![None, None]),
        );
        assert!(matches!(r, Err(Error::InvalidConfiguration(_))));

        let layer = ActNorm::new(
            ActNormConfig::default()
                .axis([-1])
                .input_shape(vec![None, Some(2)]),
        )
        .unwrap();
        // rank mismatch against the declared shape
        assert!(layer
            .transform(&Tensor::zeros((2, 2, 2), DType::F64).unwrap())
            .is_err());
        assert!(layer.transform(&t(&[1.0, 10.0, 3.0, 30.0], (2, 2))).is_ok());
    }
}
