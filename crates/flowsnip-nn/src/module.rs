// Module trait — parameter ownership shared by every layer
//
// A Module owns named parameter tensors. The host training loop reads them
// through `named_parameters()` / `trainable_parameters()` and writes them back
// through `load_state_dict()`; flowsnip itself never runs an optimizer.
//
// WHY NAMES?
//
// Parameter names are the contract with whatever saves or optimizes them:
// an ActNorm exports `scale` (or `log_scale`) and `bias`, a SequentialFlow
// prefixes its children's names with their position (`0.bias`, `1.bias`).
// There is no global registry: the module instance is the unit of identity.
//
// TRAINABLE VS. FROZEN:
//
// A parameter tensor with `is_variable() == true` is trainable. Frozen
// parameters are still exported (they must be checkpointed) but never show up
// in `trainable_parameters()`.

use flowsnip_core::{Result, Tensor};

/// The parameter interface every layer implements.
///
/// Leaf layers implement `named_parameters()` and `load_state_dict()`; the
/// rest is derived.
pub trait Module {
    /// All parameters with their names, trainable or not.
    ///
    /// Layers whose parameters are created lazily return an empty list
    /// until they have seen their first input.
    fn named_parameters(&self) -> Vec<(String, Tensor)>;

    /// Replace parameters by name.
    ///
    /// Every name must belong to this module; tensors must match the shape
    /// and dtype of the parameter they replace.
    fn load_state_dict(&self, state: &[(String, Tensor)]) -> Result<()>;

    /// All parameter tensors, in `named_parameters()` order.
    fn parameters(&self) -> Vec<Tensor> {
        self.named_parameters().into_iter().map(|(_, p)| p).collect()
    }

    /// Only the parameters an optimizer is allowed to update.
    fn trainable_parameters(&self) -> Vec<(String, Tensor)> {
        self.named_parameters()
            .into_iter()
            .filter(|(_, p)| p.is_variable())
            .collect()
    }

    /// Total number of scalar parameters in this module.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.elem_count()).sum()
    }

    /// Number of trainable scalar parameters.
    fn trainable_params_count(&self) -> usize {
        self.trainable_parameters()
            .iter()
            .map(|(_, p)| p.elem_count())
            .sum()
    }

    /// A `state_dict`-style snapshot of name → tensor.
    fn state_dict(&self) -> Vec<(String, Tensor)> {
        self.named_parameters()
    }
}
