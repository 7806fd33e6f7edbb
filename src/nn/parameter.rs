//! Module defining `Parameter`, the lazily materialized slot for one
//! learnable value.

use crate::error::{BlockError, Result};
use crate::initializer::{ConstantInitializer, InitContext, Initializer, XavierInitializer};
use crate::tensor::DType;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Role of a parameter inside its block. Selects the default initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    Weight,
    Bias,
    Gamma,
    Beta,
    RunningMean,
    RunningVar,
    Other,
}

impl ParameterType {
    /// Initializer used when no explicit one is configured.
    pub fn default_initializer(self) -> Arc<dyn Initializer> {
        match self {
            ParameterType::Weight | ParameterType::Other => Arc::new(XavierInitializer::default()),
            ParameterType::Bias | ParameterType::Beta | ParameterType::RunningMean => {
                Arc::new(ConstantInitializer::zeros())
            }
            ParameterType::Gamma | ParameterType::RunningVar => Arc::new(ConstantInitializer::ones()),
        }
    }

    /// Running statistics are updated by the block itself, not by training.
    pub fn requires_grad(self) -> bool {
        !matches!(self, ParameterType::RunningMean | ParameterType::RunningVar)
    }
}

/// Materialization state of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterState {
    /// Only configuration is held; no storage exists yet.
    Uninitialized,
    Initialized(ArrayD<f32>),
}

/// A named, owned slot for one learnable value.
///
/// A parameter starts [`ParameterState::Uninitialized`] and becomes
/// initialized through [`Parameter::initialize`], the only transition that
/// allocates storage. The value is filled by the explicit initializer if one
/// was set, otherwise by the default supplied by the owning block.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    kind: ParameterType,
    dtype: DType,
    requires_grad: bool,
    initializer: Option<Arc<dyn Initializer>>,
    default_initializer: Arc<dyn Initializer>,
    state: ParameterState,
}

impl Parameter {
    pub fn new(name: &str, kind: ParameterType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            dtype: DType::F32,
            requires_grad: kind.requires_grad(),
            initializer: None,
            default_initializer: kind.default_initializer(),
            state: ParameterState::Uninitialized,
        }
    }

    /// Replaces the fallback initializer chosen from the parameter type.
    pub fn with_default_initializer(mut self, initializer: Arc<dyn Initializer>) -> Self {
        self.default_initializer = initializer;
        self
    }

    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParameterType {
        self.kind
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Explicitly configured initializer, if any.
    pub fn initializer(&self) -> Option<&Arc<dyn Initializer>> {
        self.initializer.as_ref()
    }

    pub fn state(&self) -> &ParameterState {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, ParameterState::Initialized(_))
    }

    /// Materialized value, if any.
    pub fn array(&self) -> Option<&ArrayD<f32>> {
        match &self.state {
            ParameterState::Initialized(arr) => Some(arr),
            ParameterState::Uninitialized => None,
        }
    }

    pub fn array_mut(&mut self) -> Option<&mut ArrayD<f32>> {
        match &mut self.state {
            ParameterState::Initialized(arr) => Some(arr),
            ParameterState::Uninitialized => None,
        }
    }

    /// Materialized value or `NotInitialized`.
    pub fn require_array(&self) -> Result<&ArrayD<f32>> {
        self.array()
            .ok_or_else(|| BlockError::NotInitialized(self.name.clone()))
    }

    pub fn shape(&self) -> Option<&[usize]> {
        self.array().map(|arr| arr.shape())
    }

    /// Stores `initializer` unless an explicit one is already set and
    /// `overwrite` is false. Returns whether the initializer was stored.
    ///
    /// Replacing the initializer of a materialized parameter with `overwrite`
    /// discards its value, so the next initialization pass fills it again
    /// with the new strategy.
    pub fn set_initializer(&mut self, initializer: Arc<dyn Initializer>, overwrite: bool) -> bool {
        if self.initializer.is_some() && !overwrite {
            return false;
        }
        self.initializer = Some(initializer);
        if overwrite && self.is_initialized() {
            log::debug!("initializer of '{}' overwritten, value discarded", self.name);
            self.state = ParameterState::Uninitialized;
        }
        true
    }

    /// Materializes the value with the given shape. No-op when the parameter
    /// is already initialized; use [`Parameter::reinitialize`] to force it.
    pub fn initialize(&mut self, shape: &[usize]) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.reinitialize(shape)
    }

    /// Materializes the value even if one already exists.
    pub fn reinitialize(&mut self, shape: &[usize]) -> Result<()> {
        let initializer = self.initializer.as_ref().unwrap_or(&self.default_initializer);
        let ctx = InitContext::new(&self.name, shape, self.dtype);
        let mut value = initializer.fill(&ctx)?;
        if value.shape() != shape {
            return Err(BlockError::shape(
                format!("initializer of '{}'", self.name),
                format!("expected {:?}, got {:?}", shape, value.shape()),
            ));
        }
        self.dtype.round_array(&mut value);
        log::debug!("materialized parameter '{}' with shape {:?}", self.name, shape);
        self.state = ParameterState::Initialized(value);
        Ok(())
    }

    /// Replaces the value, e.g. when restoring a snapshot. The value is
    /// rounded to the parameter's dtype.
    pub fn set_array(&mut self, mut value: ArrayD<f32>) {
        self.dtype.round_array(&mut value);
        self.state = ParameterState::Initialized(value);
    }

    /// Drops the value and returns to the uninitialized state.
    pub fn reset(&mut self) {
        self.state = ParameterState::Uninitialized;
    }

    /// Converts the parameter to `dtype`, rounding the current value.
    pub fn cast(&mut self, dtype: DType) {
        self.dtype = dtype;
        if let ParameterState::Initialized(arr) = &mut self.state {
            dtype.round_array(arr);
        }
    }
}
