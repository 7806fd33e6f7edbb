//! # Initializers
//!
//! An initializer computes the first value of a [`Parameter`](crate::nn::Parameter)
//! from the shape and dtype observed when the owning block first sees data.
//! Blocks and parameters only depend on the [`Initializer`] trait, so the
//! strategy can be swapped per parameter or for a whole tree with
//! [`BlockExt::set_initializer`](crate::nn::BlockExt::set_initializer).
//!
//! ## Available strategies
//!
//! - [`ConstantInitializer`]: fills with one value (`zeros()`, `ones()`)
//! - [`UniformInitializer`]: samples from `U(low, high)`
//! - [`NormalInitializer`]: samples from `N(mean, std²)`
//! - [`XavierInitializer`]: Glorot-style scaling from fan-in/fan-out
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rustyblocks::initializer::NormalInitializer;
//! use rustyblocks::nn::BlockExt;
//!
//! model.set_initializer(Arc::new(NormalInitializer::new(0.0, 0.02).with_seed(7)), true);
//! ```

pub mod constant;
pub mod random;
pub mod xavier;

pub use constant::ConstantInitializer;
pub use random::{NormalInitializer, UniformInitializer};
pub use xavier::{FactorType, RandomType, XavierInitializer};

use crate::error::Result;
use crate::tensor::DType;
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Information available to an initializer when a parameter is materialized.
#[derive(Debug, Clone, Copy)]
pub struct InitContext<'a> {
    /// Name of the parameter inside its owning block.
    pub name: &'a str,
    /// Shape the materialized value must have.
    pub shape: &'a [usize],
    pub dtype: DType,
}

impl<'a> InitContext<'a> {
    pub fn new(name: &'a str, shape: &'a [usize], dtype: DType) -> Self {
        Self { name, shape, dtype }
    }

    /// Product of every dimension after the first two (kernel window size).
    fn receptive_field(&self) -> usize {
        self.shape.iter().skip(2).product()
    }

    /// Number of inputs feeding one output unit.
    ///
    /// Weights are laid out `[out, in, ...]`; vectors use their length and
    /// scalars count as 1.
    pub fn fan_in(&self) -> usize {
        match self.shape.len() {
            0 => 1,
            1 => self.shape[0],
            _ => self.shape[1] * self.receptive_field(),
        }
    }

    pub fn fan_out(&self) -> usize {
        match self.shape.len() {
            0 => 1,
            1 => self.shape[0],
            _ => self.shape[0] * self.receptive_field(),
        }
    }
}

/// Strategy that fills a parameter's storage.
///
/// Implementations must return an array of exactly `ctx.shape`; the parameter
/// rejects anything else.
pub trait Initializer: fmt::Debug + Send + Sync {
    fn fill(&self, ctx: &InitContext<'_>) -> Result<ArrayD<f32>>;
}

/// Random generator shared by the sampling initializers.
///
/// A seeded generator yields the same sequence of arrays for the same
/// sequence of `fill` calls.
#[derive(Debug)]
pub(crate) struct SharedRng(Mutex<StdRng>);

impl SharedRng {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self(Mutex::new(rng))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StdRng> {
        // The generator holds no invariant a panicking holder could break.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clone for SharedRng {
    fn clone(&self) -> Self {
        Self(Mutex::new(self.lock().clone()))
    }
}
