//! Sampling initializers backed by `ndarray-rand`.

use super::{InitContext, Initializer, SharedRng};
use crate::error::{BlockError, Result};
use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;

/// Samples every element from the uniform distribution `U(low, high)`.
#[derive(Debug, Clone)]
pub struct UniformInitializer {
    pub low: f32,
    pub high: f32,
    rng: SharedRng,
}

impl UniformInitializer {
    pub fn new(low: f32, high: f32) -> Self {
        Self {
            low,
            high,
            rng: SharedRng::new(None),
        }
    }

    /// Symmetric range `U(-scale, scale)`.
    pub fn symmetric(scale: f32) -> Self {
        Self::new(-scale, scale)
    }

    /// Makes the sampled values reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SharedRng::new(Some(seed));
        self
    }
}

impl Initializer for UniformInitializer {
    fn fill(&self, ctx: &InitContext<'_>) -> Result<ArrayD<f32>> {
        sample_uniform(&self.rng, ctx, self.low, self.high)
    }
}

/// Draws `ctx.shape` values from `U(low, high)` and rounds them to `ctx.dtype`.
pub(crate) fn sample_uniform(
    rng: &SharedRng,
    ctx: &InitContext<'_>,
    low: f32,
    high: f32,
) -> Result<ArrayD<f32>> {
    // Uniform::new panics on an empty range.
    if !(low < high) {
        return Err(BlockError::InvalidConfig(format!(
            "uniform range for '{}' is empty: low {} must be below high {}",
            ctx.name, low, high
        )));
    }
    let mut arr = ArrayD::random_using(IxDyn(ctx.shape), Uniform::new(low, high), &mut *rng.lock());
    ctx.dtype.round_array(&mut arr);
    Ok(arr)
}

/// Samples every element from the normal distribution `N(mean, std²)`.
#[derive(Debug, Clone)]
pub struct NormalInitializer {
    pub mean: f32,
    pub std: f32,
    rng: SharedRng,
}

impl NormalInitializer {
    pub fn new(mean: f32, std: f32) -> Self {
        Self {
            mean,
            std,
            rng: SharedRng::new(None),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SharedRng::new(Some(seed));
        self
    }
}

impl Initializer for NormalInitializer {
    fn fill(&self, ctx: &InitContext<'_>) -> Result<ArrayD<f32>> {
        sample_normal(&self.rng, ctx, self.mean, self.std)
    }
}

pub(crate) fn sample_normal(
    rng: &SharedRng,
    ctx: &InitContext<'_>,
    mean: f32,
    std: f32,
) -> Result<ArrayD<f32>> {
    let dist = Normal::new(mean, std).map_err(|e| {
        BlockError::InvalidConfig(format!(
            "normal distribution for '{}' (mean {}, std {}): {}",
            ctx.name, mean, std, e
        ))
    })?;
    let mut arr = ArrayD::random_using(IxDyn(ctx.shape), dist, &mut *rng.lock());
    ctx.dtype.round_array(&mut arr);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_uniform_range_and_seed() {
        let ctx = InitContext::new("weight", &[16, 8], DType::F32);
        let a = UniformInitializer::new(-0.5, 0.5).with_seed(42).fill(&ctx).unwrap();
        let b = UniformInitializer::new(-0.5, 0.5).with_seed(42).fill(&ctx).unwrap();

        assert_eq!(a.shape(), &[16, 8]);
        assert!(a.iter().all(|&v| (-0.5..0.5).contains(&v)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_uniform_empty_range_is_rejected() {
        let ctx = InitContext::new("weight", &[2], DType::F32);
        let result = UniformInitializer::new(1.0, 1.0).fill(&ctx);
        assert!(matches!(result, Err(BlockError::InvalidConfig(_))));
    }

    #[test]
    fn test_normal_statistics() {
        let ctx = InitContext::new("weight", &[100, 100], DType::F32);
        let arr = NormalInitializer::new(1.0, 0.1).with_seed(1).fill(&ctx).unwrap();
        let mean = arr.mean().unwrap();
        assert!((mean - 1.0).abs() < 0.01, "mean was {}", mean);
    }

    #[test]
    fn test_normal_negative_std_is_rejected() {
        let ctx = InitContext::new("weight", &[2], DType::F32);
        assert!(NormalInitializer::new(0.0, -1.0).fill(&ctx).is_err());
    }
}
