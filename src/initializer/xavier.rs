//! Xavier (Glorot) initialization.
//!
//! The scale is `sqrt(magnitude / factor)`, where `factor` is the fan-in,
//! the fan-out or their average. With `RandomType::Uniform`, `FactorType::Avg`
//! and magnitude 3 this is the classic Glorot uniform range
//! `sqrt(6 / (fan_in + fan_out))`.

use super::random::{sample_normal, sample_uniform};
use super::{InitContext, Initializer, SharedRng};
use crate::error::Result;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandomType {
    Uniform,
    Gaussian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactorType {
    Avg,
    In,
    Out,
}

#[derive(Debug, Clone)]
pub struct XavierInitializer {
    pub random_type: RandomType,
    pub factor_type: FactorType,
    pub magnitude: f32,
    rng: SharedRng,
}

impl XavierInitializer {
    pub fn new(random_type: RandomType, factor_type: FactorType, magnitude: f32) -> Self {
        Self {
            random_type,
            factor_type,
            magnitude,
            rng: SharedRng::new(None),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SharedRng::new(Some(seed));
        self
    }

    /// Scale derived from the fans of `ctx.shape`.
    pub fn scale(&self, ctx: &InitContext<'_>) -> f32 {
        let fan_in = ctx.fan_in() as f32;
        let fan_out = ctx.fan_out() as f32;
        let factor = match self.factor_type {
            FactorType::Avg => (fan_in + fan_out) / 2.0,
            FactorType::In => fan_in,
            FactorType::Out => fan_out,
        };
        (self.magnitude / factor.max(1.0)).sqrt()
    }
}

impl Default for XavierInitializer {
    fn default() -> Self {
        Self::new(RandomType::Uniform, FactorType::Avg, 3.0)
    }
}

impl Initializer for XavierInitializer {
    fn fill(&self, ctx: &InitContext<'_>) -> Result<ArrayD<f32>> {
        let scale = self.scale(ctx);
        match self.random_type {
            RandomType::Uniform => sample_uniform(&self.rng, ctx, -scale, scale),
            RandomType::Gaussian => sample_normal(&self.rng, ctx, 0.0, scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_glorot_uniform_bound() {
        let ctx = InitContext::new("weight", &[30, 20], DType::F32);
        let init = XavierInitializer::default().with_seed(5);
        let bound = (6.0f32 / 50.0).sqrt();

        assert!((init.scale(&ctx) - bound).abs() < 1e-6);
        let arr = init.fill(&ctx).unwrap();
        assert!(arr.iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_factor_types() {
        let ctx = InitContext::new("weight", &[4, 16], DType::F32);
        let fan_in = XavierInitializer::new(RandomType::Gaussian, FactorType::In, 2.0);
        let fan_out = XavierInitializer::new(RandomType::Gaussian, FactorType::Out, 2.0);
        assert!((fan_in.scale(&ctx) - (2.0f32 / 16.0).sqrt()).abs() < 1e-6);
        assert!((fan_out.scale(&ctx) - (2.0f32 / 4.0).sqrt()).abs() < 1e-6);
        assert_eq!(fan_in.fill(&ctx).unwrap().shape(), &[4, 16]);
    }
}
