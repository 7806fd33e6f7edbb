use super::{InitContext, Initializer};
use crate::error::Result;
use ndarray::{ArrayD, IxDyn};

/// Fills every element with the same value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantInitializer {
    pub value: f32,
}

impl ConstantInitializer {
    pub fn new(value: f32) -> Self {
        Self { value }
    }

    pub fn zeros() -> Self {
        Self::new(0.0)
    }

    pub fn ones() -> Self {
        Self::new(1.0)
    }
}

impl Initializer for ConstantInitializer {
    fn fill(&self, ctx: &InitContext<'_>) -> Result<ArrayD<f32>> {
        Ok(ArrayD::from_elem(IxDyn(ctx.shape), ctx.dtype.round(self.value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DType;

    #[test]
    fn test_constant_fill() {
        let ctx = InitContext::new("gamma", &[2, 3], DType::F32);
        let arr = ConstantInitializer::ones().fill(&ctx).unwrap();
        assert_eq!(arr.shape(), &[2, 3]);
        assert!(arr.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_scalar_shape() {
        let ctx = InitContext::new("scale", &[], DType::F32);
        let arr = ConstantInitializer::new(0.5).fill(&ctx).unwrap();
        assert_eq!(arr.ndim(), 0);
        assert_eq!(arr.sum(), 0.5);
    }
}
