//! Blocks wrapping plain functions.

use crate::error::{BlockError, Result};
use crate::nn::block::Block;
use crate::nn::parameter::Parameter;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};
use std::fmt;
use std::sync::Arc;

type LambdaFn = Arc<dyn Fn(&NDList) -> Result<NDList> + Send + Sync>;
type ShapeFn = Arc<dyn Fn(&[Shape]) -> Result<Shape> + Send + Sync>;

/// A block without parameters or children that applies a function to its
/// inputs.
///
/// Without a shape function, `output_shape` is `Unsupported`. Only the
/// identity accepts `cast`.
#[derive(Clone)]
pub struct LambdaBlock {
    name: &'static str,
    function: LambdaFn,
    shape_function: Option<ShapeFn>,
    dtype_agnostic: bool,
}

impl LambdaBlock {
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(&NDList) -> Result<NDList> + Send + Sync + 'static,
    {
        Self {
            name: "LambdaBlock",
            function: Arc::new(function),
            shape_function: None,
            dtype_agnostic: false,
        }
    }

    /// Attaches the output-shape contract of the function.
    pub fn with_output_shape<S>(mut self, shape_function: S) -> Self
    where
        S: Fn(&[Shape]) -> Result<Shape> + Send + Sync + 'static,
    {
        self.shape_function = Some(Arc::new(shape_function));
        self
    }

    /// Name reported by `kind`, used when the block is added to a sequence.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Returns its inputs unchanged.
    pub fn identity() -> Self {
        let mut identity = Self::new(|inputs| Ok(inputs.clone()))
            .with_output_shape(|shapes| {
                shapes.first().cloned().ok_or_else(|| {
                    BlockError::InvalidInput("identity expects at least one input shape".to_string())
                })
            })
            .with_name("Identity");
        identity.dtype_agnostic = true;
        identity
    }
}

impl fmt::Debug for LambdaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaBlock")
            .field("name", &self.name)
            .field("has_shape_function", &self.shape_function.is_some())
            .finish()
    }
}

impl Block for LambdaBlock {
    fn kind(&self) -> &'static str {
        self.name
    }

    fn forward_internal(&mut self, inputs: &NDList, _options: &Options) -> Result<NDList> {
        (self.function)(inputs)
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        match &self.shape_function {
            Some(shape_function) => shape_function(input_shapes),
            None => Err(BlockError::Unsupported(format!(
                "{} has no output shape function",
                self.name
            ))),
        }
    }

    fn cast(&mut self, dtype: DType) -> Result<()> {
        if self.dtype_agnostic {
            return Ok(());
        }
        Err(BlockError::Unsupported(format!(
            "{} cannot be cast to {}",
            self.name, dtype
        )))
    }

    fn direct_parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    fn describe_input(&self) -> Vec<DataDesc> {
        vec![DataDesc::any("data")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::block::BlockExt;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_identity() {
        let mut identity = LambdaBlock::identity();
        let x = NDList::single(ArrayD::from_elem(IxDyn(&[2, 2]), 3.0));

        assert_eq!(identity.forward(&x).unwrap(), x);
        assert_eq!(identity.output_shape(&x.shapes()).unwrap(), vec![2, 2]);
        assert_eq!(identity.kind(), "Identity");
        assert!(identity.is_initialized());
        assert!(identity.parameters().is_empty());
    }

    #[test]
    fn test_lambda_without_shape_function() {
        let mut double = LambdaBlock::new(|inputs| Ok(inputs.iter().map(|x| x * 2.0).collect()));
        let x = NDList::single(ArrayD::ones(IxDyn(&[3])));

        assert_eq!(double.forward(&x).unwrap()[0][[1]], 2.0);
        assert!(matches!(
            double.output_shape(&x.shapes()),
            Err(BlockError::Unsupported(_))
        ));
    }

    #[test]
    fn test_lambda_rejects_cast() {
        let mut negate = LambdaBlock::new(|inputs| Ok(inputs.iter().map(|x| -x).collect()));
        assert!(matches!(negate.cast(DType::F16), Err(BlockError::Unsupported(_))));
    }

    #[test]
    fn test_identity_accepts_cast() {
        let mut identity = LambdaBlock::identity();
        identity.cast(DType::BF16).unwrap();
        let x = NDList::single(ArrayD::from_elem(IxDyn(&[2]), 0.1));
        assert_eq!(identity.forward(&x).unwrap(), x);
    }
}
