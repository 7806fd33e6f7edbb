//! Module for shape inference over blocks.
//!
//! Validates input shapes against a block's declared inputs, predicts the
//! output shape without running the block, and checks that a real forward
//! pass agrees with the prediction.

use crate::error::BlockError;
use crate::nn::{Block, BlockExt};
use crate::tensor::{NDList, Options, Shape};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShapeInferenceError {
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("Block '{block}' expects {expected} input(s), got {actual}. \
             Check the inputs against Block::describe_input().")]
    MissingInputs {
        block: String,
        expected: usize,
        actual: usize,
    },

    #[error("Input {index} of block '{block}' has shape {shape:?}, which does not match '{descriptor}'.")]
    InputRejected {
        block: String,
        index: usize,
        descriptor: String,
        shape: Shape,
    },

    #[error("Block '{0}' produced no output tensors.")]
    EmptyOutput(String),

    #[error("Block '{block}' declared output shape {inferred:?} but forward produced {actual:?}. \
             The block's output_shape() and forward() disagree.")]
    ForwardMismatch {
        block: String,
        inferred: Shape,
        actual: Shape,
    },
}

type Result<T> = std::result::Result<T, ShapeInferenceError>;

/// Shape checks for a block.
pub struct ShapeInference;

impl ShapeInference {
    /// Checks `input_shapes` against [`Block::describe_input`]. Extra inputs
    /// beyond the described ones are not checked.
    pub fn check_inputs<B: Block + ?Sized>(block: &B, input_shapes: &[Shape]) -> Result<()> {
        let descriptors = block.describe_input();
        if input_shapes.len() < descriptors.len() {
            return Err(ShapeInferenceError::MissingInputs {
                block: block.kind().to_string(),
                expected: descriptors.len(),
                actual: input_shapes.len(),
            });
        }
        for (index, (descriptor, shape)) in descriptors.iter().zip(input_shapes).enumerate() {
            if !descriptor.accepts(shape) {
                return Err(ShapeInferenceError::InputRejected {
                    block: block.kind().to_string(),
                    index,
                    descriptor: descriptor.to_string(),
                    shape: shape.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validates the inputs and returns the output shape, without touching
    /// any parameter.
    pub fn infer<B: Block + ?Sized>(block: &B, input_shapes: &[Shape]) -> Result<Shape> {
        Self::check_inputs(block, input_shapes)?;
        Ok(block.output_shape(input_shapes)?)
    }

    /// Runs `forward` and checks its first output against the inferred
    /// shape. Returns the outputs on success.
    pub fn verify_forward<B: Block + ?Sized>(
        block: &mut B,
        inputs: &NDList,
        options: &Options,
    ) -> Result<NDList> {
        let inferred = Self::infer(block, &inputs.shapes())?;
        let outputs = block.forward_with(inputs, options)?;
        let actual = outputs
            .first()
            .map(|o| o.shape().to_vec())
            .ok_or_else(|| ShapeInferenceError::EmptyOutput(block.kind().to_string()))?;
        if actual != inferred {
            return Err(ShapeInferenceError::ForwardMismatch {
                block: block.kind().to_string(),
                inferred,
                actual,
            });
        }
        log::trace!("{} verified: output shape {:?}", block.kind(), actual);
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{
        Activation, BatchNorm, Embedding, FeedForward, LambdaBlock, LayerNorm, Linear, SequentialBlock,
    };
    use crate::tensor::DataDesc;
    use ndarray::{ArrayD, IxDyn};

    #[derive(Debug, Clone)]
    struct Pairwise;

    impl Block for Pairwise {
        fn forward_internal(&mut self, inputs: &NDList, _options: &Options) -> crate::error::Result<NDList> {
            Ok(NDList::single(&inputs[0] + &inputs[1]))
        }

        fn output_shape(&self, input_shapes: &[Shape]) -> crate::error::Result<Shape> {
            Ok(input_shapes[0].clone())
        }

        fn direct_parameters(&self) -> Vec<&crate::nn::Parameter> {
            Vec::new()
        }

        fn direct_parameters_mut(&mut self) -> Vec<&mut crate::nn::Parameter> {
            Vec::new()
        }

        fn describe_input(&self) -> Vec<DataDesc> {
            vec![
                DataDesc::new("left", vec![None, Some(2)]),
                DataDesc::new("right", vec![None, Some(2)]),
            ]
        }
    }

    #[test]
    fn test_check_inputs() {
        assert!(ShapeInference::check_inputs(&Pairwise, &[vec![4, 2], vec![4, 2]]).is_ok());
        assert!(matches!(
            ShapeInference::check_inputs(&Pairwise, &[vec![4, 2]]),
            Err(ShapeInferenceError::MissingInputs { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            ShapeInference::check_inputs(&Pairwise, &[vec![4, 2], vec![4, 3]]),
            Err(ShapeInferenceError::InputRejected { index: 1, .. })
        ));
    }

    #[test]
    fn test_infer_does_not_initialize() {
        let block = SequentialBlock::new()
            .add(Linear::new(7).unwrap())
            .unwrap()
            .add(Activation::Tanh)
            .unwrap();
        assert_eq!(ShapeInference::infer(&block, &[vec![3, 5]]).unwrap(), vec![3, 7]);
        assert!(block.parameters().values().all(|p| !p.is_initialized()));
    }

    #[test]
    fn test_every_block_agrees_with_forward() {
        let x = NDList::single(ArrayD::ones(IxDyn(&[2, 3, 4])));
        let options = Options::new();
        let mut blocks: Vec<Box<dyn Block>> = vec![
            Box::new(Linear::new(5).unwrap()),
            Box::new(Activation::Softmax),
            Box::new(LayerNorm::new()),
            Box::new(BatchNorm::new()),
            Box::new(Embedding::new(2, 3).unwrap()),
            Box::new(FeedForward::new(8, 2).unwrap()),
            Box::new(LambdaBlock::identity()),
        ];
        for block in blocks.iter_mut() {
            ShapeInference::verify_forward(block.as_mut(), &x, &options).unwrap();
        }
    }

    #[test]
    fn test_lying_block_is_caught() {
        let mut liar = LambdaBlock::new(|inputs| Ok(inputs.clone()))
            .with_output_shape(|_| Ok(vec![1]));
        let x = NDList::single(ArrayD::ones(IxDyn(&[2, 2])));
        assert!(matches!(
            ShapeInference::verify_forward(&mut liar, &x, &Options::new()),
            Err(ShapeInferenceError::ForwardMismatch { .. })
        ));
    }
}
