//! Parallel composition: every child sees the same input.

use crate::error::{BlockError, Result};
use crate::nn::block::{ensure_unique_names, head_shape, strip_child_prefix, Block, BlockExt};
use crate::nn::parameter::Parameter;
use crate::nn::sequential::{borrow_children, borrow_children_mut, cast_children, Children};
use crate::pairlist::PairList;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};
use ndarray::{concatenate, ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};

/// How the outputs of the branches are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Join {
    /// Concatenate along the given axis.
    Concat(usize),
    /// Element-wise sum; every branch must produce the same shape.
    Add,
}

impl Join {
    fn shape(&self, shapes: &[Shape]) -> Result<Shape> {
        let first = head_shape("ParallelBlock", shapes)?;
        match *self {
            Join::Add => {
                if let Some(other) = shapes.iter().find(|s| *s != first) {
                    return Err(BlockError::shape(
                        "ParallelBlock",
                        format!("cannot add branch outputs {:?} and {:?}", first, other),
                    ));
                }
                Ok(first.clone())
            }
            Join::Concat(axis) => {
                let mut joined = first.clone();
                BlockError::check_min_rank("ParallelBlock", first, axis + 1)?;
                for other in &shapes[1..] {
                    let compatible = other.len() == first.len()
                        && other
                            .iter()
                            .zip(first.iter())
                            .enumerate()
                            .all(|(i, (a, b))| i == axis || a == b);
                    if !compatible {
                        return Err(BlockError::shape(
                            "ParallelBlock",
                            format!(
                                "cannot concatenate {:?} and {:?} along axis {}",
                                first, other, axis
                            ),
                        ));
                    }
                    joined[axis] += other[axis];
                }
                Ok(joined)
            }
        }
    }

    fn apply(&self, outputs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        let shapes: Vec<Shape> = outputs.iter().map(|o| o.shape().to_vec()).collect();
        self.shape(&shapes)?;
        match *self {
            Join::Add => {
                let mut sum = outputs[0].clone();
                for other in &outputs[1..] {
                    sum += other;
                }
                Ok(sum)
            }
            Join::Concat(axis) => {
                let views: Vec<ArrayViewD<'_, f32>> = outputs.iter().map(|o| o.view()).collect();
                concatenate(Axis(axis), &views)
                    .map_err(|e| BlockError::shape("ParallelBlock", e.to_string()))
            }
        }
    }
}

/// Branches applied to the same input, outputs joined with a [`Join`].
///
/// Each branch contributes the first tensor of its output.
#[derive(Debug, Clone)]
pub struct ParallelBlock {
    join: Join,
    children: Children,
}

impl ParallelBlock {
    pub fn new(join: Join) -> Self {
        Self {
            join,
            children: Children::new(),
        }
    }

    /// Appends a branch named after its position and kind.
    pub fn add(self, block: impl Block + 'static) -> Result<Self> {
        let name = format!("{:02}{}", self.children.len(), block.kind());
        self.insert(name, Box::new(block))
    }

    pub fn add_named(self, name: &str, block: impl Block + 'static) -> Result<Self> {
        self.insert(name.to_string(), Box::new(block))
    }

    fn insert(mut self, name: String, block: Box<dyn Block>) -> Result<Self> {
        self.children.add(name, block);
        ensure_unique_names(&self)?;
        Ok(self)
    }

    pub fn join(&self) -> Join {
        self.join
    }
}

impl Block for ParallelBlock {
    fn forward_internal(&mut self, inputs: &NDList, options: &Options) -> Result<NDList> {
        if self.children.is_empty() {
            return Err(BlockError::InvalidInput(
                "ParallelBlock has no branches".to_string(),
            ));
        }
        let mut outputs = Vec::with_capacity(self.children.len());
        for (_, child) in self.children.iter_mut() {
            let output = child.forward_with(inputs, options)?;
            outputs.push(output.head()?.clone());
        }
        Ok(NDList::single(self.join.apply(&outputs)?))
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        let shapes = self
            .children
            .values()
            .map(|child| child.output_shape(input_shapes))
            .collect::<Result<Vec<_>>>()?;
        self.join.shape(&shapes)
    }

    fn direct_parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    fn children(&self) -> PairList<&str, &dyn Block> {
        borrow_children(&self.children)
    }

    fn children_mut(&mut self) -> PairList<&str, &mut dyn Block> {
        borrow_children_mut(&mut self.children)
    }

    fn initialize_children(&mut self, input_shapes: &[Shape]) -> Result<()> {
        for (_, child) in self.children.iter_mut() {
            child.initialize(input_shapes)?;
        }
        Ok(())
    }

    fn cast(&mut self, dtype: DType) -> Result<()> {
        cast_children(&mut self.children, dtype)
    }

    fn describe_input(&self) -> Vec<DataDesc> {
        match self.children.values().next() {
            Some(first) => first.describe_input(),
            None => vec![DataDesc::any("data")],
        }
    }

    fn parameter_shape(&self, name: &str, input_shapes: &[Shape]) -> Result<Shape> {
        for (child_name, child) in self.children.iter() {
            if let Some(inner) = strip_child_prefix(name, child_name) {
                match child.parameter_shape(inner, input_shapes) {
                    Err(BlockError::NotFound(_)) => {}
                    result => return result,
                }
            }
        }
        Err(BlockError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initializer::ConstantInitializer;
    use crate::nn::{Activation, LambdaBlock, Linear};
    use ndarray::{array, IxDyn};
    use std::sync::Arc;

    #[test]
    fn test_concat_branches() {
        let mut block = ParallelBlock::new(Join::Concat(1))
            .add(Linear::new(3).unwrap())
            .unwrap()
            .add(Linear::new(5).unwrap())
            .unwrap();
        let x = NDList::single(ArrayD::ones(IxDyn(&[2, 4])));
        let y = block.forward(&x).unwrap();

        assert_eq!(y[0].shape(), &[2, 8]);
        assert_eq!(block.output_shape(&x.shapes()).unwrap(), vec![2, 8]);
        let names: Vec<String> = block.parameters().keys().cloned().collect();
        assert_eq!(
            names,
            vec!["00Linear_weight", "00Linear_bias", "01Linear_weight", "01Linear_bias"]
        );
    }

    #[test]
    fn test_add_residual() {
        let mut block = ParallelBlock::new(Join::Add)
            .add_named("shortcut", LambdaBlock::identity())
            .unwrap()
            .add_named("body", Activation::ReLU)
            .unwrap();
        let x = NDList::single(array![-1.0f32, 2.0].into_dyn());
        let y = block.forward(&x).unwrap();
        assert_eq!(y[0], array![-1.0f32, 4.0].into_dyn());
    }

    #[test]
    fn test_mismatched_add_is_rejected() {
        let mut block = ParallelBlock::new(Join::Add)
            .add(Linear::new(3).unwrap())
            .unwrap()
            .add(Linear::new(4).unwrap())
            .unwrap();
        block.set_initializer(Arc::new(ConstantInitializer::new(0.1)), false);
        let x = NDList::single(ArrayD::ones(IxDyn(&[1, 2])));

        assert!(block.output_shape(&x.shapes()).is_err());
        assert!(matches!(block.forward(&x), Err(BlockError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_eager_initialize_branches() {
        let mut block = ParallelBlock::new(Join::Concat(0))
            .add(Linear::new(2).unwrap())
            .unwrap()
            .add(Linear::new(2).unwrap())
            .unwrap();
        block.initialize(&[vec![3]]).unwrap();
        assert_eq!(block.parameter_count(), 2 * (2 * 3 + 2));
        assert_eq!(block.parameter_shape("01Linear_weight", &[vec![3]]).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_empty_parallel_fails() {
        let mut block = ParallelBlock::new(Join::Add);
        let x = NDList::single(ArrayD::ones(IxDyn(&[1])));
        assert!(matches!(block.forward(&x), Err(BlockError::InvalidInput(_))));
    }
}
