//! Sequential composition: each child's output feeds the next child.

use crate::error::{BlockError, Result};
use crate::nn::block::{ensure_unique_names, head_shape, strip_child_prefix, Block, BlockExt};
use crate::nn::parameter::Parameter;
use crate::pairlist::PairList;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};

/// Children owned by a composite, in insertion order.
pub(crate) type Children = PairList<String, Box<dyn Block>>;

/// Casts every child of a composite or none of them.
pub(crate) fn cast_children(children: &mut Children, dtype: DType) -> Result<()> {
    let mut cast = children.clone();
    for (_, child) in cast.iter_mut() {
        child.cast(dtype)?;
    }
    *children = cast;
    Ok(())
}

pub(crate) fn borrow_children(children: &Children) -> PairList<&str, &dyn Block> {
    children
        .iter()
        .map(|(name, child)| (name.as_str(), child.as_ref()))
        .collect()
}

pub(crate) fn borrow_children_mut(children: &mut Children) -> PairList<&str, &mut dyn Block> {
    let mut borrowed: PairList<&str, &mut dyn Block> = PairList::with_capacity(children.len());
    for (name, child) in children.iter_mut() {
        borrowed.add(name.as_str(), child.as_mut());
    }
    borrowed
}

/// A chain of blocks applied one after another.
///
/// Children added with [`SequentialBlock::add`] are named
/// `"{index:02}{kind}"`, e.g. `"00Linear"`, `"01ReLU"`, so the parameters of
/// the first linear layer are `"00Linear_weight"` and `"00Linear_bias"`.
///
/// ```ignore
/// let mut mlp = SequentialBlock::new()
///     .add(Linear::new(128)?)?
///     .add(Activation::ReLU)?
///     .add(Linear::new(10)?)?;
/// let logits = mlp.forward(&batch)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SequentialBlock {
    children: Children,
}

impl SequentialBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a child named after its position and kind.
    pub fn add(self, block: impl Block + 'static) -> Result<Self> {
        self.add_boxed(Box::new(block))
    }

    pub fn add_boxed(self, block: Box<dyn Block>) -> Result<Self> {
        let name = format!("{:02}{}", self.children.len(), block.kind());
        self.insert(name, block)
    }

    /// Appends a child under a caller-chosen name.
    pub fn add_named(self, name: &str, block: impl Block + 'static) -> Result<Self> {
        self.insert(name.to_string(), Box::new(block))
    }

    fn insert(mut self, name: String, block: Box<dyn Block>) -> Result<Self> {
        self.children.add(name, block);
        ensure_unique_names(&self)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Block for SequentialBlock {
    fn forward_internal(&mut self, inputs: &NDList, options: &Options) -> Result<NDList> {
        let mut current = inputs.clone();
        for (_, child) in self.children.iter_mut() {
            current = child.forward_with(&current, options)?;
        }
        Ok(current)
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        let mut shape = head_shape("SequentialBlock", input_shapes)?.clone();
        let mut shapes = input_shapes.to_vec();
        for child in self.children.values() {
            shape = child.output_shape(&shapes)?;
            shapes = vec![shape.clone()];
        }
        Ok(shape)
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
        let mut shapes = input_shapes.to_vec();
        for (_, child) in self.children.iter_mut() {
            child.initialize(&shapes)?;
            shapes = vec![child.output_shape(&shapes)?];
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
        let mut shapes = input_shapes.to_vec();
        for (child_name, child) in self.children.iter() {
            if let Some(inner) = strip_child_prefix(name, child_name) {
                match child.parameter_shape(inner, &shapes) {
                    Err(BlockError::NotFound(_)) => {}
                    result => return result,
                }
            }
            shapes = vec![child.output_shape(&shapes)?];
        }
        Err(BlockError::NotFound(name.to_string()))
    }
}
