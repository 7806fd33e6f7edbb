//! Module defining the core `Block` trait for all neural network layers.
//!
//! A block is either a primitive operation or a composite owning named child
//! blocks. The trait is split in two:
//!
//! - [`Block`] holds the capabilities each variant implements: computation,
//!   shape inference, direct parameters, children and lifecycle hooks.
//! - [`BlockExt`] holds the tree algorithms that are identical for every
//!   variant: lazy initialization, parameter flattening, initializer
//!   propagation and state snapshots. It is implemented for every block,
//!   including `dyn Block`.
//!
//! Children are owned outright (`Box<dyn Block>` or plain fields), so a model
//! is a strict tree without shared sub-blocks.

use crate::error::{BlockError, Result};
use crate::initializer::Initializer;
use crate::nn::parameter::Parameter;
use crate::pairlist::PairList;
use crate::serialization::safetensors_io::{decode_tensors, encode_tensors};
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};
use dyn_clone::DynClone;
use ndarray::ArrayD;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Separator between a child's name and the names inside it.
pub const NAME_SEPARATOR: &str = "_";

/// Joins a child name and an inner (possibly already qualified) name.
pub fn qualified_name(prefix: &str, name: &str) -> String {
    format!("{}{}{}", prefix, NAME_SEPARATOR, name)
}

/// Strips `child` and the separator from a qualified name.
pub(crate) fn strip_child_prefix<'n>(name: &'n str, child: &str) -> Option<&'n str> {
    name.strip_prefix(child)?.strip_prefix(NAME_SEPARATOR)
}

/// Shape of the first input; most blocks take exactly one.
pub(crate) fn head_shape<'s>(op: &str, input_shapes: &'s [Shape]) -> Result<&'s Shape> {
    input_shapes.first().ok_or_else(|| {
        BlockError::InvalidInput(format!("{} expects at least one input shape", op))
    })
}

/// Trait defining the common interface for all layers.
///
/// Most methods have defaults so a variant only spells out what it actually
/// has: a primitive without parameters implements `forward_internal`,
/// `output_shape`, `describe_input` and the two (empty) parameter accessors.
pub trait Block: DynClone + fmt::Debug + Send + Sync {
    /// Short type name, used to name children automatically.
    fn kind(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// Computes the outputs. Called by [`BlockExt::forward_with`] once the
    /// direct parameters are materialized; composites forward their children
    /// through `BlockExt::forward_with` so each child initializes itself.
    fn forward_internal(&mut self, inputs: &NDList, options: &Options) -> Result<NDList>;

    /// Hook for a block's own gradient bookkeeping.
    fn backward(&mut self) {}

    /// Shape `forward` produces for inputs of the given shapes. Must not need
    /// materialized parameters.
    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape>;

    /// Parameters owned by this block itself, excluding descendants.
    fn direct_parameters(&self) -> Vec<&Parameter>;

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter>;

    /// Immediate children in construction order.
    fn children(&self) -> PairList<&str, &dyn Block> {
        PairList::new()
    }

    fn children_mut(&mut self) -> PairList<&str, &mut dyn Block> {
        PairList::new()
    }

    /// Runs before the direct parameters are materialized, with the shapes
    /// of the triggering inputs. Typically validates them.
    fn before_initialize(&mut self, _input_shapes: &[Shape]) -> Result<()> {
        Ok(())
    }

    /// Eagerly initializes the children for the given input shapes. Leaves
    /// have nothing to do; composites propagate shapes down the tree.
    fn initialize_children(&mut self, _input_shapes: &[Shape]) -> Result<()> {
        Ok(())
    }

    /// Converts the block's parameters to another precision.
    fn cast(&mut self, dtype: DType) -> Result<()> {
        Err(BlockError::Unsupported(format!(
            "{} cannot be cast to {}",
            self.kind(),
            dtype
        )))
    }

    /// Expected inputs, independent of any particular call.
    fn describe_input(&self) -> Vec<DataDesc>;

    /// Shape parameter `name` would have for inputs of the given shapes.
    ///
    /// Leaves resolve their direct parameter names; composites also resolve
    /// qualified names of their descendants.
    fn parameter_shape(&self, name: &str, _input_shapes: &[Shape]) -> Result<Shape> {
        Err(BlockError::NotFound(name.to_string()))
    }

    /// Checks shapes about to be assigned to the direct parameters, keyed by
    /// direct parameter name, against the block's configuration. No inputs
    /// are available here, so only dimensions fixed at construction and
    /// agreement between parameters can be checked.
    fn check_parameter_shapes(&self, _shapes: &PairList<&str, Shape>) -> Result<()> {
        Ok(())
    }
}

dyn_clone::clone_trait_object!(Block);

/// Tree algorithms shared by every block.
pub trait BlockExt: Block {
    /// Forward pass with no runtime options.
    fn forward(&mut self, inputs: &NDList) -> Result<NDList> {
        self.forward_with(inputs, &Options::new())
    }

    /// Forward pass. Materializes the direct parameters from `inputs` first
    /// if needed.
    fn forward_with(&mut self, inputs: &NDList, options: &Options) -> Result<NDList> {
        self.ensure_initialized(inputs)?;
        log::trace!("forward {} with input shapes {:?}", self.kind(), inputs.shapes());
        self.forward_internal(inputs, options)
    }

    /// True iff every direct parameter is materialized.
    fn is_initialized(&self) -> bool {
        self.direct_parameters().iter().all(|p| p.is_initialized())
    }

    /// Materializes the direct parameters for `inputs` unless they already
    /// are. Does not touch children.
    fn ensure_initialized(&mut self, inputs: &NDList) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        materialize_direct(self, &inputs.shapes())
    }

    /// Eagerly initializes the whole tree from input shapes alone.
    fn initialize(&mut self, input_shapes: &[Shape]) -> Result<()> {
        if !self.is_initialized() {
            materialize_direct(self, input_shapes)?;
        }
        self.initialize_children(input_shapes)
    }

    /// Every parameter of the tree keyed by its qualified name: direct
    /// parameters first, then each child's parameters in child order, each
    /// prefixed with the child's name.
    fn parameters(&self) -> PairList<String, &Parameter> {
        let mut params = PairList::new();
        for param in self.direct_parameters() {
            params.add(param.name().to_string(), param);
        }
        for (child_name, child) in self.children() {
            for (name, param) in child.parameters() {
                params.add(qualified_name(child_name, &name), param);
            }
        }
        params
    }

    /// Assigns `initializer` to every parameter of the tree. Parameters that
    /// already have an explicit initializer keep it unless `overwrite`.
    fn set_initializer(&mut self, initializer: Arc<dyn Initializer>, overwrite: bool) -> &mut Self {
        for param in self.direct_parameters_mut() {
            param.set_initializer(Arc::clone(&initializer), overwrite);
        }
        for (_, child) in self.children_mut() {
            child.set_initializer(Arc::clone(&initializer), overwrite);
        }
        self
    }

    /// Assigns `initializer` to the direct parameter `name` only.
    /// Descendants are never searched.
    fn set_initializer_for(
        &mut self,
        initializer: Arc<dyn Initializer>,
        name: &str,
        overwrite: bool,
    ) -> Result<&mut Self> {
        let param = self
            .direct_parameters_mut()
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| BlockError::NotFound(name.to_string()))?;
        param.set_initializer(initializer, overwrite);
        Ok(self)
    }

    /// Snapshot of every parameter value, keyed by qualified name.
    fn encode(&self) -> Result<Vec<u8>> {
        let params = self.parameters();
        let mut tensors = Vec::with_capacity(params.len());
        for (name, param) in params.iter() {
            let value = param
                .array()
                .ok_or_else(|| BlockError::NotInitialized(name.clone()))?;
            tensors.push((name.as_str(), value, param.dtype()));
        }
        Ok(encode_tensors(tensors)?)
    }

    /// Restores a snapshot produced by [`BlockExt::encode`] on the same block
    /// implementation. Nothing is written unless the whole snapshot matches
    /// the tree.
    fn load_encoded(&mut self, bytes: &[u8]) -> Result<()> {
        let mut tensors = decode_tensors(bytes)?;
        {
            let params = self.parameters();
            for (name, param) in params.iter() {
                let (value, _) = tensors.get(name.as_str()).ok_or_else(|| {
                    BlockError::NotFound(format!("{} (missing from encoded state)", name))
                })?;
                if let Some(shape) = param.shape() {
                    if shape != value.shape() {
                        return Err(BlockError::shape(
                            format!("load_encoded '{}'", name),
                            format!("block has {:?}, encoded state has {:?}", shape, value.shape()),
                        ));
                    }
                }
            }
            if let Some(extra) = tensors.keys().find(|k| !params.contains_key(k.as_str())) {
                return Err(BlockError::InvalidInput(format!(
                    "encoded state has tensor '{}' the block does not own",
                    extra
                )));
            }
        }
        check_encoded_shapes(self, None, &tensors)?;
        log::debug!("loading {} tensors into {}", tensors.len(), self.kind());
        assign_tensors(self, None, &mut tensors);
        Ok(())
    }

    /// Number of scalar values held by materialized parameters.
    fn parameter_count(&self) -> usize {
        self.parameters()
            .values()
            .filter_map(|p| p.array())
            .map(|arr| arr.len())
            .sum()
    }
}

impl<B: Block + ?Sized> BlockExt for B {}

/// Materializes every uninitialized direct parameter of `block`.
///
/// All shapes are computed before any value is written. If an initializer
/// fails, the parameters materialized by this call are reset.
fn materialize_direct<B: Block + ?Sized>(block: &mut B, input_shapes: &[Shape]) -> Result<()> {
    block.before_initialize(input_shapes)?;

    let mut pending = Vec::new();
    for param in block.direct_parameters() {
        if !param.is_initialized() {
            let shape = block.parameter_shape(param.name(), input_shapes)?;
            pending.push((param.name().to_string(), shape));
        }
    }

    let mut failure = None;
    for param in block.direct_parameters_mut() {
        let Some((_, shape)) = pending.iter().find(|(name, _)| name == param.name()) else {
            continue;
        };
        if let Err(err) = param.initialize(shape) {
            failure = Some(err);
            break;
        }
    }

    if let Some(err) = failure {
        for param in block.direct_parameters_mut() {
            if pending.iter().any(|(name, _)| name == param.name()) {
                param.reset();
            }
        }
        log::warn!("initialization of {} failed, rolled back: {}", block.kind(), err);
        return Err(err);
    }
    Ok(())
}

/// Lets every block of the tree check the shapes it would receive.
fn check_encoded_shapes<B: Block + ?Sized>(
    block: &B,
    prefix: Option<&str>,
    tensors: &PairList<String, (ArrayD<f32>, DType)>,
) -> Result<()> {
    let qualify = |name: &str| match prefix {
        Some(prefix) => qualified_name(prefix, name),
        None => name.to_string(),
    };
    let mut shapes = PairList::new();
    for param in block.direct_parameters() {
        if let Some((value, _)) = tensors.get(qualify(param.name()).as_str()) {
            shapes.add(param.name(), value.shape().to_vec());
        }
    }
    block.check_parameter_shapes(&shapes)?;
    for (child_name, child) in block.children() {
        let child_prefix = qualify(child_name);
        check_encoded_shapes(child, Some(&child_prefix), tensors)?;
    }
    Ok(())
}

/// Fails unless `actual` equals `expected`.
pub(crate) fn expect_parameter_shape(
    op: &str,
    name: &str,
    actual: &[usize],
    expected: &[usize],
) -> Result<()> {
    if actual != expected {
        return Err(BlockError::shape(
            op,
            format!("'{}' must have shape {:?}, got {:?}", name, expected, actual),
        ));
    }
    Ok(())
}

/// Fails unless all `shapes` are vectors of one common length.
pub(crate) fn expect_common_vector(op: &str, shapes: &PairList<&str, Shape>) -> Result<()> {
    let mut len = None;
    for (name, shape) in shapes.iter() {
        if shape.len() != 1 {
            return Err(BlockError::shape(
                op,
                format!("'{}' must have rank 1, got {:?}", name, shape),
            ));
        }
        if let Some(expected) = len {
            expect_parameter_shape(op, name, shape, &[expected])?;
        } else {
            len = Some(shape[0]);
        }
    }
    Ok(())
}

fn assign_tensors<B: Block + ?Sized>(
    block: &mut B,
    prefix: Option<&str>,
    tensors: &mut PairList<String, (ArrayD<f32>, DType)>,
) {
    let qualify = |name: &str| match prefix {
        Some(prefix) => qualified_name(prefix, name),
        None => name.to_string(),
    };
    for param in block.direct_parameters_mut() {
        if let Some((value, dtype)) = tensors.remove(qualify(param.name()).as_str()) {
            param.cast(dtype);
            param.set_array(value);
        }
    }
    for (child_name, child) in block.children_mut() {
        let child_prefix = qualify(child_name);
        assign_tensors(child, Some(&child_prefix), tensors);
    }
}

/// Checks the naming invariant of a block tree: direct parameter names and
/// child names are unique, and no two parameters share a qualified name.
/// Composite builders call this when a child is added.
pub fn ensure_unique_names<B: Block + ?Sized>(block: &B) -> Result<()> {
    let mut direct = HashSet::new();
    for param in block.direct_parameters() {
        if !direct.insert(param.name()) {
            return Err(BlockError::ConstructionConflict(format!(
                "{} has two direct parameters named '{}'",
                block.kind(),
                param.name()
            )));
        }
    }

    let children = block.children();
    if let Some(name) = children.keys().find(|name| name.is_empty()) {
        return Err(BlockError::ConstructionConflict(format!(
            "{} has a child with an empty name '{}'",
            block.kind(),
            name
        )));
    }
    if let Some(name) = children.first_duplicate() {
        return Err(BlockError::ConstructionConflict(format!(
            "{} has two children named '{}'",
            block.kind(),
            name
        )));
    }

    let params = block.parameters();
    if let Some(name) = params.first_duplicate() {
        return Err(BlockError::ConstructionConflict(format!(
            "qualified parameter name '{}' is produced twice in {}",
            name,
            block.kind()
        )));
    }
    Ok(())
}
