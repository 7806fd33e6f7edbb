//! Parameter summary of a block tree.

use crate::nn::{Block, BlockExt, ParameterType};
use crate::tensor::{DType, Shape};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One row of a [`BlockSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    /// Qualified name.
    pub name: String,
    pub kind: ParameterType,
    pub dtype: DType,
    /// `None` while the parameter is not materialized.
    pub shape: Option<Shape>,
    pub requires_grad: bool,
}

impl ParameterSummary {
    /// Number of scalar values, 0 while not materialized.
    pub fn count(&self) -> usize {
        self.shape.as_ref().map_or(0, |s| s.iter().product())
    }
}

/// Flattened view of every parameter of a block tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub kind: String,
    pub parameters: Vec<ParameterSummary>,
}

impl BlockSummary {
    pub fn of<B: Block + ?Sized>(block: &B) -> Self {
        let parameters = block
            .parameters()
            .iter()
            .map(|(name, param)| ParameterSummary {
                name: name.clone(),
                kind: param.kind(),
                dtype: param.dtype(),
                shape: param.shape().map(|s| s.to_vec()),
                requires_grad: param.requires_grad(),
            })
            .collect();
        Self {
            kind: block.kind().to_string(),
            parameters,
        }
    }

    /// Scalars held by materialized parameters.
    pub fn total_count(&self) -> usize {
        self.parameters.iter().map(|p| p.count()).sum()
    }

    pub fn trainable_count(&self) -> usize {
        self.parameters
            .iter()
            .filter(|p| p.requires_grad)
            .map(|p| p.count())
            .sum()
    }

    pub fn uninitialized(&self) -> impl Iterator<Item = &ParameterSummary> {
        self.parameters.iter().filter(|p| p.shape.is_none())
    }
}

impl fmt::Display for BlockSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .parameters
            .iter()
            .map(|p| p.name.len())
            .max()
            .unwrap_or(0)
            .max("parameter".len());
        writeln!(f, "{}", self.kind)?;
        writeln!(f, "{:<width$}  {:<16}  {:<5}  {:>10}", "parameter", "shape", "dtype", "count", width = width)?;
        for p in &self.parameters {
            let shape = match &p.shape {
                Some(shape) => format!("{:?}", shape),
                None => "uninitialized".to_string(),
            };
            writeln!(
                f,
                "{:<width$}  {:<16}  {:<5}  {:>10}",
                p.name,
                shape,
                p.dtype.to_string(),
                p.count(),
                width = width
            )?;
        }
        write!(
            f,
            "total: {} ({} trainable)",
            self.total_count(),
            self.trainable_count()
        )
    }
}
