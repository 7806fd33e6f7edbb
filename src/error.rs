//! Error types shared by blocks, parameters and initializers.

use crate::serialization::SafeTensorsError;
use crate::tensor::Shape;
use thiserror::Error;

/// Errors raised while building, initializing or running a block tree.
///
/// Every failure is returned synchronously to the caller of the offending
/// operation; nothing is retried or swallowed internally.
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Parameter '{0}' not found. Check the parameter name against Block::direct_parameters() or BlockExt::parameters().")]
    NotFound(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Shape mismatch in {op}: {reason}")]
    ShapeMismatch { op: String, reason: String },

    #[error("Construction conflict: {0}. Child names and qualified parameter names must be unique within a block.")]
    ConstructionConflict(String),

    #[error("Parameter '{0}' is not initialized. Run a forward pass or BlockExt::initialize() first.")]
    NotInitialized(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SafeTensorsError),
}

impl BlockError {
    pub(crate) fn shape(op: impl Into<String>, reason: impl Into<String>) -> Self {
        BlockError::ShapeMismatch {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Rank check used by the shape contracts of most blocks.
    pub(crate) fn check_min_rank(op: &str, shape: &Shape, min_rank: usize) -> Result<()> {
        if shape.len() < min_rank {
            return Err(Self::shape(
                op,
                format!("expected rank >= {}, got {:?} (rank {})", min_rank, shape, shape.len()),
            ));
        }
        Ok(())
    }

    /// Rejects shapes with a zero-sized dimension.
    pub(crate) fn check_positive(op: &str, shape: &Shape) -> Result<()> {
        if let Some(axis) = shape.iter().position(|&d| d == 0) {
            return Err(Self::shape(
                op,
                format!("dimension {} of {:?} must be positive", axis, shape),
            ));
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, BlockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_and_positive_checks() {
        assert!(BlockError::check_min_rank("Linear", &vec![2, 3], 2).is_ok());
        assert!(matches!(
            BlockError::check_min_rank("Linear", &vec![3], 2),
            Err(BlockError::ShapeMismatch { .. })
        ));
        assert!(BlockError::check_positive("Linear", &vec![2, 3]).is_ok());
        assert!(matches!(
            BlockError::check_positive("Linear", &vec![2, 0]),
            Err(BlockError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_error_messages() {
        let err = BlockError::NotFound("foo".to_string());
        assert!(err.to_string().contains("'foo'"));

        let err = BlockError::shape("LayerNorm", "rank 0");
        assert_eq!(err.to_string(), "Shape mismatch in LayerNorm: rank 0");
    }
}
