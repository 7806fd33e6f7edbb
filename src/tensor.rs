//! Module defining the data types blocks exchange: `NDList`, `Shape`, `DType`
//! and the input descriptor `DataDesc`.
//!
//! Tensors are plain `ndarray::ArrayD<f32>` values living on the host. Reduced
//! precision (`F16`, `BF16`) is represented by rounding the stored `f32`
//! values through `half`, so every block computes in `f32` regardless of the
//! declared dtype.

use crate::error::{BlockError, Result};
use crate::pairlist::PairList;
use half::{bf16, f16};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Tensor shape.
pub type Shape = Vec<usize>;

/// Numeric precision of a parameter or input.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DType {
    #[default]
    F32,
    F16,
    BF16,
}

impl DType {
    /// Rounds a value to the nearest number representable in this dtype.
    pub fn round(self, value: f32) -> f32 {
        match self {
            DType::F32 => value,
            DType::F16 => f16::from_f32(value).to_f32(),
            DType::BF16 => bf16::from_f32(value).to_f32(),
        }
    }

    /// Rounds every element of `array` in place.
    pub fn round_array(self, array: &mut ArrayD<f32>) {
        if self != DType::F32 {
            array.mapv_inplace(|v| self.round(v));
        }
    }

    /// Size of one element in bytes when serialized.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
        };
        f.write_str(name)
    }
}

/// Describes one expected input of a block: its name, dtype and shape
/// contract.
///
/// `dims == None` accepts any rank. Otherwise the rank must match and every
/// `Some(d)` entry must equal the corresponding dimension; `None` entries are
/// free (typically the batch axis or a dimension inferred lazily).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDesc {
    pub name: String,
    pub dims: Option<Vec<Option<usize>>>,
    pub dtype: DType,
}

impl DataDesc {
    pub fn new(name: &str, dims: Vec<Option<usize>>) -> Self {
        Self {
            name: name.to_string(),
            dims: Some(dims),
            dtype: DType::F32,
        }
    }

    /// Descriptor accepting a tensor of any shape.
    pub fn any(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dims: None,
            dtype: DType::F32,
        }
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Checks whether `shape` satisfies this descriptor.
    pub fn accepts(&self, shape: &[usize]) -> bool {
        match &self.dims {
            None => true,
            Some(dims) => {
                dims.len() == shape.len()
                    && dims
                        .iter()
                        .zip(shape)
                        .all(|(expected, actual)| expected.map_or(true, |d| d == *actual))
            }
        }
    }
}

impl fmt::Display for DataDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        match &self.dims {
            None => write!(f, "(*)")?,
            Some(dims) => {
                let parts: Vec<String> = dims
                    .iter()
                    .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
                    .collect();
                write!(f, "({})", parts.join(", "))?;
            }
        }
        write!(f, " {}", self.dtype)
    }
}

/// Ordered list of tensors passed into and out of blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NDList(Vec<ArrayD<f32>>);

impl NDList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// List holding a single tensor.
    pub fn single(array: ArrayD<f32>) -> Self {
        Self(vec![array])
    }

    pub fn push(&mut self, array: ArrayD<f32>) {
        self.0.push(array);
    }

    /// First tensor of the list; most blocks take exactly one input.
    pub fn head(&self) -> Result<&ArrayD<f32>> {
        self.0
            .first()
            .ok_or_else(|| BlockError::InvalidInput("expected at least one input tensor".to_string()))
    }

    /// Shapes of every tensor, in order.
    pub fn shapes(&self) -> Vec<Shape> {
        self.0.iter().map(|a| a.shape().to_vec()).collect()
    }

    pub fn into_vec(self) -> Vec<ArrayD<f32>> {
        self.0
    }
}

impl Deref for NDList {
    type Target = [ArrayD<f32>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<ArrayD<f32>>> for NDList {
    fn from(arrays: Vec<ArrayD<f32>>) -> Self {
        Self(arrays)
    }
}

impl From<ArrayD<f32>> for NDList {
    fn from(array: ArrayD<f32>) -> Self {
        Self::single(array)
    }
}

impl FromIterator<ArrayD<f32>> for NDList {
    fn from_iter<I: IntoIterator<Item = ArrayD<f32>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for NDList {
    type Item = ArrayD<f32>;
    type IntoIter = std::vec::IntoIter<ArrayD<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Value of a named runtime option passed to `forward`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Named runtime options of a forward pass.
pub type Options = PairList<String, OptionValue>;

/// Option key switching blocks such as `BatchNorm` and `Dropout` to training
/// behavior.
pub const TRAINING: &str = "training";

impl PairList<String, OptionValue> {
    /// Options with only `training` set.
    pub fn training(training: bool) -> Self {
        let mut options = Self::new();
        options.add(TRAINING.to_string(), OptionValue::Bool(training));
        options
    }

    pub fn bool_option(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(OptionValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn is_training(&self) -> bool {
        self.bool_option(TRAINING).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_dtype_rounding() {
        assert_eq!(DType::F32.round(0.1), 0.1);
        assert_ne!(DType::F16.round(0.1), 0.1);
        assert!((DType::F16.round(0.1) - 0.1).abs() < 1e-3);
        assert!((DType::BF16.round(1.0) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_data_desc_accepts() {
        let desc = DataDesc::new("data", vec![None, Some(4)]);
        assert!(desc.accepts(&[8, 4]));
        assert!(!desc.accepts(&[8, 3]));
        assert!(!desc.accepts(&[4]));
        assert!(DataDesc::any("x").accepts(&[1, 2, 3]));
        assert_eq!(desc.to_string(), "data: (?, 4) f32");
    }

    #[test]
    fn test_ndlist_shapes() {
        let list: NDList = vec![
            ArrayD::zeros(IxDyn(&[2, 3])),
            ArrayD::zeros(IxDyn(&[4])),
        ]
        .into();
        assert_eq!(list.shapes(), vec![vec![2, 3], vec![4]]);
        assert_eq!(list.len(), 2);
        assert!(NDList::new().head().is_err());
    }

    #[test]
    fn test_training_option() {
        assert!(Options::training(true).is_training());
        assert!(!Options::new().is_training());
    }
}
