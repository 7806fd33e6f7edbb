//! Модуль с реализацией слоя Embedding.
//!
//! Embedding слой преобразует целочисленные индексы в плотные векторы
//! фиксированной размерности. Индексы передаются как `f32`, хранящие целые
//! числа.

use crate::error::{BlockError, Result};
use crate::nn::block::{expect_parameter_shape, head_shape, Block};
use crate::nn::parameter::{Parameter, ParameterType};
use crate::pairlist::PairList;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

/// Конфигурация слоя Embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Количество уникальных индексов (размер словаря).
    pub num_embeddings: usize,
    /// Размерность embedding-вектора.
    pub embedding_dim: usize,
}

impl EmbeddingConfig {
    pub fn new(num_embeddings: usize, embedding_dim: usize) -> Self {
        Self {
            num_embeddings,
            embedding_dim,
        }
    }
}

/// Слой Embedding для преобразования индексов в плотные векторы.
///
/// Вход любой формы `[*]`, выход формы `[*, embedding_dim]`. Матрица весов
/// имеет форму `[num_embeddings, embedding_dim]` и не зависит от входа.
///
/// # Пример использования
///
/// ```ignore
/// let mut embedding = Embedding::new(10000, 256)?;
/// let embedded = embedding.forward(&token_ids)?; // [batch, seq_len, 256]
/// ```
#[derive(Debug, Clone)]
pub struct Embedding {
    pub config: EmbeddingConfig,
    weight: Parameter,
}

impl Embedding {
    pub fn new(num_embeddings: usize, embedding_dim: usize) -> Result<Self> {
        Self::from_config(EmbeddingConfig::new(num_embeddings, embedding_dim))
    }

    pub fn from_config(config: EmbeddingConfig) -> Result<Self> {
        if config.num_embeddings == 0 || config.embedding_dim == 0 {
            return Err(BlockError::InvalidConfig(format!(
                "Embedding sizes must be positive, got {} x {}",
                config.num_embeddings, config.embedding_dim
            )));
        }
        Ok(Self {
            config,
            weight: Parameter::new("weight", ParameterType::Weight),
        })
    }

    /// Создает слой с готовой матрицей весов, например предобученной.
    pub fn from_weight(weight: ArrayD<f32>) -> Result<Self> {
        if weight.ndim() != 2 {
            return Err(BlockError::shape(
                "Embedding",
                format!("weight must have rank 2, got {:?}", weight.shape()),
            ));
        }
        let mut embedding = Self::new(weight.shape()[0], weight.shape()[1])?;
        embedding.weight.set_array(weight);
        Ok(embedding)
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    fn weight_shape(&self) -> [usize; 2] {
        [self.config.num_embeddings, self.config.embedding_dim]
    }

    fn index(&self, value: f32) -> Result<usize> {
        let num = self.config.num_embeddings;
        if value.fract() != 0.0 || value < 0.0 || value >= num as f32 {
            return Err(BlockError::InvalidInput(format!(
                "embedding index {} is not an integer in [0, {})",
                value, num
            )));
        }
        Ok(value as usize)
    }
}

impl Block for Embedding {
    /// Выполняет embedding lookup.
    fn forward_internal(&mut self, inputs: &NDList, _options: &Options) -> Result<NDList> {
        let indices = inputs.head()?;
        let weight = self.weight.require_array()?;
        expect_parameter_shape("Embedding", "weight", weight.shape(), &self.weight_shape())?;
        let dim = self.config.embedding_dim;

        let mut out_shape = indices.shape().to_vec();
        out_shape.push(dim);
        let mut data = Vec::with_capacity(indices.len() * dim);
        for &value in indices.iter() {
            let row = weight.index_axis(Axis(0), self.index(value)?);
            data.extend(row.iter().copied());
        }
        let out = ArrayD::from_shape_vec(IxDyn(&out_shape), data)
            .map_err(|e| BlockError::shape("Embedding", e.to_string()))?;
        Ok(NDList::single(out))
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        let mut shape = head_shape("Embedding", input_shapes)?.clone();
        shape.push(self.config.embedding_dim);
        Ok(shape)
    }

    fn direct_parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight]
    }

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight]
    }

    fn cast(&mut self, dtype: DType) -> Result<()> {
        self.weight.cast(dtype);
        Ok(())
    }

    fn describe_input(&self) -> Vec<DataDesc> {
        vec![DataDesc::any("indices")]
    }

    fn parameter_shape(&self, name: &str, _input_shapes: &[Shape]) -> Result<Shape> {
        if name == "weight" {
            return Ok(self.weight_shape().to_vec());
        }
        Err(BlockError::NotFound(name.to_string()))
    }

    fn check_parameter_shapes(&self, shapes: &PairList<&str, Shape>) -> Result<()> {
        match shapes.get("weight") {
            Some(weight) => expect_parameter_shape("Embedding", "weight", weight, &self.weight_shape()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::block::BlockExt;
    use ndarray::arr2;

    fn lookup_table() -> Embedding {
        let weight = arr2(&[
            [1.0, 2.0, 3.0],    // index 0
            [4.0, 5.0, 6.0],    // index 1
            [7.0, 8.0, 9.0],    // index 2
            [10.0, 11.0, 12.0], // index 3
            [13.0, 14.0, 15.0], // index 4
        ])
        .into_dyn();
        Embedding::from_weight(weight).unwrap()
    }

    #[test]
    fn test_embedding_creation() {
        let embedding = Embedding::new(1000, 64).unwrap();
        assert_eq!(embedding.config.num_embeddings, 1000);
        assert_eq!(embedding.config.embedding_dim, 64);
        assert_eq!(embedding.parameters().len(), 1);
        assert!(Embedding::new(0, 4).is_err());
    }

    #[test]
    fn test_embedding_forward() {
        let mut embedding = lookup_table();
        assert!(embedding.is_initialized());

        let indices = ArrayD::from_shape_vec(IxDyn(&[2]), vec![0.0, 2.0]).unwrap();
        let out = embedding.forward(&NDList::single(indices)).unwrap();

        assert_eq!(out[0].shape(), &[2, 3]);
        let rows: Vec<f32> = out[0].iter().copied().collect();
        assert_eq!(rows, vec![1.0, 2.0, 3.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_embedding_2d_indices() {
        let mut embedding = Embedding::new(5, 4).unwrap();
        let indices =
            ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![0.0, 1.0, 2.0, 3.0, 4.0, 0.0]).unwrap();
        let x = NDList::single(indices);
        let out = embedding.forward(&x).unwrap();

        assert_eq!(out[0].shape(), &[2, 3, 4]);
        assert_eq!(out[0].shape().to_vec(), embedding.output_shape(&x.shapes()).unwrap());
    }

    #[test]
    fn test_embedding_rejects_weight_of_other_size() {
        let mut embedding = Embedding::new(20, 3).unwrap();
        embedding.weight.set_array(ArrayD::zeros(IxDyn(&[10, 3])));

        let indices = ArrayD::from_shape_vec(IxDyn(&[1]), vec![15.0]).unwrap();
        assert!(matches!(
            embedding.forward(&NDList::single(indices)),
            Err(BlockError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_embedding_index_out_of_range() {
        let mut embedding = lookup_table();
        for bad in [5.0f32, -1.0, 1.5] {
            let x = NDList::single(ArrayD::from_elem(IxDyn(&[1]), bad));
            assert!(matches!(embedding.forward(&x), Err(BlockError::InvalidInput(_))));
        }
    }
}
