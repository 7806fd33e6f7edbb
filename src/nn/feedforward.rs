//! Модуль, реализующий слой FeedForward.

use crate::error::{BlockError, Result};
use crate::nn::block::{strip_child_prefix, Block, BlockExt};
use crate::nn::parameter::Parameter;
use crate::nn::{Activation, Linear};
use crate::pairlist::PairList;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};

/// Слой FeedForward, стандартный компонент блока Трансформера.
///
/// Состоит из двух линейных слоев с активацией между ними и применяется к
/// каждой позиции последовательности независимо.
/// Формула: `FFN(x) = act(xW₁ᵀ + b₁)W₂ᵀ + b₂`
///
/// Дочерние блоки хранятся в полях и называются `linear1`, `activation`,
/// `linear2`, поэтому параметры называются `linear1_weight`, `linear2_bias`
/// и т.д.
#[derive(Debug, Clone)]
pub struct FeedForward {
    /// Первый линейный слой, расширяющий размерность.
    linear1: Linear,
    activation: Activation,
    /// Второй линейный слой, сжимающий размерность до выходной.
    linear2: Linear,
}

impl FeedForward {
    /// Создает слой FeedForward с активацией ReLU.
    ///
    /// * `hidden_dim` - Размерность скрытого слоя (обычно в 4 раза больше входной).
    /// * `out_dim` - Размерность выходных векторов.
    pub fn new(hidden_dim: usize, out_dim: usize) -> Result<Self> {
        Ok(Self {
            linear1: Linear::new(hidden_dim)?,
            activation: Activation::ReLU,
            linear2: Linear::new(out_dim)?,
        })
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    fn hidden_shapes(&self, input_shapes: &[Shape]) -> Result<Vec<Shape>> {
        let hidden = self.linear1.output_shape(input_shapes)?;
        Ok(vec![self.activation.output_shape(&[hidden])?])
    }
}

impl Block for FeedForward {
    /// Прямой проход: `Linear -> Activation -> Linear`.
    fn forward_internal(&mut self, inputs: &NDList, options: &Options) -> Result<NDList> {
        let x = self.linear1.forward_with(inputs, options)?;
        let x = self.activation.forward_with(&x, options)?;
        self.linear2.forward_with(&x, options)
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        self.linear2.output_shape(&self.hidden_shapes(input_shapes)?)
    }

    fn direct_parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    fn children(&self) -> PairList<&str, &dyn Block> {
        let mut children: PairList<&str, &dyn Block> = PairList::with_capacity(3);
        children.add("linear1", &self.linear1);
        children.add("activation", &self.activation);
        children.add("linear2", &self.linear2);
        children
    }

    fn children_mut(&mut self) -> PairList<&str, &mut dyn Block> {
        let mut children: PairList<&str, &mut dyn Block> = PairList::with_capacity(3);
        children.add("linear1", &mut self.linear1);
        children.add("activation", &mut self.activation);
        children.add("linear2", &mut self.linear2);
        children
    }

    fn initialize_children(&mut self, input_shapes: &[Shape]) -> Result<()> {
        self.linear1.initialize(input_shapes)?;
        let hidden = self.hidden_shapes(input_shapes)?;
        self.linear2.initialize(&hidden)
    }

    fn cast(&mut self, dtype: DType) -> Result<()> {
        let mut cast = self.clone();
        cast.linear1.cast(dtype)?;
        cast.activation.cast(dtype)?;
        cast.linear2.cast(dtype)?;
        *self = cast;
        Ok(())
    }

    fn describe_input(&self) -> Vec<DataDesc> {
        self.linear1.describe_input()
    }

    fn parameter_shape(&self, name: &str, input_shapes: &[Shape]) -> Result<Shape> {
        if let Some(inner) = strip_child_prefix(name, "linear1") {
            return self.linear1.parameter_shape(inner, input_shapes);
        }
        if let Some(inner) = strip_child_prefix(name, "linear2") {
            return self
                .linear2
                .parameter_shape(inner, &self.hidden_shapes(input_shapes)?);
        }
        Err(BlockError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::ensure_unique_names;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_feedforward_parameter_names() {
        let ff = FeedForward::new(16, 4).unwrap();
        let names: Vec<String> = ff.parameters().keys().cloned().collect();
        assert_eq!(
            names,
            vec!["linear1_weight", "linear1_bias", "linear2_weight", "linear2_bias"]
        );
        assert!(ensure_unique_names(&ff).is_ok());
    }

    #[test]
    fn test_feedforward_forward() {
        let mut ff = FeedForward::new(16, 4).unwrap().with_activation(Activation::GELU);
        let x = NDList::single(ArrayD::ones(IxDyn(&[2, 3, 8])));
        let y = ff.forward(&x).unwrap();

        assert_eq!(y[0].shape(), &[2, 3, 4]);
        assert_eq!(ff.output_shape(&x.shapes()).unwrap(), vec![2, 3, 4]);
        assert_eq!(ff.parameter_count(), 16 * 8 + 16 + 4 * 16 + 4);
    }

    #[test]
    fn test_feedforward_parameter_shapes() {
        let ff = FeedForward::new(16, 4).unwrap();
        let shapes = vec![vec![1, 8]];
        assert_eq!(ff.parameter_shape("linear1_weight", &shapes).unwrap(), vec![16, 8]);
        assert_eq!(ff.parameter_shape("linear2_weight", &shapes).unwrap(), vec![4, 16]);
        assert!(ff.parameter_shape("linear3_weight", &shapes).is_err());
    }

    #[test]
    fn test_feedforward_eager_initialize_and_cast() {
        let mut ff = FeedForward::new(6, 2).unwrap();
        ff.initialize(&[vec![5, 3]]).unwrap();
        assert!(ff.parameters().values().all(|p| p.is_initialized()));

        ff.cast(DType::F16).unwrap();
        assert!(ff.parameters().values().all(|p| p.dtype() == DType::F16));
    }
}
