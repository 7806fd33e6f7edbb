//! Модуль, содержащий слои-активации: ReLU, LeakyReLU, Sigmoid, Tanh, GELU,
//! SiLU и Softmax.
//!
//! Активации не имеют обучаемых параметров и применяются поэлементно к
//! каждому тензору входного списка (Softmax - по последней оси).

use crate::error::{BlockError, Result};
use crate::nn::block::{head_shape, Block};
use crate::nn::parameter::Parameter;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// Слой активации.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    /// `max(0, x)`
    ReLU,
    /// `x` при `x > 0`, иначе `alpha * x`.
    LeakyReLU(f32),
    Sigmoid,
    Tanh,
    /// GELU в tanh-аппроксимации.
    GELU,
    /// `x * sigmoid(x)`, также известна как Swish.
    SiLU,
    /// Softmax по последней оси.
    Softmax,
}

impl Activation {
    /// Применяет активацию к одному тензору.
    pub fn apply(&self, x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let out = match *self {
            Activation::ReLU => x.mapv(|v| v.max(0.0)),
            Activation::LeakyReLU(alpha) => x.mapv(|v| if v > 0.0 { v } else { alpha * v }),
            Activation::Sigmoid => x.mapv(sigmoid),
            Activation::Tanh => x.mapv(f32::tanh),
            Activation::GELU => x.mapv(gelu),
            Activation::SiLU => x.mapv(|v| v * sigmoid(v)),
            Activation::Softmax => softmax_last_axis(x)?,
        };
        Ok(out)
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn gelu(v: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * v * (1.0 + (SQRT_2_OVER_PI * (v + 0.044_715 * v * v * v)).tanh())
}

fn softmax_last_axis(x: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    if x.ndim() == 0 {
        return Err(BlockError::shape("Softmax", "expected rank >= 1, got a scalar"));
    }
    let axis = Axis(x.ndim() - 1);
    let mut out = x.clone();
    for mut lane in out.lanes_mut(axis) {
        // Вычитаем максимум для численной стабильности.
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    Ok(out)
}

impl Block for Activation {
    fn kind(&self) -> &'static str {
        match self {
            Activation::ReLU => "ReLU",
            Activation::LeakyReLU(_) => "LeakyReLU",
            Activation::Sigmoid => "Sigmoid",
            Activation::Tanh => "Tanh",
            Activation::GELU => "GELU",
            Activation::SiLU => "SiLU",
            Activation::Softmax => "Softmax",
        }
    }

    fn forward_internal(&mut self, inputs: &NDList, _options: &Options) -> Result<NDList> {
        inputs.head()?;
        inputs.iter().map(|x| self.apply(x)).collect()
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        let shape = head_shape(self.kind(), input_shapes)?;
        if *self == Activation::Softmax {
            BlockError::check_min_rank("Softmax", shape, 1)?;
        }
        Ok(shape.clone())
    }

    /// Активации не имеют обучаемых параметров.
    fn direct_parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    /// Нечего приводить: активация вычисляется в точности входа.
    fn cast(&mut self, _dtype: DType) -> Result<()> {
        Ok(())
    }

    fn describe_input(&self) -> Vec<DataDesc> {
        vec![DataDesc::any("data")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::block::BlockExt;
    use ndarray::{array, IxDyn};

    fn assert_arrays_close(a: &ArrayD<f32>, b: &ArrayD<f32>, tol: f32) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < tol, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_relu_and_leaky() {
        let x = array![-2.0f32, 0.0, 3.0].into_dyn();
        assert_arrays_close(
            &Activation::ReLU.apply(&x).unwrap(),
            &array![0.0f32, 0.0, 3.0].into_dyn(),
            1e-6,
        );
        assert_arrays_close(
            &Activation::LeakyReLU(0.1).apply(&x).unwrap(),
            &array![-0.2f32, 0.0, 3.0].into_dyn(),
            1e-6,
        );
    }

    #[test]
    fn test_sigmoid_silu_gelu_at_zero() {
        let x = array![0.0f32].into_dyn();
        assert_eq!(Activation::Sigmoid.apply(&x).unwrap()[[0]], 0.5);
        assert_eq!(Activation::SiLU.apply(&x).unwrap()[[0]], 0.0);
        assert_eq!(Activation::GELU.apply(&x).unwrap()[[0]], 0.0);
        let big = array![10.0f32].into_dyn();
        assert!((Activation::GELU.apply(&big).unwrap()[[0]] - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let x = array![[1.0f32, 2.0, 3.0], [1000.0, 1000.0, 1000.0]].into_dyn();
        let y = Activation::Softmax.apply(&x).unwrap();
        for row in y.lanes(Axis(1)) {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        assert!((y[[1, 0]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_rejects_scalar() {
        let x = ArrayD::zeros(IxDyn(&[]));
        assert!(Activation::Softmax.apply(&x).is_err());
        assert!(Activation::Softmax.output_shape(&[vec![]]).is_err());
    }

    #[test]
    fn test_block_contract() {
        let mut relu = Activation::ReLU;
        assert_eq!(relu.kind(), "ReLU");
        assert!(relu.is_initialized());
        assert!(relu.parameters().is_empty());
        assert!(relu.cast(DType::F16).is_ok());

        let x = NDList::single(ArrayD::ones(IxDyn(&[2, 5])));
        let out = relu.forward(&x).unwrap();
        assert_eq!(out[0].shape().to_vec(), relu.output_shape(&x.shapes()).unwrap());
    }
}
