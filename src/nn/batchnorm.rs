//! BatchNormalization слой.
//!
//! Реализует Batch Normalization с поддержкой train/eval режимов,
//! running statistics и обучаемых параметров gamma/beta.

use crate::error::{BlockError, Result};
use crate::nn::block::{expect_common_vector, head_shape, Block};
use crate::nn::parameter::{Parameter, ParameterType};
use crate::pairlist::PairList;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

/// Ось каналов.
const CHANNEL_AXIS: usize = 1;

/// Конфигурация слоя BatchNorm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormConfig {
    /// Малая константа для численной стабильности.
    pub eps: f32,
    /// Momentum для экспоненциального сглаживания running statistics.
    pub momentum: f32,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            eps: 1e-5,
            momentum: 0.1,
        }
    }
}

impl BatchNormConfig {
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }
}

/// Слой Batch Normalization.
///
/// Нормализует вход по каналам (ось 1), усредняя по всем остальным осям:
/// `y = gamma * (x - mean) / sqrt(var + eps) + beta`.
///
/// С опцией `training` использует статистики текущего батча и обновляет
/// `running_mean`/`running_var`: `running = (1 - momentum) * running +
/// momentum * batch`. Без нее использует накопленные running statistics.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    pub config: BatchNormConfig,
    gamma: Parameter,
    beta: Parameter,
    running_mean: Parameter,
    running_var: Parameter,
}

impl BatchNorm {
    pub fn new() -> Self {
        Self::build(BatchNormConfig::default())
    }

    pub fn from_config(config: BatchNormConfig) -> Result<Self> {
        if !(config.eps > 0.0) {
            return Err(BlockError::InvalidConfig(format!(
                "BatchNorm eps must be positive, got {}",
                config.eps
            )));
        }
        if !(0.0..=1.0).contains(&config.momentum) {
            return Err(BlockError::InvalidConfig(format!(
                "BatchNorm momentum must be in [0, 1], got {}",
                config.momentum
            )));
        }
        Ok(Self::build(config))
    }

    fn build(config: BatchNormConfig) -> Self {
        Self {
            config,
            gamma: Parameter::new("gamma", ParameterType::Gamma),
            beta: Parameter::new("beta", ParameterType::Beta),
            running_mean: Parameter::new("running_mean", ParameterType::RunningMean),
            running_var: Parameter::new("running_var", ParameterType::RunningVar),
        }
    }

    pub fn running_mean(&self) -> &Parameter {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Parameter {
        &self.running_var
    }

    fn channels(input_shapes: &[Shape]) -> Result<usize> {
        let shape = head_shape("BatchNorm", input_shapes)?;
        BlockError::check_min_rank("BatchNorm", shape, 2)?;
        BlockError::check_positive("BatchNorm", shape)?;
        Ok(shape[CHANNEL_AXIS])
    }

    /// Значения параметра как вектор длины `channels`.
    fn per_channel(param: &Parameter, channels: usize) -> Result<Array1<f32>> {
        let value = param.require_array()?;
        if value.len() != channels {
            return Err(BlockError::shape(
                "BatchNorm",
                format!("input has {} channels, '{}' has {}", channels, param.name(), value.len()),
            ));
        }
        Ok(value.iter().copied().collect())
    }
}

impl Default for BatchNorm {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for BatchNorm {
    fn forward_internal(&mut self, inputs: &NDList, options: &Options) -> Result<NDList> {
        let x = inputs.head()?;
        let channels = Self::channels(&inputs.shapes())?;
        let axis = Axis(CHANNEL_AXIS);

        // Все четыре параметра проверяются до изменения бегущей статистики
        let gamma = Self::per_channel(&self.gamma, channels)?;
        let beta = Self::per_channel(&self.beta, channels)?;
        let running_mean = Self::per_channel(&self.running_mean, channels)?;
        let running_var = Self::per_channel(&self.running_var, channels)?;

        let (mean, var) = if options.is_training() {
            let mut mean = Array1::zeros(channels);
            let mut var = Array1::zeros(channels);
            for (c, lane) in x.axis_iter(axis).enumerate() {
                let m = lane.sum() / lane.len() as f32;
                mean[c] = m;
                var[c] = lane.fold(0.0, |acc, &v| acc + (v - m) * (v - m)) / lane.len() as f32;
            }

            let momentum = self.config.momentum;
            let new_mean = &running_mean * (1.0 - momentum) + &mean * momentum;
            let new_var = &running_var * (1.0 - momentum) + &var * momentum;
            self.running_mean.set_array(new_mean.into_dyn());
            self.running_var.set_array(new_var.into_dyn());
            (mean, var)
        } else {
            (running_mean, running_var)
        };

        let eps = self.config.eps;

        let mut y = x.clone();
        for (c, mut lane) in y.axis_iter_mut(axis).enumerate() {
            let scale = gamma[c] / (var[c] + eps).sqrt();
            let shift = beta[c] - mean[c] * scale;
            lane.mapv_inplace(|v| v * scale + shift);
        }
        Ok(NDList::single(y))
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        Self::channels(input_shapes)?;
        Ok(input_shapes[0].clone())
    }

    fn direct_parameters(&self) -> Vec<&Parameter> {
        vec![&self.gamma, &self.beta, &self.running_mean, &self.running_var]
    }

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![
            &mut self.gamma,
            &mut self.beta,
            &mut self.running_mean,
            &mut self.running_var,
        ]
    }

    fn cast(&mut self, dtype: DType) -> Result<()> {
        for param in self.direct_parameters_mut() {
            param.cast(dtype);
        }
        Ok(())
    }

    fn describe_input(&self) -> Vec<DataDesc> {
        vec![DataDesc::any("data")]
    }

    fn parameter_shape(&self, name: &str, input_shapes: &[Shape]) -> Result<Shape> {
        match name {
            "gamma" | "beta" | "running_mean" | "running_var" => {
                Ok(vec![Self::channels(input_shapes)?])
            }
            _ => Err(BlockError::NotFound(name.to_string())),
        }
    }

    fn check_parameter_shapes(&self, shapes: &PairList<&str, Shape>) -> Result<()> {
        expect_common_vector("BatchNorm", shapes)
    }
}
