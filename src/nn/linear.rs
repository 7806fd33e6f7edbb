//! Модуль, реализующий полносвязный (линейный) слой.

use crate::error::{BlockError, Result};
use crate::nn::block::{expect_parameter_shape, head_shape, Block};
use crate::nn::parameter::{Parameter, ParameterType};
use crate::pairlist::PairList;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};
use ndarray::{Axis, Ix2, IxDyn};
use serde::{Deserialize, Serialize};

/// Конфигурация линейного слоя.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearConfig {
    /// Количество выходных признаков.
    pub units: usize,
    /// Использовать смещение.
    pub bias: bool,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self { units: 1, bias: true }
    }
}

impl LinearConfig {
    pub fn new(units: usize) -> Self {
        Self {
            units,
            ..Default::default()
        }
    }

    /// Включает/выключает смещение.
    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }
}

/// Полносвязный (линейный) слой: `y = x·Wᵀ + b`.
///
/// Хранит веса формы `[units, in_features]` и смещение формы `[units]`.
/// Количество входных признаков не задается при создании: оно берется из
/// последней размерности входа при первом прямом проходе. Все ведущие
/// размерности входа считаются пакетными.
#[derive(Debug, Clone)]
pub struct Linear {
    pub config: LinearConfig,
    weight: Parameter,
    bias: Option<Parameter>,
}

impl Linear {
    /// Создает линейный слой с `units` выходами и смещением.
    pub fn new(units: usize) -> Result<Self> {
        Self::from_config(LinearConfig::new(units))
    }

    pub fn from_config(config: LinearConfig) -> Result<Self> {
        if config.units == 0 {
            return Err(BlockError::InvalidConfig(
                "Linear requires units > 0".to_string(),
            ));
        }
        let bias = config
            .bias
            .then(|| Parameter::new("bias", ParameterType::Bias));
        Ok(Self {
            config,
            weight: Parameter::new("weight", ParameterType::Weight),
            bias,
        })
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Parameter> {
        self.bias.as_ref()
    }

    fn input_features(input_shapes: &[Shape]) -> Result<usize> {
        let shape = head_shape("Linear", input_shapes)?;
        BlockError::check_min_rank("Linear", shape, 1)?;
        BlockError::check_positive("Linear", shape)?;
        Ok(shape[shape.len() - 1])
    }
}

impl Block for Linear {
    fn forward_internal(&mut self, inputs: &NDList, _options: &Options) -> Result<NDList> {
        let x = inputs.head()?;
        let in_features = Self::input_features(&inputs.shapes())?;
        let weight = self
            .weight
            .require_array()?
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| BlockError::shape("Linear", e.to_string()))?;
        if weight.shape()[1] != in_features {
            return Err(BlockError::shape(
                "Linear",
                format!(
                    "input has {} features, weight expects {}",
                    in_features,
                    weight.shape()[1]
                ),
            ));
        }

        // Сплющиваем пакетные размерности: [..., in] -> [batch, in].
        let batch = x.len() / in_features;
        let flat = x
            .to_shape((batch, in_features))
            .map_err(|e| BlockError::shape("Linear", e.to_string()))?;
        let mut y = flat.dot(&weight.t());
        if let Some(bias) = &self.bias {
            let b = bias
                .require_array()?
                .view()
                .insert_axis(Axis(0))
                .into_dimensionality::<Ix2>()
                .map_err(|e| BlockError::shape("Linear", e.to_string()))?;
            y += &b;
        }

        let mut out_shape = x.shape().to_vec();
        let last = out_shape.len() - 1;
        out_shape[last] = self.config.units;
        let y = y
            .into_shape(IxDyn(&out_shape))
            .map_err(|e| BlockError::shape("Linear", e.to_string()))?;
        Ok(NDList::single(y))
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        Self::input_features(input_shapes)?;
        let mut shape = input_shapes[0].clone();
        let last = shape.len() - 1;
        shape[last] = self.config.units;
        Ok(shape)
    }

    fn direct_parameters(&self) -> Vec<&Parameter> {
        let mut params = vec![&self.weight];
        params.extend(self.bias.as_ref());
        params
    }

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = vec![&mut self.weight];
        params.extend(self.bias.as_mut());
        params
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
            "weight" => Ok(vec![self.config.units, Self::input_features(input_shapes)?]),
            "bias" if self.bias.is_some() => Ok(vec![self.config.units]),
            _ => Err(BlockError::NotFound(name.to_string())),
        }
    }

    fn check_parameter_shapes(&self, shapes: &PairList<&str, Shape>) -> Result<()> {
        let units = self.config.units;
        if let Some(weight) = shapes.get("weight") {
            // Число входных признаков не фиксировано конфигурацией
            if weight.len() != 2 || weight[0] != units {
                return Err(BlockError::shape(
                    "Linear",
                    format!("'weight' must have shape [{}, in], got {:?}", units, weight),
                ));
            }
        }
        if let Some(bias) = shapes.get("bias") {
            expect_parameter_shape("Linear", "bias", bias, &[units])?;
        }
        Ok(())
    }
}
