use crate::error::{BlockError, Result};
use crate::nn::block::{expect_common_vector, head_shape, Block};
use crate::nn::parameter::{Parameter, ParameterType};
use crate::pairlist::PairList;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};
use ndarray::{ArrayD, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNormConfig {
    pub eps: f32,
    /// Learn an additive offset `beta`.
    pub center: bool,
    /// Learn a multiplicative scale `gamma`.
    pub scale: bool,
}

impl Default for LayerNormConfig {
    fn default() -> Self {
        Self {
            eps: 1e-5,
            center: true,
            scale: true,
        }
    }
}

impl LayerNormConfig {
    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    pub fn with_scale(mut self, scale: bool) -> Self {
        self.scale = scale;
        self
    }
}

/// Layer normalization over the last axis:
/// `y = gamma * (x - mean) / sqrt(var + eps) + beta`.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub config: LayerNormConfig,
    gamma: Option<Parameter>,
    beta: Option<Parameter>,
}

impl LayerNorm {
    pub fn new() -> Self {
        Self::build(LayerNormConfig::default())
    }

    pub fn from_config(config: LayerNormConfig) -> Result<Self> {
        if !(config.eps > 0.0) {
            return Err(BlockError::InvalidConfig(format!(
                "LayerNorm eps must be positive, got {}",
                config.eps
            )));
        }
        Ok(Self::build(config))
    }

    fn build(config: LayerNormConfig) -> Self {
        Self {
            gamma: config.scale.then(|| Parameter::new("gamma", ParameterType::Gamma)),
            beta: config.center.then(|| Parameter::new("beta", ParameterType::Beta)),
            config,
        }
    }

    fn normalized_dim(input_shapes: &[Shape]) -> Result<usize> {
        let shape = head_shape("LayerNorm", input_shapes)?;
        BlockError::check_min_rank("LayerNorm", shape, 1)?;
        BlockError::check_positive("LayerNorm", shape)?;
        Ok(shape[shape.len() - 1])
    }
}

impl Default for LayerNorm {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for LayerNorm {
    fn forward_internal(&mut self, inputs: &NDList, _options: &Options) -> Result<NDList> {
        let x = inputs.head()?;
        let d = Self::normalized_dim(&inputs.shapes())?;
        let axis = Axis(x.ndim() - 1);

        // Нормализация по последней размерности
        let mean = x
            .mean_axis(axis)
            .ok_or_else(|| BlockError::shape("LayerNorm", "empty normalized axis"))?
            .insert_axis(axis);
        let centered = x - &mean;
        let var = centered
            .mapv(|v| v * v)
            .mean_axis(axis)
            .ok_or_else(|| BlockError::shape("LayerNorm", "empty normalized axis"))?
            .insert_axis(axis);
        let eps = self.config.eps;
        let mut y: ArrayD<f32> = &centered / &var.mapv(|v| (v + eps).sqrt());

        for param in [&self.gamma, &self.beta].into_iter().flatten() {
            let value = param.require_array()?;
            if value.len() != d {
                return Err(BlockError::shape(
                    "LayerNorm",
                    format!("input has {} features, '{}' has {}", d, param.name(), value.len()),
                ));
            }
        }
        if let Some(gamma) = &self.gamma {
            y = &y * gamma.require_array()?;
        }
        if let Some(beta) = &self.beta {
            y = &y + beta.require_array()?;
        }
        Ok(NDList::single(y))
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        Self::normalized_dim(input_shapes)?;
        Ok(input_shapes[0].clone())
    }

    fn direct_parameters(&self) -> Vec<&Parameter> {
        [&self.gamma, &self.beta].into_iter().flatten().collect()
    }

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter> {
        [&mut self.gamma, &mut self.beta].into_iter().flatten().collect()
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
        let owned = match name {
            "gamma" => self.gamma.is_some(),
            "beta" => self.beta.is_some(),
            _ => false,
        };
        if !owned {
            return Err(BlockError::NotFound(name.to_string()));
        }
        Ok(vec![Self::normalized_dim(input_shapes)?])
    }

    fn check_parameter_shapes(&self, shapes: &PairList<&str, Shape>) -> Result<()> {
        expect_common_vector("LayerNorm", shapes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::block::BlockExt;
    use ndarray::{array, IxDyn};

    #[test]
    fn test_layer_norm_normalizes_rows() {
        let mut norm = LayerNorm::new();
        let x = NDList::single(array![[1.0f32, 2.0, 3.0, 4.0], [10.0, 10.0, 10.0, 10.0]].into_dyn());
        let y = norm.forward(&x).unwrap();

        let row = y[0].index_axis(Axis(0), 0);
        assert!(row.sum().abs() < 1e-5);
        let var = row.mapv(|v| v * v).mean().unwrap();
        assert!((var - 1.0).abs() < 1e-3);
        // constant row stays at beta = 0
        assert!(y[0].index_axis(Axis(0), 1).iter().all(|v| v.abs() < 1e-5));
    }

    #[test]
    fn test_layer_norm_parameters() {
        let mut norm = LayerNorm::new();
        norm.initialize(&[vec![2, 3, 8]]).unwrap();
        let names: Vec<String> = norm.parameters().keys().cloned().collect();
        assert_eq!(names, vec!["gamma", "beta"]);
        assert!(norm.direct_parameters().iter().all(|p| p.shape() == Some(&[8][..])));

        let bare = LayerNorm::from_config(LayerNormConfig::default().with_center(false).with_scale(false)).unwrap();
        assert!(bare.parameters().is_empty());
        assert!(bare.is_initialized());
    }

    #[test]
    fn test_layer_norm_output_shape_matches_forward() {
        let mut norm = LayerNorm::new();
        let x = NDList::single(ArrayD::ones(IxDyn(&[2, 3, 5])));
        let y = norm.forward(&x).unwrap();
        assert_eq!(y[0].shape().to_vec(), norm.output_shape(&x.shapes()).unwrap());
    }

    #[test]
    fn test_layer_norm_invalid() {
        assert!(LayerNorm::from_config(LayerNormConfig::default().with_eps(0.0)).is_err());
        assert!(LayerNorm::new().output_shape(&[vec![]]).is_err());
    }
}
