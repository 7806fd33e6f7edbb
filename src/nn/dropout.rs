//! Dropout слой для регуляризации.
//!
//! Реализует стандартный Dropout, который случайно обнуляет
//! элементы тензора во время обучения для предотвращения переобучения.

use crate::error::{BlockError, Result};
use crate::initializer::SharedRng;
use crate::nn::block::{head_shape, Block};
use crate::nn::parameter::Parameter;
use crate::tensor::{DType, DataDesc, NDList, Options, Shape};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Конфигурация слоя Dropout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutConfig {
    /// Вероятность обнуления (0.0 - 1.0)
    pub rate: f32,
    /// Зерно генератора; `None` - случайное.
    pub seed: Option<u64>,
}

impl Default for DropoutConfig {
    fn default() -> Self {
        Self {
            rate: 0.5,
            seed: None,
        }
    }
}

impl DropoutConfig {
    pub fn new(rate: f32) -> Self {
        Self {
            rate,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Слой Dropout для регуляризации.
///
/// С опцией `training` случайно обнуляет элементы с вероятностью `rate`,
/// масштабируя остальные на 1/(1-rate) для сохранения математического
/// ожидания. Без нее просто пропускает вход без изменений.
///
/// # Пример
/// ```ignore
/// let mut dropout = Dropout::new(0.5)?;
/// let y = dropout.forward_with(&x, &Options::training(true))?;
/// ```
#[derive(Debug, Clone)]
pub struct Dropout {
    pub config: DropoutConfig,
    rng: SharedRng,
}

impl Dropout {
    /// Создаёт новый слой Dropout.
    ///
    /// `rate` должен лежать в диапазоне [0, 1).
    pub fn new(rate: f32) -> Result<Self> {
        Self::from_config(DropoutConfig::new(rate))
    }

    pub fn from_config(config: DropoutConfig) -> Result<Self> {
        if !(0.0..1.0).contains(&config.rate) {
            return Err(BlockError::InvalidConfig(format!(
                "Dropout probability must be in [0, 1), got {}",
                config.rate
            )));
        }
        Ok(Self {
            rng: SharedRng::new(config.seed),
            config,
        })
    }
}

impl Block for Dropout {
    fn forward_internal(&mut self, inputs: &NDList, options: &Options) -> Result<NDList> {
        inputs.head()?;
        let rate = self.config.rate;
        if !options.is_training() || rate == 0.0 {
            return Ok(inputs.clone());
        }

        let keep = 1.0 / (1.0 - rate);
        let mut rng = self.rng.lock();
        let out = inputs
            .iter()
            .map(|x| x.mapv(|v| if rng.gen::<f32>() < rate { 0.0 } else { v * keep }))
            .collect();
        Ok(out)
    }

    fn output_shape(&self, input_shapes: &[Shape]) -> Result<Shape> {
        Ok(head_shape("Dropout", input_shapes)?.clone())
    }

    // Dropout не имеет обучаемых параметров
    fn direct_parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn direct_parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

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
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_dropout_creation() {
        let dropout = Dropout::new(0.5).unwrap();
        assert_eq!(dropout.config.rate, 0.5);
        assert!(dropout.parameters().is_empty());
    }

    #[test]
    fn test_dropout_invalid_rate() {
        assert!(matches!(Dropout::new(1.5), Err(BlockError::InvalidConfig(_))));
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.1).is_err());
    }

    #[test]
    fn test_dropout_is_identity_outside_training() {
        let mut dropout = Dropout::new(0.9).unwrap();
        let x = NDList::single(ArrayD::ones(IxDyn(&[4, 4])));
        assert_eq!(dropout.forward(&x).unwrap(), x);
    }

    #[test]
    fn test_dropout_training_masks_and_scales() {
        let mut dropout = Dropout::from_config(DropoutConfig::new(0.5).with_seed(7)).unwrap();
        let x = NDList::single(ArrayD::ones(IxDyn(&[100, 100])));
        let y = dropout.forward_with(&x, &Options::training(true)).unwrap();

        assert!(y[0].iter().all(|&v| v == 0.0 || v == 2.0));
        let kept = y[0].iter().filter(|&&v| v == 2.0).count() as f32 / 10_000.0;
        assert!((kept - 0.5).abs() < 0.05, "kept fraction {}", kept);
    }

    #[test]
    fn test_dropout_seed_is_reproducible() {
        let x = NDList::single(ArrayD::ones(IxDyn(&[8, 8])));
        let options = Options::training(true);
        let mut a = Dropout::from_config(DropoutConfig::new(0.3).with_seed(11)).unwrap();
        let mut b = Dropout::from_config(DropoutConfig::new(0.3).with_seed(11)).unwrap();
        assert_eq!(a.forward_with(&x, &options).unwrap(), b.forward_with(&x, &options).unwrap());
    }
}
