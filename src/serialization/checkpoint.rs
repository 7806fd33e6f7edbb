// --- Файл: src/serialization/checkpoint.rs ---

//! Модуль для создания и загрузки чекпоинтов блоков.
//!
//! Чекпоинт включает:
//! - Значения всех параметров (в формате SafeTensors, по квалифицированным именам)
//! - Конфигурацию и метаданные
//! - Сводку параметров (имя, форма, dtype) для проверки совместимости

use super::safetensors_io::{tensor_names, SafeTensorsError};
use crate::analysis::summary::{BlockSummary, ParameterSummary};
use crate::error::BlockError;
use crate::nn::{Block, BlockExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Имя файла конфигурации внутри директории чекпоинта.
pub const CONFIG_FILE: &str = "config.json";
/// Имя файла весов внутри директории чекпоинта.
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Ошибки при работе с чекпоинтами
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Ошибка ввода/вывода: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Ошибка SafeTensors: {0}")]
    SafeTensorsError(#[from] SafeTensorsError),

    #[error("Ошибка JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Ошибка блока: {0}")]
    BlockError(#[from] BlockError),

    #[error("Директория чекпоинта не существует: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Файл не найден: {0}")]
    FileNotFound(PathBuf),

    #[error("Чекпоинт не подходит к модели: отсутствуют {missing:?}, лишние {unexpected:?}")]
    ModelMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
}

type Result<T> = std::result::Result<T, CheckpointError>;

/// Конфигурация чекпоинта
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Версия формата чекпоинта
    pub version: String,
    /// Название модели
    pub model_name: Option<String>,
    /// Дополнительные метаданные, например номер эпохи
    pub metadata: BTreeMap<String, String>,
    /// Сводка параметров; заполняется при сохранении.
    #[serde(default)]
    pub parameters: Vec<ParameterSummary>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            model_name: None,
            metadata: BTreeMap::new(),
            parameters: Vec::new(),
        }
    }
}

impl CheckpointConfig {
    /// Создает новую конфигурацию чекпоинта
    pub fn new() -> Self {
        Self::default()
    }

    /// Устанавливает название модели
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model_name = Some(name.to_string());
        self
    }

    /// Добавляет метаданные
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Сохраняет состояние блока в директорию.
///
/// Все параметры блока должны быть материализованы.
///
/// Структура директории:
/// ```text
/// checkpoint_dir/
/// ├── config.json          # Конфигурация, метаданные и сводка параметров
/// └── model.safetensors    # Значения параметров
/// ```
pub fn save_checkpoint<P, B>(path: P, block: &B, config: &CheckpointConfig) -> Result<()>
where
    P: AsRef<Path>,
    B: Block + ?Sized,
{
    let dir = path.as_ref();

    // Кодируем до записи чего-либо на диск
    let weights = block.encode()?;
    let mut config = config.clone();
    config.parameters = BlockSummary::of(block).parameters;

    fs::create_dir_all(dir)?;
    let config_json = serde_json::to_string_pretty(&config)?;
    fs::write(dir.join(CONFIG_FILE), config_json)?;
    fs::write(dir.join(WEIGHTS_FILE), weights)?;

    log::info!(
        "saved checkpoint of {} ({} parameters) to {}",
        block.kind(),
        config.parameters.len(),
        dir.display()
    );
    Ok(())
}

/// Загружает чекпоинт из директории в `block` и возвращает его конфигурацию.
///
/// Имена тензоров должны в точности совпадать с квалифицированными именами
/// параметров блока, иначе блок не изменяется.
pub fn load_checkpoint<P, B>(path: P, block: &mut B) -> Result<CheckpointConfig>
where
    P: AsRef<Path>,
    B: Block + ?Sized,
{
    let dir = path.as_ref();
    if !dir.exists() {
        return Err(CheckpointError::DirectoryNotFound(dir.to_path_buf()));
    }

    // Загружаем конфигурацию
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Err(CheckpointError::FileNotFound(config_path));
    }
    let config: CheckpointConfig = serde_json::from_str(&fs::read_to_string(&config_path)?)?;

    // Загружаем веса
    let weights_path = dir.join(WEIGHTS_FILE);
    if !weights_path.exists() {
        return Err(CheckpointError::FileNotFound(weights_path));
    }
    let weights = fs::read(&weights_path)?;

    let stored = tensor_names(&weights)?;
    let expected: Vec<String> = block.parameters().keys().cloned().collect();
    let missing: Vec<String> = expected
        .iter()
        .filter(|name| !stored.contains(*name))
        .cloned()
        .collect();
    let unexpected: Vec<String> = stored
        .iter()
        .filter(|name| !expected.contains(*name))
        .cloned()
        .collect();
    if !missing.is_empty() || !unexpected.is_empty() {
        return Err(CheckpointError::ModelMismatch { missing, unexpected });
    }

    block.load_encoded(&weights)?;
    log::info!("loaded checkpoint {} into {}", dir.display(), block.kind());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, Linear, SequentialBlock};

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("rustyblocks_ckpt_{}_{}", std::process::id(), name))
    }

    fn model() -> SequentialBlock {
        SequentialBlock::new()
            .add(Linear::new(3).unwrap())
            .unwrap()
            .add(Activation::ReLU)
            .unwrap()
            .add(Linear::new(1).unwrap())
            .unwrap()
    }

    #[test]
    fn test_checkpoint_config() {
        let config = CheckpointConfig::new()
            .with_model_name("test_model")
            .with_metadata("test_key", "test_value");

        assert_eq!(config.model_name, Some("test_model".to_string()));
        assert_eq!(config.metadata.get("test_key"), Some(&"test_value".to_string()));
    }

    #[test]
    fn test_save_load_checkpoint() {
        let dir = temp_dir("roundtrip");
        let mut source = model();
        source.initialize(&[vec![1, 2]]).unwrap();
        let config = CheckpointConfig::new().with_metadata("epoch", "3");
        save_checkpoint(&dir, &source, &config).unwrap();

        let mut target = model();
        let config = load_checkpoint(&dir, &mut target).unwrap();
        assert_eq!(config.metadata.get("epoch").map(String::as_str), Some("3"));
        assert_eq!(config.parameters.len(), 4);
        assert_eq!(config.parameters[0].name, "00Linear_weight");

        for ((name, a), (_, b)) in source.parameters().iter().zip(target.parameters().iter()) {
            assert_eq!(a.array(), b.array(), "parameter {}", name);
        }

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_uninitialized_block_is_not_saved() {
        let dir = temp_dir("uninitialized");
        let result = save_checkpoint(&dir, &model(), &CheckpointConfig::new());
        assert!(matches!(
            result,
            Err(CheckpointError::BlockError(BlockError::NotInitialized(_)))
        ));
        assert!(!dir.exists());
    }

    #[test]
    fn test_model_mismatch() {
        let dir = temp_dir("mismatch");
        let mut source = model();
        source.initialize(&[vec![1, 2]]).unwrap();
        save_checkpoint(&dir, &source, &CheckpointConfig::new()).unwrap();

        let mut other = SequentialBlock::new().add(Linear::new(3).unwrap()).unwrap();
        match load_checkpoint(&dir, &mut other) {
            Err(CheckpointError::ModelMismatch { missing, unexpected }) => {
                assert!(missing.is_empty());
                assert_eq!(unexpected, vec!["02Linear_bias", "02Linear_weight"]);
            }
            result => panic!("expected ModelMismatch, got {:?}", result),
        }
        assert!(other.parameters().values().all(|p| !p.is_initialized()));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_directory() {
        let mut block = model();
        assert!(matches!(
            load_checkpoint(temp_dir("does_not_exist"), &mut block),
            Err(CheckpointError::DirectoryNotFound(_))
        ));
    }
}
