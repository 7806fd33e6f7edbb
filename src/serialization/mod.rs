// --- Файл: src/serialization/mod.rs ---

//! Модуль для сериализации и десериализации состояния блоков.
//!
//! Поддерживает несколько форматов:
//! - **SafeTensors**: Безопасный бинарный формат для хранения тензоров
//! - **JSON**: Человекочитаемый формат для метаданных и конфигурации
//! - **Checkpoint**: Директория с весами и конфигурацией блока
//!
//! # Примеры
//!
//! ```rust,ignore
//! use rustyblocks::nn::BlockExt;
//! use rustyblocks::serialization::{save_checkpoint, load_checkpoint, CheckpointConfig};
//!
//! // Снимок в памяти
//! let bytes = model.encode()?;
//! fresh_model.load_encoded(&bytes)?;
//!
//! // Чекпоинт на диске
//! save_checkpoint("ckpt", &model, &CheckpointConfig::new().with_metadata("epoch", "5"))?;
//! let config = load_checkpoint("ckpt", &mut fresh_model)?;
//! ```

pub mod checkpoint;
pub mod safetensors_io;

pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointConfig, CheckpointError};
pub use safetensors_io::{
    decode_tensors, encode_tensors, list_tensors, load_safetensors, save_safetensors,
    SafeTensorsError, TensorMap,
};
