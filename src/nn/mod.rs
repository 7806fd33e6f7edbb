//! # Neural Network Blocks Module
//!
//! This module contains the building blocks for constructing neural networks.
//!
//! Every layer implements [`Block`]. A block owns its [`Parameter`]s and,
//! for composites, its named children. Parameters are materialized lazily:
//! their shapes are inferred from the first input a block sees, so layers
//! only need their output sizes at construction time.
//!
//! ## Available Blocks
//!
//! ### Core Layers
//! - [`Linear`]: Fully connected / dense layer
//! - [`Embedding`]: Embedding lookup table
//! - [`LambdaBlock`]: Wraps a plain function (and the identity)
//!
//! ### Normalization
//! - [`LayerNorm`]: Layer normalization
//! - [`BatchNorm`]: Batch normalization with running statistics
//!
//! ### Activations
//! - [`Activation`]: ReLU, LeakyReLU, Sigmoid, Tanh, GELU, SiLU, Softmax
//!
//! ### Composition
//! - [`SequentialBlock`]: Children applied one after another
//! - [`ParallelBlock`]: Children applied to the same input and joined
//! - [`FeedForward`]: Position-wise feed-forward network
//!
//! ### Regularization
//! - [`Dropout`]: Standard dropout
//!
//! ## Example
//!
//! ```ignore
//! use rustyblocks::nn::{Activation, BlockExt, Linear, SequentialBlock};
//!
//! let mut mlp = SequentialBlock::new()
//!     .add(Linear::new(128)?)?
//!     .add(Activation::ReLU)?
//!     .add(Linear::new(10)?)?;
//!
//! let logits = mlp.forward(&batch)?;
//! for (name, param) in mlp.parameters().iter() {
//!     println!("{}: {:?}", name, param.shape());
//! }
//! ```

pub mod activations;
pub mod batchnorm;
pub mod block;
pub mod dropout;
pub mod embedding;
pub mod feedforward;
pub mod lambda;
pub mod linear;
pub mod norm;
pub mod parallel;
pub mod parameter;
pub mod sequential;

pub use activations::Activation;
pub use batchnorm::{BatchNorm, BatchNormConfig};
pub use block::{ensure_unique_names, qualified_name, Block, BlockExt, NAME_SEPARATOR};
pub use dropout::{Dropout, DropoutConfig};
pub use embedding::{Embedding, EmbeddingConfig};
pub use feedforward::FeedForward;
pub use lambda::LambdaBlock;
pub use linear::{Linear, LinearConfig};
pub use norm::{LayerNorm, LayerNormConfig};
pub use parallel::{Join, ParallelBlock};
pub use parameter::{Parameter, ParameterState, ParameterType};
pub use sequential::SequentialBlock;
