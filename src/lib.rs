//! # RustyBlocks: Composable Neural-Network Blocks in Rust
//!
//! **RustyBlocks** builds models as trees of [`nn::Block`]s. A block is either
//! a primitive layer or a composite owning named children. Its key feature is
//! **lazy parameter initialization**: layers are declared with their output
//! sizes only, and every [`nn::Parameter`] is materialized from the shape of
//! the first input its block sees.
//!
//! - Parameters of a tree are flattened with hierarchical names
//!   (`"00Linear_weight"`, `"linear1_bias"`).
//! - Initializers can be swapped per parameter or for a whole tree, before or
//!   after initialization.
//! - The state of a tree is encoded as SafeTensors and restored into a fresh
//!   tree of the same structure.
//!
//! ## Usage Example
//!
//! ```no_run
//! use ndarray::{ArrayD, IxDyn};
//! use rustyblocks::nn::{Activation, BlockExt, Linear, SequentialBlock};
//! use rustyblocks::tensor::NDList;
//!
//! # fn main() -> rustyblocks::error::Result<()> {
//! // 1. Declare the model; input sizes are not needed yet
//! let mut model = SequentialBlock::new()
//!     .add(Linear::new(16)?)?
//!     .add(Activation::ReLU)?
//!     .add(Linear::new(1)?)?;
//!
//! // 2. The first forward pass materializes every parameter
//! let x = NDList::single(ArrayD::zeros(IxDyn(&[8, 4])));
//! let y = model.forward(&x)?;
//! assert_eq!(y[0].shape(), &[8, 1]);
//!
//! // 3. Snapshot the state
//! let bytes = model.encode()?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

// Declare public modules that constitute the core library API.
pub mod analysis;
pub mod error;
pub mod initializer;
pub mod nn;
pub mod pairlist;
pub mod serialization;
pub mod tensor;

pub use error::{BlockError, Result};
