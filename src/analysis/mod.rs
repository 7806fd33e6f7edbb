//! # Block Analysis Module
//!
//! This module contains analysis passes over block trees that need no
//! parameter values.
//!
//! ## Available Passes
//!
//! - [`ShapeInference`](shape_inference::ShapeInference): Validates input
//!   shapes against a block's declared inputs and predicts its output shape,
//!   detecting shape mismatches before runtime.
//! - [`BlockSummary`](summary::BlockSummary): Flattened table of every
//!   parameter with its qualified name, shape, dtype and size.
//!
//! ## Example
//!
//! ```ignore
//! use rustyblocks::analysis::{BlockSummary, ShapeInference};
//!
//! let out = ShapeInference::infer(&model, &[vec![32, 784]])?;
//! model.initialize(&[vec![32, 784]])?;
//! println!("{}", BlockSummary::of(&model));
//! ```

pub mod shape_inference;
pub mod summary;

pub use shape_inference::{ShapeInference, ShapeInferenceError};
pub use summary::{BlockSummary, ParameterSummary};
