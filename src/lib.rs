//! # Animar
//!
//! Pure Rust GGUF loading and quantized LLaMA-family inference on the CPU.
//!
//! Animar (Spanish: "to bring to life") reads model weights from the GGUF
//! binary container, reconstructs the transformer architecture described by
//! the file's metadata, and runs forward passes over the dequantized
//! parameters with plain scalar kernels: no GPU, no external tensor
//! framework.
//!
//! ## Pipeline
//!
//! bytes → [`gguf::ByteReader`] → [`gguf::GgufContents`] (header, metadata,
//! tensor descriptors) → [`gguf::TensorRegistry`] (validated layout) →
//! [`quantize::QuantKind`] decode (lazy, memoized) → [`model::LlamaModel`]
//! (immutable parameter set) → [`infer::Session`] (forward passes with a
//! session-owned KV cache).
//!
//! ## Example
//!
//! ```rust,ignore
//! use animar::{Gguf, LlamaModel, Session};
//! use std::sync::Arc;
//!
//! let gguf = Gguf::open("model.gguf")?;
//! let model = Arc::new(LlamaModel::from_gguf(gguf)?);
//! let mut session = Session::new(Arc::clone(&model));
//! let logits = session.forward(&[1, 15043], 0)?;
//! ```
//!
//! Tokenization, sampling policies and serving all live outside this crate;
//! the loaded model is immutable and can be shared across any number of
//! concurrent sessions.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // usize -> f32 for norms/scales is intentional
#![allow(clippy::cast_possible_truncation)] // u64 dims checked before narrowing

pub mod error;
pub mod gguf;
pub mod infer;
pub mod model;
pub mod quantize;

pub use error::{AnimarError, Result};
pub use gguf::Gguf;
pub use infer::Session;
pub use model::{LlamaConfig, LlamaModel};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
