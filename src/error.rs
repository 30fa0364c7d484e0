//! Error taxonomy for GGUF parsing, dequantization and inference.
//!
//! Every variant names the offending byte offset, tensor or metadata key so
//! a failed load can be diagnosed without re-running under a debugger. All
//! parse-time errors are terminal for the load; dequantization errors are
//! terminal only for the tensor they name.

use crate::quantize::QuantKind;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AnimarError>;

/// Errors produced while loading or running a model.
///
/// `Clone` is deliberate: per-tensor dequantization failures are memoized in
/// compute-once cells and handed out to every subsequent caller.
#[derive(Debug, Clone, Error)]
pub enum AnimarError {
    /// Fewer bytes remain than a read requested.
    #[error("truncated input at byte {offset}: needed {needed} bytes, {remaining} remain")]
    TruncatedInput {
        /// Byte position of the failed read.
        offset: usize,
        /// Bytes the read required.
        needed: usize,
        /// Bytes actually remaining.
        remaining: usize,
    },

    /// A seek or alignment target lies beyond the end of the buffer.
    #[error("invalid offset {offset}: buffer is {len} bytes")]
    InvalidOffset {
        /// Requested position.
        offset: usize,
        /// Total buffer length.
        len: usize,
    },

    /// A length-prefixed string was not valid UTF-8.
    #[error("malformed string at byte {offset}: {reason}")]
    MalformedString {
        /// Byte position where the string payload begins.
        offset: usize,
        /// UTF-8 decoder detail.
        reason: String,
    },

    /// The file does not start with the `GGUF` magic.
    #[error("bad magic 0x{found:08X}, expected 0x{expected:08X} (\"GGUF\")")]
    BadMagic {
        /// Magic actually read.
        found: u32,
        /// Magic the format requires.
        expected: u32,
    },

    /// The container version is not one this crate understands.
    #[error("unsupported GGUF version {version}, only v{supported} is supported")]
    UnsupportedVersion {
        /// Version field from the header.
        version: u32,
        /// The supported version.
        supported: u32,
    },

    /// A metadata value carried an unrecognized type tag, or an array
    /// appeared inside another array.
    #[error("unknown metadata value type {tag} at byte {offset}")]
    UnknownValueType {
        /// Offending type tag.
        tag: u32,
        /// Byte position of the tag.
        offset: usize,
    },

    /// The same metadata key (or tensor name) appeared twice.
    #[error("duplicate key '{key}'")]
    DuplicateKey {
        /// The repeated key.
        key: String,
    },

    /// A tensor descriptor declared zero dimensions or more than the maximum.
    #[error("tensor '{tensor}' has invalid rank {rank}, must be 1..={max}")]
    InvalidRank {
        /// Tensor name.
        tensor: String,
        /// Declared dimension count.
        rank: u32,
        /// Maximum supported rank.
        max: u32,
    },

    /// A tensor descriptor carried an unrecognized quantization type tag.
    #[error("tensor '{tensor}' has unknown quantization type tag {tag}")]
    UnknownQuantType {
        /// Tensor name.
        tensor: String,
        /// Offending tag.
        tag: u32,
    },

    /// A tensor's element count is not a whole number of quantization blocks.
    #[error("tensor '{tensor}': {elements} elements is not a multiple of the {block_size}-element block")]
    UnalignedTensor {
        /// Tensor name.
        tensor: String,
        /// Flattened element count.
        elements: u64,
        /// Block size of the tensor's quantization type.
        block_size: usize,
    },

    /// A tensor's data range collides with the tensor before it.
    #[error("tensor '{tensor}' at data offset {offset} overlaps the previous tensor ending at {prev_end}")]
    OverlappingTensor {
        /// Tensor name.
        tensor: String,
        /// Declared offset (relative to the data section).
        offset: u64,
        /// End of the preceding tensor's range.
        prev_end: u64,
    },

    /// The tensor parsed but its quantization type has no decode kernel.
    #[error("tensor '{tensor}': quantization type {kind} cannot be dequantized")]
    UnsupportedQuantType {
        /// Tensor name.
        tensor: String,
        /// The recognized but undecodable type.
        kind: QuantKind,
    },

    /// A tensor required by the declared architecture is absent.
    #[error("required tensor '{name}' is missing")]
    MissingTensor {
        /// The missing tensor name.
        name: String,
    },

    /// A metadata key required by the declared architecture is absent.
    #[error("required metadata key '{key}' is missing")]
    MissingMetadataKey {
        /// The missing key.
        key: String,
    },

    /// Configuration scalars are present but mutually inconsistent.
    #[error("inconsistent model configuration: {reason}")]
    InconsistentConfig {
        /// What failed to line up.
        reason: String,
    },

    /// A forward pass would exceed the model's context window.
    #[error("sequence end {requested} exceeds context length {context_length}")]
    ContextOverflow {
        /// Position the pass would reach.
        requested: usize,
        /// Configured maximum context.
        context_length: usize,
    },

    /// `start_position` does not match the session's cached length.
    #[error("start position {start_position} does not match cached length {cached}")]
    InvalidPosition {
        /// Caller-supplied start position.
        start_position: usize,
        /// Positions already in the KV cache.
        cached: usize,
    },

    /// A token id is outside the model's vocabulary.
    #[error("token id {token} is outside the vocabulary of {vocab_size}")]
    InvalidToken {
        /// Offending token id.
        token: u32,
        /// Vocabulary size.
        vocab_size: usize,
    },

    /// A forward pass was invoked with no tokens.
    #[error("forward pass requires at least one token")]
    EmptyInput,

    /// Reading the model file failed.
    #[error("i/o error on '{path}': {reason}")]
    Io {
        /// File path.
        path: String,
        /// OS error detail.
        reason: String,
    },
}

impl AnimarError {
    /// Build an [`AnimarError::Io`] from a path and `std::io::Error`.
    pub fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}
