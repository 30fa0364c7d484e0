//! GGUF container parsing and tensor access.
//!
//! The pipeline inside this module: [`ByteReader`] gives bounds-checked
//! primitive reads, [`GgufContents::parse`] decodes the header, metadata and
//! tensor descriptor tables, [`TensorRegistry::build`] resolves and validates
//! the data-section layout, and [`Gguf`] ties a byte source to the registry
//! with lazily memoized dequantization.

pub mod container;
pub mod parser;
pub mod reader;
pub mod registry;
pub mod test_factory;
pub mod types;

pub use container::{Gguf, TensorData};
pub use parser::GgufContents;
pub use reader::ByteReader;
pub use registry::{TensorEntry, TensorRegistry};
pub use types::{
    GgufHeader, GgufValue, TensorDescriptor, DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION,
    MAX_TENSOR_RANK,
};
