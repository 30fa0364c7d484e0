//! The loaded GGUF container: byte source, registry and memoized
//! dequantization.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use rayon::prelude::*;

use crate::error::{AnimarError, Result};
use crate::gguf::parser::GgufContents;
use crate::gguf::registry::{TensorEntry, TensorRegistry};
use crate::gguf::types::{GgufHeader, GgufValue};

/// The bytes backing a loaded model: either read into memory or mapped.
pub enum TensorData {
    /// File contents owned in memory.
    Owned(Vec<u8>),
    /// Memory-mapped file.
    Mapped(memmap2::Mmap),
}

impl TensorData {
    /// Borrow the full byte range.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Owned(v) => v,
            Self::Mapped(m) => m,
        }
    }
}

impl std::fmt::Debug for TensorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owned(v) => write!(f, "TensorData::Owned({} bytes)", v.len()),
            Self::Mapped(m) => write!(f, "TensorData::Mapped({} bytes)", m.len()),
        }
    }
}

type DenseResult = std::result::Result<Arc<Vec<f32>>, AnimarError>;

/// A parsed GGUF file with validated layout and lazy tensor realization.
///
/// Dequantization runs on first access to a tensor and is memoized in a
/// per-tensor compute-once cell: concurrent first access from any number of
/// threads performs the work exactly once and every caller receives the same
/// shared array. A per-tensor decode failure is memoized the same way and
/// does not disturb other tensors. The whole container is immutable after
/// construction and safe to share across threads.
#[derive(Debug)]
pub struct Gguf {
    data: TensorData,
    header: GgufHeader,
    metadata: std::collections::HashMap<String, GgufValue>,
    registry: TensorRegistry,
    cells: Vec<OnceLock<DenseResult>>,
    realized: AtomicUsize,
}

impl Gguf {
    /// Memory-map a GGUF file and parse it.
    ///
    /// # Errors
    ///
    /// [`AnimarError::Io`] on filesystem failure, otherwise any parse-time
    /// error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| AnimarError::io(path, &e))?;
        // Read-only map of an immutable model file.
        let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| AnimarError::io(path, &e))?;
        Self::from_data(TensorData::Mapped(mmap))
    }

    /// Read a GGUF file fully into memory and parse it.
    ///
    /// # Errors
    ///
    /// As [`Gguf::open`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| AnimarError::io(path, &e))?;
        Self::from_bytes(bytes)
    }

    /// Parse an in-memory GGUF byte stream.
    ///
    /// # Errors
    ///
    /// Any parse-time error; the load is all-or-nothing.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_data(TensorData::Owned(bytes))
    }

    fn from_data(data: TensorData) -> Result<Self> {
        let bytes = data.as_bytes();
        let contents = GgufContents::parse(bytes)?;
        let registry = TensorRegistry::build(&contents, bytes.len())?;

        let cells = (0..registry.len()).map(|_| OnceLock::new()).collect();

        Ok(Self {
            data,
            header: contents.header,
            metadata: contents.metadata,
            registry,
            cells,
            realized: AtomicUsize::new(0),
        })
    }

    /// The parsed header.
    #[must_use]
    pub fn header(&self) -> &GgufHeader {
        &self.header
    }

    /// The metadata table.
    #[must_use]
    pub fn metadata(&self) -> &std::collections::HashMap<String, GgufValue> {
        &self.metadata
    }

    /// The validated tensor registry.
    #[must_use]
    pub fn registry(&self) -> &TensorRegistry {
        &self.registry
    }

    /// Tensor names in file order.
    pub fn tensor_names(&self) -> impl Iterator<Item = &str> {
        self.registry.all_names()
    }

    /// Layout entry for a tensor, if present.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&TensorEntry> {
        self.registry.lookup(name)
    }

    /// Metadata value for `key`.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&GgufValue> {
        self.metadata.get(key)
    }

    /// Integer metadata value, coerced across widths.
    #[must_use]
    pub fn meta_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(GgufValue::as_u64)
    }

    /// Float metadata value.
    #[must_use]
    pub fn meta_f32(&self, key: &str) -> Option<f32> {
        self.metadata.get(key).and_then(GgufValue::as_f32)
    }

    /// String metadata value.
    #[must_use]
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(GgufValue::as_str)
    }

    /// The `general.architecture` string, if present.
    #[must_use]
    pub fn architecture(&self) -> Option<&str> {
        self.meta_str("general.architecture")
    }

    /// Dense values for the named tensor, dequantizing on first access.
    ///
    /// # Errors
    ///
    /// [`AnimarError::MissingTensor`] for unknown names; otherwise the
    /// memoized outcome of this tensor's dequantization
    /// ([`AnimarError::UnsupportedQuantType`] for parse-only kinds).
    pub fn parameter(&self, name: &str) -> Result<Arc<Vec<f32>>> {
        let index = self
            .registry
            .index_of(name)
            .ok_or_else(|| AnimarError::MissingTensor {
                name: name.to_string(),
            })?;
        self.realize(index)
    }

    /// Dequantize every tensor in the file, in parallel.
    ///
    /// Tensors are independent byte ranges, so realization fans out across
    /// the rayon pool; memoization still guarantees each tensor is decoded
    /// at most once even if callers raced ahead of this.
    ///
    /// # Errors
    ///
    /// The first per-tensor decode failure, after all workers finish.
    pub fn realize_all(&self) -> Result<()> {
        (0..self.registry.len())
            .into_par_iter()
            .map(|i| self.realize(i).map(|_| ()))
            .collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    /// Number of tensors whose dequantization has run (successfully or not).
    #[must_use]
    pub fn realized_tensors(&self) -> usize {
        self.realized.load(Ordering::Relaxed)
    }

    fn realize(&self, index: usize) -> Result<Arc<Vec<f32>>> {
        let cell = &self.cells[index];
        cell.get_or_init(|| {
            // Inside the cell closure: runs at most once per tensor, even
            // under concurrent first access.
            self.realized.fetch_add(1, Ordering::Relaxed);
            let entry = &self.registry.entries()[index];
            let raw = &self.data.as_bytes()[entry.abs_offset..entry.abs_offset + entry.byte_len];
            entry
                .desc
                .kind
                .dequantize(raw, entry.elements, &entry.desc.name)
                .map(Arc::new)
        })
        .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::test_factory::GgufBuilder;
    use crate::quantize::QuantKind;

    fn two_tensor_file() -> Vec<u8> {
        GgufBuilder::new()
            .add_f32_tensor("a", &[2, 2], &[1.0, 2.0, 3.0, 4.0])
            .add_f32_tensor("b", &[4], &[5.0, 6.0, 7.0, 8.0])
            .build()
    }

    #[test]
    fn test_parameter_returns_dense_values() {
        let gguf = Gguf::from_bytes(two_tensor_file()).unwrap();
        let a = gguf.parameter("a").unwrap();
        assert_eq!(*a, vec![1.0, 2.0, 3.0, 4.0]);
        let b = gguf.parameter("b").unwrap();
        assert_eq!(*b, vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_parameter_is_memoized() {
        let gguf = Gguf::from_bytes(two_tensor_file()).unwrap();
        assert_eq!(gguf.realized_tensors(), 0);
        let first = gguf.parameter("a").unwrap();
        let second = gguf.parameter("a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(gguf.realized_tensors(), 1);
    }

    #[test]
    fn test_missing_parameter() {
        let gguf = Gguf::from_bytes(two_tensor_file()).unwrap();
        assert!(matches!(
            gguf.parameter("nope"),
            Err(AnimarError::MissingTensor { name }) if name == "nope"
        ));
        // failed lookups never run dequantization
        assert_eq!(gguf.realized_tensors(), 0);
    }

    #[test]
    fn test_realize_all_covers_every_tensor() {
        let gguf = Gguf::from_bytes(two_tensor_file()).unwrap();
        gguf.realize_all().unwrap();
        assert_eq!(gguf.realized_tensors(), 2);
        // a later access reuses the cells
        gguf.parameter("a").unwrap();
        assert_eq!(gguf.realized_tensors(), 2);
    }

    #[test]
    fn test_unsupported_kind_is_per_tensor() {
        let data = GgufBuilder::new()
            .add_f32_tensor("good", &[2], &[1.0, 2.0])
            .add_raw_tensor("bad", &[256], QuantKind::Q3K.tag(), 0, &[0u8; 110])
            .build();
        let gguf = Gguf::from_bytes(data).unwrap();

        let err = gguf.parameter("bad").unwrap_err();
        assert!(matches!(err, AnimarError::UnsupportedQuantType { .. }));
        // the failure is memoized and repeatable
        let err = gguf.parameter("bad").unwrap_err();
        assert!(matches!(err, AnimarError::UnsupportedQuantType { .. }));
        assert_eq!(gguf.realized_tensors(), 1);

        // the healthy tensor is unaffected
        assert_eq!(*gguf.parameter("good").unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_quantized_tensor_through_container() {
        // Q8_0 block: scale 0.5, all codes 1 -> 32 values of 0.5
        let mut block = Vec::new();
        block.extend_from_slice(&half::f16::from_f32(0.5).to_le_bytes());
        block.extend_from_slice(&[1u8; 32]);
        let data = GgufBuilder::new()
            .add_raw_tensor("w", &[32], QuantKind::Q8_0.tag(), 0, &block)
            .build();
        let gguf = Gguf::from_bytes(data).unwrap();
        let w = gguf.parameter("w").unwrap();
        assert_eq!(w.len(), 32);
        assert!(w.iter().all(|&x| x == 0.5));
    }

    #[test]
    fn test_metadata_accessors() {
        let data = GgufBuilder::new()
            .add_string("general.architecture", "llama")
            .add_u32("llama.block_count", 22)
            .add_f32("llama.rope.freq_base", 10000.0)
            .build();
        let gguf = Gguf::from_bytes(data).unwrap();
        assert_eq!(gguf.architecture(), Some("llama"));
        assert_eq!(gguf.meta_u64("llama.block_count"), Some(22));
        assert_eq!(gguf.meta_f32("llama.rope.freq_base"), Some(10000.0));
        assert_eq!(gguf.meta_str("absent"), None);
    }

    #[test]
    fn test_open_and_load_from_disk() {
        use std::io::Write;
        let data = two_tensor_file();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let mapped = Gguf::open(tmp.path()).unwrap();
        assert_eq!(*mapped.parameter("a").unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        let owned = Gguf::load(tmp.path()).unwrap();
        assert_eq!(*owned.parameter("b").unwrap(), vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_io_error_names_path() {
        let err = Gguf::open("/definitely/not/here.gguf").unwrap_err();
        assert!(matches!(err, AnimarError::Io { .. }));
        assert!(err.to_string().contains("not/here.gguf"));
    }
}
