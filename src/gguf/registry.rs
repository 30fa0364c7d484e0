//! Tensor layout resolution and validation.

use std::collections::HashMap;

use crate::error::{AnimarError, Result};
use crate::gguf::parser::GgufContents;
use crate::gguf::types::{TensorDescriptor, DEFAULT_ALIGNMENT};

/// A tensor descriptor with its layout resolved against the file.
#[derive(Debug, Clone)]
pub struct TensorEntry {
    /// The parsed descriptor.
    pub desc: TensorDescriptor,
    /// Flattened element count.
    pub elements: usize,
    /// Exact byte length of the quantized payload.
    pub byte_len: usize,
    /// Absolute offset of the payload within the file.
    pub abs_offset: usize,
}

/// Validated mapping from tensor names to resolved layout entries.
///
/// Construction establishes the registry invariants once: every entry's
/// byte length is an exact number of quantization blocks, ranges are
/// non-decreasing and non-overlapping in file order, and everything fits
/// inside the file. Lookups after that are infallible bookkeeping.
#[derive(Debug)]
pub struct TensorRegistry {
    entries: Vec<TensorEntry>,
    by_name: HashMap<String, usize>,
    data_base: usize,
    alignment: usize,
}

impl TensorRegistry {
    /// Resolve descriptor offsets against the data-section base and validate
    /// the layout.
    ///
    /// The base is the first multiple of the alignment (metadata key
    /// `general.alignment`, default 32) at or after the end of the
    /// descriptor table.
    ///
    /// # Errors
    ///
    /// [`AnimarError::UnalignedTensor`] when a tensor's element count is not
    /// a whole number of blocks, [`AnimarError::OverlappingTensor`] when
    /// ranges collide or regress, [`AnimarError::TruncatedInput`] when a
    /// payload extends past the end of the file,
    /// [`AnimarError::DuplicateKey`] for repeated tensor names.
    pub fn build(contents: &GgufContents, file_len: usize) -> Result<Self> {
        let alignment = match contents.metadata.get("general.alignment") {
            Some(v) => {
                let a = v.as_u64().unwrap_or(0) as usize;
                if a == 0 {
                    return Err(AnimarError::InconsistentConfig {
                        reason: "general.alignment must be a positive integer".to_string(),
                    });
                }
                a
            }
            None => DEFAULT_ALIGNMENT,
        };

        let data_base = contents.descriptor_end.div_ceil(alignment) * alignment;

        let mut entries = Vec::with_capacity(contents.tensors.len());
        let mut by_name = HashMap::with_capacity(contents.tensors.len());
        let mut prev_end = 0u64;

        for desc in &contents.tensors {
            let elements_u64 =
                desc.elements()
                    .ok_or_else(|| AnimarError::InconsistentConfig {
                        reason: format!(
                            "tensor '{}' dimension product overflows: {:?}",
                            desc.name, desc.dims
                        ),
                    })?;

            let block_size = desc.kind.block_size() as u64;
            if elements_u64 == 0 || !elements_u64.is_multiple_of(block_size) {
                return Err(AnimarError::UnalignedTensor {
                    tensor: desc.name.clone(),
                    elements: elements_u64,
                    block_size: desc.kind.block_size(),
                });
            }

            let byte_len_u64 = elements_u64 / block_size * desc.kind.block_bytes() as u64;

            // File-order layout must move strictly forward.
            if desc.offset < prev_end {
                return Err(AnimarError::OverlappingTensor {
                    tensor: desc.name.clone(),
                    offset: desc.offset,
                    prev_end,
                });
            }
            prev_end = desc.offset + byte_len_u64;

            let abs_offset = data_base as u64 + desc.offset;
            let end = abs_offset + byte_len_u64;
            if end > file_len as u64 {
                return Err(AnimarError::TruncatedInput {
                    offset: abs_offset.min(usize::MAX as u64) as usize,
                    needed: byte_len_u64 as usize,
                    remaining: (file_len as u64).saturating_sub(abs_offset) as usize,
                });
            }

            let index = entries.len();
            if by_name.insert(desc.name.clone(), index).is_some() {
                return Err(AnimarError::DuplicateKey {
                    key: desc.name.clone(),
                });
            }

            entries.push(TensorEntry {
                desc: desc.clone(),
                elements: elements_u64 as usize,
                byte_len: byte_len_u64 as usize,
                abs_offset: abs_offset as usize,
            });
        }

        tracing::debug!(
            tensors = entries.len(),
            data_base,
            alignment,
            "tensor registry validated"
        );

        Ok(Self {
            entries,
            by_name,
            data_base,
            alignment,
        })
    }

    /// Look up a tensor by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&TensorEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Index of a tensor in file order.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// All entries in file order.
    #[must_use]
    pub fn entries(&self) -> &[TensorEntry] {
        &self.entries
    }

    /// Tensor names in file order.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.desc.name.as_str())
    }

    /// Number of tensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the file declares no tensors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absolute offset of the aligned data section.
    #[must_use]
    pub fn data_base(&self) -> usize {
        self.data_base
    }

    /// Alignment the data section was resolved against.
    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }
}
