//! Header, metadata and tensor descriptor parsing.

use std::collections::HashMap;

use crate::error::{AnimarError, Result};
use crate::gguf::reader::ByteReader;
use crate::gguf::types::{
    GgufHeader, GgufValue, TensorDescriptor, GGUF_MAGIC, GGUF_VERSION, MAX_TENSOR_RANK,
};
use crate::quantize::QuantKind;

/// Guard against corrupted headers driving huge allocations.
/// No published model comes close to these counts.
const MAX_TENSOR_COUNT: u64 = 100_000;
const MAX_METADATA_COUNT: u64 = 10_000;
const MAX_ARRAY_LEN: u64 = 10_000_000;

/// Everything decoded from the structured region of a GGUF file: header,
/// metadata table and tensor descriptors, plus the byte position where the
/// descriptor table ends (the unaligned start of the data section).
#[derive(Debug)]
pub struct GgufContents {
    /// Parsed header.
    pub header: GgufHeader,
    /// Metadata table. Duplicate keys resolve last-write-wins.
    pub metadata: HashMap<String, GgufValue>,
    /// Tensor descriptors in file order.
    pub tensors: Vec<TensorDescriptor>,
    /// Byte offset one past the descriptor table.
    pub descriptor_end: usize,
}

impl GgufContents {
    /// Parse the structured region of a GGUF byte stream.
    ///
    /// Duplicate metadata keys keep the last value and emit a `tracing`
    /// warning; use [`GgufContents::parse_strict`] to reject them instead.
    ///
    /// # Errors
    ///
    /// Any of the parse-time variants of [`AnimarError`]; all are terminal
    /// for the load.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_inner(data, false)
    }

    /// Parse, rejecting duplicate metadata keys with
    /// [`AnimarError::DuplicateKey`].
    ///
    /// # Errors
    ///
    /// As [`GgufContents::parse`], plus `DuplicateKey`.
    pub fn parse_strict(data: &[u8]) -> Result<Self> {
        Self::parse_inner(data, true)
    }

    fn parse_inner(data: &[u8], strict: bool) -> Result<Self> {
        let mut r = ByteReader::new(data);

        let header = Self::parse_header(&mut r)?;
        tracing::debug!(
            version = header.version,
            tensors = header.tensor_count,
            metadata = header.metadata_count,
            "parsed GGUF header"
        );

        let metadata = Self::parse_metadata(&mut r, header.metadata_count, strict)?;
        let tensors = Self::parse_descriptors(&mut r, header.tensor_count)?;

        Ok(Self {
            header,
            metadata,
            tensors,
            descriptor_end: r.position(),
        })
    }

    fn parse_header(r: &mut ByteReader<'_>) -> Result<GgufHeader> {
        let magic = r.read_u32()?;
        if magic != GGUF_MAGIC {
            return Err(AnimarError::BadMagic {
                found: magic,
                expected: GGUF_MAGIC,
            });
        }

        let version = r.read_u32()?;
        if version != GGUF_VERSION {
            return Err(AnimarError::UnsupportedVersion {
                version,
                supported: GGUF_VERSION,
            });
        }

        let tensor_count = r.read_u64()?;
        if tensor_count > MAX_TENSOR_COUNT {
            return Err(AnimarError::InconsistentConfig {
                reason: format!(
                    "tensor count {tensor_count} exceeds the maximum {MAX_TENSOR_COUNT} (corrupted header?)"
                ),
            });
        }

        let metadata_count = r.read_u64()?;
        if metadata_count > MAX_METADATA_COUNT {
            return Err(AnimarError::InconsistentConfig {
                reason: format!(
                    "metadata count {metadata_count} exceeds the maximum {MAX_METADATA_COUNT} (corrupted header?)"
                ),
            });
        }

        Ok(GgufHeader {
            version,
            tensor_count,
            metadata_count,
        })
    }

    fn parse_metadata(
        r: &mut ByteReader<'_>,
        count: u64,
        strict: bool,
    ) -> Result<HashMap<String, GgufValue>> {
        let mut metadata = HashMap::with_capacity(count.min(MAX_METADATA_COUNT) as usize);

        for _ in 0..count {
            let key = r.read_string()?;
            let tag_offset = r.position();
            let tag = r.read_u32()?;
            let value = Self::read_value(r, tag, tag_offset, true)?;

            if metadata.insert(key.clone(), value).is_some() {
                if strict {
                    return Err(AnimarError::DuplicateKey { key });
                }
                tracing::warn!(key = %key, "duplicate metadata key, last value wins");
            }
        }

        Ok(metadata)
    }

    /// Decode one metadata value. `allow_array` is cleared for array
    /// elements: the format permits arrays of scalars or strings only.
    fn read_value(
        r: &mut ByteReader<'_>,
        tag: u32,
        tag_offset: usize,
        allow_array: bool,
    ) -> Result<GgufValue> {
        match tag {
            0 => Ok(GgufValue::U8(r.read_u8()?)),
            1 => Ok(GgufValue::I8(r.read_i8()?)),
            2 => Ok(GgufValue::U16(r.read_u16()?)),
            3 => Ok(GgufValue::I16(r.read_i16()?)),
            4 => Ok(GgufValue::U32(r.read_u32()?)),
            5 => Ok(GgufValue::I32(r.read_i32()?)),
            6 => Ok(GgufValue::F32(r.read_f32()?)),
            7 => Ok(GgufValue::Bool(r.read_bool()?)),
            8 => Ok(GgufValue::Str(r.read_string()?)),
            9 if allow_array => {
                let elem_tag_offset = r.position();
                let elem_tag = r.read_u32()?;
                let len = r.read_u64()?;
                if len > MAX_ARRAY_LEN {
                    return Err(AnimarError::InconsistentConfig {
                        reason: format!(
                            "metadata array length {len} exceeds the maximum {MAX_ARRAY_LEN} (corrupted?)"
                        ),
                    });
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(Self::read_value(r, elem_tag, elem_tag_offset, false)?);
                }
                Ok(GgufValue::Array(items))
            }
            10 => Ok(GgufValue::U64(r.read_u64()?)),
            11 => Ok(GgufValue::I64(r.read_i64()?)),
            12 => Ok(GgufValue::F64(r.read_f64()?)),
            _ => Err(AnimarError::UnknownValueType {
                tag,
                offset: tag_offset,
            }),
        }
    }

    fn parse_descriptors(r: &mut ByteReader<'_>, count: u64) -> Result<Vec<TensorDescriptor>> {
        let mut tensors = Vec::with_capacity(count.min(MAX_TENSOR_COUNT) as usize);

        for _ in 0..count {
            let name = r.read_string()?;

            let rank = r.read_u32()?;
            if rank == 0 || rank > MAX_TENSOR_RANK {
                return Err(AnimarError::InvalidRank {
                    tensor: name,
                    rank,
                    max: MAX_TENSOR_RANK,
                });
            }

            // The file stores dimensions in GGML order (innermost first);
            // reverse to row-major so dims[0] is the outermost axis.
            let mut dims = Vec::with_capacity(rank as usize);
            for _ in 0..rank {
                dims.push(r.read_u64()?);
            }
            dims.reverse();

            let tag = r.read_u32()?;
            let kind = QuantKind::from_tag(tag)
                .ok_or_else(|| AnimarError::UnknownQuantType {
                    tensor: name.clone(),
                    tag,
                })?;

            let offset = r.read_u64()?;

            tensors.push(TensorDescriptor {
                name,
                dims,
                kind,
                offset,
            });
        }

        Ok(tensors)
    }
}
