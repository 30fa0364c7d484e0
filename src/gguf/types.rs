//! Core GGUF types and format constants.

use crate::quantize::QuantKind;

/// GGUF magic number: "GGUF" in little-endian.
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// The container version this crate supports.
pub const GGUF_VERSION: u32 = 3;

/// Data-section alignment when the file carries no `general.alignment` key.
pub const DEFAULT_ALIGNMENT: usize = 32;

/// Maximum tensor rank accepted by the parser.
pub const MAX_TENSOR_RANK: u32 = 4;

/// A parsed metadata value.
///
/// Scalar widths mirror the wire format; arrays hold scalars or strings,
/// never other arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Signed 8-bit integer.
    I8(i8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Signed 16-bit integer.
    I16(i16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 32-bit integer.
    I32(i32),
    /// 32-bit float.
    F32(f32),
    /// One-byte boolean.
    Bool(bool),
    /// UTF-8 string.
    Str(String),
    /// Homogeneous array of non-array values.
    Array(Vec<GgufValue>),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// Signed 64-bit integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
}

impl GgufValue {
    /// Coerce any non-negative integer variant to u64.
    ///
    /// GGUF writers are inconsistent about integer widths (a layer count may
    /// arrive as u32, u64 or even i32), so configuration lookups accept all
    /// of them. Negative values do not coerce.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::U8(v) => Some(u64::from(v)),
            Self::U16(v) => Some(u64::from(v)),
            Self::U32(v) => Some(u64::from(v)),
            Self::U64(v) => Some(v),
            Self::I8(v) => u64::try_from(v).ok(),
            Self::I16(v) => u64::try_from(v).ok(),
            Self::I32(v) => u64::try_from(v).ok(),
            Self::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// Coerce a float variant to f32.
    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::F32(v) => Some(v),
            Self::F64(v) => Some(v as f32),
            _ => None,
        }
    }

    /// Borrow a string variant.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Read a boolean variant.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow an array variant.
    #[must_use]
    pub fn as_array(&self) -> Option<&[GgufValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// The fixed-order file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufHeader {
    /// Format version (always [`GGUF_VERSION`] after validation).
    pub version: u32,
    /// Number of tensor descriptors in the file.
    pub tensor_count: u64,
    /// Number of metadata key-value pairs.
    pub metadata_count: u64,
}

/// One entry of the tensor descriptor table.
///
/// `dims` is stored in row-major order (outermost first); the file carries
/// them in GGML order and the parser reverses on read. `offset` is relative
/// to the aligned data-section base computed by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    /// Tensor name, unique within the file.
    pub name: String,
    /// Row-major dimension sizes.
    pub dims: Vec<u64>,
    /// Quantization type.
    pub kind: QuantKind,
    /// Byte offset relative to the data-section base.
    pub offset: u64,
}

impl TensorDescriptor {
    /// Flattened element count, `None` on multiplication overflow.
    #[must_use]
    pub fn elements(&self) -> Option<u64> {
        self.dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d))
    }
}
