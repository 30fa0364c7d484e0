//! Quantization types and dequantization kernels.
//!
//! Every GGUF tensor carries a quantization type tag. [`QuantKind`] is the
//! typed form of that tag and the single dispatch point for decoding: each
//! variant knows its block geometry and routes to one pure decode function
//! in [`dequant`]. New kinds are added by extending the enum and the
//! dispatch table; there is no trait hierarchy to thread through.

pub mod dequant;

use crate::error::{AnimarError, Result};

/// Elements per block for the 32-element quantization formats.
pub const BLOCK_SIZE: usize = 32;

/// Elements per super-block for the K-quantization family.
pub const QK_K: usize = 256;

/// A recognized GGUF quantization type.
///
/// `Q3K` parses (its descriptors and byte lengths are understood) but has no
/// decode kernel yet; realizing such a tensor fails with
/// [`AnimarError::UnsupportedQuantType`].
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantKind {
    /// Unquantized float32.
    F32,
    /// IEEE-754 half precision.
    F16,
    /// 4-bit, f16 scale per 32-element block.
    Q4_0,
    /// 4-bit, f16 scale and minimum per 32-element block.
    Q4_1,
    /// 5-bit, f16 scale per 32-element block.
    Q5_0,
    /// 5-bit, f16 scale and minimum per 32-element block.
    Q5_1,
    /// 8-bit, f16 scale per 32-element block.
    Q8_0,
    /// 2-bit K-quantization, 256-element super-block.
    Q2K,
    /// 3-bit K-quantization, 256-element super-block (parse-only).
    Q3K,
    /// 4-bit K-quantization, 256-element super-block.
    Q4K,
    /// 5-bit K-quantization, 256-element super-block.
    Q5K,
    /// 6-bit K-quantization, 256-element super-block.
    Q6K,
    /// 8-bit K-quantization, 256-element super-block.
    Q8K,
}

impl QuantKind {
    /// Decode a GGUF type tag. Returns `None` for unrecognized tags.
    #[must_use]
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::F32),
            1 => Some(Self::F16),
            2 => Some(Self::Q4_0),
            3 => Some(Self::Q4_1),
            6 => Some(Self::Q5_0),
            7 => Some(Self::Q5_1),
            8 => Some(Self::Q8_0),
            10 => Some(Self::Q2K),
            11 => Some(Self::Q3K),
            12 => Some(Self::Q4K),
            13 => Some(Self::Q5K),
            14 => Some(Self::Q6K),
            15 => Some(Self::Q8K),
            _ => None,
        }
    }

    /// The GGUF type tag for this kind.
    #[must_use]
    pub fn tag(self) -> u32 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
            Self::Q4_0 => 2,
            Self::Q4_1 => 3,
            Self::Q5_0 => 6,
            Self::Q5_1 => 7,
            Self::Q8_0 => 8,
            Self::Q2K => 10,
            Self::Q3K => 11,
            Self::Q4K => 12,
            Self::Q5K => 13,
            Self::Q6K => 14,
            Self::Q8K => 15,
        }
    }

    /// Elements grouped into one block of this kind.
    #[must_use]
    pub fn block_size(self) -> usize {
        match self {
            Self::F32 | Self::F16 => 1,
            Self::Q4_0 | Self::Q4_1 | Self::Q5_0 | Self::Q5_1 | Self::Q8_0 => BLOCK_SIZE,
            Self::Q2K | Self::Q3K | Self::Q4K | Self::Q5K | Self::Q6K | Self::Q8K => QK_K,
        }
    }

    /// Bytes occupied by one block of this kind (GGML on-disk layout).
    #[must_use]
    pub fn block_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
            Self::Q4_0 => 18,  // f16 d + 16 packed nibble bytes
            Self::Q4_1 => 20,  // f16 d + f16 m + 16 bytes
            Self::Q5_0 => 22,  // f16 d + u32 high bits + 16 bytes
            Self::Q5_1 => 24,  // f16 d + f16 m + u32 high bits + 16 bytes
            Self::Q8_0 => 34,  // f16 d + 32 i8
            Self::Q2K => 84,   // 16 scale/min bytes + 64 code bytes + f16 d + f16 dmin
            Self::Q3K => 110,  // 32 hmask + 64 codes + 12 scales + f16 d
            Self::Q4K => 144,  // f16 d + f16 dmin + 12 scale bytes + 128 nibble bytes
            Self::Q5K => 176,  // Q4K layout + 32 high-bit bytes
            Self::Q6K => 210,  // 128 low + 64 high + 16 i8 scales + f16 d
            Self::Q8K => 292,  // f32 d + 256 i8 + 16 i16 block sums
        }
    }

    /// Short lowercase name matching llama.cpp's type strings.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::Q4_0 => "q4_0",
            Self::Q4_1 => "q4_1",
            Self::Q5_0 => "q5_0",
            Self::Q5_1 => "q5_1",
            Self::Q8_0 => "q8_0",
            Self::Q2K => "q2_k",
            Self::Q3K => "q3_k",
            Self::Q4K => "q4_k",
            Self::Q5K => "q5_k",
            Self::Q6K => "q6_k",
            Self::Q8K => "q8_k",
        }
    }

    /// Dequantize `raw` into `elements` dense f32 values.
    ///
    /// `raw` must hold exactly the whole blocks covering `elements`
    /// (`elements / block_size * block_bytes` bytes); the element count must
    /// be a whole number of blocks. `tensor` is used only for diagnostics.
    ///
    /// # Errors
    ///
    /// [`AnimarError::UnalignedTensor`] when `elements` or `raw` do not line
    /// up with the block geometry, [`AnimarError::UnsupportedQuantType`] for
    /// kinds without a decode kernel.
    pub fn dequantize(self, raw: &[u8], elements: usize, tensor: &str) -> Result<Vec<f32>> {
        if !elements.is_multiple_of(self.block_size())
            || raw.len() != elements / self.block_size() * self.block_bytes()
        {
            return Err(AnimarError::UnalignedTensor {
                tensor: tensor.to_string(),
                elements: elements as u64,
                block_size: self.block_size(),
            });
        }

        let values = match self {
            Self::F32 => dequant::widen_f32(raw),
            Self::F16 => dequant::dequantize_f16(raw),
            Self::Q4_0 => dequant::dequantize_q4_0(raw),
            Self::Q4_1 => dequant::dequantize_q4_1(raw),
            Self::Q5_0 => dequant::dequantize_q5_0(raw),
            Self::Q5_1 => dequant::dequantize_q5_1(raw),
            Self::Q8_0 => dequant::dequantize_q8_0(raw),
            Self::Q2K => dequant::dequantize_q2_k(raw),
            Self::Q4K => dequant::dequantize_q4_k(raw),
            Self::Q5K => dequant::dequantize_q5_k(raw),
            Self::Q6K => dequant::dequantize_q6_k(raw),
            Self::Q8K => dequant::dequantize_q8_k(raw),
            Self::Q3K => {
                return Err(AnimarError::UnsupportedQuantType {
                    tensor: tensor.to_string(),
                    kind: self,
                })
            }
        };

        debug_assert_eq!(values.len(), elements);
        Ok(values)
    }
}

impl std::fmt::Display for QuantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
