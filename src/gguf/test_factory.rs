//! In-memory synthesis of valid GGUF v3 files.
//!
//! [`GgufBuilder`] produces byte streams the parser accepts, without any
//! model file on disk. The `add_raw_*` methods deliberately bypass
//! validation so tests can construct corrupt descriptors (bad tags, bogus
//! offsets, short payloads) and assert on the exact rejection.

use crate::gguf::types::{DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION};
use crate::quantize::QuantKind;

struct TensorSpec {
    name: String,
    /// Row-major dims; written to the file in GGML (reversed) order.
    dims: Vec<u64>,
    tag: u32,
    offset_override: Option<u64>,
    data: Vec<u8>,
}

/// Builder for valid (or deliberately corrupted) GGUF v3 byte streams.
#[derive(Default)]
pub struct GgufBuilder {
    metadata: Vec<(String, u32, Vec<u8>)>,
    tensors: Vec<TensorSpec>,
    alignment: Option<usize>,
}

fn string_bytes(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + s.len());
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    out
}

impl GgufBuilder {
    /// Start an empty file (no metadata, no tensors).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Add a string metadata value.
    #[must_use]
    pub fn add_string(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), 8, string_bytes(value)));
        self
    }

    /// Add a u32 metadata value.
    #[must_use]
    pub fn add_u32(mut self, key: &str, value: u32) -> Self {
        self.metadata
            .push((key.to_string(), 4, value.to_le_bytes().to_vec()));
        self
    }

    /// Add a u64 metadata value.
    #[must_use]
    pub fn add_u64(mut self, key: &str, value: u64) -> Self {
        self.metadata
            .push((key.to_string(), 10, value.to_le_bytes().to_vec()));
        self
    }

    /// Add an f32 metadata value.
    #[must_use]
    pub fn add_f32(mut self, key: &str, value: f32) -> Self {
        self.metadata
            .push((key.to_string(), 6, value.to_le_bytes().to_vec()));
        self
    }

    /// Add a bool metadata value.
    #[must_use]
    pub fn add_bool(mut self, key: &str, value: bool) -> Self {
        self.metadata
            .push((key.to_string(), 7, vec![u8::from(value)]));
        self
    }

    /// Add an array-of-strings metadata value.
    #[must_use]
    pub fn add_str_array(mut self, key: &str, items: &[&str]) -> Self {
        let mut payload = Vec::new();
        payload.extend_from_slice(&8u32.to_le_bytes()); // element tag: string
        payload.extend_from_slice(&(items.len() as u64).to_le_bytes());
        for item in items {
            payload.extend_from_slice(&string_bytes(item));
        }
        self.metadata.push((key.to_string(), 9, payload));
        self
    }

    /// Add a metadata entry with an arbitrary type tag and raw payload.
    #[must_use]
    pub fn add_raw_value(mut self, key: &str, tag: u32, payload: &[u8]) -> Self {
        self.metadata.push((key.to_string(), tag, payload.to_vec()));
        self
    }

    /// Set `general.alignment` and use it for the data-section layout.
    #[must_use]
    pub fn alignment(mut self, alignment: u32) -> Self {
        self.alignment = Some(alignment as usize);
        self.add_u32("general.alignment", alignment)
    }

    // =========================================================================
    // Architecture shorthands
    // =========================================================================

    /// Set `general.architecture`.
    #[must_use]
    pub fn architecture(self, arch: &str) -> Self {
        self.add_string("general.architecture", arch)
    }

    /// Set `{arch}.embedding_length`.
    #[must_use]
    pub fn embedding_length(self, arch: &str, dim: u32) -> Self {
        self.add_u32(&format!("{arch}.embedding_length"), dim)
    }

    /// Set `{arch}.block_count`.
    #[must_use]
    pub fn block_count(self, arch: &str, count: u32) -> Self {
        self.add_u32(&format!("{arch}.block_count"), count)
    }

    /// Set `{arch}.attention.head_count`.
    #[must_use]
    pub fn head_count(self, arch: &str, count: u32) -> Self {
        self.add_u32(&format!("{arch}.attention.head_count"), count)
    }

    /// Set `{arch}.attention.head_count_kv`.
    #[must_use]
    pub fn head_count_kv(self, arch: &str, count: u32) -> Self {
        self.add_u32(&format!("{arch}.attention.head_count_kv"), count)
    }

    /// Set `{arch}.feed_forward_length`.
    #[must_use]
    pub fn feed_forward_length(self, arch: &str, dim: u32) -> Self {
        self.add_u32(&format!("{arch}.feed_forward_length"), dim)
    }

    /// Set `{arch}.context_length`.
    #[must_use]
    pub fn context_length(self, arch: &str, len: u32) -> Self {
        self.add_u32(&format!("{arch}.context_length"), len)
    }

    /// Set `{arch}.attention.layer_norm_rms_epsilon`.
    #[must_use]
    pub fn rms_epsilon(self, arch: &str, eps: f32) -> Self {
        self.add_f32(&format!("{arch}.attention.layer_norm_rms_epsilon"), eps)
    }

    /// Set `{arch}.rope.freq_base`.
    #[must_use]
    pub fn rope_freq_base(self, arch: &str, base: f32) -> Self {
        self.add_f32(&format!("{arch}.rope.freq_base"), base)
    }

    /// Set `{arch}.vocab_size`.
    #[must_use]
    pub fn vocab_size(self, arch: &str, size: u32) -> Self {
        self.add_u32(&format!("{arch}.vocab_size"), size)
    }

    // =========================================================================
    // Tensors
    // =========================================================================

    /// Add an F32 tensor with row-major `dims` at the next aligned slot.
    #[must_use]
    pub fn add_f32_tensor(mut self, name: &str, dims: &[u64], data: &[f32]) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|f| f.to_le_bytes()).collect();
        self.tensors.push(TensorSpec {
            name: name.to_string(),
            dims: dims.to_vec(),
            tag: QuantKind::F32.tag(),
            offset_override: None,
            data: bytes,
        });
        self
    }

    /// Add a quantized tensor from pre-packed block bytes at the next
    /// aligned slot.
    #[must_use]
    pub fn add_quantized_tensor(
        mut self,
        name: &str,
        dims: &[u64],
        kind: QuantKind,
        blocks: &[u8],
    ) -> Self {
        self.tensors.push(TensorSpec {
            name: name.to_string(),
            dims: dims.to_vec(),
            tag: kind.tag(),
            offset_override: None,
            data: blocks.to_vec(),
        });
        self
    }

    /// Add a tensor descriptor verbatim: arbitrary tag, explicit offset, raw
    /// payload. No validation; intended for corruption tests.
    #[must_use]
    pub fn add_raw_tensor(
        mut self,
        name: &str,
        dims: &[u64],
        tag: u32,
        offset: u64,
        data: &[u8],
    ) -> Self {
        self.tensors.push(TensorSpec {
            name: name.to_string(),
            dims: dims.to_vec(),
            tag,
            offset_override: Some(offset),
            data: data.to_vec(),
        });
        self
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Serialize to GGUF v3 bytes.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let alignment = self.alignment.unwrap_or(DEFAULT_ALIGNMENT);

        // Lay out payload slots first: each tensor lands on the next aligned
        // offset within the data section, as llama.cpp writers do.
        let mut natural_offsets = Vec::with_capacity(self.tensors.len());
        let mut cursor = 0usize;
        for spec in &self.tensors {
            let slot = cursor.div_ceil(alignment) * alignment;
            natural_offsets.push(slot);
            cursor = slot + spec.data.len();
        }

        let mut out = Vec::new();
        out.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        out.extend_from_slice(&GGUF_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.metadata.len() as u64).to_le_bytes());

        for (key, tag, payload) in &self.metadata {
            out.extend_from_slice(&string_bytes(key));
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(payload);
        }

        for (spec, &natural) in self.tensors.iter().zip(&natural_offsets) {
            out.extend_from_slice(&string_bytes(&spec.name));
            out.extend_from_slice(&(spec.dims.len() as u32).to_le_bytes());
            for dim in spec.dims.iter().rev() {
                out.extend_from_slice(&dim.to_le_bytes());
            }
            out.extend_from_slice(&spec.tag.to_le_bytes());
            let offset = spec.offset_override.unwrap_or(natural as u64);
            out.extend_from_slice(&offset.to_le_bytes());
        }

        // Aligned data section with payloads at their natural slots.
        let data_base = out.len().div_ceil(alignment) * alignment;
        out.resize(data_base, 0);
        for (spec, &natural) in self.tensors.iter().zip(&natural_offsets) {
            out.resize(data_base + natural, 0);
            out.extend_from_slice(&spec.data);
        }

        out
    }
}

// =============================================================================
// Synthetic model construction
// =============================================================================

/// Shape of a synthetic LLaMA-family model.
#[derive(Debug, Clone, Copy)]
pub struct TinyLlamaSpec {
    /// Vocabulary size.
    pub vocab: usize,
    /// Hidden size.
    pub hidden: usize,
    /// Layer count.
    pub layers: usize,
    /// Attention head count.
    pub heads: usize,
    /// Key/value head count.
    pub kv_heads: usize,
    /// Feed-forward intermediate size.
    pub intermediate: usize,
    /// Context length.
    pub context: usize,
}

/// Deterministic pseudo-random weights in roughly [-0.1, 0.1].
///
/// A fixed LCG keeps synthetic models reproducible across runs without
/// pulling in an RNG crate.
#[must_use]
pub fn synthetic_weights(n: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let unit = (state >> 33) as f32 / (1u64 << 31) as f32;
            (unit - 0.5) * 0.2
        })
        .collect()
}

/// Add the metadata keys for `spec` to `builder`.
#[must_use]
pub fn tiny_llama_metadata_into(builder: GgufBuilder, spec: &TinyLlamaSpec) -> GgufBuilder {
    builder
        .architecture("llama")
        .embedding_length("llama", spec.hidden as u32)
        .block_count("llama", spec.layers as u32)
        .head_count("llama", spec.heads as u32)
        .head_count_kv("llama", spec.kv_heads as u32)
        .feed_forward_length("llama", spec.intermediate as u32)
        .context_length("llama", spec.context as u32)
        .rms_epsilon("llama", 1e-5)
        .rope_freq_base("llama", 10_000.0)
}

fn tensors_into(mut builder: GgufBuilder, spec: &TinyLlamaSpec, with_output: bool) -> GgufBuilder {
    let (v, h, inter) = (spec.vocab as u64, spec.hidden as u64, spec.intermediate as u64);
    let kv = (spec.kv_heads * (spec.hidden / spec.heads)) as u64;
    let ones = vec![1.0f32; spec.hidden];

    builder = builder.add_f32_tensor(
        "token_embd.weight",
        &[v, h],
        &synthetic_weights((v * h) as usize, 1),
    );

    for i in 0..spec.layers {
        let seed = (i as u64 + 2) * 100;
        let p = |suffix: &str| format!("blk.{i}.{suffix}");
        builder = builder
            .add_f32_tensor(&p("attn_norm.weight"), &[h], &ones)
            .add_f32_tensor(
                &p("attn_q.weight"),
                &[h, h],
                &synthetic_weights((h * h) as usize, seed + 1),
            )
            .add_f32_tensor(
                &p("attn_k.weight"),
                &[kv, h],
                &synthetic_weights((kv * h) as usize, seed + 2),
            )
            .add_f32_tensor(
                &p("attn_v.weight"),
                &[kv, h],
                &synthetic_weights((kv * h) as usize, seed + 3),
            )
            .add_f32_tensor(
                &p("attn_output.weight"),
                &[h, h],
                &synthetic_weights((h * h) as usize, seed + 4),
            )
            .add_f32_tensor(&p("ffn_norm.weight"), &[h], &ones)
            .add_f32_tensor(
                &p("ffn_gate.weight"),
                &[inter, h],
                &synthetic_weights((inter * h) as usize, seed + 5),
            )
            .add_f32_tensor(
                &p("ffn_up.weight"),
                &[inter, h],
                &synthetic_weights((inter * h) as usize, seed + 6),
            )
            .add_f32_tensor(
                &p("ffn_down.weight"),
                &[h, inter],
                &synthetic_weights((h * inter) as usize, seed + 7),
            );
    }

    builder = builder.add_f32_tensor("output_norm.weight", &[h], &ones);
    if with_output {
        builder = builder.add_f32_tensor(
            "output.weight",
            &[v, h],
            &synthetic_weights((v * h) as usize, 9),
        );
    }
    builder
}

/// Add the full tensor set for `spec` (including `output.weight`).
#[must_use]
pub fn tiny_llama_tensors_into(builder: GgufBuilder, spec: &TinyLlamaSpec) -> GgufBuilder {
    tensors_into(builder, spec, true)
}

/// Add metadata and tensors for `spec`.
#[must_use]
pub fn tiny_llama_into(builder: GgufBuilder, spec: &TinyLlamaSpec) -> GgufBuilder {
    tensors_into(tiny_llama_metadata_into(builder, spec), spec, true)
}

/// Build a complete synthetic model file.
#[must_use]
pub fn build_tiny_llama(spec: &TinyLlamaSpec) -> Vec<u8> {
    tiny_llama_into(GgufBuilder::new(), spec).build()
}

/// Build a synthetic model without `output.weight` (tied embeddings).
#[must_use]
pub fn build_tiny_llama_tied(spec: &TinyLlamaSpec) -> Vec<u8> {
    tensors_into(tiny_llama_metadata_into(GgufBuilder::new(), spec), spec, false).build()
}
