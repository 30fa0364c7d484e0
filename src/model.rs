//! Architecture reconstruction: metadata + tensor registry → an immutable
//! LLaMA-family parameter set.

use std::sync::Arc;

use crate::error::{AnimarError, Result};
use crate::gguf::Gguf;

/// Tensor name of the token embedding table.
pub const TOKEN_EMBEDDING: &str = "token_embd.weight";
/// Tensor name of the final normalization weights.
pub const OUTPUT_NORM: &str = "output_norm.weight";
/// Tensor name of the vocabulary projection.
pub const OUTPUT: &str = "output.weight";

/// Transformer configuration scalars extracted from GGUF metadata.
///
/// Keys live under the `general.architecture` prefix
/// (`llama.embedding_length`, `llama.block_count`, ...). Architecture,
/// embedding length, block count and head count are required; the rest take
/// the conventional LLaMA defaults when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct LlamaConfig {
    /// Architecture string from `general.architecture`.
    pub architecture: String,
    /// Embedding width (hidden size).
    pub hidden_size: usize,
    /// Transformer layer count.
    pub num_layers: usize,
    /// Attention head count.
    pub num_heads: usize,
    /// Key/value head count (< `num_heads` for grouped-query attention).
    pub num_kv_heads: usize,
    /// Vocabulary size, taken from the embedding tensor's shape.
    pub vocab_size: usize,
    /// Feed-forward intermediate width.
    pub intermediate_size: usize,
    /// Maximum context length.
    pub context_length: usize,
    /// RMSNorm epsilon.
    pub rms_eps: f32,
    /// Rotary embedding frequency base.
    pub rope_theta: f32,
}

fn require_u64(gguf: &Gguf, key: &str) -> Result<u64> {
    gguf.meta_u64(key)
        .ok_or_else(|| AnimarError::MissingMetadataKey {
            key: key.to_string(),
        })
}

impl LlamaConfig {
    /// Extract and validate the configuration from a parsed container.
    ///
    /// # Errors
    ///
    /// [`AnimarError::MissingMetadataKey`] for absent required keys,
    /// [`AnimarError::MissingTensor`] when the embedding tensor (the source
    /// of the vocabulary size) is absent, [`AnimarError::InconsistentConfig`]
    /// when the scalars fail validation.
    pub fn from_gguf(gguf: &Gguf) -> Result<Self> {
        let architecture = gguf
            .architecture()
            .ok_or_else(|| AnimarError::MissingMetadataKey {
                key: "general.architecture".to_string(),
            })?
            .to_string();
        let arch = architecture.as_str();

        let hidden_size = require_u64(gguf, &format!("{arch}.embedding_length"))? as usize;
        let num_layers = require_u64(gguf, &format!("{arch}.block_count"))? as usize;
        let num_heads = require_u64(gguf, &format!("{arch}.attention.head_count"))? as usize;
        let num_kv_heads = gguf
            .meta_u64(&format!("{arch}.attention.head_count_kv"))
            .map_or(num_heads, |v| v as usize);

        // The embedding tensor is authoritative for the vocabulary size;
        // a vocab_size key, when present, must agree.
        let embedding = gguf
            .descriptor(TOKEN_EMBEDDING)
            .ok_or_else(|| AnimarError::MissingTensor {
                name: TOKEN_EMBEDDING.to_string(),
            })?;
        let vocab_size = embedding.desc.dims.first().copied().unwrap_or(0) as usize;
        if let Some(declared) = gguf.meta_u64(&format!("{arch}.vocab_size")) {
            if declared as usize != vocab_size {
                return Err(AnimarError::InconsistentConfig {
                    reason: format!(
                        "{arch}.vocab_size is {declared} but {TOKEN_EMBEDDING} has {vocab_size} rows"
                    ),
                });
            }
        }

        // Intermediate width: metadata key, or the ffn_up tensor's output
        // dimension when the key is absent.
        let intermediate_size = match gguf.meta_u64(&format!("{arch}.feed_forward_length")) {
            Some(v) => v as usize,
            None => gguf
                .descriptor("blk.0.ffn_up.weight")
                .and_then(|t| t.desc.dims.first().copied())
                .ok_or_else(|| AnimarError::MissingMetadataKey {
                    key: format!("{arch}.feed_forward_length"),
                })? as usize,
        };

        let context_length = gguf
            .meta_u64(&format!("{arch}.context_length"))
            .map_or(2048, |v| v as usize);
        let rms_eps = gguf
            .meta_f32(&format!("{arch}.attention.layer_norm_rms_epsilon"))
            .unwrap_or(1e-5);
        let rope_theta = gguf
            .meta_f32(&format!("{arch}.rope.freq_base"))
            .unwrap_or(10_000.0);

        let config = Self {
            architecture,
            hidden_size,
            num_layers,
            num_heads,
            num_kv_heads,
            vocab_size,
            intermediate_size,
            context_length,
            rms_eps,
            rope_theta,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the structural invariants.
    ///
    /// # Errors
    ///
    /// [`AnimarError::InconsistentConfig`] when any scalar is zero, the
    /// hidden size does not divide across heads, or the head count does not
    /// divide across KV heads.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("hidden_size", self.hidden_size),
            ("num_layers", self.num_layers),
            ("num_heads", self.num_heads),
            ("num_kv_heads", self.num_kv_heads),
            ("vocab_size", self.vocab_size),
            ("intermediate_size", self.intermediate_size),
            ("context_length", self.context_length),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(AnimarError::InconsistentConfig {
                    reason: format!("{name} must be nonzero"),
                });
            }
        }
        if !self.hidden_size.is_multiple_of(self.num_heads) {
            return Err(AnimarError::InconsistentConfig {
                reason: format!(
                    "hidden_size {} is not divisible by num_heads {}",
                    self.hidden_size, self.num_heads
                ),
            });
        }
        if !self.num_heads.is_multiple_of(self.num_kv_heads) {
            return Err(AnimarError::InconsistentConfig {
                reason: format!(
                    "num_heads {} is not divisible by num_kv_heads {}",
                    self.num_heads, self.num_kv_heads
                ),
            });
        }
        Ok(())
    }

    /// Width of one attention head.
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    /// Combined width of the key/value heads.
    #[must_use]
    pub fn kv_dim(&self) -> usize {
        self.num_kv_heads * self.head_dim()
    }
}

/// Resolved tensor names for one transformer layer.
#[derive(Debug, Clone)]
pub(crate) struct LayerNames {
    pub attn_norm: String,
    pub attn_q: String,
    pub attn_k: String,
    pub attn_v: String,
    pub attn_output: String,
    pub ffn_norm: String,
    pub ffn_gate: String,
    pub ffn_up: String,
    pub ffn_down: String,
}

impl LayerNames {
    fn for_layer(i: usize) -> Self {
        Self {
            attn_norm: format!("blk.{i}.attn_norm.weight"),
            attn_q: format!("blk.{i}.attn_q.weight"),
            attn_k: format!("blk.{i}.attn_k.weight"),
            attn_v: format!("blk.{i}.attn_v.weight"),
            attn_output: format!("blk.{i}.attn_output.weight"),
            ffn_norm: format!("blk.{i}.ffn_norm.weight"),
            ffn_gate: format!("blk.{i}.ffn_gate.weight"),
            ffn_up: format!("blk.{i}.ffn_up.weight"),
            ffn_down: format!("blk.{i}.ffn_down.weight"),
        }
    }
}

/// An immutable LLaMA-family model: configuration plus the bound parameter
/// set over a loaded container.
///
/// Construction verifies that every tensor the declared layer count requires
/// exists with the expected element count; dequantization itself stays lazy.
/// The model is `Send + Sync` and intended to be wrapped in an `Arc` and
/// shared across inference sessions.
#[derive(Debug)]
pub struct LlamaModel {
    gguf: Gguf,
    config: LlamaConfig,
    layers: Vec<LayerNames>,
    /// Name of the vocabulary projection tensor; falls back to the embedding
    /// table when `output.weight` is absent (tied embeddings).
    output_name: String,
}

impl LlamaModel {
    /// Bind the architecture over a parsed container.
    ///
    /// # Errors
    ///
    /// Configuration errors from [`LlamaConfig::from_gguf`],
    /// [`AnimarError::MissingTensor`] for any absent required tensor,
    /// [`AnimarError::InconsistentConfig`] when a tensor's shape disagrees
    /// with the configuration.
    pub fn from_gguf(gguf: Gguf) -> Result<Self> {
        let config = LlamaConfig::from_gguf(&gguf)?;

        let hidden = config.hidden_size;
        let kv_dim = config.kv_dim();
        let inter = config.intermediate_size;
        let vocab = config.vocab_size;

        expect_tensor(&gguf, TOKEN_EMBEDDING, vocab * hidden)?;
        expect_tensor(&gguf, OUTPUT_NORM, hidden)?;

        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            let names = LayerNames::for_layer(i);
            expect_tensor(&gguf, &names.attn_norm, hidden)?;
            expect_tensor(&gguf, &names.attn_q, hidden * hidden)?;
            expect_tensor(&gguf, &names.attn_k, kv_dim * hidden)?;
            expect_tensor(&gguf, &names.attn_v, kv_dim * hidden)?;
            expect_tensor(&gguf, &names.attn_output, hidden * hidden)?;
            expect_tensor(&gguf, &names.ffn_norm, hidden)?;
            expect_tensor(&gguf, &names.ffn_gate, inter * hidden)?;
            expect_tensor(&gguf, &names.ffn_up, inter * hidden)?;
            expect_tensor(&gguf, &names.ffn_down, hidden * inter)?;
            layers.push(names);
        }

        let output_name = if gguf.descriptor(OUTPUT).is_some() {
            expect_tensor(&gguf, OUTPUT, vocab * hidden)?;
            OUTPUT.to_string()
        } else {
            tracing::debug!("no {OUTPUT} tensor, using tied embeddings");
            TOKEN_EMBEDDING.to_string()
        };

        Ok(Self {
            gguf,
            config,
            layers,
            output_name,
        })
    }

    /// The extracted configuration.
    #[must_use]
    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    /// The underlying container.
    #[must_use]
    pub fn gguf(&self) -> &Gguf {
        &self.gguf
    }

    /// Dense values for any tensor in the file (lazy, memoized).
    ///
    /// # Errors
    ///
    /// As [`Gguf::parameter`].
    pub fn parameter(&self, name: &str) -> Result<Arc<Vec<f32>>> {
        self.gguf.parameter(name)
    }

    /// Name of the vocabulary projection tensor in use.
    #[must_use]
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub(crate) fn layer(&self, i: usize) -> &LayerNames {
        &self.layers[i]
    }
}

/// Require a tensor to exist with an exact element count.
fn expect_tensor(gguf: &Gguf, name: &str, elements: usize) -> Result<()> {
    let entry = gguf
        .descriptor(name)
        .ok_or_else(|| AnimarError::MissingTensor {
            name: name.to_string(),
        })?;
    if entry.elements != elements {
        return Err(AnimarError::InconsistentConfig {
            reason: format!(
                "tensor '{name}' has {} elements, the configuration requires {elements}",
                entry.elements
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::test_factory::{build_tiny_llama, GgufBuilder, TinyLlamaSpec};

    fn default_spec() -> TinyLlamaSpec {
        TinyLlamaSpec {
            vocab: 11,
            hidden: 8,
            layers: 2,
            heads: 2,
            kv_heads: 1,
            intermediate: 16,
            context: 64,
        }
    }

    #[test]
    fn test_config_extraction() {
        let gguf = Gguf::from_bytes(build_tiny_llama(&default_spec())).unwrap();
        let config = LlamaConfig::from_gguf(&gguf).unwrap();
        assert_eq!(config.architecture, "llama");
        assert_eq!(config.hidden_size, 8);
        assert_eq!(config.num_layers, 2);
        assert_eq!(config.num_heads, 2);
        assert_eq!(config.num_kv_heads, 1);
        assert_eq!(config.vocab_size, 11);
        assert_eq!(config.intermediate_size, 16);
        assert_eq!(config.context_length, 64);
        assert_eq!(config.head_dim(), 4);
        assert_eq!(config.kv_dim(), 4);
    }

    #[test]
    fn test_missing_architecture_key() {
        let gguf = Gguf::from_bytes(GgufBuilder::new().build()).unwrap();
        let err = LlamaConfig::from_gguf(&gguf).unwrap_err();
        assert!(matches!(
            err,
            AnimarError::MissingMetadataKey { key } if key == "general.architecture"
        ));
    }

    #[test]
    fn test_missing_head_count_key() {
        let data = GgufBuilder::new()
            .architecture("llama")
            .embedding_length("llama", 8)
            .block_count("llama", 1)
            .build();
        let gguf = Gguf::from_bytes(data).unwrap();
        let err = LlamaConfig::from_gguf(&gguf).unwrap_err();
        assert!(matches!(
            err,
            AnimarError::MissingMetadataKey { key } if key == "llama.attention.head_count"
        ));
    }

    #[test]
    fn test_indivisible_heads_rejected() {
        // hidden_size 8 with 3 heads cannot produce an integral head width
        let mut spec = default_spec();
        spec.heads = 3;
        spec.kv_heads = 3;
        let gguf = Gguf::from_bytes(build_tiny_llama(&spec)).unwrap();
        let err = LlamaConfig::from_gguf(&gguf).unwrap_err();
        assert!(matches!(err, AnimarError::InconsistentConfig { .. }));
    }

    #[test]
    fn test_gqa_ratio_must_be_integral() {
        let config = LlamaConfig {
            architecture: "llama".into(),
            hidden_size: 12,
            num_layers: 1,
            num_heads: 4,
            num_kv_heads: 3,
            vocab_size: 10,
            intermediate_size: 8,
            context_length: 32,
            rms_eps: 1e-5,
            rope_theta: 10_000.0,
        };
        assert!(matches!(
            config.validate(),
            Err(AnimarError::InconsistentConfig { .. })
        ));
    }

    #[test]
    fn test_vocab_cross_check() {
        let spec = default_spec();
        let mut builder = GgufBuilder::new().vocab_size("llama", 999);
        builder = crate::gguf::test_factory::tiny_llama_into(builder, &spec);
        let gguf = Gguf::from_bytes(builder.build()).unwrap();
        let err = LlamaConfig::from_gguf(&gguf).unwrap_err();
        assert!(matches!(err, AnimarError::InconsistentConfig { .. }));
    }

    #[test]
    fn test_model_binds_all_layers() {
        let gguf = Gguf::from_bytes(build_tiny_llama(&default_spec())).unwrap();
        let model = LlamaModel::from_gguf(gguf).unwrap();
        assert_eq!(model.config().num_layers, 2);
        assert_eq!(model.layer(1).ffn_down, "blk.1.ffn_down.weight");
        // binding is name-level only: nothing dequantized yet
        assert_eq!(model.gguf().realized_tensors(), 0);
        let norm = model.parameter("blk.0.attn_norm.weight").unwrap();
        assert_eq!(norm.len(), 8);
    }

    #[test]
    fn test_missing_layer_tensor() {
        // declare 3 layers but only build 2
        let spec = default_spec();
        let mut builder = GgufBuilder::new()
            .architecture("llama")
            .embedding_length("llama", spec.hidden as u32)
            .block_count("llama", 3)
            .head_count("llama", spec.heads as u32)
            .head_count_kv("llama", spec.kv_heads as u32)
            .feed_forward_length("llama", spec.intermediate as u32)
            .context_length("llama", spec.context as u32);
        builder = crate::gguf::test_factory::tiny_llama_tensors_into(builder, &spec);
        let gguf = Gguf::from_bytes(builder.build()).unwrap();
        let err = LlamaModel::from_gguf(gguf).unwrap_err();
        assert!(matches!(
            err,
            AnimarError::MissingTensor { name } if name.starts_with("blk.2.")
        ));
    }

    #[test]
    fn test_tied_embeddings_fallback() {
        let spec = default_spec();
        let data = crate::gguf::test_factory::build_tiny_llama_tied(&spec);
        let gguf = Gguf::from_bytes(data).unwrap();
        let model = LlamaModel::from_gguf(gguf).unwrap();
        assert_eq!(model.output_name(), TOKEN_EMBEDDING);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        // attn_q for layer 0 carries the wrong number of elements:
        // hidden_size 8 requires 64, the file provides 16
        let mut spec = default_spec();
        spec.layers = 1;
        let mut builder = GgufBuilder::new();
        builder = crate::gguf::test_factory::tiny_llama_metadata_into(builder, &spec);
        builder = builder
            .add_f32_tensor(
                TOKEN_EMBEDDING,
                &[spec.vocab as u64, spec.hidden as u64],
                &vec![0.0; spec.vocab * spec.hidden],
            )
            .add_f32_tensor(
                OUTPUT_NORM,
                &[spec.hidden as u64],
                &vec![1.0; spec.hidden],
            )
            .add_f32_tensor(
                "blk.0.attn_norm.weight",
                &[spec.hidden as u64],
                &vec![1.0; spec.hidden],
            )
            .add_f32_tensor("blk.0.attn_q.weight", &[4, 4], &vec![0.0; 16]);
        let gguf = Gguf::from_bytes(builder.build()).unwrap();
        let err = LlamaModel::from_gguf(gguf).unwrap_err();
        match err {
            AnimarError::InconsistentConfig { reason } => {
                assert!(reason.contains("blk.0.attn_q.weight"));
            }
            other => panic!("expected InconsistentConfig, got {other:?}"),
        }
    }
}
