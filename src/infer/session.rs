//! Inference sessions: forward passes with a session-owned KV cache.

use std::sync::Arc;

use crate::error::{AnimarError, Result};
use crate::infer::attention::{attend, rope_rotate};
use crate::infer::ops::{add_residual, argmax, matvec, rms_norm, silu};
use crate::model::{LlamaModel, OUTPUT_NORM, TOKEN_EMBEDDING};

/// Per-layer key/value history for one session.
///
/// Keys and values are flat `[positions, kv_dim]` buffers per layer. The
/// cache is owned by its session, grows with every forward pass and must be
/// reset between independent sequences.
#[derive(Debug)]
pub struct KvCache {
    keys: Vec<Vec<f32>>,
    values: Vec<Vec<f32>>,
    positions: usize,
}

impl KvCache {
    fn new(num_layers: usize) -> Self {
        Self {
            keys: vec![Vec::new(); num_layers],
            values: vec![Vec::new(); num_layers],
            positions: 0,
        }
    }

    /// Number of cached positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions == 0
    }

    fn push(&mut self, layer: usize, k: &[f32], v: &[f32]) {
        self.keys[layer].extend_from_slice(k);
        self.values[layer].extend_from_slice(v);
    }

    fn clear(&mut self) {
        for k in &mut self.keys {
            k.clear();
        }
        for v in &mut self.values {
            v.clear();
        }
        self.positions = 0;
    }
}

/// Dense parameter handles for one layer, resolved once per forward call.
struct ResolvedLayer {
    attn_norm: Arc<Vec<f32>>,
    attn_q: Arc<Vec<f32>>,
    attn_k: Arc<Vec<f32>>,
    attn_v: Arc<Vec<f32>>,
    attn_output: Arc<Vec<f32>>,
    ffn_norm: Arc<Vec<f32>>,
    ffn_gate: Arc<Vec<f32>>,
    ffn_up: Arc<Vec<f32>>,
    ffn_down: Arc<Vec<f32>>,
}

/// One inference stream over a shared model.
///
/// The model is read-only and may back any number of concurrent sessions;
/// each session owns its KV cache and nothing else mutates between calls.
/// Incremental decoding appends to the cache: `forward(tokens, p)` requires
/// `p` to equal the number of positions already cached.
#[derive(Debug)]
pub struct Session {
    model: Arc<LlamaModel>,
    cache: KvCache,
}

impl Session {
    /// Open a session over a shared model.
    #[must_use]
    pub fn new(model: Arc<LlamaModel>) -> Self {
        let num_layers = model.config().num_layers;
        Self {
            model,
            cache: KvCache::new(num_layers),
        }
    }

    /// Positions currently held in the session's KV cache.
    #[must_use]
    pub fn cached_positions(&self) -> usize {
        self.cache.len()
    }

    /// Drop all cached state, making the session ready for an independent
    /// sequence.
    pub fn reset(&mut self) {
        self.cache.clear();
    }

    /// Run one forward pass and return the next-token logits
    /// (`[vocab_size]`) for the last input position.
    ///
    /// `start_position` is the absolute position of `token_ids[0]` and must
    /// equal [`Session::cached_positions`]; pass the whole prompt with
    /// `start_position = 0`, then one token at a time to decode
    /// incrementally.
    ///
    /// # Errors
    ///
    /// [`AnimarError::EmptyInput`], [`AnimarError::InvalidPosition`],
    /// [`AnimarError::ContextOverflow`], [`AnimarError::InvalidToken`], or
    /// any lazy-dequantization failure surfaced while resolving parameters.
    pub fn forward(&mut self, token_ids: &[u32], start_position: usize) -> Result<Vec<f32>> {
        let config = self.model.config().clone();

        if token_ids.is_empty() {
            return Err(AnimarError::EmptyInput);
        }
        if start_position != self.cache.len() {
            return Err(AnimarError::InvalidPosition {
                start_position,
                cached: self.cache.len(),
            });
        }
        let end = start_position + token_ids.len();
        if end > config.context_length {
            return Err(AnimarError::ContextOverflow {
                requested: end,
                context_length: config.context_length,
            });
        }
        for &token in token_ids {
            if token as usize >= config.vocab_size {
                return Err(AnimarError::InvalidToken {
                    token,
                    vocab_size: config.vocab_size,
                });
            }
        }

        let hidden = config.hidden_size;
        let kv_dim = config.kv_dim();
        let head_dim = config.head_dim();

        let embedding = self.model.parameter(TOKEN_EMBEDDING)?;
        let output_norm = self.model.parameter(OUTPUT_NORM)?;
        let output_w = self.model.parameter(self.model.output_name())?;
        let layers = self.resolve_layers()?;

        let mut x = vec![0.0f32; hidden];
        for (t, &token) in token_ids.iter().enumerate() {
            let position = start_position + t;

            // Embedding lookup for this position.
            let row = token as usize * hidden;
            x.copy_from_slice(&embedding[row..row + hidden]);

            for (l, layer) in layers.iter().enumerate() {
                // Attention block
                let normed = rms_norm(&x, &layer.attn_norm, config.rms_eps);
                let mut q = matvec(&layer.attn_q, &normed, hidden);
                let mut k = matvec(&layer.attn_k, &normed, kv_dim);
                let v = matvec(&layer.attn_v, &normed, kv_dim);

                rope_rotate(&mut q, position, head_dim, config.rope_theta);
                rope_rotate(&mut k, position, head_dim, config.rope_theta);

                self.cache.push(l, &k, &v);
                let attn = attend(
                    &q,
                    &self.cache.keys[l],
                    &self.cache.values[l],
                    config.num_heads,
                    config.num_kv_heads,
                    head_dim,
                );
                let projected = matvec(&layer.attn_output, &attn, hidden);
                add_residual(&mut x, &projected);

                // Feed-forward block: down(silu(gate(x)) * up(x))
                let normed = rms_norm(&x, &layer.ffn_norm, config.rms_eps);
                let mut gate = matvec(&layer.ffn_gate, &normed, config.intermediate_size);
                let up = matvec(&layer.ffn_up, &normed, config.intermediate_size);
                silu(&mut gate);
                for (g, u) in gate.iter_mut().zip(&up) {
                    *g *= u;
                }
                let down = matvec(&layer.ffn_down, &gate, hidden);
                add_residual(&mut x, &down);
            }

            self.cache.positions += 1;
        }

        let normed = rms_norm(&x, &output_norm, config.rms_eps);
        Ok(matvec(&output_w, &normed, config.vocab_size))
    }

    /// Greedy decoding: run the prompt, then argmax one token at a time.
    ///
    /// Returns the generated tokens (the prompt is not included). The loop
    /// stops after `max_tokens`; end-of-sequence handling belongs to the
    /// caller, who knows the tokenizer.
    ///
    /// # Errors
    ///
    /// As [`Session::forward`]; generation past the context window fails
    /// with [`AnimarError::ContextOverflow`] rather than truncating.
    pub fn generate(&mut self, prompt: &[u32], max_tokens: usize) -> Result<Vec<u32>> {
        if max_tokens == 0 {
            return Ok(Vec::new());
        }
        let mut logits = self.forward(prompt, self.cache.len())?;
        let mut generated = Vec::with_capacity(max_tokens);
        loop {
            let next = argmax(&logits);
            generated.push(next);
            if generated.len() == max_tokens {
                return Ok(generated);
            }
            logits = self.forward(&[next], self.cache.len())?;
        }
    }

    fn resolve_layers(&self) -> Result<Vec<ResolvedLayer>> {
        (0..self.model.config().num_layers)
            .map(|i| {
                let names = self.model.layer(i);
                Ok(ResolvedLayer {
                    attn_norm: self.model.parameter(&names.attn_norm)?,
                    attn_q: self.model.parameter(&names.attn_q)?,
                    attn_k: self.model.parameter(&names.attn_k)?,
                    attn_v: self.model.parameter(&names.attn_v)?,
                    attn_output: self.model.parameter(&names.attn_output)?,
                    ffn_norm: self.model.parameter(&names.ffn_norm)?,
                    ffn_gate: self.model.parameter(&names.ffn_gate)?,
                    ffn_up: self.model.parameter(&names.ffn_up)?,
                    ffn_down: self.model.parameter(&names.ffn_down)?,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for ResolvedLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResolvedLayer")
    }
}
