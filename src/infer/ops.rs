//! Scalar math kernels shared by the forward pass.
//!
//! Weight matrices are row-major `[out_dim, in_dim]`, the layout tensors
//! take after descriptor parsing, so `matvec` walks contiguous rows.

/// RMSNorm: `x / sqrt(mean(x^2) + eps) * weight`, one vector at a time.
///
/// `input` holds `input.len() / weight.len()` consecutive vectors.
#[must_use]
pub fn rms_norm(input: &[f32], weight: &[f32], eps: f32) -> Vec<f32> {
    let dim = weight.len();
    let mut output = Vec::with_capacity(input.len());
    for x in input.chunks_exact(dim) {
        let mean_sq = x.iter().map(|v| v * v).sum::<f32>() / dim as f32;
        let inv_rms = 1.0 / (mean_sq + eps).sqrt();
        output.extend(x.iter().zip(weight).map(|(v, w)| v * inv_rms * w));
    }
    output
}

/// SiLU activation in place: `x * sigmoid(x)`.
#[inline]
pub fn silu(input: &mut [f32]) {
    for x in input.iter_mut() {
        *x /= 1.0 + (-*x).exp();
    }
}

/// Numerically stable softmax in place.
pub fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for x in values.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    let inv = 1.0 / sum;
    for x in values.iter_mut() {
        *x *= inv;
    }
}

/// Dot product.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Matrix-vector product: `w` is `[out_dim, in_dim]` row-major, `x` is
/// `[in_dim]`, result `[out_dim]`.
#[must_use]
pub fn matvec(w: &[f32], x: &[f32], out_dim: usize) -> Vec<f32> {
    let in_dim = x.len();
    debug_assert_eq!(w.len(), out_dim * in_dim);
    (0..out_dim).map(|o| dot(&w[o * in_dim..(o + 1) * in_dim], x)).collect()
}

/// Element-wise residual add: `acc[i] += x[i]`.
#[inline]
pub fn add_residual(acc: &mut [f32], x: &[f32]) {
    for (a, v) in acc.iter_mut().zip(x) {
        *a += v;
    }
}

/// Index of the maximum value (greedy decoding).
#[must_use]
pub fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best as u32
}
