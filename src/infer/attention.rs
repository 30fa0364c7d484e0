//! Rotary position embedding and cached causal attention.

use super::ops::{dot, softmax};

/// Apply rotary position embedding in place.
///
/// `x` holds one or more heads of `head_dim` values for a single position.
/// Rotation is the adjacent-pair style used by LLaMA-family models: pair
/// `(x[2i], x[2i+1])` rotates by `position * theta^(-2i / head_dim)`. At
/// position 0 this is the identity.
pub fn rope_rotate(x: &mut [f32], position: usize, head_dim: usize, theta: f32) {
    debug_assert!(x.len().is_multiple_of(head_dim));
    let half = head_dim / 2;

    // cos/sin depend only on the pair index, shared across heads
    let mut cos_sin = Vec::with_capacity(half);
    for i in 0..half {
        let freq = theta.powf(-2.0 * i as f32 / head_dim as f32);
        let angle = position as f32 * freq;
        cos_sin.push(angle.sin_cos());
    }

    for head in x.chunks_exact_mut(head_dim) {
        for (i, &(sin, cos)) in cos_sin.iter().enumerate() {
            let x0 = head[2 * i];
            let x1 = head[2 * i + 1];
            head[2 * i] = x0 * cos - x1 * sin;
            head[2 * i + 1] = x0 * sin + x1 * cos;
        }
    }
}

/// Scaled dot-product attention for one query position against a KV cache.
///
/// `q` is `[num_heads * head_dim]` for the newest position; `keys` and
/// `values` are `[positions, num_kv_heads * head_dim]` and already include
/// that position, so causality holds by construction. With
/// `num_kv_heads < num_heads`, consecutive groups of query heads share one
/// KV head (grouped-query attention).
///
/// Returns `[num_heads * head_dim]`.
#[must_use]
pub fn attend(
    q: &[f32],
    keys: &[f32],
    values: &[f32],
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
) -> Vec<f32> {
    let kv_dim = num_kv_heads * head_dim;
    let positions = keys.len() / kv_dim;
    let group_size = num_heads / num_kv_heads;
    let scale = 1.0 / (head_dim as f32).sqrt();

    let mut output = vec![0.0f32; num_heads * head_dim];

    // Heads are independent; each walks its own slice of the cache.
    for head in 0..num_heads {
        let kv_head = head / group_size;
        let q_head = &q[head * head_dim..(head + 1) * head_dim];
        let kv_offset = kv_head * head_dim;

        let mut scores = Vec::with_capacity(positions);
        for pos in 0..positions {
            let k = &keys[pos * kv_dim + kv_offset..pos * kv_dim + kv_offset + head_dim];
            scores.push(dot(q_head, k) * scale);
        }
        softmax(&mut scores);

        let out = &mut output[head * head_dim..(head + 1) * head_dim];
        for (pos, &weight) in scores.iter().enumerate() {
            let v = &values[pos * kv_dim + kv_offset..pos * kv_dim + kv_offset + head_dim];
            for (o, x) in out.iter_mut().zip(v) {
                *o += weight * x;
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rope_identity_at_position_zero() {
        let mut x = vec![1.0f32, 2.0, 3.0, 4.0];
        rope_rotate(&mut x, 0, 4, 10_000.0);
        assert_eq!(x, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_rope_rotates_first_pair_by_position() {
        // pair 0 rotates by exactly `position` radians (freq = 1)
        let mut x = vec![1.0f32, 0.0];
        rope_rotate(&mut x, 1, 2, 10_000.0);
        assert!((x[0] - 1.0f32.cos()).abs() < 1e-6);
        assert!((x[1] - 1.0f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn test_rope_preserves_norm() {
        let mut x = vec![0.3f32, -1.2, 0.8, 2.0];
        let norm_before: f32 = x.iter().map(|v| v * v).sum();
        rope_rotate(&mut x, 17, 4, 10_000.0);
        let norm_after: f32 = x.iter().map(|v| v * v).sum();
        assert!((norm_before - norm_after).abs() < 1e-4);
    }

    #[test]
    fn test_rope_later_pairs_rotate_slower() {
        let head_dim = 8;
        let mut x = vec![1.0f32, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        rope_rotate(&mut x, 5, head_dim, 10_000.0);
        // angle for pair i is 5 * theta^(-2i/8); strictly decreasing
        let a0 = x[1].atan2(x[0]);
        let a1 = x[3].atan2(x[2]);
        let a3 = x[7].atan2(x[6]);
        assert!(a0.abs() > a1.abs());
        assert!(a1.abs() > a3.abs());
    }

    #[test]
    fn test_rope_applies_per_head() {
        let head_dim = 2;
        let mut two_heads = vec![1.0f32, 0.0, 0.0, 1.0];
        rope_rotate(&mut two_heads, 1, head_dim, 10_000.0);
        // both heads rotate by the same angle
        let (sin, cos) = 1.0f32.sin_cos();
        assert!((two_heads[0] - cos).abs() < 1e-6);
        assert!((two_heads[1] - sin).abs() < 1e-6);
        assert!((two_heads[2] + sin).abs() < 1e-6);
        assert!((two_heads[3] - cos).abs() < 1e-6);
    }

    #[test]
    fn test_attend_single_position_returns_value() {
        // one cached position: softmax over one score is 1, output = V
        let q = vec![0.5f32, -0.5];
        let keys = vec![1.0f32, 0.0];
        let values = vec![7.0f32, -3.0];
        let out = attend(&q, &keys, &values, 1, 1, 2);
        assert_eq!(out, vec![7.0, -3.0]);
    }

    #[test]
    fn test_attend_prefers_matching_key() {
        // q aligned with the second key; with a large scale difference the
        // output approaches the second value
        let q = vec![10.0f32, 0.0];
        let keys = vec![0.0f32, 10.0, 10.0, 0.0];
        let values = vec![1.0f32, 0.0, 0.0, 1.0];
        let out = attend(&q, &keys, &values, 1, 1, 2);
        assert!(out[1] > 0.99);
        assert!(out[0] < 0.01);
    }

    #[test]
    fn test_attend_gqa_maps_query_groups() {
        // 2 query heads share 1 kv head; identical q slices give identical
        // outputs
        let q = vec![1.0f32, 2.0, 1.0, 2.0];
        let keys = vec![0.5f32, 0.5];
        let values = vec![3.0f32, 4.0];
        let out = attend(&q, &keys, &values, 2, 1, 2);
        assert_eq!(&out[..2], &out[2..]);
        assert_eq!(&out[..2], &[3.0, 4.0]);
    }

    #[test]
    fn test_attend_uniform_scores_average_values() {
        // zero query -> uniform attention -> mean of values
        let q = vec![0.0f32, 0.0];
        let keys = vec![1.0f32, 0.0, 0.0, 1.0];
        let values = vec![2.0f32, 0.0, 4.0, 6.0];
        let out = attend(&q, &keys, &values, 1, 1, 2);
        assert!((out[0] - 3.0).abs() < 1e-6);
        assert!((out[1] - 3.0).abs() < 1e-6);
    }
}
