//! End-to-end loader scenarios over synthetic GGUF byte streams.

use animar::gguf::test_factory::GgufBuilder;
use animar::gguf::Gguf;
use animar::quantize::QuantKind;
use animar::AnimarError;

/// Handcraft the minimal file byte by byte, independent of the builder:
/// magic `GGUF`, v3, one F32 tensor `tok.weight` of row-major shape [4, 2].
fn handcrafted_minimal_file() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"GGUF");
    data.extend_from_slice(&3u32.to_le_bytes());
    data.extend_from_slice(&1u64.to_le_bytes()); // tensor count
    data.extend_from_slice(&0u64.to_le_bytes()); // metadata count

    // descriptor: name, n_dims, dims in GGML order (innermost first), type, offset
    let name = b"tok.weight";
    data.extend_from_slice(&(name.len() as u64).to_le_bytes());
    data.extend_from_slice(name);
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&2u64.to_le_bytes());
    data.extend_from_slice(&4u64.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes()); // F32
    data.extend_from_slice(&0u64.to_le_bytes());

    // aligned data section
    let base = data.len().div_ceil(32) * 32;
    data.resize(base, 0);
    for v in [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0] {
        data.extend_from_slice(&v.to_le_bytes());
    }
    data
}

#[test]
fn test_minimal_file_loads_exact_values() {
    let gguf = Gguf::from_bytes(handcrafted_minimal_file()).unwrap();
    assert_eq!(gguf.header().tensor_count, 1);

    let entry = gguf.descriptor("tok.weight").unwrap();
    assert_eq!(entry.desc.dims, vec![4, 2]);
    assert_eq!(entry.desc.kind, QuantKind::F32);

    let values = gguf.parameter("tok.weight").unwrap();
    assert_eq!(*values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
}

#[test]
fn test_altered_magic_fails_with_magic_mismatch() {
    let mut data = handcrafted_minimal_file();
    data[..4].copy_from_slice(b"GGUX");
    let err = Gguf::from_bytes(data).unwrap_err();
    assert!(matches!(err, AnimarError::BadMagic { .. }));
}

#[test]
fn test_future_version_rejected() {
    let mut data = handcrafted_minimal_file();
    data[4..8].copy_from_slice(&7u32.to_le_bytes());
    let err = Gguf::from_bytes(data).unwrap_err();
    assert!(matches!(
        err,
        AnimarError::UnsupportedVersion { version: 7, .. }
    ));
}

#[test]
fn test_every_truncated_prefix_fails() {
    // Any proper prefix must fail the load; nothing may silently succeed.
    let data = GgufBuilder::new()
        .add_string("general.architecture", "llama")
        .add_u32("llama.block_count", 1)
        .add_f32_tensor("a", &[4, 2], &[1.0; 8])
        .add_f32_tensor("b", &[2], &[2.0; 2])
        .build();

    for cut in 0..data.len() {
        let result = Gguf::from_bytes(data[..cut].to_vec());
        assert!(result.is_err(), "prefix of {cut} bytes parsed successfully");
    }
    // sanity: the complete file does load
    Gguf::from_bytes(data).unwrap();
}

#[test]
fn test_truncation_inside_header_is_truncated_input() {
    let data = handcrafted_minimal_file();
    let err = Gguf::from_bytes(data[..10].to_vec()).unwrap_err();
    assert!(matches!(err, AnimarError::TruncatedInput { .. }));
}

#[test]
fn test_corrupted_offset_overlaps_previous_tensor() {
    // Valid two-tensor layout, then the second descriptor's offset is made
    // to collide with the first tensor's range.
    let data = GgufBuilder::new()
        .add_f32_tensor("first", &[8], &[1.0; 8])
        .add_raw_tensor("second", &[8], QuantKind::F32.tag(), 16, &[0u8; 32])
        .build();
    let err = Gguf::from_bytes(data).unwrap_err();
    match err {
        AnimarError::OverlappingTensor {
            tensor,
            offset,
            prev_end,
        } => {
            assert_eq!(tensor, "second");
            assert_eq!(offset, 16);
            assert_eq!(prev_end, 32);
        }
        other => panic!("expected OverlappingTensor, got {other:?}"),
    }
}

#[test]
fn test_metadata_survives_alongside_tensors() {
    let data = GgufBuilder::new()
        .add_string("general.architecture", "llama")
        .add_u64("llama.context_length", 4096)
        .add_bool("general.experimental", false)
        .add_str_array("tokenizer.ggml.tokens", &["<s>", "</s>", "hi"])
        .add_f32_tensor("w", &[2], &[0.25, -0.25])
        .build();
    let gguf = Gguf::from_bytes(data).unwrap();
    assert_eq!(gguf.architecture(), Some("llama"));
    assert_eq!(gguf.meta_u64("llama.context_length"), Some(4096));
    let tokens = gguf.meta("tokenizer.ggml.tokens").unwrap().as_array().unwrap();
    assert_eq!(tokens.len(), 3);
    assert_eq!(*gguf.parameter("w").unwrap(), vec![0.25, -0.25]);
}

#[test]
fn test_tensor_names_preserve_file_order() {
    let data = GgufBuilder::new()
        .add_f32_tensor("z", &[1], &[0.0])
        .add_f32_tensor("a", &[1], &[0.0])
        .add_f32_tensor("m", &[1], &[0.0])
        .build();
    let gguf = Gguf::from_bytes(data).unwrap();
    let names: Vec<&str> = gguf.tensor_names().collect();
    assert_eq!(names, vec!["z", "a", "m"]);
}
