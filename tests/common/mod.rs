//! Shared fixtures for integration tests and benches.

#![allow(dead_code)]

use spiece::{Model, ModelBuilder, ModelConfig, NormalizationForm, WhitespacePolicy};

/// Multi-character pieces of a small English vocabulary, with log-probs.
pub const ENGLISH_PIECES: &[(&str, f32)] = &[
    ("▁the", -2.1),
    ("▁a", -2.6),
    ("▁quick", -6.0),
    ("▁brown", -6.2),
    ("▁fox", -6.8),
    ("▁jump", -6.9),
    ("▁over", -5.1),
    ("▁lazy", -7.3),
    ("▁dog", -6.1),
    ("▁hello", -5.5),
    ("▁world", -5.4),
    ("▁token", -6.6),
    ("ing", -3.4),
    ("ed", -3.5),
    ("er", -3.9),
    ("th", -4.1),
    ("he", -4.2),
    ("in", -4.3),
    ("an", -4.4),
    ("▁", -3.2),
];

/// Single characters, so any ASCII word can be segmented without fallback.
pub const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz,.!?'0123456789";

pub fn english_builder(config: ModelConfig) -> ModelBuilder {
    let mut builder = ModelBuilder::new(config)
        .unknown("<unk>")
        .control("<s>")
        .control("</s>")
        .control("<pad>");
    for &(piece, score) in ENGLISH_PIECES {
        builder = builder.normal(piece, score);
    }
    for ch in ALPHABET.chars() {
        builder = builder.normal(ch.to_string(), -8.0);
    }
    builder
}

/// SentencePiece-style config: NFKC, collapsed whitespace, escaped spaces
/// with a dummy prefix, bos/eos/pad at ids 1/2/3.
pub fn sentencepiece_config(byte_fallback: bool) -> ModelConfig {
    ModelConfig {
        normalization: NormalizationForm::Nfkc,
        whitespace: WhitespacePolicy::Collapse,
        byte_fallback,
        escape_whitespace: true,
        add_dummy_prefix: true,
        bos_id: Some(1),
        eos_id: Some(2),
        pad_id: Some(3),
        unk_id: Some(0),
        ..ModelConfig::default()
    }
}

pub fn byte_fallback_model() -> Model {
    english_builder(sentencepiece_config(true))
        .user_defined("<sep>")
        .byte_pieces()
        .build()
        .expect("fixture model")
}

pub fn unk_model() -> Model {
    english_builder(sentencepiece_config(false))
        .build()
        .expect("fixture model")
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
