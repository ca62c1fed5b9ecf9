//! HuggingFace Unigram `tokenizer.json` import.
//!
//! Only the parts of the HF pipeline that have a counterpart in
//! [`ModelConfig`] are honoured:
//!
//! ```text
//! ┌──────────────┐    ┌────────────────┐    ┌──────────┐
//! │  Normalizer   │ → │ Pre-tokenizer  │ →  │  Model   │
//! │ NFx/Lowercase │   │   Metaspace    │    │ Unigram  │
//! │ Prepend/Repl. │   │                │    │          │
//! └──────────────┘    └────────────────┘    └──────────┘
//! ```
//!
//! The HF decoder subtree is ignored; decode behaviour is derived from the
//! resulting config instead. Components without a counterpart are dropped
//! with a warning.
//!
//! ## JSON structure overview
//!
//! ```text
//! {
//!   "model": { "type":"Unigram", "unk_id":0, "vocab":[["<unk>",0.0], ...], "byte_fallback":true },
//!   "normalizer": { "type":"Sequence", "normalizers":[ ... ] },
//!   "pre_tokenizer": { "type":"Metaspace", "replacement":"▁", "prepend_scheme":"always" },
//!   "added_tokens": [{ "id":1, "content":"<s>", "special":true }, ...]
//! }
//! ```

use serde::Deserialize;

use super::config::{ModelConfig, NormalizationForm, WhitespacePolicy};
use super::vocab::{parse_byte_piece, PieceId, PieceType, RawPiece};
use super::{Model, ModelFormat};
use crate::error::ModelLoadError;

const METASPACE: &str = "\u{2581}";

// ---------------------------------------------------------------------------
// HuggingFace JSON schema (typed deserialization)
// ---------------------------------------------------------------------------
//
// The stable top-level fields are typed; `normalizer` and `pre_tokenizer`
// stay as `serde_json::Value` and are walked generically.

#[derive(Deserialize)]
struct HfTokenizerJson {
    model: HfModel,
    #[serde(default)]
    normalizer: Option<serde_json::Value>,
    #[serde(default)]
    pre_tokenizer: Option<serde_json::Value>,
    #[serde(default)]
    added_tokens: Vec<HfAddedToken>,
}

/// `model` section. HF ref: `models/unigram/serialization.rs`.
#[derive(Deserialize)]
struct HfModel {
    #[serde(rename = "type", default)]
    model_type: String,
    #[serde(default)]
    vocab: Vec<(String, f64)>,
    #[serde(default)]
    unk_id: Option<usize>,
    #[serde(default)]
    byte_fallback: bool,
}

#[derive(Deserialize)]
struct HfAddedToken {
    id: usize,
    content: String,
    #[serde(default)]
    special: bool,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load a model from raw `tokenizer.json` bytes.
pub fn from_slice(json: &[u8]) -> Result<Model, ModelLoadError> {
    let hf: HfTokenizerJson = serde_json::from_slice(json)
        .map_err(|e| ModelLoadError::corrupt(format!("invalid tokenizer JSON: {e}")))?;
    let (config, pieces) = convert(hf)?;
    Model::from_parts(config, pieces, ModelFormat::HfJson)
}

// ---------------------------------------------------------------------------
// Internal
// ---------------------------------------------------------------------------

fn convert(hf: HfTokenizerJson) -> Result<(ModelConfig, Vec<RawPiece>), ModelLoadError> {
    if hf.model.model_type != "Unigram" {
        return Err(ModelLoadError::corrupt(format!(
            "unsupported model type {:?}, only Unigram can be imported",
            hf.model.model_type
        )));
    }

    let byte_fallback = hf.model.byte_fallback;
    let mut pieces: Vec<RawPiece> = hf
        .model
        .vocab
        .into_iter()
        .map(|(surface, score)| {
            let kind = if byte_fallback && parse_byte_piece(&surface).is_some() {
                PieceType::Byte
            } else {
                PieceType::Normal
            };
            RawPiece::new(surface, score as f32, kind)
        })
        .collect();

    if let Some(unk) = hf.model.unk_id {
        let piece = pieces.get_mut(unk).ok_or_else(|| {
            ModelLoadError::corrupt(format!("unk_id {unk} is outside the vocabulary"))
        })?;
        piece.kind = PieceType::Unknown;
    }

    for token in hf.added_tokens {
        let kind = if token.special {
            PieceType::Control
        } else {
            PieceType::UserDefined
        };
        match token.id.cmp(&pieces.len()) {
            std::cmp::Ordering::Less => {
                let piece = &mut pieces[token.id];
                if piece.surface != token.content {
                    return Err(ModelLoadError::corrupt(format!(
                        "added token {:?} has id {} which belongs to {:?}",
                        token.content, token.id, piece.surface
                    )));
                }
                // The UNKNOWN piece is usually listed as a special token too.
                if piece.kind != PieceType::Unknown {
                    piece.kind = kind;
                }
            }
            std::cmp::Ordering::Equal => pieces.push(RawPiece::new(token.content, 0.0, kind)),
            std::cmp::Ordering::Greater => {
                return Err(ModelLoadError::corrupt(format!(
                    "added token {:?} has id {} beyond the vocabulary end {}",
                    token.content,
                    token.id,
                    pieces.len()
                )));
            }
        }
    }

    let mut config = ModelConfig {
        normalization: NormalizationForm::Identity,
        whitespace: WhitespacePolicy::Preserve,
        byte_fallback,
        unk_id: hf.model.unk_id.map(|id| id as PieceId),
        ..ModelConfig::default()
    };

    let null = serde_json::Value::Null;
    apply_normalizer(&mut config, hf.normalizer.as_ref().unwrap_or(&null));
    apply_pre_tokenizer(&mut config, hf.pre_tokenizer.as_ref().unwrap_or(&null));
    if config.add_dummy_prefix && !config.escape_whitespace {
        tracing::warn!("Dropping Prepend \"\u{2581}\" normalizer, spaces are not escaped");
        config.add_dummy_prefix = false;
    }

    let control_id = |surface: &str| {
        pieces
            .iter()
            .position(|p| p.surface == surface && p.kind == PieceType::Control)
            .map(|id| id as PieceId)
    };
    config.bos_id = control_id("<s>");
    config.eos_id = control_id("</s>");
    config.pad_id = control_id("<pad>");

    tracing::debug!(
        "Converted Unigram tokenizer.json: {} pieces, normalization={:?}, escape_whitespace={}",
        pieces.len(),
        config.normalization,
        config.escape_whitespace,
    );
    Ok((config, pieces))
}

fn set_form(config: &mut ModelConfig, form: NormalizationForm) {
    if config.normalization == NormalizationForm::Identity {
        config.normalization = form;
    } else if config.normalization != form {
        tracing::warn!(
            "Ignoring {form:?} normalizer, {:?} is already applied",
            config.normalization
        );
    }
}

// HF ref: `normalizers/mod.rs` `NormalizerWrapper`.
fn apply_normalizer(config: &mut ModelConfig, normalizer: &serde_json::Value) {
    let mut strip = false;
    for node in flatten_sequence(normalizer, "normalizers") {
        match node_type(node) {
            "NFC" => set_form(config, NormalizationForm::Nfc),
            "NFD" => set_form(config, NormalizationForm::Nfd),
            "NFKC" => set_form(config, NormalizationForm::Nfkc),
            "NFKD" => set_form(config, NormalizationForm::Nfkd),
            // The SentencePiece charsmap is an NFKC variant; NFKC is the closest
            // rule we can express.
            "Precompiled" => {
                tracing::warn!("Approximating Precompiled charsmap normalizer with NFKC");
                set_form(config, NormalizationForm::Nfkc);
            }
            "Lowercase" => config.lowercase = true,
            // Only expressible as part of collapsing, see below.
            "Strip" => strip = true,
            // Llama-2 style `{"type":"Prepend","prepend":"▁"}`.
            "Prepend" => {
                if node
                    .get("prepend")
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| s == METASPACE)
                {
                    config.add_dummy_prefix = true;
                } else {
                    tracing::warn!("Dropping Prepend normalizer with non-metaspace content");
                }
            }
            "Replace" => apply_replace(config, node),
            "" => {}
            other => tracing::warn!("Dropping unsupported normalizer {other}"),
        }
    }
    if strip && config.whitespace != WhitespacePolicy::Collapse {
        tracing::warn!("Dropping Strip normalizer without a matching whitespace collapse rule");
    }
}

fn apply_replace(config: &mut ModelConfig, node: &serde_json::Value) {
    let pattern = node.get("pattern");
    let content = node.get("content").and_then(|v| v.as_str()).unwrap_or("");
    let string = pattern.and_then(|p| p.get("String")).and_then(|s| s.as_str());
    let regex = pattern.and_then(|p| p.get("Regex")).and_then(|s| s.as_str());
    match (string, regex, content) {
        (Some(" "), _, METASPACE) => config.escape_whitespace = true,
        // SentencePiece's "remove extra whitespaces" rule.
        (_, Some(" {2,}"), " ") => config.whitespace = WhitespacePolicy::Collapse,
        _ => tracing::warn!(
            "Dropping Replace normalizer {:?} -> {content:?}",
            string.or(regex).unwrap_or("")
        ),
    }
}

// HF ref: `pre_tokenizers/metaspace.rs` `Metaspace`.
fn apply_pre_tokenizer(config: &mut ModelConfig, pre_tokenizer: &serde_json::Value) {
    for node in flatten_sequence(pre_tokenizer, "pretokenizers") {
        match node_type(node) {
            "Metaspace" => {
                let replacement = node
                    .get("replacement")
                    .and_then(|v| v.as_str())
                    .unwrap_or(METASPACE);
                if replacement != METASPACE {
                    tracing::warn!("Metaspace replacement {replacement:?} treated as U+2581");
                }
                config.escape_whitespace = true;

                let legacy_off =
                    node.get("add_prefix_space").and_then(|v| v.as_bool()) == Some(false);
                let scheme = node
                    .get("prepend_scheme")
                    .and_then(|v| v.as_str())
                    .unwrap_or("always");
                config.add_dummy_prefix = !legacy_off && scheme != "never";
            }
            "" => {}
            other => tracing::debug!("Skipping pre-tokenizer {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON tree helpers
// ---------------------------------------------------------------------------

/// The `"type"` field of a JSON node.
fn node_type(v: &serde_json::Value) -> &str {
    v.get("type").and_then(|v| v.as_str()).unwrap_or("")
}

/// Recursively unwrap `{"type":"Sequence", "<key>":[...]}` into leaf nodes.
fn flatten_sequence<'a>(value: &'a serde_json::Value, key: &str) -> Vec<&'a serde_json::Value> {
    if value.is_null() {
        return vec![];
    }
    if node_type(value) == "Sequence" {
        value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().flat_map(|v| flatten_sequence(v, key)).collect())
            .unwrap_or_default()
    } else {
        vec![value]
    }
}
