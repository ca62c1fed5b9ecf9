//! Model configuration.
//!
//! Serialized as TOML inside the artifact's config section. Every field has a
//! default and unknown keys are ignored, so artifacts written by newer
//! revisions with extra settings still load.

use serde::{Deserialize, Serialize};

use crate::error::ModelLoadError;
use crate::model::vocab::PieceId;

/// Unicode normalization form applied before segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationForm {
    Identity,
    Nfc,
    Nfd,
    #[default]
    Nfkc,
    Nfkd,
}

/// Whitespace handling applied after Unicode normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitespacePolicy {
    /// Leave whitespace untouched.
    Preserve,
    /// Map every whitespace char to U+0020, collapse runs, trim both ends.
    #[default]
    Collapse,
}

/// How the lattice resolves two paths with identical scores.
///
/// The comparison is made on the length of the final edge into a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Prefer the longer final piece (fewer pieces overall).
    #[default]
    LongerPiece,
    /// Prefer the shorter final piece.
    ShorterPiece,
}

impl TieBreak {
    /// Whether a candidate edge of `candidate` bytes should replace the
    /// current best edge of `current` bytes at equal score.
    #[inline]
    pub fn prefers(self, candidate: usize, current: usize) -> bool {
        match self {
            TieBreak::LongerPiece => candidate > current,
            TieBreak::ShorterPiece => candidate < current,
        }
    }
}

fn default_unk_penalty() -> f32 {
    10.0
}

fn default_unk_surface() -> String {
    " \u{2047} ".to_string()
}

/// Immutable per-model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub normalization: NormalizationForm,
    pub whitespace: WhitespacePolicy,
    pub lowercase: bool,
    pub byte_fallback: bool,
    /// Replace U+0020 with U+2581 before segmentation, reverse on decode.
    pub escape_whitespace: bool,
    /// Prepend one U+2581 before segmentation (only with `escape_whitespace`).
    pub add_dummy_prefix: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bos_id: Option<PieceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eos_id: Option<PieceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pad_id: Option<PieceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unk_id: Option<PieceId>,
    /// Upper bound, in bytes, on candidate lookups per lattice position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_piece_len: Option<usize>,
    /// Subtracted from the lowest NORMAL score to score unknown characters.
    pub unk_penalty: f32,
    pub tie_break: TieBreak,
    /// Text emitted when decoding the UNKNOWN piece.
    pub unk_surface: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            normalization: NormalizationForm::default(),
            whitespace: WhitespacePolicy::default(),
            lowercase: false,
            byte_fallback: false,
            escape_whitespace: false,
            add_dummy_prefix: false,
            bos_id: None,
            eos_id: None,
            pad_id: None,
            unk_id: None,
            max_piece_len: None,
            unk_penalty: default_unk_penalty(),
            tie_break: TieBreak::default(),
            unk_surface: default_unk_surface(),
        }
    }
}

impl ModelConfig {
    /// A configuration that leaves text untouched: no Unicode normalization,
    /// whitespace preserved, no lowercasing.
    pub fn verbatim() -> Self {
        ModelConfig {
            normalization: NormalizationForm::Identity,
            whitespace: WhitespacePolicy::Preserve,
            ..ModelConfig::default()
        }
    }

    /// Parse the TOML config section of an artifact.
    pub fn from_toml_str(s: &str) -> Result<Self, ModelLoadError> {
        let config: ModelConfig = toml::from_str(s)
            .map_err(|e| ModelLoadError::corrupt(format!("invalid config section: {e}")))?;
        if !config.unk_penalty.is_finite() {
            return Err(ModelLoadError::corrupt("unk_penalty must be finite"));
        }
        if config.max_piece_len == Some(0) {
            return Err(ModelLoadError::corrupt("max_piece_len must be > 0"));
        }
        Ok(config)
    }

    /// Serialize to the TOML form stored in the artifact.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}
