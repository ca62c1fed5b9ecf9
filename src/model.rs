//! Model Store - loading, validation and the shared model handle.
//!
//! A [`Model`] owns the vocabulary table and configuration behind an `Arc`.
//! It is immutable after construction, so clones can be handed to any number
//! of threads performing encode/decode without locking. Dropping the last
//! clone releases the model.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub mod artifact;
pub mod config;
pub mod hf_loader;
pub mod trie;
pub mod vocab;

pub use config::{ModelConfig, NormalizationForm, TieBreak, WhitespacePolicy};
pub use vocab::{byte_piece_surface, Fallback, Piece, PieceId, PieceType, RawPiece, Vocabulary};

use crate::codec::DecodeStep;
use crate::error::{ArtifactWriteError, ModelLoadError};
use crate::normalizer::Normalizer;

/// Where a model was loaded from (for diagnostics only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Artifact,
    HfJson,
    Builder,
}

struct ModelInner {
    vocab: Vocabulary,
    config: ModelConfig,
    normalizer: Normalizer,
    decode_steps: Vec<DecodeStep>,
    max_piece_len: usize,
    format: ModelFormat,
}

/// Shared, immutable handle to a loaded model.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("vocab", &self.inner.vocab)
            .field("format", &self.inner.format)
            .finish()
    }
}

impl Model {
    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Load a model from artifact bytes or HF `tokenizer.json` bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ModelLoadError> {
        if artifact::is_artifact(data) {
            let parsed = artifact::parse(data)?;
            Self::from_parts(parsed.config, parsed.pieces, ModelFormat::Artifact)
        } else if looks_like_json(data) {
            hf_loader::from_slice(data)
        } else {
            Err(ModelLoadError::corrupt(
                "neither a model artifact nor a tokenizer.json document",
            ))
        }
    }

    /// Read a model file fully and load it.
    pub fn from_file(path: &Path) -> Result<Self, ModelLoadError> {
        let data = std::fs::read(path).map_err(|source| ModelLoadError::IoFailure {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Read {} bytes from {}", data.len(), path.display());
        Self::from_bytes(&data)
    }

    /// Validate a config and piece table and assemble a model.
    pub(crate) fn from_parts(
        config: ModelConfig,
        pieces: Vec<RawPiece>,
        format: ModelFormat,
    ) -> Result<Self, ModelLoadError> {
        let vocab = Vocabulary::from_raw(pieces, config.byte_fallback)?;
        validate_special_ids(&vocab, &config)?;

        let max_piece_len = match config.max_piece_len {
            Some(limit) if limit < vocab.max_normal_len() => {
                return Err(ModelLoadError::corrupt(format!(
                    "max_piece_len {limit} is shorter than the longest piece ({} bytes)",
                    vocab.max_normal_len()
                )));
            }
            Some(limit) => limit,
            None => vocab.max_normal_len(),
        };

        let normalizer = Normalizer::new(&config);
        let decode_steps = DecodeStep::for_config(&config);

        tracing::info!(
            "Loaded {format:?} model: {} pieces, byte_fallback={}, max_piece_len={max_piece_len}",
            vocab.len(),
            config.byte_fallback,
        );

        Ok(Model {
            inner: Arc::new(ModelInner {
                vocab,
                config,
                normalizer,
                decode_steps,
                max_piece_len,
                format,
            }),
        })
    }

    /// Release this handle. The model is freed once every clone is gone.
    pub fn unload(self) {
        tracing::debug!(
            "Unloading model handle ({} other clones alive)",
            Arc::strong_count(&self.inner) - 1
        );
    }

    /// Serialize into the current artifact format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ArtifactWriteError> {
        let pieces: Vec<RawPiece> = self.inner.vocab.raw_pieces().collect();
        artifact::write(&self.inner.config, &pieces)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn vocab(&self) -> &Vocabulary {
        &self.inner.vocab
    }

    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.inner.normalizer
    }

    pub fn format(&self) -> ModelFormat {
        self.inner.format
    }

    /// Effective bound on candidate piece length, in bytes.
    pub fn max_piece_len(&self) -> usize {
        self.inner.max_piece_len
    }

    pub(crate) fn decode_steps(&self) -> &[DecodeStep] {
        &self.inner.decode_steps
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.vocab.len()
    }

    pub fn piece_to_id(&self, piece: &str) -> Option<PieceId> {
        self.inner.vocab.piece_to_id(piece)
    }

    pub fn id_to_piece(&self, id: PieceId) -> Option<&str> {
        self.inner.vocab.get(id).map(Piece::surface)
    }

    pub fn score(&self, id: PieceId) -> Option<f32> {
        self.inner.vocab.get(id).map(Piece::score)
    }

    pub fn piece_type(&self, id: PieceId) -> Option<PieceType> {
        self.inner.vocab.get(id).map(Piece::kind)
    }

    pub fn bos_id(&self) -> Option<PieceId> {
        self.inner.config.bos_id
    }

    pub fn eos_id(&self) -> Option<PieceId> {
        self.inner.config.eos_id
    }

    pub fn pad_id(&self) -> Option<PieceId> {
        self.inner.config.pad_id
    }

    pub fn unk_id(&self) -> Option<PieceId> {
        self.inner.vocab.unk_id()
    }
}

fn looks_like_json(data: &[u8]) -> bool {
    data.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'{')
}

fn validate_special_ids(vocab: &Vocabulary, config: &ModelConfig) -> Result<(), ModelLoadError> {
    let controls = [
        ("bos_id", config.bos_id),
        ("eos_id", config.eos_id),
        ("pad_id", config.pad_id),
    ];
    for (name, id) in controls {
        let Some(id) = id else { continue };
        match vocab.get(id).map(Piece::kind) {
            Some(PieceType::Control) => {}
            Some(kind) => {
                return Err(ModelLoadError::corrupt(format!(
                    "{name} {id} refers to a {kind:?} piece, expected Control"
                )))
            }
            None => {
                return Err(ModelLoadError::corrupt(format!(
                    "{name} {id} is outside the vocabulary (size {})",
                    vocab.len()
                )))
            }
        }
    }
    if let Some(id) = config.unk_id {
        if vocab.unk_id() != Some(id) {
            return Err(ModelLoadError::corrupt(format!(
                "unk_id {id} does not match the UNKNOWN piece {:?}",
                vocab.unk_id()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Programmatic model construction, mainly for converters and tests.
///
/// Pieces get ids in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    config: ModelConfig,
    pieces: Vec<RawPiece>,
}

impl ModelBuilder {
    pub fn new(config: ModelConfig) -> Self {
        ModelBuilder {
            config,
            pieces: Vec::new(),
        }
    }

    /// Id the next added piece will receive.
    pub fn next_id(&self) -> PieceId {
        self.pieces.len() as PieceId
    }

    pub fn piece(mut self, surface: impl Into<String>, score: f32, kind: PieceType) -> Self {
        self.pieces.push(RawPiece::new(surface, score, kind));
        self
    }

    pub fn normal(self, surface: impl Into<String>, score: f32) -> Self {
        self.piece(surface, score, PieceType::Normal)
    }

    pub fn unknown(self, surface: impl Into<String>) -> Self {
        self.piece(surface, 0.0, PieceType::Unknown)
    }

    pub fn control(self, surface: impl Into<String>) -> Self {
        self.piece(surface, 0.0, PieceType::Control)
    }

    pub fn user_defined(self, surface: impl Into<String>) -> Self {
        self.piece(surface, 0.0, PieceType::UserDefined)
    }

    /// Append the 256 `<0xNN>` BYTE pieces.
    pub fn byte_pieces(mut self) -> Self {
        self.pieces
            .extend((0..=255u8).map(|b| RawPiece::new(byte_piece_surface(b), 0.0, PieceType::Byte)));
        self
    }

    pub fn config_mut(&mut self) -> &mut ModelConfig {
        &mut self.config
    }

    /// Serialize without validating.
    pub fn to_artifact(&self) -> Result<Vec<u8>, ArtifactWriteError> {
        artifact::write(&self.config, &self.pieces)
    }

    pub fn build(self) -> Result<Model, ModelLoadError> {
        Model::from_parts(self.config, self.pieces, ModelFormat::Builder)
    }
}
