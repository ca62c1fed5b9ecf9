//! spiece - a self-contained unigram subword tokenizer engine.
//!
//! The crate loads a serialized vocabulary (piece, score, type) and performs
//! deterministic encode (text -> token ids) and decode (token ids -> text).
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────────────┐   ┌─────────┐
//! │ Model Store │ → │  Normalizer  │ → │ Segmentation Engine │ → │  Codec  │
//! │ (artifact)  │   │ (text→text)  │   │  (Viterbi lattice)  │   │ (ids)   │
//! └────────────┘   └──────────────┘   └────────────────────┘   └─────────┘
//! ```
//!
//! A [`Model`] is immutable once loaded and can be shared freely across
//! threads. The [`host`] module wraps models in integer handles for callers
//! on the other side of a foreign-call boundary.

pub mod codec;
pub mod error;
pub mod host;
pub mod lattice;
pub mod model;
pub mod normalizer;

pub use codec::{EncodeOptions, TokenSequence};
pub use error::{ArtifactWriteError, DecodeError, HostError, InvalidHandle, ModelLoadError};
pub use host::{HandleTable, ModelSource, Status};
pub use lattice::{segment, SegmentedPiece, Segmentation, Segmenter};
pub use model::{
    Fallback, Model, ModelBuilder, ModelConfig, ModelFormat, NormalizationForm, Piece, PieceId,
    PieceType, TieBreak, Vocabulary, WhitespacePolicy,
};
pub use normalizer::{normalize, Normalizer};
