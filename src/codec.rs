//! Encode (text → ids) and decode (ids → text) on a [`Model`].
//!
//! The encode path is normalize → prepare (whitespace escaping) → segment.
//! The decode path maps ids to surface bytes, coalescing runs of BYTE pieces,
//! then runs an ordered list of [`DecodeStep`] transforms built once from the
//! model config.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::lattice::{SegmentedPiece, Segmenter};
use crate::model::vocab::parse_byte_piece;
use crate::model::{Model, ModelConfig, PieceId, PieceType};

/// Visible stand-in for a space in segmentation input.
pub const SPACE_SYMBOL: char = '\u{2581}';
const SPACE_SYMBOL_STR: &str = "\u{2581}";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-call encode options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Prepend the model's bos id (ignored when the model has none).
    pub add_bos: bool,
    /// Append the model's eos id (ignored when the model has none).
    pub add_eos: bool,
    /// Right-truncate to this many ids. A requested eos stays the final id.
    pub max_length: Option<usize>,
    /// Fill up to `max_length` with the model's pad id (needs both).
    pub pad: bool,
}

impl EncodeOptions {
    pub fn with_bos_eos() -> Self {
        EncodeOptions {
            add_bos: true,
            add_eos: true,
            max_length: None,
            pad: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Token sequence
// ---------------------------------------------------------------------------

/// Output of [`Model::encode`]: pieces with spans into the segmented text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    text: String,
    pieces: Vec<SegmentedPiece>,
}

impl TokenSequence {
    /// The text that was segmented (normalized, then escaped if configured).
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn pieces(&self) -> &[SegmentedPiece] {
        &self.pieces
    }

    pub fn ids(&self) -> impl Iterator<Item = PieceId> + '_ {
        self.pieces.iter().map(|p| p.id)
    }

    /// The slice of [`text`](Self::text) covered by piece `index`.
    pub fn span_text(&self, index: usize) -> Option<&[u8]> {
        self.pieces
            .get(index)
            .map(|p| &self.text.as_bytes()[p.start..p.end])
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Decode step
// ---------------------------------------------------------------------------

/// A single decode transform step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DecodeStep {
    /// Replace pattern bytes with replacement bytes (per token, byte runs
    /// excluded).
    Replace { pattern: Vec<u8>, content: Vec<u8> },
    /// Strip `content` from the start of the first token only.
    StripFirst { content: Vec<u8> },
}

impl DecodeStep {
    pub(crate) fn for_config(config: &ModelConfig) -> Vec<DecodeStep> {
        let mut steps = Vec::new();
        if config.escape_whitespace {
            steps.push(DecodeStep::Replace {
                pattern: SPACE_SYMBOL_STR.as_bytes().to_vec(),
                content: b" ".to_vec(),
            });
            if config.add_dummy_prefix {
                steps.push(DecodeStep::StripFirst {
                    content: b" ".to_vec(),
                });
            }
        }
        steps
    }
}

// ---------------------------------------------------------------------------
// Model: encode / decode
// ---------------------------------------------------------------------------

impl Model {
    /// Apply the model's normalizer.
    pub fn normalize(&self, text: &str) -> String {
        self.normalizer().normalize(text).into_owned()
    }

    /// Turn normalized text into segmentation input: spaces become U+2581 and
    /// a dummy prefix is added, when configured. Also returns the offsets of
    /// U+2581 characters that were already in `normalized`.
    fn prepare<'a>(&self, normalized: &'a str) -> (Cow<'a, str>, Vec<usize>) {
        let config = self.config();
        if !config.escape_whitespace || normalized.is_empty() {
            return (Cow::Borrowed(normalized), Vec::new());
        }
        let mut out = String::with_capacity(normalized.len() + 3);
        let mut literal = Vec::new();
        if config.add_dummy_prefix {
            out.push(SPACE_SYMBOL);
        }
        for ch in normalized.chars() {
            match ch {
                ' ' => out.push(SPACE_SYMBOL),
                SPACE_SYMBOL => {
                    literal.push(out.len());
                    out.push(ch);
                }
                _ => out.push(ch),
            }
        }
        (Cow::Owned(out), literal)
    }

    /// Normalize and segment `text`.
    pub fn encode(&self, text: &str) -> TokenSequence {
        let normalized = self.normalizer().normalize(text);
        let (prepared, literal) = self.prepare(&normalized);
        let pieces: Vec<SegmentedPiece> = Segmenter::for_model(self)
            .segment_marked(&prepared, &literal)
            .collect();
        TokenSequence {
            text: prepared.into_owned(),
            pieces,
        }
    }

    /// Encode to ids, adding bos/eos and truncating per `options`.
    pub fn encode_as_ids(&self, text: &str, options: &EncodeOptions) -> Vec<PieceId> {
        let seq = self.encode(text);
        let bos = self.bos_id().filter(|_| options.add_bos);
        let eos = self.eos_id().filter(|_| options.add_eos);
        if options.add_bos && bos.is_none() {
            tracing::debug!("add_bos requested but the model has no bos piece");
        }

        let mut ids = Vec::with_capacity(seq.len() + 2);
        ids.extend(bos);
        ids.extend(seq.ids());
        if let Some(max) = options.max_length {
            ids.truncate(max.saturating_sub(eos.is_some() as usize));
        }
        if let Some(eos) = eos {
            if options.max_length != Some(0) {
                ids.push(eos);
            }
        }
        if options.pad {
            match (options.max_length, self.pad_id()) {
                (Some(max), Some(pad)) => ids.resize(max, pad),
                _ => tracing::debug!("pad requested without max_length or a pad piece"),
            }
        }
        ids
    }

    /// [`encode_as_ids`](Self::encode_as_ids) over a batch of texts.
    pub fn encode_batch<S: AsRef<str>>(&self, texts: &[S], options: &EncodeOptions) -> Vec<Vec<PieceId>> {
        texts
            .iter()
            .map(|text| self.encode_as_ids(text.as_ref(), options))
            .collect()
    }

    /// Encode to piece surfaces (BYTE pieces appear as `<0xNN>`).
    pub fn encode_as_pieces(&self, text: &str) -> Vec<String> {
        self.encode(text)
            .ids()
            .filter_map(|id| self.id_to_piece(id))
            .map(str::to_owned)
            .collect()
    }

    /// Map ids back to text.
    ///
    /// CONTROL pieces decode to nothing, the UNKNOWN piece to the configured
    /// `unk_surface`, and consecutive BYTE pieces are joined before UTF-8
    /// decoding (invalid sequences become U+FFFD). All ids are checked before
    /// any output is produced.
    pub fn decode_from_ids(&self, ids: &[PieceId]) -> Result<String, DecodeError> {
        let vocab = self.vocab();
        if let Some(&bad) = ids.iter().find(|&&id| vocab.get(id).is_none()) {
            return Err(DecodeError::UnknownId {
                id: bad as i64,
                vocab_size: vocab.len(),
            });
        }

        let mut tokens: Vec<DecodedToken> = Vec::with_capacity(ids.len());
        let mut byte_buf: Vec<u8> = Vec::new();
        for piece in ids.iter().filter_map(|&id| vocab.get(id)) {
            if piece.kind() == PieceType::Byte {
                if let Some(byte) = parse_byte_piece(piece.surface()) {
                    byte_buf.push(byte);
                    continue;
                }
            }
            if !byte_buf.is_empty() {
                tokens.push(DecodedToken::bytes(std::mem::take(&mut byte_buf)));
            }
            match piece.kind() {
                PieceType::Control => {}
                PieceType::Unknown => tokens.push(DecodedToken::text(&self.config().unk_surface)),
                _ => tokens.push(DecodedToken::text(piece.surface())),
            }
        }
        if !byte_buf.is_empty() {
            tokens.push(DecodedToken::bytes(byte_buf));
        }

        for step in self.decode_steps() {
            match step {
                // Byte runs carry raw text: escaped spaces fall back to 0x20.
                DecodeStep::Replace { pattern, content } => {
                    for token in tokens.iter_mut().filter(|t| !t.from_bytes) {
                        token.content = replace_bytes_owned(std::mem::take(&mut token.content), pattern, content);
                    }
                }
                DecodeStep::StripFirst { content } => {
                    if let Some(first) = tokens.first_mut() {
                        if first.content.starts_with(content.as_slice()) {
                            first.content.drain(..content.len());
                        }
                    }
                }
            }
        }

        let mut buf = Vec::with_capacity(tokens.iter().map(|t| t.content.len()).sum());
        for token in &tokens {
            buf.extend_from_slice(&token.content);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Decoded bytes of one piece, or of one run of BYTE pieces.
struct DecodedToken {
    content: Vec<u8>,
    from_bytes: bool,
}

impl DecodedToken {
    fn text(surface: &str) -> Self {
        DecodedToken {
            content: surface.as_bytes().to_vec(),
            from_bytes: false,
        }
    }

    fn bytes(content: Vec<u8>) -> Self {
        DecodedToken {
            content,
            from_bytes: true,
        }
    }
}

/// Replace all occurrences of `needle` with `replacement` in `haystack`.
///
/// Returns `haystack` untouched (no allocation) if `needle` is not found.
fn replace_bytes_owned(haystack: Vec<u8>, needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack;
    }

    let finder = memchr::memmem::Finder::new(needle);
    let mut iter = finder.find_iter(&haystack).peekable();
    if iter.peek().is_none() {
        return haystack;
    }

    let mut result = Vec::with_capacity(haystack.len());
    let mut start = 0;
    for pos in iter {
        result.extend_from_slice(&haystack[start..pos]);
        result.extend_from_slice(replacement);
        start = pos + needle.len();
    }
    result.extend_from_slice(&haystack[start..]);
    result
}
