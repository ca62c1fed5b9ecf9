//! Vocabulary table: pieces, scores, types and the lookup structures built
//! over them.
//!
//! Piece ids are positions in the record list, so they are dense `0..N` by
//! construction. Everything here is immutable once built.

use std::fmt;

use aho_corasick::{AhoCorasick, MatchKind};
use rustc_hash::FxHashMap;

use super::trie::{PrefixMatcher, Trie};
use crate::error::ModelLoadError;

/// Token id (the value handed to callers).
pub type PieceId = u32;

/// Byte-fallback surface prefix (`<0xNN>`).
const BYTE_PIECE_PREFIX: &str = "<0x";

/// Piece type tag. Numbering matches the artifact's one-byte type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PieceType {
    /// Ordinary subword, candidate for segmentation.
    Normal = 1,
    /// Stand-in for characters no piece covers.
    Unknown = 2,
    /// Special marker (bos, eos, pad); decodes to nothing.
    Control = 3,
    /// Always matched as a whole before segmentation.
    UserDefined = 4,
    /// Present in the table but never produced by segmentation.
    Unused = 5,
    /// One raw byte value, surface `<0xNN>`.
    Byte = 6,
}

impl PieceType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PieceType::Normal),
            2 => Some(PieceType::Unknown),
            3 => Some(PieceType::Control),
            4 => Some(PieceType::UserDefined),
            5 => Some(PieceType::Unused),
            6 => Some(PieceType::Byte),
            _ => None,
        }
    }

    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// One artifact record before ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPiece {
    pub surface: String,
    pub score: f32,
    pub kind: PieceType,
}

impl RawPiece {
    pub fn new(surface: impl Into<String>, score: f32, kind: PieceType) -> Self {
        RawPiece {
            surface: surface.into(),
            score,
            kind,
        }
    }
}

/// An atomic subword unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    id: PieceId,
    surface: String,
    score: f32,
    kind: PieceType,
}

impl Piece {
    pub fn id(&self) -> PieceId {
        self.id
    }

    pub fn surface(&self) -> &str {
        &self.surface
    }

    /// Log-probability score.
    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn kind(&self) -> PieceType {
        self.kind
    }
}

/// Surface string of the byte-fallback piece for `byte`.
pub fn byte_piece_surface(byte: u8) -> String {
    format!("{BYTE_PIECE_PREFIX}{byte:02X}>")
}

/// Parse a canonical `<0xNN>` surface (uppercase hex).
pub fn parse_byte_piece(surface: &str) -> Option<u8> {
    let hex = surface.strip_prefix(BYTE_PIECE_PREFIX)?.strip_suffix('>')?;
    if hex.len() != 2 || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'A'..=b'F')) {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// How the lattice emits characters no NORMAL piece covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// One BYTE piece per UTF-8 byte; indexed by byte value.
    Bytes(Box<[PieceId; 256]>),
    /// One UNKNOWN piece per character.
    Unknown(PieceId),
}

/// The vocabulary table.
pub struct Vocabulary {
    pieces: Vec<Piece>,
    index: FxHashMap<String, PieceId>,
    /// NORMAL pieces only; the lattice never sees other types.
    trie: Trie,
    user_defined: Option<AhoCorasick>,
    user_defined_ids: Vec<PieceId>,
    unk_id: Option<PieceId>,
    fallback: Fallback,
    min_normal_score: f32,
    max_normal_len: usize,
}

impl fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vocabulary")
            .field("size", &self.pieces.len())
            .field("unk_id", &self.unk_id)
            .field("byte_fallback", &self.has_byte_fallback())
            .field("user_defined", &self.user_defined_ids.len())
            .finish()
    }
}

/// Two vocabularies are equal when their piece tables are equal; the lookup
/// structures are derived from the table.
impl PartialEq for Vocabulary {
    fn eq(&self, other: &Self) -> bool {
        self.pieces == other.pieces
    }
}

impl Vocabulary {
    /// Build and validate a vocabulary from artifact records.
    ///
    /// `byte_fallback` decides whether the 256 BYTE pieces are required (on)
    /// or forbidden (off), and whether an UNKNOWN piece is mandatory (off).
    pub fn from_raw(raw: Vec<RawPiece>, byte_fallback: bool) -> Result<Self, ModelLoadError> {
        if raw.is_empty() {
            return Err(ModelLoadError::corrupt("vocabulary is empty"));
        }
        if raw.len() > PieceId::MAX as usize {
            return Err(ModelLoadError::corrupt("vocabulary exceeds the id range"));
        }

        let mut pieces = Vec::with_capacity(raw.len());
        let mut index = FxHashMap::with_capacity_and_hasher(raw.len(), Default::default());
        let mut trie = Trie::new();
        let mut user_defined_ids = Vec::new();
        let mut unk_id = None;
        let mut byte_slots: [Option<PieceId>; 256] = [None; 256];
        let mut n_bytes = 0usize;
        let mut min_normal_score = f32::INFINITY;
        let mut max_normal_len = 0usize;

        for (i, rp) in raw.into_iter().enumerate() {
            let id = i as PieceId;
            if rp.surface.is_empty() {
                return Err(ModelLoadError::corrupt(format!("piece {id} has an empty surface")));
            }
            if !rp.score.is_finite() {
                return Err(ModelLoadError::corrupt(format!(
                    "piece {id} ({:?}) has a non-finite score",
                    rp.surface
                )));
            }
            if let Some(prev) = index.insert(rp.surface.clone(), id) {
                return Err(ModelLoadError::corrupt(format!(
                    "duplicate piece {:?} (ids {prev} and {id})",
                    rp.surface
                )));
            }

            match rp.kind {
                PieceType::Normal => {
                    trie.insert(rp.surface.as_bytes(), id);
                    min_normal_score = min_normal_score.min(rp.score);
                    max_normal_len = max_normal_len.max(rp.surface.len());
                }
                PieceType::Unknown => {
                    if let Some(prev) = unk_id.replace(id) {
                        return Err(ModelLoadError::corrupt(format!(
                            "more than one UNKNOWN piece (ids {prev} and {id})"
                        )));
                    }
                }
                PieceType::UserDefined => user_defined_ids.push(id),
                PieceType::Byte => {
                    if !byte_fallback {
                        return Err(ModelLoadError::corrupt(format!(
                            "BYTE piece {:?} present but byte fallback is disabled",
                            rp.surface
                        )));
                    }
                    let byte = parse_byte_piece(&rp.surface).ok_or_else(|| {
                        ModelLoadError::corrupt(format!(
                            "BYTE piece {id} has malformed surface {:?}",
                            rp.surface
                        ))
                    })?;
                    byte_slots[byte as usize] = Some(id);
                    n_bytes += 1;
                }
                PieceType::Control | PieceType::Unused => {}
            }

            pieces.push(Piece {
                id,
                surface: rp.surface,
                score: rp.score,
                kind: rp.kind,
            });
        }

        let fallback = if byte_fallback {
            let mut ids = [0 as PieceId; 256];
            for (byte, slot) in byte_slots.iter().enumerate() {
                ids[byte] = slot.ok_or_else(|| {
                    ModelLoadError::corrupt(format!(
                        "byte fallback enabled but {} is missing ({n_bytes}/256 present)",
                        byte_piece_surface(byte as u8)
                    ))
                })?;
            }
            Fallback::Bytes(Box::new(ids))
        } else {
            Fallback::Unknown(unk_id.ok_or(ModelLoadError::MissingUnknown)?)
        };

        let user_defined = if user_defined_ids.is_empty() {
            None
        } else {
            let patterns: Vec<&str> = user_defined_ids
                .iter()
                .map(|&id| pieces[id as usize].surface.as_str())
                .collect();
            let matcher = AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostLongest)
                .build(&patterns)
                .map_err(|e| {
                    ModelLoadError::corrupt(format!("cannot index user-defined pieces: {e}"))
                })?;
            Some(matcher)
        };

        if !min_normal_score.is_finite() {
            min_normal_score = 0.0;
        }

        Ok(Vocabulary {
            pieces,
            index,
            trie,
            user_defined,
            user_defined_ids,
            unk_id,
            fallback,
            min_normal_score,
            max_normal_len,
        })
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    #[inline]
    pub fn get(&self, id: PieceId) -> Option<&Piece> {
        self.pieces.get(id as usize)
    }

    pub fn piece_to_id(&self, surface: &str) -> Option<PieceId> {
        self.index.get(surface).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.iter()
    }

    pub fn unk_id(&self) -> Option<PieceId> {
        self.unk_id
    }

    pub fn has_byte_fallback(&self) -> bool {
        matches!(self.fallback, Fallback::Bytes(_))
    }

    /// Id of the BYTE piece for `byte`, when byte fallback is enabled.
    #[inline]
    pub fn byte_id(&self, byte: u8) -> Option<PieceId> {
        match &self.fallback {
            Fallback::Bytes(ids) => Some(ids[byte as usize]),
            Fallback::Unknown(_) => None,
        }
    }

    pub fn fallback(&self) -> &Fallback {
        &self.fallback
    }

    /// Lowest score among NORMAL pieces (0.0 when there are none).
    pub fn min_normal_score(&self) -> f32 {
        self.min_normal_score
    }

    /// Length in bytes of the longest NORMAL piece.
    pub fn max_normal_len(&self) -> usize {
        self.max_normal_len
    }

    pub(crate) fn user_defined(&self) -> Option<(&AhoCorasick, &[PieceId])> {
        self.user_defined
            .as_ref()
            .map(|m| (m, self.user_defined_ids.as_slice()))
    }

    pub(crate) fn raw_pieces(&self) -> impl Iterator<Item = RawPiece> + '_ {
        self.pieces
            .iter()
            .map(|p| RawPiece::new(p.surface.clone(), p.score, p.kind))
    }
}

impl PrefixMatcher for Vocabulary {
    #[inline]
    fn for_each_prefix<F: FnMut(usize, PieceId)>(&self, input: &[u8], f: F) {
        self.trie.for_each_prefix(input, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal(s: &str, score: f32) -> RawPiece {
        RawPiece::new(s, score, PieceType::Normal)
    }

    fn unk() -> RawPiece {
        RawPiece::new("<unk>", 0.0, PieceType::Unknown)
    }

    fn with_bytes(mut raw: Vec<RawPiece>) -> Vec<RawPiece> {
        raw.extend((0..=255u8).map(|b| RawPiece::new(byte_piece_surface(b), 0.0, PieceType::Byte)));
        raw
    }

    fn corrupt_reason(err: ModelLoadError) -> String {
        match err {
            ModelLoadError::Corrupt { reason } => reason,
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn test_ids_are_dense_positions() {
        let vocab = Vocabulary::from_raw(vec![unk(), normal("a", -1.0), normal("b", -2.0)], false)
            .unwrap();
        assert_eq!(vocab.len(), 3);
        for (i, piece) in vocab.iter().enumerate() {
            assert_eq!(piece.id() as usize, i);
        }
        assert_eq!(vocab.piece_to_id("b"), Some(2));
        assert_eq!(vocab.unk_id(), Some(0));
        assert_eq!(vocab.min_normal_score(), -2.0);
        assert_eq!(vocab.max_normal_len(), 1);
    }

    #[test]
    fn test_missing_unknown() {
        let err = Vocabulary::from_raw(vec![normal("a", -1.0)], false).unwrap_err();
        assert!(matches!(err, ModelLoadError::MissingUnknown));
        // Byte fallback makes UNKNOWN optional.
        assert!(Vocabulary::from_raw(with_bytes(vec![normal("a", -1.0)]), true).is_ok());
    }

    #[test]
    fn test_rejects_inconsistent_tables() {
        let dup = Vocabulary::from_raw(vec![unk(), normal("a", -1.0), normal("a", -2.0)], false);
        assert!(corrupt_reason(dup.unwrap_err()).contains("duplicate"));

        let two_unk = Vocabulary::from_raw(
            vec![unk(), RawPiece::new("<unk2>", 0.0, PieceType::Unknown)],
            false,
        );
        assert!(corrupt_reason(two_unk.unwrap_err()).contains("more than one UNKNOWN"));

        let empty = Vocabulary::from_raw(vec![unk(), normal("", -1.0)], false);
        assert!(corrupt_reason(empty.unwrap_err()).contains("empty surface"));

        let nan = Vocabulary::from_raw(vec![unk(), normal("a", f32::NAN)], false);
        assert!(corrupt_reason(nan.unwrap_err()).contains("non-finite"));

        assert!(Vocabulary::from_raw(vec![], false).is_err());
    }

    #[test]
    fn test_byte_pieces_iff_byte_fallback() {
        let stray = Vocabulary::from_raw(with_bytes(vec![unk()]), false);
        assert!(corrupt_reason(stray.unwrap_err()).contains("byte fallback is disabled"));

        let mut partial = with_bytes(vec![unk()]);
        partial.pop();
        let err = Vocabulary::from_raw(partial, true).unwrap_err();
        assert!(corrupt_reason(err).contains("<0xFF> is missing"));

        let vocab = Vocabulary::from_raw(with_bytes(vec![unk()]), true).unwrap();
        assert_eq!(vocab.byte_id(0x00), Some(1));
        assert_eq!(vocab.byte_id(0xE2), Some(1 + 0xE2));
    }

    #[test]
    fn test_byte_piece_surface_format() {
        assert_eq!(byte_piece_surface(0x0A), "<0x0A>");
        assert_eq!(parse_byte_piece("<0xE2>"), Some(0xE2));
        assert_eq!(parse_byte_piece("<0xe2>"), None);
        assert_eq!(parse_byte_piece("<0x1>"), None);
        assert_eq!(parse_byte_piece("<0xZZ>"), None);
        assert_eq!(parse_byte_piece("<0x+F>"), None);
        assert_eq!(parse_byte_piece("0xE2"), None);
    }

    #[test]
    fn test_only_normal_pieces_are_prefix_candidates() {
        let vocab = Vocabulary::from_raw(
            vec![
                unk(),
                normal("a", -1.0),
                RawPiece::new("ab", 0.0, PieceType::Control),
                RawPiece::new("abc", 0.0, PieceType::UserDefined),
            ],
            false,
        )
        .unwrap();
        let mut seen = Vec::new();
        vocab.for_each_prefix(b"abcd", |len, id| seen.push((len, id)));
        assert_eq!(seen, vec![(1, 1)]);
        assert!(vocab.user_defined().is_some());
    }

    #[test]
    fn test_equality_ignores_lookup_structures() {
        let a = Vocabulary::from_raw(vec![unk(), normal("a", -1.0)], false).unwrap();
        let b = Vocabulary::from_raw(vec![unk(), normal("a", -1.0)], false).unwrap();
        let c = Vocabulary::from_raw(vec![unk(), normal("a", -1.5)], false).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
