//! Segmentation engine: unigram-LM Viterbi search over a piece lattice.
//!
//! Lattice nodes are byte offsets at character boundaries of the input. An
//! edge `[j, i)` exists for every NORMAL piece equal to `input[j..i]`, plus a
//! one-character fallback edge from `j` when no NORMAL piece is exactly the
//! character at `j`. The fallback edge scores `min_normal_score - unk_penalty`
//! and is emitted as BYTE pieces or the UNKNOWN piece. Because every node has
//! an outgoing edge covering its next character, every node is reachable and
//! the best path always covers the whole input.
//!
//! USER_DEFINED pieces are cut out first (leftmost-longest) and the lattice
//! runs independently on the text between them.
//!
//! With whitespace escaping on, every U+2581 in the input is an escaped space
//! unless its offset is passed as a literal mark. Literal marks always take
//! the fallback edge, and an escaped space that falls back to bytes is emitted
//! as the byte `0x20`, so byte runs decode without the metaspace rewrite.

use std::iter::FusedIterator;

use crate::codec::SPACE_SYMBOL;
use crate::model::trie::PrefixMatcher;
use crate::model::{Fallback, Model, ModelConfig, PieceId, TieBreak, Vocabulary};

/// One piece of a segmentation with its byte span in the segmented text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentedPiece {
    pub id: PieceId,
    pub start: usize,
    pub end: usize,
}

impl SegmentedPiece {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The result of one [`Segmenter::segment`] call, consumed once.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pieces: std::vec::IntoIter<SegmentedPiece>,
}

impl Iterator for Segmentation {
    type Item = SegmentedPiece;

    #[inline]
    fn next(&mut self) -> Option<SegmentedPiece> {
        self.pieces.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pieces.size_hint()
    }
}

impl ExactSizeIterator for Segmentation {}
impl FusedIterator for Segmentation {}

/// Best path into one lattice node.
#[derive(Debug, Clone, Copy)]
struct Node {
    score: f32,
    /// Length in bytes of the final edge; 0 for the start node.
    edge_len: usize,
    /// `None` marks the unknown-character fallback edge.
    piece: Option<PieceId>,
    reached: bool,
}

impl Node {
    const UNREACHED: Node = Node {
        score: f32::NEG_INFINITY,
        edge_len: 0,
        piece: None,
        reached: false,
    };
}

/// Viterbi segmenter bound to one vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter<'a> {
    vocab: &'a Vocabulary,
    max_piece_len: usize,
    tie_break: TieBreak,
    unk_score: f32,
    escape_whitespace: bool,
}

impl<'a> Segmenter<'a> {
    pub fn new(vocab: &'a Vocabulary, config: &ModelConfig) -> Self {
        Segmenter {
            vocab,
            max_piece_len: config
                .max_piece_len
                .unwrap_or(vocab.max_normal_len())
                .max(vocab.max_normal_len()),
            tie_break: config.tie_break,
            unk_score: vocab.min_normal_score() - config.unk_penalty,
            escape_whitespace: config.escape_whitespace,
        }
    }

    pub fn for_model(model: &'a Model) -> Self {
        Segmenter {
            max_piece_len: model.max_piece_len(),
            ..Segmenter::new(model.vocab(), model.config())
        }
    }

    /// Segment `text` into pieces whose spans tile it exactly.
    pub fn segment(&self, text: &str) -> Segmentation {
        self.segment_marked(text, &[])
    }

    /// [`segment`](Self::segment), with `literal` holding the sorted byte
    /// offsets of U+2581 characters that are text rather than escaped spaces.
    pub(crate) fn segment_marked(&self, text: &str, literal: &[usize]) -> Segmentation {
        let mut out = Vec::with_capacity(text.len() / 2 + 1);
        match self.vocab.user_defined() {
            Some((matcher, ids)) => {
                let mut last_end = 0;
                for mat in matcher.find_iter(text) {
                    if mat.start() > last_end {
                        self.segment_gap(text, last_end, mat.start(), literal, &mut out);
                    }
                    out.push(SegmentedPiece {
                        id: ids[mat.pattern().as_usize()],
                        start: mat.start(),
                        end: mat.end(),
                    });
                    last_end = mat.end();
                }
                if last_end < text.len() {
                    self.segment_gap(text, last_end, text.len(), literal, &mut out);
                }
            }
            None => self.segment_gap(text, 0, text.len(), literal, &mut out),
        }
        Segmentation {
            pieces: out.into_iter(),
        }
    }

    /// Segment `text[start..end]`, cutting out literal marks in that range.
    fn segment_gap(
        &self,
        text: &str,
        start: usize,
        end: usize,
        literal: &[usize],
        out: &mut Vec<SegmentedPiece>,
    ) {
        let from = literal.partition_point(|&pos| pos < start);
        let mut cursor = start;
        for &pos in &literal[from..] {
            let mark_end = pos + SPACE_SYMBOL.len_utf8();
            if mark_end > end {
                break;
            }
            self.viterbi(&text[cursor..pos], cursor, out);
            self.push_fallback(&text.as_bytes()[pos..mark_end], pos, false, out);
            cursor = mark_end;
        }
        self.viterbi(&text[cursor..end], cursor, out);
    }

    /// Run the lattice over `text`, which starts at byte `base` of the full
    /// input, appending the best path to `out`.
    fn viterbi(&self, text: &str, base: usize, out: &mut Vec<SegmentedPiece>) {
        let bytes = text.as_bytes();
        let n = bytes.len();
        if n == 0 {
            return;
        }

        let mut nodes = vec![Node::UNREACHED; n + 1];
        nodes[0] = Node {
            score: 0.0,
            reached: true,
            ..Node::UNREACHED
        };

        for (pos, ch) in text.char_indices() {
            let from = nodes[pos];
            if !from.reached {
                continue;
            }
            let char_len = ch.len_utf8();
            let window = &bytes[pos..n.min(pos + self.max_piece_len)];

            let mut char_covered = false;
            self.vocab.for_each_prefix(window, |len, id| {
                if len == char_len {
                    char_covered = true;
                }
                let score = self.vocab.get(id).map_or(self.unk_score, |p| p.score());
                self.relax(&mut nodes[pos + len], from.score + score, len, Some(id));
            });
            if !char_covered {
                self.relax(&mut nodes[pos + char_len], from.score + self.unk_score, char_len, None);
            }
        }

        // Backtrack from the end node.
        let mut path = Vec::new();
        let mut end = n;
        while end > 0 {
            let node = nodes[end];
            debug_assert!(node.reached && node.edge_len > 0);
            path.push((end - node.edge_len, end, node.piece));
            end -= node.edge_len;
        }

        for (start, end, piece) in path.into_iter().rev() {
            match piece {
                Some(id) => out.push(SegmentedPiece {
                    id,
                    start: base + start,
                    end: base + end,
                }),
                None => {
                    let escaped = self.escape_whitespace && text[start..end].starts_with(SPACE_SYMBOL);
                    self.push_fallback(&bytes[start..end], base + start, escaped, out);
                }
            }
        }
    }

    /// Emit the fallback edge covering `bytes`, which start at byte `offset`
    /// of the full input.
    fn push_fallback(&self, bytes: &[u8], offset: usize, escaped_space: bool, out: &mut Vec<SegmentedPiece>) {
        match self.vocab.fallback() {
            Fallback::Bytes(ids) if escaped_space => out.push(SegmentedPiece {
                id: ids[b' ' as usize],
                start: offset,
                end: offset + bytes.len(),
            }),
            Fallback::Bytes(ids) => {
                out.extend(bytes.iter().enumerate().map(|(i, &b)| SegmentedPiece {
                    id: ids[b as usize],
                    start: offset + i,
                    end: offset + i + 1,
                }));
            }
            Fallback::Unknown(unk) => out.push(SegmentedPiece {
                id: *unk,
                start: offset,
                end: offset + bytes.len(),
            }),
        }
    }

    #[inline]
    fn relax(&self, node: &mut Node, score: f32, edge_len: usize, piece: Option<PieceId>) {
        let better = !node.reached
            || score > node.score
            || (score == node.score && self.tie_break.prefers(edge_len, node.edge_len));
        if better {
            *node = Node {
                score,
                edge_len,
                piece,
                reached: true,
            };
        }
    }
}

/// Segment already-prepared text with a model's vocabulary.
pub fn segment(text: &str, model: &Model) -> Segmentation {
    Segmenter::for_model(model).segment(text)
}
