//! Byte trie over piece surfaces.
//!
//! The lattice only needs one capability from the vocabulary: enumerate every
//! piece that is a prefix of the input at some offset. [`PrefixMatcher`] names
//! that capability; [`Trie`] is the structure backing it.

use smallvec::SmallVec;

use super::vocab::PieceId;

/// Enumerate vocabulary pieces that are prefixes of an input slice.
pub trait PrefixMatcher {
    /// Calls `f(len, id)` for every piece equal to `input[..len]`, in order of
    /// increasing `len`.
    fn for_each_prefix<F: FnMut(usize, PieceId)>(&self, input: &[u8], f: F);
}

const ROOT: u32 = 0;

#[derive(Debug, Clone, Default)]
struct Node {
    /// Outgoing edges sorted by byte.
    edges: SmallVec<[(u8, u32); 2]>,
    value: Option<PieceId>,
}

impl Node {
    #[inline]
    fn child(&self, byte: u8) -> Option<u32> {
        self.edges
            .binary_search_by_key(&byte, |&(b, _)| b)
            .ok()
            .map(|i| self.edges[i].1)
    }
}

/// Flat-array byte trie. Node 0 is the root.
#[derive(Debug, Clone)]
pub struct Trie {
    nodes: Vec<Node>,
    len: usize,
}

impl Default for Trie {
    fn default() -> Self {
        Trie::new()
    }
}

impl Trie {
    pub fn new() -> Self {
        Trie {
            nodes: vec![Node::default()],
            len: 0,
        }
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `key → id`. Returns the previous id if the key was present.
    pub fn insert(&mut self, key: &[u8], id: PieceId) -> Option<PieceId> {
        let mut cur = ROOT;
        for &byte in key {
            let node = &self.nodes[cur as usize];
            cur = match node.edges.binary_search_by_key(&byte, |&(b, _)| b) {
                Ok(i) => node.edges[i].1,
                Err(i) => {
                    let next = self.nodes.len() as u32;
                    self.nodes.push(Node::default());
                    self.nodes[cur as usize].edges.insert(i, (byte, next));
                    next
                }
            };
        }
        let previous = self.nodes[cur as usize].value.replace(id);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Exact lookup.
    pub fn get(&self, key: &[u8]) -> Option<PieceId> {
        let mut cur = ROOT;
        for &byte in key {
            cur = self.nodes[cur as usize].child(byte)?;
        }
        self.nodes[cur as usize].value
    }
}

impl PrefixMatcher for Trie {
    fn for_each_prefix<F: FnMut(usize, PieceId)>(&self, input: &[u8], mut f: F) {
        let mut cur = ROOT;
        for (i, &byte) in input.iter().enumerate() {
            match self.nodes[cur as usize].child(byte) {
                Some(next) => cur = next,
                None => return,
            }
            if let Some(id) = self.nodes[cur as usize].value {
                f(i + 1, id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_trie(keys: &[&str]) -> Trie {
        let mut trie = Trie::new();
        for (id, key) in keys.iter().enumerate() {
            trie.insert(key.as_bytes(), id as PieceId);
        }
        trie
    }

    fn prefixes(trie: &Trie, input: &str) -> Vec<(usize, PieceId)> {
        let mut out = Vec::new();
        trie.for_each_prefix(input.as_bytes(), |len, id| out.push((len, id)));
        out
    }

    #[test]
    fn test_insert_and_get() {
        let mut trie = make_trie(&["a", "ab", "abc", "b"]);
        assert_eq!(trie.len(), 4);
        assert_eq!(trie.get(b"ab"), Some(1));
        assert_eq!(trie.get(b"abcd"), None);
        assert_eq!(trie.get(b""), None);
        assert_eq!(trie.insert(b"ab", 9), Some(1));
        assert_eq!(trie.len(), 4);
    }

    #[test]
    fn test_prefixes_shortest_first() {
        let trie = make_trie(&["a", "ab", "abc", "b"]);
        assert_eq!(prefixes(&trie, "abcd"), vec![(1, 0), (2, 1), (3, 2)]);
        assert_eq!(prefixes(&trie, "ba"), vec![(1, 3)]);
        assert!(prefixes(&trie, "cab").is_empty());
        assert!(prefixes(&trie, "").is_empty());
    }

    #[test]
    fn test_multibyte_keys() {
        let trie = make_trie(&["▁", "▁he", "€"]);
        assert_eq!(prefixes(&trie, "▁hello"), vec![(3, 0), (5, 1)]);
        assert_eq!(prefixes(&trie, "€5"), vec![(3, 2)]);
    }

    #[test]
    fn test_edges_stay_sorted() {
        let trie = make_trie(&["c", "a", "b"]);
        let bytes: Vec<u8> = trie.nodes[0].edges.iter().map(|&(b, _)| b).collect();
        assert_eq!(bytes, b"abc".to_vec());
    }
}
