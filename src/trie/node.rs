use std::sync::Arc;

/// Child slots per node, one per possible key byte.
pub(crate) const FANOUT: usize = 256;

/// A stored entry. The key equals the concatenation of node labels from the
/// root down to the node holding the entry.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// One trie node: the byte that indexes it in its parent, an optional
/// payload, and up to 256 shared children.
///
/// Cloning copies the payload and the child references, not the subtrees;
/// this is what `Arc::make_mut` calls when a shared node must be split off
/// a write path.
#[derive(Clone)]
pub(crate) struct Node {
    pub label: u8,
    pub entry: Option<Entry>,
    pub children: [Option<Arc<Node>>; FANOUT],
}

impl Node {
    pub fn new(label: u8) -> Self {
        Node { label, entry: None, children: std::array::from_fn(|_| None) }
    }

    /// A leaf has no children. Fanout is capped at 256, so the linear scan
    /// is fine.
    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(|c| c.is_none())
    }

    pub fn child(&self, label: u8) -> Option<&Arc<Node>> {
        self.children[label as usize].as_ref()
    }

    /// The child in the smallest occupied slot.
    pub fn first_child(&self) -> Option<&Arc<Node>> {
        self.children.iter().flatten().next()
    }

    /// The child in the largest occupied slot.
    pub fn last_child(&self) -> Option<&Arc<Node>> {
        self.children.iter().rev().flatten().next()
    }

    /// The child in the smallest occupied slot strictly greater than `label`.
    pub fn next_child_after(&self, label: u8) -> Option<&Arc<Node>> {
        self.children[label as usize + 1..].iter().flatten().next()
    }

    /// The child in the largest occupied slot strictly less than `label`.
    pub fn prev_child_before(&self, label: u8) -> Option<&Arc<Node>> {
        self.children[..label as usize].iter().rev().flatten().next()
    }
}
