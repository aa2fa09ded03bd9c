use std::fmt;
use std::sync::Arc;

use super::iter::{leftmost_entry, rightmost_entry, Iter};
use super::node::{Entry, Node};
use crate::error::{Error, Result};
use crate::errinput;

/// A persistent, ordered map from byte strings to byte strings, implemented
/// as a 256-way radix trie with structural sharing between versions.
///
/// Cloning is constant-time: it copies the root reference and the counters.
/// Mutations path-copy: every node on the walk from the root to the target
/// that is shared with another version is cloned before being touched, so
/// all other holders keep observing their version unchanged. `Arc::make_mut`
/// performs exactly that check-and-clone against the node's strong count.
///
/// Each transaction works on its own clone and reconciles it against the
/// shared base with [`Trie::merge3`].
#[derive(Clone)]
pub struct Trie {
    root: Arc<Node>,
    num_entries: usize,
    total_value_bytes: usize,
}

impl Trie {
    /// Creates an empty trie.
    pub fn new() -> Self {
        Trie { root: Arc::new(Node::new(0)), num_entries: 0, total_value_bytes: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.num_entries
    }

    /// Sum of stored value lengths, maintained incrementally.
    pub fn data_size(&self) -> usize {
        self.total_value_bytes
    }

    /// Drops all entries. Other holders of the previous version are
    /// unaffected.
    pub fn clear(&mut self) {
        self.root = Arc::new(Node::new(0));
        self.num_entries = 0;
        self.total_value_bytes = 0;
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let mut node: &Node = &self.root;
        for &b in key {
            node = node.child(b)?;
        }
        node.entry.as_ref().map(|e| e.value.as_slice())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// An iterator positioned at `key`, or an exhausted one if absent.
    pub fn find(&self, key: &[u8]) -> Iter {
        let current = self.node_arc_at(key).filter(|n| n.entry.is_some());
        Iter::new(Arc::clone(&self.root), current, false)
    }

    /// Inserts a new entry. Returns `Ok(false)` without changing anything if
    /// the key is already present; rejects empty keys.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<bool> {
        if key.is_empty() {
            return errinput!("keys must not be empty");
        }
        if self.contains_key(key) {
            return Ok(false);
        }
        let len = value.len();
        self.install(key, value);
        self.num_entries += 1;
        self.total_value_bytes += len;
        Ok(true)
    }

    /// Replaces the value of an existing entry.
    pub fn update(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let Some(old) = self.get(key) else {
            return Err(Error::KeyNotFound);
        };
        let old_len = old.len();
        let new_len = value.len();
        self.install(key, value);
        self.total_value_bytes = self.total_value_bytes - old_len + new_len;
        Ok(())
    }

    /// Removes the entry under `key`, pruning any nodes left without payload
    /// and children. Returns the number of entries removed (0 or 1); erasing
    /// an absent key is a no-op.
    pub fn erase(&mut self, key: &[u8]) -> usize {
        if key.is_empty() || !self.contains_key(key) {
            return 0;
        }
        let root = Arc::make_mut(&mut self.root);
        match Self::erase_below(root, key) {
            Some(removed) => {
                self.num_entries -= 1;
                self.total_value_bytes -= removed.value.len();
                1
            }
            None => 0,
        }
    }

    /// An iterator over all entries in key order.
    pub fn iter(&self) -> Iter {
        let first = leftmost_entry(&self.root);
        Iter::new(Arc::clone(&self.root), first, false)
    }

    /// An iterator over all entries in reverse key order.
    pub fn iter_rev(&self) -> Iter {
        let last = rightmost_entry(&self.root);
        Iter::new(Arc::clone(&self.root), last, true)
    }

    /// An iterator at the first entry with key >= `key`.
    pub fn lower_bound(&self, key: &[u8]) -> Iter {
        Iter::new(Arc::clone(&self.root), self.lower_bound_node(key), false)
    }

    /// An iterator at the first entry with key > `key`.
    pub fn upper_bound(&self, key: &[u8]) -> Iter {
        let mut it = self.lower_bound(key);
        if it.key() == Some(key) {
            it.advance();
        }
        it
    }

    /// A reverse iterator at the last entry with key <= `key`.
    pub fn reverse_lower_bound(&self, key: &[u8]) -> Iter {
        Iter::new(Arc::clone(&self.root), self.reverse_lower_bound_node(key), true)
    }

    /// A reverse iterator at the last entry with key < `key`.
    pub fn reverse_upper_bound(&self, key: &[u8]) -> Iter {
        let mut it = self.reverse_lower_bound(key);
        if it.key() == Some(key) {
            it.advance();
        }
        it
    }

    /// Three-way merge: combines the edits of `self` and `other`, both
    /// descended from `base`, into a fresh trie. Fails with
    /// [`Error::MergeConflict`] on the first key where the edits collide:
    /// both sides changed the same value differently, one side modified what
    /// the other deleted, or both sides inserted different values under the
    /// same key. Neither input is modified on failure.
    ///
    /// When both sides made the same change the entry is kept once; when one
    /// side left a value at its base state the other side's value wins.
    pub fn merge3(&self, base: &Trie, other: &Trie) -> Result<Trie> {
        let mut merged = Trie::new();

        // First pass: all keys present in self, in key order.
        for (key, value) in self.iter() {
            match (base.get(&key), other.get(&key)) {
                (Some(base_value), Some(other_value)) => {
                    let this_changed = value != base_value;
                    let other_changed = other_value != base_value;
                    if this_changed && other_changed && value != other_value {
                        return Err(Error::MergeConflict(key));
                    }
                    if this_changed {
                        merged.insert(&key, value)?;
                    } else {
                        merged.insert(&key, other_value.to_vec())?;
                    }
                }
                (Some(base_value), None) => {
                    // Other deleted it; only fine if self left it unchanged.
                    if value != base_value {
                        return Err(Error::MergeConflict(key));
                    }
                }
                (None, Some(other_value)) => {
                    // Both sides inserted it.
                    if value != other_value {
                        return Err(Error::MergeConflict(key));
                    }
                    merged.insert(&key, value)?;
                }
                (None, None) => {
                    merged.insert(&key, value)?;
                }
            }
        }

        // Second pass: insertions and deletions visible only through other.
        for (key, value) in other.iter() {
            match (base.get(&key), self.get(&key)) {
                (None, _) => {
                    // Insertion from other; a matching insertion from self
                    // was already written by the first pass.
                    merged.insert(&key, value)?;
                }
                (Some(base_value), None) => {
                    // Self deleted it; only fine if other left it unchanged.
                    if value != base_value {
                        return Err(Error::MergeConflict(key));
                    }
                }
                (Some(_), Some(_)) => {} // covered by the first pass
            }
        }

        Ok(merged)
    }

    /// Walks to `key`, cloning every shared node on the path, and installs
    /// the payload at the final node. Missing path nodes are created.
    fn install(&mut self, key: &[u8], value: Vec<u8>) {
        let mut node = Arc::make_mut(&mut self.root);
        for &b in key {
            let slot = &mut node.children[b as usize];
            let child = slot.get_or_insert_with(|| Arc::new(Node::new(b)));
            node = Arc::make_mut(child);
        }
        node.entry = Some(Entry { key: key.to_vec(), value });
    }

    /// Recursive erase below an already-unshared node. After removing the
    /// payload, unwinding removes every child that was left a payload-less
    /// leaf; the unwind stops by itself at the first node that still has
    /// other children or its own payload.
    fn erase_below(node: &mut Node, key: &[u8]) -> Option<Entry> {
        let (&b, rest) = match key.split_first() {
            None => return node.entry.take(),
            Some(split) => split,
        };
        let slot = node.children[b as usize].as_mut()?;
        let child = Arc::make_mut(slot);
        let removed = Self::erase_below(child, rest)?;
        if child.entry.is_none() && child.is_leaf() {
            node.children[b as usize] = None;
        }
        Some(removed)
    }

    fn node_arc_at(&self, key: &[u8]) -> Option<Arc<Node>> {
        let mut node = &self.root;
        for &b in key {
            node = node.child(b)?;
        }
        Some(Arc::clone(node))
    }

    /// The first payload node with key >= `key`, by descending along `key`
    /// as far as it matches and then scanning for the next occupied slot,
    /// walking back up as needed.
    fn lower_bound_node(&self, key: &[u8]) -> Option<Arc<Node>> {
        let mut path: Vec<&Arc<Node>> = Vec::with_capacity(key.len());
        let mut node = &self.root;
        let mut depth = 0;
        while depth < key.len() {
            match node.child(key[depth]) {
                Some(child) => {
                    path.push(node);
                    node = child;
                    depth += 1;
                }
                None => break,
            }
        }

        if depth == key.len() {
            // The whole key resolved: the answer is this node's entry (the
            // exact key) or the smallest entry below it (all longer, so
            // greater).
            return leftmost_entry(node);
        }

        // Mismatch: every key through a larger slot is greater than `key`.
        let mut label = key[depth];
        let mut cur = node;
        loop {
            if let Some(next) = cur.next_child_after(label) {
                if let Some(hit) = leftmost_entry(next) {
                    return Some(hit);
                }
            }
            label = cur.label;
            cur = path.pop()?;
        }
    }

    /// Walks back up looking for the largest entry before the slot `label`
    /// of the node last popped from `path`. An ancestor's own entry is a
    /// valid predecessor: its key is a strict prefix of the query key.
    fn reverse_bound_ascend(path: &mut Vec<&Arc<Node>>, mut label: u8) -> Option<Arc<Node>> {
        loop {
            let ancestor = path.pop()?;
            if let Some(prev) = ancestor.prev_child_before(label) {
                if let Some(hit) = rightmost_entry(prev) {
                    return Some(hit);
                }
            }
            if ancestor.entry.is_some() {
                return Some(Arc::clone(ancestor));
            }
            label = ancestor.label;
        }
    }

    /// The last payload node with key <= `key`: the mirror of
    /// `lower_bound_node`.
    fn reverse_lower_bound_node(&self, key: &[u8]) -> Option<Arc<Node>> {
        let mut path: Vec<&Arc<Node>> = Vec::with_capacity(key.len());
        let mut node = &self.root;
        let mut depth = 0;
        while depth < key.len() {
            match node.child(key[depth]) {
                Some(child) => {
                    path.push(node);
                    node = child;
                    depth += 1;
                }
                None => break,
            }
        }

        if depth == key.len() {
            if node.entry.is_some() {
                return Some(Arc::clone(node));
            }
            // Everything below this node is longer than `key`, so greater;
            // the predecessor lies on the way up.
            return Self::reverse_bound_ascend(&mut path, node.label);
        }

        // Mismatch: smaller slots at this node hold keys below `key`, and
        // the node's own entry (a strict prefix) is below `key` too.
        if let Some(prev) = node.prev_child_before(key[depth]) {
            if let Some(hit) = rightmost_entry(prev) {
                return Some(hit);
            }
        }
        if node.entry.is_some() {
            return Some(Arc::clone(node));
        }
        Self::reverse_bound_ascend(&mut path, node.label)
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Trie {
    fn eq(&self, other: &Self) -> bool {
        self.num_entries == other.num_entries && self.iter().eq(other.iter())
    }
}

impl Eq for Trie {}

impl fmt::Debug for Trie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Trie")
            .field("len", &self.num_entries)
            .field("data_size", &self.total_value_bytes)
            .finish()
    }
}
