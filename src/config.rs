use serde::{Deserialize, Serialize};

use crate::encoding::KeyOrdering;

/// Configuration for a record store.
///
/// The ident scopes the store to its own key range inside the shared trie.
/// Capped limits of 0 mean unlimited.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    /// Byte prefix identifying this store's range in the shared trie.
    pub ident: Vec<u8>,

    /// Whether the store honors the capped limits below.
    pub capped: bool,

    /// Maximum total value bytes when capped (0 = unlimited).
    pub capped_max_bytes: u64,

    /// Maximum number of records when capped (0 = unlimited).
    pub capped_max_docs: u64,
}

impl RecordStoreConfig {
    /// Creates a config for the given ident with capping disabled.
    pub fn new(ident: impl Into<Vec<u8>>) -> Self {
        Self { ident: ident.into(), capped: false, capped_max_bytes: 0, capped_max_docs: 0 }
    }

    /// Enables capped limits.
    pub fn capped(mut self, max_bytes: u64, max_docs: u64) -> Self {
        self.capped = true;
        self.capped_max_bytes = max_bytes;
        self.capped_max_docs = max_docs;
        self
    }
}

/// Configuration for an index store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Byte prefix identifying this index's range in the shared trie.
    pub ident: Vec<u8>,

    /// Per-field sort directions passed to the key encoder.
    pub ordering: KeyOrdering,

    /// Whether inserts reject an existing key under a different row id.
    pub unique: bool,
}

impl IndexConfig {
    /// Creates a config for the given ident with all-ascending ordering.
    pub fn new(ident: impl Into<Vec<u8>>) -> Self {
        Self { ident: ident.into(), ordering: KeyOrdering::default(), unique: false }
    }

    /// Sets the field ordering.
    pub fn ordering(mut self, ordering: KeyOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Marks the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}
