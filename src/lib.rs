pub mod config;
pub mod encoding;
pub mod error;
pub mod index;
pub mod record;
pub mod trie;
pub mod txn;

pub use config::{IndexConfig, RecordStoreConfig};
pub use error::{Error, Result};
pub use index::{IndexBuilder, IndexCursor, IndexEntry, IndexStore};
pub use record::{Record, RecordCursor, RecordStore};
pub use trie::{PrefixView, Trie};
pub use txn::{RecoveryUnit, SharedTrie};
