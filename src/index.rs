use std::cmp::Ordering;

use tracing::{debug, error};

use crate::config::IndexConfig;
use crate::encoding::{keycode, Datum, IndexKey, KeyOrdering};
use crate::errinput;
use crate::error::{Error, Result};
use crate::trie::{Iter, PrefixView, Trie};
use crate::txn::RecoveryUnit;

/// One index entry, decoded back to its structured key.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    pub key: IndexKey,
    pub row_id: i64,
}

/// The full trie key of one index entry:
/// `prefix_lo || encoded_key || rowid8(row_id)`.
fn entry_key(view: &PrefixView, encoded: &[u8], row_id: i64) -> Vec<u8> {
    let mut inner = Vec::with_capacity(encoded.len() + keycode::ROWID_LEN);
    inner.extend_from_slice(encoded);
    inner.extend_from_slice(&keycode::encode_rowid(row_id));
    view.qualify(&inner)
}

fn check_row_id(row_id: i64) -> Result<()> {
    if row_id < 1 {
        return errinput!("row id {row_id} is not a normal record id");
    }
    Ok(())
}

/// An ordered (key, row id) store over a prefix-scoped slice of the shared
/// trie.
///
/// The encoded structured key goes into the trie key so that byte order
/// realizes the configured field ordering; the row id is appended so
/// duplicate keys stay distinct and sort by row id. The trie value holds
/// the encoder's type bits, which are needed to decode entries on the way
/// out.
pub struct IndexStore {
    view: PrefixView,
    ordering: KeyOrdering,
    unique: bool,
}

impl IndexStore {
    pub fn new(config: IndexConfig) -> Self {
        IndexStore {
            view: PrefixView::new(config.ident),
            ordering: config.ordering,
            unique: config.unique,
        }
    }

    pub fn ident(&self) -> &[u8] {
        self.view.ident()
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Inserts an entry. Re-inserting an identical (key, row id) pair
    /// silently succeeds. With `dups_allowed` false, an entry with the same
    /// key but a different row id fails with [`Error::DuplicateKey`].
    pub fn insert(
        &self,
        trie: &mut Trie,
        key: &[Datum],
        row_id: i64,
        dups_allowed: bool,
    ) -> Result<()> {
        check_row_id(row_id)?;
        let (encoded, type_bits) = keycode::encode_index_key(key, &self.ordering);
        let full_key = entry_key(&self.view, &encoded, row_id);
        if trie.contains_key(&full_key) {
            return Ok(());
        }
        if !dups_allowed {
            if let Some(existing) = self.other_row_id_for(trie, &encoded, row_id) {
                debug!(row_id, existing, "duplicate key rejected");
                return Err(Error::DuplicateKey(format!("{key:?}")));
            }
        }
        trie.insert(&full_key, type_bits)?;
        Ok(())
    }

    /// Removes the exact (key, row id) entry. Returns whether it existed.
    pub fn unindex(&self, trie: &mut Trie, key: &[Datum], row_id: i64) -> bool {
        let (encoded, _) = keycode::encode_index_key(key, &self.ordering);
        trie.erase(&entry_key(&self.view, &encoded, row_id)) == 1
    }

    /// The probe `insert` runs for unique indexes, without inserting: fails
    /// if the key is indexed under a row id other than `row_id`. Always
    /// passes on non-unique indexes.
    pub fn duplicate_key_check(&self, trie: &Trie, key: &[Datum], row_id: i64) -> Result<()> {
        if !self.unique {
            return Ok(());
        }
        let (encoded, _) = keycode::encode_index_key(key, &self.ordering);
        if trie.contains_key(&entry_key(&self.view, &encoded, row_id)) {
            return Ok(());
        }
        if self.other_row_id_for(trie, &encoded, row_id).is_some() {
            return Err(Error::DuplicateKey(format!("{key:?}")));
        }
        Ok(())
    }

    /// Removes every entry. Returns the number removed.
    pub fn truncate(&self, trie: &mut Trie) -> usize {
        let removed = self.view.truncate(trie);
        debug!(removed, "truncated index");
        removed
    }

    pub fn is_empty(&self, trie: &Trie) -> bool {
        self.view.is_empty(trie)
    }

    /// Sum of stored entry key lengths.
    pub fn space_used_bytes(&self, trie: &Trie) -> usize {
        self.view.scan(trie).map(|(key, _)| key.len()).sum()
    }

    /// Walks the whole index and returns the number of keys.
    pub fn full_validate(&self, trie: &Trie) -> usize {
        self.view.len(trie)
    }

    /// A cursor over the index, forward or reverse.
    pub fn cursor(&self, forward: bool) -> IndexCursor {
        IndexCursor {
            view: self.view.clone(),
            ordering: self.ordering.clone(),
            unique: self.unique,
            forward,
            it: None,
            at_eof: false,
            last_move_was_restore: false,
            end_pos: None,
            saved_key: None,
            detached: false,
        }
    }

    /// A bulk loader for entries arriving in ascending (key, row id) order.
    pub fn bulk_builder(&self, dups_allowed: bool) -> IndexBuilder {
        IndexBuilder {
            view: self.view.clone(),
            ordering: self.ordering.clone(),
            dups_allowed,
            last: None,
        }
    }

    /// The row id of the first entry sharing `encoded` as its key, if it
    /// differs from `row_id`. Byte equality of encoded keys is decoded-key
    /// equality: the encoding is injective.
    fn other_row_id_for(&self, trie: &Trie, encoded: &[u8], row_id: i64) -> Option<i64> {
        let min_key = entry_key(&self.view, encoded, i64::MIN);
        let max_key = entry_key(&self.view, encoded, i64::MAX);
        let it = trie.lower_bound(&min_key);
        let key = it.key()?;
        if !self.view.contains(key) || key > max_key.as_slice() {
            return None;
        }
        let found = keycode::decode_rowid_at_end(key).ok()?;
        (found != row_id).then_some(found)
    }
}

/// An index cursor with an optional end position.
///
/// Like the record cursor, it tracks its position by key, retains the trie
/// version it last read from, and takes the caller's current working copy on
/// every call.
pub struct IndexCursor {
    view: PrefixView,
    ordering: KeyOrdering,
    unique: bool,
    forward: bool,
    it: Option<Iter>,
    at_eof: bool,
    last_move_was_restore: bool,
    end_pos: Option<Vec<u8>>,
    saved_key: Option<Vec<u8>>,
    detached: bool,
}

impl IndexCursor {
    /// Caps iteration at `key`. An empty key clears the cap.
    ///
    /// The boundary position appends the maximum row id when direction and
    /// inclusivity match (forward inclusive, reverse exclusive) and the
    /// minimum otherwise, so a single byte comparison per step decides
    /// whether the cap was passed.
    pub fn set_end_position(&mut self, key: &[Datum], inclusive: bool) {
        if key.is_empty() {
            self.end_pos = None;
            return;
        }
        let bound_row_id = if self.forward == inclusive { i64::MAX } else { i64::MIN };
        let (encoded, _) = keycode::encode_index_key(key, &self.ordering);
        self.end_pos = Some(entry_key(&self.view, &encoded, bound_row_id));
    }

    /// Advances to the next entry, or `None` once the ident range or the
    /// end position is exhausted. The first call positions the cursor at
    /// the start of the range. After `restore`, the restored position is
    /// returned without advancing past it.
    pub fn next(&mut self, trie: &Trie) -> Option<IndexEntry> {
        assert!(!self.detached, "cursor is detached");
        if self.at_eof {
            self.last_move_was_restore = false;
            return None;
        }
        if self.last_move_was_restore {
            self.last_move_was_restore = false;
        } else {
            match &mut self.it {
                None => {
                    self.it = Some(if self.forward {
                        trie.lower_bound(self.view.prefix_lo())
                    } else {
                        trie.reverse_lower_bound(self.view.prefix_hi())
                    });
                }
                Some(it) => it.advance(),
            }
        }
        self.read_current()
    }

    /// Seeks to the first entry matching `key` given direction and
    /// inclusivity. An empty key seeks to the start of the range when
    /// inclusive, and to the end ("no element satisfies the seek") when
    /// exclusive.
    pub fn seek(&mut self, trie: &Trie, key: &[Datum], inclusive: bool) -> Option<IndexEntry> {
        assert!(!self.detached, "cursor is detached");
        self.last_move_was_restore = false;
        self.at_eof = false;
        if key.is_empty() {
            if !inclusive {
                self.at_eof = true;
                self.it = None;
                return None;
            }
            self.it = Some(if self.forward {
                trie.lower_bound(self.view.prefix_lo())
            } else {
                trie.reverse_lower_bound(self.view.prefix_hi())
            });
            return self.read_current();
        }
        // The row-id rule is the end-position rule inverted: a minimum row
        // id makes an inclusive forward seek land on the key's first entry,
        // and so on.
        let bound_row_id = if self.forward == inclusive { i64::MIN } else { i64::MAX };
        let (encoded, _) = keycode::encode_index_key(key, &self.ordering);
        let bound = entry_key(&self.view, &encoded, bound_row_id);
        self.it = Some(if self.forward {
            trie.lower_bound(&bound)
        } else {
            trie.reverse_lower_bound(&bound)
        });
        self.read_current()
    }

    /// Seeks to a query-layer seek point whose concrete key has already
    /// been materialized. Always inclusive.
    pub fn seek_at(&mut self, trie: &Trie, seek_key: &[Datum]) -> Option<IndexEntry> {
        self.seek(trie, seek_key, true)
    }

    /// Captures the current position for `restore`. Keeps the previous
    /// capture if the cursor still sits on an unconsumed restore.
    pub fn save(&mut self) {
        self.at_eof = false;
        if self.last_move_was_restore {
            return;
        }
        self.saved_key = self.it.as_ref().and_then(|it| it.key()).map(|k| k.to_vec());
    }

    /// Re-seeks the saved position in the given (possibly newer) working
    /// copy.
    ///
    /// If the saved entry is gone, the cursor lands on the next entry in
    /// iteration order and the following `next` returns it without
    /// advancing. On a unique index the comparison ignores the trailing row
    /// id: the same logical key must not be returned twice even if its row
    /// id changed underneath the cursor.
    pub fn restore(&mut self, trie: &Trie) {
        assert!(!self.detached, "cursor is detached");
        let Some(saved) = self.saved_key.clone() else {
            self.it = None;
            self.at_eof = true;
            self.last_move_was_restore = true;
            return;
        };
        let it = if self.forward {
            trie.lower_bound(&saved)
        } else {
            trie.reverse_lower_bound(&saved)
        };
        let in_range = it
            .key()
            .map(|key| self.view.contains(key) && !self.past_end(key))
            .unwrap_or(false);
        if !in_range {
            self.it = Some(it);
            self.at_eof = true;
            self.last_move_was_restore = true;
            return;
        }
        let key = it.key().unwrap_or_default();
        self.last_move_was_restore = if self.unique {
            key[..keycode::size_without_rowid(key)]
                != saved[..keycode::size_without_rowid(&saved)]
        } else {
            key != saved.as_slice()
        };
        self.it = Some(it);
    }

    /// Detaches the cursor from its transaction; no trie access is allowed
    /// until `reattach`.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    pub fn reattach(&mut self) {
        self.detached = false;
    }

    fn past_end(&self, key: &[u8]) -> bool {
        match &self.end_pos {
            None => false,
            Some(bound) => {
                if self.forward {
                    key > bound.as_slice()
                } else {
                    key < bound.as_slice()
                }
            }
        }
    }

    fn read_current(&mut self) -> Option<IndexEntry> {
        let it = self.it.as_ref()?;
        let Some((key, type_bits)) = it.entry() else {
            self.at_eof = true;
            return None;
        };
        if !self.view.contains(key) || self.past_end(key) {
            self.at_eof = true;
            return None;
        }
        let inner = &key[self.view.prefix_lo().len()..];
        let encoded = &inner[..keycode::size_without_rowid(inner)];
        let decoded = keycode::decode_rowid_at_end(inner).and_then(|row_id| {
            keycode::decode_index_key(encoded, type_bits, &self.ordering)
                .map(|key| IndexEntry { key, row_id })
        });
        match decoded {
            Ok(entry) => Some(entry),
            Err(err) => {
                error!(error = %err, "corrupt index entry");
                self.at_eof = true;
                None
            }
        }
    }
}

/// Bulk index loader. Entries must arrive in ascending (key, row id) order
/// and are written straight into the working copy; committing is delegated
/// to the recovery unit, since the trie already holds everything.
pub struct IndexBuilder {
    view: PrefixView,
    ordering: KeyOrdering,
    dups_allowed: bool,
    last: Option<(Vec<u8>, i64)>,
}

impl IndexBuilder {
    pub fn add_key(&mut self, trie: &mut Trie, key: &[Datum], row_id: i64) -> Result<()> {
        check_row_id(row_id)?;
        let (encoded, type_bits) = keycode::encode_index_key(key, &self.ordering);
        if let Some((last_encoded, last_row_id)) = &self.last {
            let key_cmp = encoded.as_slice().cmp(last_encoded.as_slice());
            if key_cmp == Ordering::Less
                || (self.dups_allowed && key_cmp == Ordering::Equal && row_id < *last_row_id)
            {
                return Err(Error::OrderingViolation(
                    "expected ascending (key, row id) order in bulk builder".to_string(),
                ));
            }
            if !self.dups_allowed && key_cmp == Ordering::Equal && row_id != *last_row_id {
                return Err(Error::DuplicateKey(format!("{key:?}")));
            }
        }
        trie.insert(&entry_key(&self.view, &encoded, row_id), type_bits)?;
        self.last = Some((encoded, row_id));
        Ok(())
    }

    /// Signals the recovery unit to commit. No trie work happens here.
    pub fn commit(self, ru: &mut RecoveryUnit) -> Result<()> {
        ru.commit()
    }
}
