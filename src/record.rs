use std::sync::atomic::{AtomicI64, Ordering};

use tracing::debug;

use crate::config::RecordStoreConfig;
use crate::encoding::format;
use crate::encoding::keycode;
use crate::errinput;
use crate::error::{Error, Result};
use crate::trie::{Iter, PrefixView, Trie};

/// A stored record: its row id and a copy of its data.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: i64,
    pub data: Vec<u8>,
}

/// A byte-range patch applied by [`RecordStore::update_with_damages`]:
/// `size` bytes are copied from `source_offset` in the damage source into
/// `target_offset` of the stored value.
#[derive(Clone, Copy, Debug)]
pub struct Damage {
    pub source_offset: usize,
    pub target_offset: usize,
    pub size: usize,
}

/// A batched insert source: announces its encoded size, then writes itself
/// into the preallocated buffer.
pub trait RecordWriter {
    fn size(&self) -> usize;
    fn write_into(&self, buf: &mut [u8]);
}

/// Called with a record about to be evicted from a capped store.
pub type CappedOverflowCallback = Box<dyn Fn(i64, &[u8]) + Send + Sync>;

/// An auto-id row store over a prefix-scoped slice of the shared trie.
///
/// Row ids come from a per-store monotonic counter starting at 1 and are
/// never reused. The trie key for a row is `prefix_lo || rowid8(id)`, with
/// the row id big-endian and sign-flipped so byte order matches id order.
///
/// Every operation takes the caller's working copy explicitly; the store
/// itself holds no trie state, so any number of transactions can use the
/// same store against their own copies. The id counter is the only state
/// shared between them.
pub struct RecordStore {
    view: PrefixView,
    capped: bool,
    capped_max_bytes: u64,
    capped_max_docs: u64,
    next_row_id: AtomicI64,
    overflow_callback: Option<CappedOverflowCallback>,
}

impl RecordStore {
    pub fn new(config: RecordStoreConfig) -> Self {
        RecordStore {
            view: PrefixView::new(config.ident),
            capped: config.capped,
            capped_max_bytes: config.capped_max_bytes,
            capped_max_docs: config.capped_max_docs,
            next_row_id: AtomicI64::new(1),
            overflow_callback: None,
        }
    }

    pub fn ident(&self) -> &[u8] {
        self.view.ident()
    }

    pub fn is_capped(&self) -> bool {
        self.capped
    }

    pub fn capped_limits(&self) -> (u64, u64) {
        (self.capped_max_bytes, self.capped_max_docs)
    }

    /// Registers the callback a capped store will hand evicted records to.
    ///
    /// TODO: invoke it once capped trimming is implemented; until then the
    /// callback is stored but never called.
    pub fn set_overflow_callback(&mut self, callback: CappedOverflowCallback) {
        self.overflow_callback = Some(callback);
    }

    /// Whether an overflow callback has been registered.
    pub fn has_overflow_callback(&self) -> bool {
        self.overflow_callback.is_some()
    }

    /// Inserts a record and returns its freshly allocated row id.
    pub fn insert(&self, trie: &mut Trie, data: &[u8]) -> Result<i64> {
        let id = self.next_record_id();
        if !trie.insert(&self.record_key(id), data.to_vec())? {
            debug!(id, "record key already present, leaving existing data");
        }
        Ok(id)
    }

    /// Inserts a batch of records from writers, in order, and returns their
    /// row ids.
    pub fn insert_many(&self, trie: &mut Trie, writers: &[&dyn RecordWriter]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(writers.len());
        for writer in writers {
            let mut buf = vec![0u8; writer.size()];
            writer.write_into(&mut buf);
            let id = self.next_record_id();
            trie.insert(&self.record_key(id), buf)?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Returns a copy of the record's data, if present.
    pub fn find(&self, trie: &Trie, id: i64) -> Option<Vec<u8>> {
        trie.get(&self.record_key(id)).map(|data| data.to_vec())
    }

    /// Replaces an existing record's data.
    pub fn update(&self, trie: &mut Trie, id: i64, data: &[u8]) -> Result<()> {
        Self::check_row_id(id)?;
        trie.update(&self.record_key(id), data.to_vec())
    }

    /// Applies in-place byte patches to an existing record and returns the
    /// patched data. All ranges are validated before anything is written.
    pub fn update_with_damages(
        &self,
        trie: &mut Trie,
        id: i64,
        source: &[u8],
        damages: &[Damage],
    ) -> Result<Vec<u8>> {
        Self::check_row_id(id)?;
        let key = self.record_key(id);
        let Some(current) = trie.get(&key) else {
            return Err(Error::KeyNotFound);
        };
        let mut data = current.to_vec();
        for damage in damages {
            let src = Self::damage_range(damage.source_offset, damage.size, source.len())?;
            let dst = Self::damage_range(damage.target_offset, damage.size, data.len())?;
            data[dst].copy_from_slice(&source[src]);
        }
        trie.update(&key, data.clone())?;
        Ok(data)
    }

    /// Deletes a record; it must exist.
    pub fn delete(&self, trie: &mut Trie, id: i64) -> Result<()> {
        Self::check_row_id(id)?;
        if trie.erase(&self.record_key(id)) != 1 {
            return Err(Error::KeyNotFound);
        }
        Ok(())
    }

    /// Sum of record data lengths.
    pub fn data_size(&self, trie: &Trie) -> usize {
        self.view.data_size(trie)
    }

    /// Number of records.
    pub fn num_records(&self, trie: &Trie) -> usize {
        self.view.len(trie)
    }

    /// Removes every record in the store.
    pub fn truncate(&self, trie: &mut Trie) -> Result<()> {
        let removed = self.view.truncate(trie);
        debug!(ident = %format::Raw::bytes(self.view.ident()), removed, "truncated record store");
        Ok(())
    }

    /// A cursor over the store's records, forward or reverse.
    pub fn cursor(&self, forward: bool) -> RecordCursor {
        RecordCursor::new(self.view.clone(), forward)
    }

    fn record_key(&self, id: i64) -> Vec<u8> {
        self.view.qualify(&keycode::encode_rowid(id))
    }

    fn next_record_id(&self) -> i64 {
        self.next_row_id.fetch_add(1, Ordering::SeqCst)
    }

    fn check_row_id(id: i64) -> Result<()> {
        if id < 1 {
            return errinput!("row id {id} is not a normal record id");
        }
        Ok(())
    }

    fn damage_range(offset: usize, size: usize, len: usize) -> Result<std::ops::Range<usize>> {
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= len)
            .ok_or_else(|| Error::InvalidArgument(format!(
                "damage range {offset}+{size} exceeds length {len}"
            )))?;
        Ok(offset..end)
    }
}

/// A record cursor. The cursor tracks its position by key and retains the
/// trie version it last read from; each call takes the caller's current
/// working copy, so writes made between calls become visible after
/// `restore`, the way the save/restore protocol intends.
pub struct RecordCursor {
    view: PrefixView,
    forward: bool,
    it: Option<Iter>,
    need_first_seek: bool,
    last_move_was_restore: bool,
    saved_position: Option<Vec<u8>>,
    detached: bool,
}

impl RecordCursor {
    fn new(view: PrefixView, forward: bool) -> Self {
        RecordCursor {
            view,
            forward,
            it: None,
            need_first_seek: true,
            last_move_was_restore: false,
            saved_position: None,
            detached: false,
        }
    }

    /// Advances to the next record and returns it, or `None` at the end of
    /// the store. The first call positions the cursor at the first (or, in
    /// reverse, last) record. After `restore`, the call returns the restored
    /// position without advancing past it.
    pub fn next(&mut self, trie: &Trie) -> Option<Record> {
        assert!(!self.detached, "cursor is detached");
        self.saved_position = None;
        if self.need_first_seek {
            self.need_first_seek = false;
            self.it = Some(if self.forward {
                trie.lower_bound(self.view.prefix_lo())
            } else {
                trie.reverse_lower_bound(self.view.prefix_hi())
            });
        } else if !self.last_move_was_restore {
            if let Some(it) = &mut self.it {
                it.advance();
            }
        }
        self.last_move_was_restore = false;
        self.read_current()
    }

    /// Positions the cursor exactly at `id`, or at the end if absent.
    pub fn seek_exact(&mut self, trie: &Trie, id: i64) -> Option<Record> {
        assert!(!self.detached, "cursor is detached");
        self.saved_position = None;
        self.last_move_was_restore = false;
        self.need_first_seek = false;
        let key = self.view.qualify(&keycode::encode_rowid(id));
        let it =
            if self.forward { trie.lower_bound(&key) } else { trie.reverse_lower_bound(&key) };
        if it.key() != Some(key.as_slice()) {
            self.it = None;
            return None;
        }
        self.it = Some(it);
        self.read_current()
    }

    /// Captures nothing: the position is already tracked on every move.
    /// Kept so callers can bracket writes with save/restore symmetrically.
    pub fn save(&mut self) {}

    /// Re-seeks the saved position in the given (possibly newer) working
    /// copy. If the saved record is gone, the cursor lands on the next
    /// record in iteration order and the following `next` call returns it
    /// without advancing again.
    pub fn restore(&mut self, trie: &Trie) {
        assert!(!self.detached, "cursor is detached");
        match &self.saved_position {
            None => {
                self.it = None;
                self.last_move_was_restore = true;
            }
            Some(saved) => {
                let it = if self.forward {
                    trie.lower_bound(saved)
                } else {
                    trie.reverse_lower_bound(saved)
                };
                self.last_move_was_restore = it.key() != Some(saved.as_slice());
                self.it = Some(it);
            }
        }
    }

    /// Detaches the cursor from its transaction; no trie access is allowed
    /// until `reattach`.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    pub fn reattach(&mut self) {
        self.detached = false;
    }

    fn read_current(&mut self) -> Option<Record> {
        let it = self.it.as_ref()?;
        let (key, value) = it.entry()?;
        if !self.view.contains(key) {
            return None;
        }
        self.saved_position = Some(key.to_vec());
        let id = keycode::decode_rowid_at_end(key).ok()?;
        Some(Record { id, data: value.to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ident: &[u8]) -> RecordStore {
        RecordStore::new(RecordStoreConfig::new(ident))
    }

    fn seeded() -> (Trie, RecordStore, Vec<i64>) {
        let mut trie = Trie::new();
        let rs = store(b"records");
        let ids = vec![
            rs.insert(&mut trie, b"alpha").unwrap(),
            rs.insert(&mut trie, b"beta").unwrap(),
            rs.insert(&mut trie, b"gamma").unwrap(),
        ];
        (trie, rs, ids)
    }

    #[test]
    fn insert_allocates_monotonic_ids() {
        let (_, _, ids) = seeded();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn find_update_delete_roundtrip() {
        let (mut trie, rs, ids) = seeded();
        assert_eq!(rs.find(&trie, ids[0]), Some(b"alpha".to_vec()));
        assert_eq!(rs.find(&trie, 99), None);

        rs.update(&mut trie, ids[0], b"ALPHA").unwrap();
        assert_eq!(rs.find(&trie, ids[0]), Some(b"ALPHA".to_vec()));
        assert_eq!(rs.update(&mut trie, 99, b"x"), Err(Error::KeyNotFound));

        rs.delete(&mut trie, ids[0]).unwrap();
        assert_eq!(rs.find(&trie, ids[0]), None);
        assert_eq!(rs.delete(&mut trie, ids[0]), Err(Error::KeyNotFound));
    }

    #[test]
    fn non_normal_row_ids_are_rejected() {
        let (mut trie, rs, _) = seeded();
        assert!(matches!(rs.update(&mut trie, 0, b"x"), Err(Error::InvalidArgument(_))));
        assert!(matches!(rs.delete(&mut trie, -5), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn counters_cover_only_this_store() {
        let (mut trie, rs, _) = seeded();
        let other = store(b"other");
        other.insert(&mut trie, b"xxxxxxxxxx").unwrap();

        assert_eq!(rs.num_records(&trie), 3);
        assert_eq!(rs.data_size(&trie), 5 + 4 + 5);
        assert_eq!(other.num_records(&trie), 1);
        assert_eq!(other.data_size(&trie), 10);
    }

    #[test]
    fn truncate_leaves_other_stores_alone() {
        let (mut trie, rs, _) = seeded();
        let other = store(b"other");
        other.insert(&mut trie, b"keep").unwrap();

        rs.truncate(&mut trie).unwrap();
        assert_eq!(rs.num_records(&trie), 0);
        assert_eq!(other.num_records(&trie), 1);
    }

    #[test]
    fn forward_cursor_yields_id_order() {
        let (trie, rs, ids) = seeded();
        let mut cursor = rs.cursor(true);
        let mut seen = Vec::new();
        while let Some(record) = cursor.next(&trie) {
            seen.push(record.id);
        }
        assert_eq!(seen, ids);
        assert_eq!(cursor.next(&trie), None);
    }

    #[test]
    fn reverse_cursor_yields_reverse_order() {
        let (trie, rs, ids) = seeded();
        let mut cursor = rs.cursor(false);
        let mut seen = Vec::new();
        while let Some(record) = cursor.next(&trie) {
            seen.push(record.id);
        }
        let mut expected = ids;
        expected.reverse();
        assert_eq!(seen, expected);
    }

    #[test]
    fn seek_exact_positions_or_ends() {
        let (trie, rs, ids) = seeded();
        let mut cursor = rs.cursor(true);
        let record = cursor.seek_exact(&trie, ids[1]).unwrap();
        assert_eq!(record, Record { id: ids[1], data: b"beta".to_vec() });
        // Iteration continues from the sought position.
        assert_eq!(cursor.next(&trie).unwrap().id, ids[2]);
        assert_eq!(cursor.seek_exact(&trie, 42), None);
    }

    #[test]
    fn restore_after_delete_does_not_skip() {
        let (mut trie, rs, ids) = seeded();
        let mut cursor = rs.cursor(true);
        assert_eq!(cursor.next(&trie).unwrap().id, ids[0]);
        assert_eq!(cursor.next(&trie).unwrap().id, ids[1]);

        cursor.save();
        rs.delete(&mut trie, ids[1]).unwrap();
        cursor.restore(&trie);

        // The saved record is gone; the next record must not be skipped.
        assert_eq!(cursor.next(&trie).unwrap().id, ids[2]);
    }

    #[test]
    fn restore_on_surviving_record_advances_normally() {
        let (mut trie, rs, ids) = seeded();
        let mut cursor = rs.cursor(true);
        assert_eq!(cursor.next(&trie).unwrap().id, ids[0]);

        cursor.save();
        let id4 = rs.insert(&mut trie, b"delta").unwrap();
        cursor.restore(&trie);

        assert_eq!(cursor.next(&trie).unwrap().id, ids[1]);
        assert_eq!(cursor.next(&trie).unwrap().id, ids[2]);
        assert_eq!(cursor.next(&trie).unwrap().id, id4);
    }

    #[test]
    fn insert_many_writes_all_records() {
        struct Blob(&'static [u8]);
        impl RecordWriter for Blob {
            fn size(&self) -> usize {
                self.0.len()
            }
            fn write_into(&self, buf: &mut [u8]) {
                buf.copy_from_slice(self.0);
            }
        }

        let mut trie = Trie::new();
        let rs = store(b"bulk");
        let blobs = [Blob(b"one"), Blob(b"two"), Blob(b"three")];
        let writers: Vec<&dyn RecordWriter> = blobs.iter().map(|b| b as &dyn RecordWriter).collect();
        let ids = rs.insert_many(&mut trie, &writers).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(rs.find(&trie, 3), Some(b"three".to_vec()));
    }

    #[test]
    fn update_with_damages_patches_in_place() {
        let mut trie = Trie::new();
        let rs = store(b"dmg");
        let id = rs.insert(&mut trie, b"hello world").unwrap();

        let source = b"HELLO";
        let damages = [
            Damage { source_offset: 0, target_offset: 0, size: 2 },
            Damage { source_offset: 3, target_offset: 9, size: 2 },
        ];
        let patched = rs.update_with_damages(&mut trie, id, source, &damages).unwrap();
        assert_eq!(patched, b"HEllo worLO".to_vec());
        assert_eq!(rs.find(&trie, id), Some(patched));
    }

    #[test]
    fn update_with_damages_validates_ranges() {
        let mut trie = Trie::new();
        let rs = store(b"dmg");
        let id = rs.insert(&mut trie, b"short").unwrap();

        let out_of_target = [Damage { source_offset: 0, target_offset: 4, size: 2 }];
        assert!(matches!(
            rs.update_with_damages(&mut trie, id, b"xy", &out_of_target),
            Err(Error::InvalidArgument(_))
        ));
        let out_of_source = [Damage { source_offset: 1, target_offset: 0, size: 2 }];
        assert!(matches!(
            rs.update_with_damages(&mut trie, id, b"xy", &out_of_source),
            Err(Error::InvalidArgument(_))
        ));
        // The record is untouched after a rejected patch set.
        assert_eq!(rs.find(&trie, id), Some(b"short".to_vec()));
    }

    #[test]
    fn capped_configuration_is_exposed() {
        let mut rs = RecordStore::new(RecordStoreConfig::new(&b"cap"[..]).capped(1024, 10));
        assert!(rs.is_capped());
        assert_eq!(rs.capped_limits(), (1024, 10));
        assert!(!rs.has_overflow_callback());
        rs.set_overflow_callback(Box::new(|_, _| {}));
        assert!(rs.has_overflow_callback());
        assert!(!store(b"plain").is_capped());
    }
}
