use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::trie::Trie;

/// The shared base trie that committed transactions are published to.
///
/// The lock only guards swapping the base in and out; readers take an O(1)
/// clone and work against it without holding anything, and all trie
/// mutation happens on private working copies.
#[derive(Clone, Debug, Default)]
pub struct SharedTrie {
    inner: Arc<RwLock<Trie>>,
}

impl SharedTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the current base. Constant-time.
    pub fn head(&self) -> Result<Trie> {
        Ok(self.inner.read()?.clone())
    }

    /// Starts a recovery unit against this base.
    pub fn recovery_unit(&self) -> RecoveryUnit {
        RecoveryUnit { base: self.clone(), snapshot: None, working: None }
    }
}

/// One transaction's view of the store: a private working copy plus the
/// snapshot it was forked from, with a commit/abort lifecycle.
///
/// The working copy is created lazily on first access and holds at most one
/// copy at a time. Committing three-way-merges the working copy against the
/// current base, using the fork-time snapshot as the common ancestor, so
/// commits from other units that landed in between are reconciled rather
/// than overwritten.
#[derive(Debug)]
pub struct RecoveryUnit {
    base: SharedTrie,
    snapshot: Option<Trie>,
    working: Option<Trie>,
}

impl RecoveryUnit {
    /// Splits a working copy off the current base. Idempotent: later calls
    /// keep the existing fork.
    pub fn fork_if_needed(&mut self) -> Result<()> {
        if self.working.is_none() {
            let head = self.base.head()?;
            self.snapshot = Some(head.clone());
            self.working = Some(head);
        }
        Ok(())
    }

    /// Whether this unit holds a working copy.
    pub fn is_forked(&self) -> bool {
        self.working.is_some()
    }

    /// The unit's private working copy, forking it first if needed.
    pub fn working_copy(&mut self) -> Result<&mut Trie> {
        self.fork_if_needed()?;
        self.working
            .as_mut()
            .ok_or_else(|| Error::Internal("no working copy after fork".to_string()))
    }

    /// Publishes the working copy by merging it into the shared base.
    ///
    /// On [`Error::MergeConflict`] the base is untouched and the unit keeps
    /// its fork, so the caller can inspect it before aborting. Committing an
    /// unforked unit is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        let (Some(snapshot), Some(working)) = (&self.snapshot, &self.working) else {
            return Ok(());
        };
        let mut base = self.base.inner.write()?;
        let merged = match working.merge3(snapshot, &base) {
            Ok(merged) => merged,
            Err(err) => {
                debug!(error = %err, "commit failed");
                return Err(err);
            }
        };
        let entries = merged.len();
        *base = merged;
        drop(base);
        debug!(entries, "committed working copy");
        self.snapshot = None;
        self.working = None;
        Ok(())
    }

    /// Drops the working copy without publishing anything. Reference
    /// counting reclaims every node not shared with the base.
    pub fn abort(&mut self) {
        self.snapshot = None;
        self.working = None;
    }
}
