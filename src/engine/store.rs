//! Persistence of the "last processed block" cursor.
//!
//! Cursors are keyed by filter so several filters can share one store. The engine never writes
//! a cursor itself: it attaches a [`CursorCommit`] to the delta covering the block, and the
//! consumer commits it once the delta has been processed.

use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::types::BlockRef;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Cursor file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Keyed storage of cursors.
pub trait CursorStore: Send + Sync + 'static {
    /// Last processed block recorded under `key`, `None` if nothing was recorded yet.
    fn get(&self, key: &str) -> Result<Option<BlockRef>, StoreError>;

    /// Records `block` as the last processed block under `key`.
    fn set(&self, key: &str, block: BlockRef) -> Result<(), StoreError>;
}

/// A cursor position that becomes durable once the delta carrying it is processed.
#[derive(Clone)]
pub struct CursorCommit {
    store: Arc<dyn CursorStore>,
    key: Arc<str>,
    block: BlockRef,
}

impl CursorCommit {
    pub(crate) fn new(store: Arc<dyn CursorStore>, key: Arc<str>, block: BlockRef) -> Self {
        Self { store, key, block }
    }

    /// Block recorded by [`CursorCommit::commit`].
    #[must_use]
    pub fn block(&self) -> BlockRef {
        self.block
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records the block as the last processed one.
    ///
    /// # Errors
    ///
    /// Whatever the underlying [`CursorStore::set`] returns.
    pub fn commit(&self) -> Result<(), StoreError> {
        self.store.set(&self.key, self.block)
    }
}

impl fmt::Debug for CursorCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorCommit").field("key", &self.key).field("block", &self.block).finish()
    }
}

impl PartialEq for CursorCommit {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.block == other.block
    }
}

/// Cursors held in process memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cursors: Mutex<BTreeMap<String, BlockRef>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cursors(&self) -> MutexGuard<'_, BTreeMap<String, BlockRef>> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CursorStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<BlockRef>, StoreError> {
        Ok(self.cursors().get(key).copied())
    }

    fn set(&self, key: &str, block: BlockRef) -> Result<(), StoreError> {
        self.cursors().insert(key.to_owned(), block);
        Ok(())
    }
}

/// Cursors persisted as a JSON map in a single file.
///
/// Every `set` rewrites the whole file through a temporary sibling and a rename, so a crash
/// leaves either the old or the new map on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cursors: Mutex<BTreeMap<String, BlockRef>>,
}

impl FileStore {
    /// Opens the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Io`] if the file exists but cannot be read.
    /// * [`StoreError::Corrupt`] if its content is not a cursor map.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let cursors = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        info!(path = %path.display(), cursors = cursors.len(), "Opened cursor store");
        Ok(Self { path, cursors: Mutex::new(cursors) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, cursors: &BTreeMap<String, BlockRef>) -> Result<(), StoreError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, serde_json::to_vec_pretty(cursors)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CursorStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<BlockRef>, StoreError> {
        let cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(cursors.get(key).copied())
    }

    fn set(&self, key: &str, block: BlockRef) -> Result<(), StoreError> {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = cursors.insert(key.to_owned(), block);
        if let Err(err) = self.persist(&cursors) {
            // keep memory and disk in agreement
            match previous {
                Some(previous) => cursors.insert(key.to_owned(), previous),
                None => cursors.remove(key),
            };
            return Err(err);
        }
        debug!(key = %key, block_number = block.number, "Cursor persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::B256;

    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", BlockRef::new(5, B256::repeat_byte(5))).unwrap();
        store.set("a", BlockRef::new(6, B256::repeat_byte(6))).unwrap();

        assert_eq!(store.get("a").unwrap(), Some(BlockRef::new(6, B256::repeat_byte(6))));
        assert_eq!(store.get("b").unwrap(), None);
    }

    #[test]
    fn commit_writes_only_when_asked() {
        let store = Arc::new(MemoryStore::new());
        let block = BlockRef::new(9, B256::repeat_byte(9));
        let commit = CursorCommit::new(store.clone(), Arc::from("filter"), block);

        assert_eq!(store.get("filter").unwrap(), None);
        commit.commit().unwrap();

        assert_eq!(store.get("filter").unwrap(), Some(block));
        assert_eq!(commit.block(), block);
        assert_eq!(commit.key(), "filter");
    }

    #[test]
    fn file_store_missing_file_is_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FileStore::open(dir.path().join("deposit.db"))?;
        assert_eq!(store.get("any")?, None);
        Ok(())
    }

    #[test]
    fn file_store_survives_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("deposit.db");
        let block = BlockRef::new(1_234, B256::repeat_byte(0xab));

        FileStore::open(&path)?.set("filter", block)?;

        let reopened = FileStore::open(&path)?;
        assert_eq!(reopened.get("filter")?, Some(block));
        assert!(!dir.path().join("deposit.db.tmp").exists());
        Ok(())
    }

    #[test]
    fn file_store_rejects_garbage() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("deposit.db");
        fs::write(&path, b"not json")?;

        assert!(matches!(FileStore::open(&path), Err(StoreError::Corrupt(_))));
        Ok(())
    }

    #[test]
    fn failed_write_keeps_previous_cursor() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("missing-dir").join("deposit.db");
        let store = FileStore::open(&path)?;

        let err = store.set("filter", BlockRef::new(1, B256::ZERO)).unwrap_err();

        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.get("filter")?, None);
        Ok(())
    }
}
