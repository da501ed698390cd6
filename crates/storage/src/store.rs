//! Store handle: access modes, the single-writer lock and the corruption
//! latch.

use crate::db::Database;
use crate::error::{Result, StoreError};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// How a [`Store`] handle may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Queries only; every mutation fails with [`StoreError::ReadOnly`].
    ReadOnly,
    /// Queries plus appends through [`Store::writer`].
    ReadWrite,
}

struct Shared {
    db: Database,
    writer: Mutex<()>,
    corruption: RwLock<Option<String>>,
}

/// Handle to the persisted chain and state snapshot.
///
/// Handles are cheap to clone and share one database. Any number of
/// handles may read concurrently; appends go through the [`StoreWriter`]
/// guard, of which at most one exists at a time.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
    mode: AccessMode,
}

impl Store {
    /// Open persisted state at `path`.
    ///
    /// A read-only open requires an initialized chain. sled holds an
    /// exclusive file lock, so other processes cannot open the same path
    /// while this handle lives; in-process readers use [`Store::reader`].
    pub fn open<P: AsRef<Path>>(path: P, mode: AccessMode) -> Result<Self> {
        let store = Self::from_database(Database::open(path.as_ref())?, mode);
        if mode == AccessMode::ReadOnly && !store.is_initialized()? {
            return Err(StoreError::NotInitialized);
        }
        info!(path = %path.as_ref().display(), ?mode, "store opened");
        Ok(store)
    }

    /// Open an in-memory read-write store (for testing).
    pub fn open_temporary() -> Result<Self> {
        Ok(Self::from_database(
            Database::open_temporary()?,
            AccessMode::ReadWrite,
        ))
    }

    fn from_database(db: Database, mode: AccessMode) -> Self {
        Self {
            shared: Arc::new(Shared {
                db,
                writer: Mutex::new(()),
                corruption: RwLock::new(None),
            }),
            mode,
        }
    }

    /// A read-only handle onto the same database.
    pub fn reader(&self) -> Store {
        Store {
            shared: Arc::clone(&self.shared),
            mode: AccessMode::ReadOnly,
        }
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Acquire the single-writer lock, blocking until any in-flight append
    /// finishes.
    pub fn writer(&self) -> Result<StoreWriter<'_>> {
        self.ensure_writable()?;
        let guard = self.shared.writer.lock();
        self.check()?;
        Ok(StoreWriter {
            store: self,
            _guard: guard,
        })
    }

    /// Like [`Store::writer`] but returns `None` instead of waiting.
    pub fn try_writer(&self) -> Result<Option<StoreWriter<'_>>> {
        self.ensure_writable()?;
        Ok(self.shared.writer.try_lock().map(|guard| StoreWriter {
            store: self,
            _guard: guard,
        }))
    }

    pub fn flush(&self) -> Result<()> {
        self.db().flush()
    }

    pub(crate) fn db(&self) -> &Database {
        &self.shared.db
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            AccessMode::ReadOnly => Err(StoreError::ReadOnly),
            AccessMode::ReadWrite => Ok(()),
        }
    }

    /// Fail if corruption has been latched.
    pub(crate) fn check(&self) -> Result<()> {
        match &*self.shared.corruption.read() {
            Some(msg) => Err(StoreError::Corruption(msg.clone())),
            None => Ok(()),
        }
    }

    /// Latch corruption and return the error to surface.
    pub(crate) fn corrupt(&self, msg: String) -> StoreError {
        error!(reason = %msg, "storage corruption detected, refusing further writes");
        let mut latch = self.shared.corruption.write();
        StoreError::Corruption(latch.get_or_insert(msg).clone())
    }

    /// Read and decode a record. Undecodable bytes are corruption.
    pub(crate) fn read<V: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<V>> {
        self.check()?;
        match self.db().get_raw(key)? {
            Some(bytes) => bincode::deserialize(&bytes).map(Some).map_err(|err| {
                self.corrupt(format!(
                    "undecodable record at {}: {err}",
                    String::from_utf8_lossy(key)
                ))
            }),
            None => Ok(None),
        }
    }

    /// The latched corruption message, if any.
    pub fn corruption(&self) -> Option<String> {
        self.shared.corruption.read().clone()
    }
}

/// Exclusive write access to a [`Store`]. Dropping it releases the lock.
pub struct StoreWriter<'a> {
    pub(crate) store: &'a Store,
    _guard: MutexGuard<'a, ()>,
}

impl StoreWriter<'_> {
    /// The store this writer belongs to, for reads under the lock.
    pub fn store(&self) -> &Store {
        self.store
    }
}
