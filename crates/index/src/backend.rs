use crate::IndexError;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Ordered byte store under the corpus index.
///
/// Keys are UTF-8 with `/`-separated prefixes. `scan_prefix` visits keys in
/// ascending byte order, which is the scan order rankings fall back on.
pub trait IndexBackend: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError>;
    /// Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), IndexError>;
    /// Deletes land before puts, and readers see all of it or none.
    fn write_batch(
        &self,
        deletes: Vec<String>,
        puts: Vec<(String, Vec<u8>)>,
    ) -> Result<(), IndexError>;
    /// Calls `visitor` for each key beginning with `prefix`, stopping at the
    /// first error it returns.
    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError>;
    /// Push buffered writes to durable storage. No-op by default.
    fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Which backend an [`ImageIndex`](crate::ImageIndex) sits on.
///
/// ```
/// use index::BackendConfig;
///
/// let scratch = BackendConfig::in_memory();
/// let on_disk = BackendConfig::redb("/data/cbir.redb");
/// assert_ne!(scratch, on_disk);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BackendConfig {
    /// Redb file at `path`; needs the `backend-redb` feature.
    Redb { path: String },
    /// Nothing survives the process.
    #[default]
    InMemory,
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        Self::InMemory
    }

    pub fn redb(path: impl Into<String>) -> Self {
        Self::Redb { path: path.into() }
    }

    pub fn build(&self) -> Result<Box<dyn IndexBackend>, IndexError> {
        let backend: Box<dyn IndexBackend> = match self {
            Self::InMemory => Box::<InMemoryBackend>::default(),
            #[cfg(feature = "backend-redb")]
            Self::Redb { path } => Box::new(RedbBackend::open(path)?),
            #[cfg(not(feature = "backend-redb"))]
            Self::Redb { .. } => {
                return Err(IndexError::backend(
                    "built without the backend-redb feature",
                ));
            }
        };
        Ok(backend)
    }
}

type Entries = BTreeMap<String, Vec<u8>>;

/// `BTreeMap` behind a `RwLock`; the map order gives the prefix scan order.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: RwLock<Entries>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self) -> Result<RwLockReadGuard<'_, Entries>, IndexError> {
        self.entries
            .read()
            .map_err(|_| IndexError::backend("in-memory store lock poisoned"))
    }

    fn exclusive(&self) -> Result<RwLockWriteGuard<'_, Entries>, IndexError> {
        self.entries
            .write()
            .map_err(|_| IndexError::backend("in-memory store lock poisoned"))
    }
}

impl IndexBackend for InMemoryBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        self.exclusive()?.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        Ok(self.shared()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        self.exclusive()?.remove(key);
        Ok(())
    }

    fn write_batch(
        &self,
        deletes: Vec<String>,
        puts: Vec<(String, Vec<u8>)>,
    ) -> Result<(), IndexError> {
        let mut entries = self.exclusive()?;
        deletes.iter().for_each(|key| {
            entries.remove(key);
        });
        entries.extend(puts);
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let entries = self.shared()?;
        let from = (Bound::Included(prefix), Bound::Unbounded);
        for (key, value) in entries
            .range::<str, _>(from)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            visitor(key, value)?;
        }
        Ok(())
    }
}

#[cfg(feature = "backend-redb")]
pub mod redb;

#[cfg(feature = "backend-redb")]
pub use self::redb::RedbBackend;
