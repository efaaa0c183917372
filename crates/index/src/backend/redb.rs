//! Redb backend for the corpus store.
//!
//! Redb is a pure Rust embedded key-value store with ACID transactions. Every
//! write below runs in its own write transaction; `write_batch` commits its
//! deletes and puts together.
//!
//! # Configuration Example
//! ```yaml
//! index:
//!   backend: "redb"
//!   path: "/data/cbir.redb"
//! ```

use crate::{IndexBackend, IndexError};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const CBIR_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cbir_data");

/// Redb backend implementation for persistent key-value storage.
///
/// `Database` does its own locking and MVCC, so the handle is shared freely.
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open or create a Redb database at the given path.
    ///
    /// ```no_run
    /// use index::RedbBackend;
    ///
    /// let backend = RedbBackend::open("/tmp/cbir.redb").unwrap();
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let db = Database::create(path).map_err(IndexError::backend)?;

        let write_txn = db.begin_write().map_err(IndexError::backend)?;
        {
            // Opening the table creates it.
            let _table = write_txn
                .open_table(CBIR_TABLE)
                .map_err(IndexError::backend)?;
        }
        write_txn.commit().map_err(IndexError::backend)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl IndexBackend for RedbBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        self.write_batch(Vec::new(), vec![(key.to_string(), value.to_vec())])
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let read_txn = self.db.begin_read().map_err(IndexError::backend)?;
        let table = read_txn
            .open_table(CBIR_TABLE)
            .map_err(IndexError::backend)?;

        Ok(table
            .get(key)
            .map_err(IndexError::backend)?
            .map(|value| value.value().to_vec()))
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        self.write_batch(vec![key.to_string()], Vec::new())
    }

    fn write_batch(
        &self,
        deletes: Vec<String>,
        puts: Vec<(String, Vec<u8>)>,
    ) -> Result<(), IndexError> {
        let write_txn = self.db.begin_write().map_err(IndexError::backend)?;
        {
            let mut table = write_txn
                .open_table(CBIR_TABLE)
                .map_err(IndexError::backend)?;
            for key in &deletes {
                table.remove(key.as_str()).map_err(IndexError::backend)?;
            }
            for (key, value) in &puts {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(IndexError::backend)?;
            }
        }
        write_txn.commit().map_err(IndexError::backend)?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let read_txn = self.db.begin_read().map_err(IndexError::backend)?;
        let table = read_txn
            .open_table(CBIR_TABLE)
            .map_err(IndexError::backend)?;

        for item in table.range(prefix..).map_err(IndexError::backend)? {
            let (key, value) = item.map_err(IndexError::backend)?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            visitor(key, value.value())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn redb_backend_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let backend = RedbBackend::open(temp_file.path()).unwrap();

        backend.put("img/1", b"value1").unwrap();
        assert_eq!(backend.get("img/1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(backend.get("img/2").unwrap(), None);

        backend.delete("img/1").unwrap();
        assert_eq!(backend.get("img/1").unwrap(), None);
    }

    #[test]
    fn redb_prefix_scan_stops_at_prefix_end() {
        let temp_file = NamedTempFile::new().unwrap();
        let backend = RedbBackend::open(temp_file.path()).unwrap();

        backend
            .write_batch(
                Vec::new(),
                vec![
                    ("desc/a/1".to_string(), b"x".to_vec()),
                    ("desc/a/2".to_string(), b"y".to_vec()),
                    ("desc/b/1".to_string(), b"z".to_vec()),
                    ("img/a".to_string(), b"w".to_vec()),
                ],
            )
            .unwrap();

        let mut seen = Vec::new();
        backend
            .scan_prefix("desc/a/", &mut |key, value| {
                seen.push((key.to_string(), value.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                ("desc/a/1".to_string(), b"x".to_vec()),
                ("desc/a/2".to_string(), b"y".to_vec()),
            ]
        );
    }

    #[test]
    fn redb_batch_applies_deletes_first() {
        let temp_file = NamedTempFile::new().unwrap();
        let backend = RedbBackend::open(temp_file.path()).unwrap();
        backend.put("k", b"old").unwrap();
        backend
            .write_batch(vec!["k".into()], vec![("k".into(), b"new".to_vec())])
            .unwrap();
        assert_eq!(backend.get("k").unwrap(), Some(b"new".to_vec()));
    }
}
