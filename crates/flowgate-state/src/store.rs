//! StateStore: redb-backed instance persistence.
//!
//! Every mutating operation runs in a single write transaction that touches
//! both the details and the owner-space table, so a record is either fully
//! written or not at all. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe instance store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "instance store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory instance store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCE_DETAILS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCE_SPACES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn exists(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCE_DETAILS).map_err(map_err!(Table))?;
        let exists = table.get(id).map_err(map_err!(Read))?.is_some();
        debug!(instance_id = %id, exists, "checked instance existence");
        Ok(exists)
    }

    /// Insert a new record. Fails with `AlreadyExists` on a duplicate id.
    pub fn create(&self, id: &str, blob: &[u8], owner_space: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let duplicate = {
            let mut details = txn.open_table(INSTANCE_DETAILS).map_err(map_err!(Table))?;
            if details.get(id).map_err(map_err!(Read))?.is_some() {
                true
            } else {
                details.insert(id, blob).map_err(map_err!(Write))?;
                let mut spaces = txn.open_table(INSTANCE_SPACES).map_err(map_err!(Table))?;
                spaces.insert(id, owner_space).map_err(map_err!(Write))?;
                false
            }
        };
        if duplicate {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::AlreadyExists(id.to_string()));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance_id = %id, %owner_space, "instance created");
        Ok(())
    }

    pub fn get(&self, id: &str) -> StateResult<Vec<u8>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCE_DETAILS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(guard.value().to_vec()),
            None => Err(StateError::NotFound(id.to_string())),
        }
    }

    /// Replace the blob of an existing record. The owner space is kept.
    pub fn update(&self, id: &str, blob: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let missing = {
            let mut details = txn.open_table(INSTANCE_DETAILS).map_err(map_err!(Table))?;
            if details.get(id).map_err(map_err!(Read))?.is_none() {
                true
            } else {
                details.insert(id, blob).map_err(map_err!(Write))?;
                false
            }
        };
        if missing {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::NotFound(id.to_string()));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance_id = %id, "instance updated");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut details = txn.open_table(INSTANCE_DETAILS).map_err(map_err!(Table))?;
            let mut spaces = txn.open_table(INSTANCE_SPACES).map_err(map_err!(Table))?;
            spaces.remove(id).map_err(map_err!(Write))?;
            existed = details.remove(id).map_err(map_err!(Write))?.is_some();
        }
        if !existed {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::NotFound(id.to_string()));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance_id = %id, "instance deleted");
        Ok(())
    }

    pub fn get_owner_space(&self, id: &str) -> StateResult<String> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCE_SPACES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(guard.value().to_string()),
            None => Err(StateError::NotFound(id.to_string())),
        }
    }

    /// Ids of every stored instance, in key order.
    pub fn list_ids(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCE_DETAILS).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }
}
