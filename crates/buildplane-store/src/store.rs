//! ObjectStore: flat key/value object storage.
//!
//! The trait mirrors what a bucket offers: whole-object put/get/delete and
//! lexicographically ordered listing by key prefix, paginated through an
//! opaque continuation token. `RedbObjectStore` keeps every object in a single
//! redb table and supports both on-disk and in-memory backends.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, TableDefinition};
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Every object keyed by its full path.
const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Default number of keys returned per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// One page of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Continuation token for the next page, `None` when the listing is done.
    pub next: Option<String>,
}

/// Bucket-style object storage.
///
/// A missing object is reported as `Ok(None)` from [`get`](Self::get), never
/// as an error. Every other failure is a `StoreError`.
pub trait ObjectStore: Send + Sync {
    /// Create or overwrite an object.
    fn put(&self, key: &str, data: &[u8]) -> StoreResult<()>;

    /// Read an object.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Delete an object. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// List up to `max_keys` keys under `prefix`, resuming after `continuation`.
    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<ListPage>;

    /// Page size used by [`list`](Self::list).
    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Upload everything `reader` yields as a single object.
    fn put_reader(&self, key: &str, reader: &mut dyn Read) -> StoreResult<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.put(key, &data)
    }

    /// Copy an object. Returns false when the source does not exist.
    fn copy(&self, from: &str, to: &str) -> StoreResult<bool> {
        match self.get(from)? {
            Some(data) => {
                self.put(to, &data)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// List every key under `prefix`, following continuation tokens to the end.
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self.list_page(prefix, continuation.as_deref(), self.page_size())?;
            keys.extend(page.keys);
            match page.next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        trace!(%prefix, count = keys.len(), "prefix listed");
        Ok(keys)
    }
}

/// Thread-safe object store backed by redb.
#[derive(Clone)]
pub struct RedbObjectStore {
    db: Arc<Database>,
    page_size: usize,
}

impl RedbObjectStore {
    /// Open (or create) a persistent object store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            page_size: DEFAULT_PAGE_SIZE,
        };
        store.ensure_table()?;
        debug!(?path, "object store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory object store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            page_size: DEFAULT_PAGE_SIZE,
        };
        store.ensure_table()?;
        debug!("in-memory object store opened");
        Ok(store)
    }

    /// Override the listing page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn ensure_table(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl ObjectStore for RedbObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            table.insert(key, data).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        trace!(%key, bytes = data.len(), "object stored");
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        let value = table.get(key).map_err(map_err!(Read))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        trace!(%key, existed, "object deleted");
        Ok(())
    }

    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> StoreResult<ListPage> {
        let max_keys = max_keys.max(1);
        let start = match continuation {
            Some(token) if token > prefix => token,
            _ => prefix,
        };

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;

        let mut page = ListPage::default();
        for entry in table.range(start..).map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            if continuation == Some(key) {
                continue;
            }
            if !key.starts_with(prefix) {
                break;
            }
            if page.keys.len() == max_keys {
                page.next = page.keys.last().cloned();
                break;
            }
            page.keys.push(key.to_string());
        }
        Ok(page)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        Ok(table.get(key).map_err(map_err!(Read))?.is_some())
    }
}
