//! buildplane-store: flat object storage for Buildplane.
//!
//! Exposes the only primitives the catalog is allowed to rely on: put, get,
//! delete and list-by-prefix over a single bucket. There are no transactions
//! spanning several keys and no secondary indexes.
//!
//! # Architecture
//!
//! `ObjectStore` is the seam. `RedbObjectStore` implements it over one redb
//! table of `&str -> &[u8]`, on disk or in memory (the latter for tests).
//! Listing is paginated with an opaque continuation token; `ObjectStore::list`
//! drains every page so callers never observe partial pages.
//!
//! The `sink` module streams large generated artifacts into the store from a
//! synchronous writer through a background worker.

pub mod error;
pub mod sink;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use sink::{ArtifactWriter, UploadHandle, open_sink};
pub use store::{ListPage, ObjectStore, RedbObjectStore};
