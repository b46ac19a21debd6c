//! buildplane-catalog: build metadata catalog over flat object storage.
//!
//! The object store offers put/get/delete/list-by-prefix and nothing else.
//! This crate synthesizes a small database on top of it:
//!
//! - A build is a key prefix `{center}/{product}/{buildId}/`.
//! - Scalar attributes (status, tags, owner, roles, visibility, soft-delete)
//!   are zero-length *marker* objects whose key encodes the value.
//! - Structured blobs (configuration, QA configuration, reports) are JSON
//!   objects under the same prefix.
//!
//! # Architecture
//!
//! ```text
//! BuildCatalog
//!   ├── ObjectStore (put/get/delete/list)
//!   ├── paths   (pure key naming)
//!   ├── marker  (encode/decode of marker segments)
//!   ├── BuildIdCache (per-product id sets, replaced wholesale)
//!   └── StatusMachine (guarded status transitions)
//! ```
//!
//! Status writes put the new marker before deleting the old one, so a reader
//! always finds at least one status marker.

pub mod build;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod marker;
pub mod paths;
pub mod query;
pub mod status;

pub use build::Build;
pub use cache::BuildIdCache;
pub use catalog::BuildCatalog;
pub use error::{CatalogError, CatalogResult};
pub use marker::{Marker, MarkerKind};
pub use paths::{ArtifactKind, InputReportKind};
pub use query::{BuildQuery, Direction, Page, PageRequest, SortField, SortOrder, VisibilityFilter};
pub use status::StatusMachine;
