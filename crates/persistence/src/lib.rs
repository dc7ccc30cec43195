//! Annolab Persistence Layer
//!
//! This crate stores the documents of the labeling workflow (projects,
//! studies, tasks, annotations and the rest) in an Elasticsearch-compatible
//! search backend, with one month-sharded collection per entity.
//!
//! # Features
//!
//! - **Generic document store**: one [`DocumentStore`] per entity type with
//!   create, get, list, scan, guarded update and delete-by-query
//! - **Month sharding**: physical index names derived from the creation time
//!   and an optional type discriminator, read through a wildcard
//! - **Query builder**: typed filters, free text, sort and aggregations
//!   translated into the backend's boolean query DSL
//! - **Bulk writes**: fixed-size NDJSON batches with per-item accounting
//! - **Optimistic concurrency**: updates carry the sequence number and primary
//!   term they read and fail with a detectable conflict
//!
//! # Backend Features
//!
//! - `elasticsearch` (default) - the production backend over the
//!   `elasticsearch` client
//!
//! An in-memory backend that evaluates the same query bodies is always
//! available, for tests and local runs.
//!
//! # Architecture
//!
//! - [`index`] - Shard naming
//! - [`query`] - Typed queries and the DSL builder
//! - [`backends`] - The [`SearchBackend`](backends::SearchBackend) seam and its implementations
//! - [`store`] - The generic [`DocumentStore`]
//! - [`bulk`] - Batched bulk writes
//! - [`model`] - Entity models and patches
//! - [`stores`] - The bundle of every collection
//! - [`cancel`] - Cooperative cancellation
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use annolab_persistence::backends::memory::InMemoryBackend;
//! use annolab_persistence::model::{Task, TaskStatus, TaskType};
//! use annolab_persistence::query::SearchQuery;
//! use annolab_persistence::stores::{IndexPrefixes, Stores};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stores = Stores::new(Arc::new(InMemoryBackend::new()), &IndexPrefixes::default());
//!
//! let task = Task::new("project-1", "study-1", "annotator-1", TaskType::Annotate);
//! stores.tasks.create(&task).await?;
//!
//! let open = stores
//!     .tasks
//!     .list(&SearchQuery::new().filter("status", TaskStatus::New.as_str()))
//!     .await?;
//! assert_eq!(open.total, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod bulk;
pub mod cancel;
pub mod error;
pub mod index;
pub mod model;
pub mod query;
pub mod store;
pub mod stores;

// Re-export commonly used types at crate root
pub use bulk::{BulkReport, BulkWriter};
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use error::{StorageError, StorageResult};
pub use index::{IndexLayout, IndexResolver};
pub use query::SearchQuery;
pub use store::{Document, DocumentStore, Patch, SearchPage};
pub use stores::{IndexPrefixes, Stores};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
