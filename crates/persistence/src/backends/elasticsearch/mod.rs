//! Elasticsearch backend implementation.
//!
//! This is the production [`SearchBackend`](crate::backends::SearchBackend).
//! Every write is sent with `refresh=true` so the next read sees it, and
//! guarded updates map straight onto `if_seq_no`/`if_primary_term`.
//!
//! # Index Structure
//!
//! Collections are spread over month shards created on first write:
//! `{prefix}_{YYYYMM}` or `{prefix}_{type}_{YYYYMM}` (e.g. `lab_tasks_202404`).
//! [`ElasticsearchBackend`] installs one template per collection so every
//! shard gets the same settings and timestamp mappings.
//!
//! # Example
//!
//! ```ignore
//! use annolab_persistence::backends::SearchBackend;
//! use annolab_persistence::backends::elasticsearch::{ElasticsearchBackend, ElasticsearchConfig};
//!
//! let config = ElasticsearchConfig {
//!     nodes: vec!["http://localhost:9200".to_string()],
//!     ..Default::default()
//! };
//! let backend = ElasticsearchBackend::new(config)?;
//! backend.health_check().await?;
//! ```

mod backend;
mod schema;

pub use backend::{ElasticsearchAuth, ElasticsearchBackend, ElasticsearchConfig};
pub use schema::create_template_body;
