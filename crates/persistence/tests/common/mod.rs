//! Test infrastructure for the persistence layer.
//!
//! Suites run against [`InMemoryBackend`](annolab_persistence::backends::memory::InMemoryBackend),
//! which evaluates the same query bodies the Elasticsearch backend sends.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
