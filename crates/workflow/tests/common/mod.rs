//! Test infrastructure for the workflow services.
//!
//! Every suite runs the services over a fresh
//! [`InMemoryBackend`](annolab_persistence::backends::memory::InMemoryBackend)
//! and in-memory collaborators.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
