//! Physical index naming.
//!
//! Every logical collection is spread over month shards named
//! `{prefix}_{YYYYMM}`, or `{prefix}_{type}_{YYYYMM}` when the collection is
//! split by a type discriminator. Names are always lower-cased because the
//! backend rejects upper-case index names. Reads and deletes go through the
//! `{prefix}_*` wildcard so callers never need to know which shard holds a
//! document.

use chrono::{DateTime, Datelike, Utc};

/// How a collection maps documents to physical indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLayout {
    /// `{prefix}_{YYYYMM}`
    Monthly,
    /// `{prefix}_{type}_{YYYYMM}`
    MonthlyByType,
    /// A single pre-created alias; every document lives behind `{prefix}`.
    Alias,
}

/// Computes shard names for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResolver {
    prefix: String,
    layout: IndexLayout,
}

impl IndexResolver {
    /// Creates a resolver for the given prefix and layout.
    pub fn new(prefix: impl Into<String>, layout: IndexLayout) -> Self {
        Self {
            prefix: prefix.into(),
            layout,
        }
    }

    /// Returns the collection prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the layout.
    pub fn layout(&self) -> IndexLayout {
        self.layout
    }

    /// Returns the shard a document created at `created_ms` belongs to.
    ///
    /// The discriminator is only used by [`IndexLayout::MonthlyByType`].
    pub fn shard_for(&self, discriminator: Option<&str>, created_ms: i64) -> String {
        match self.layout {
            IndexLayout::Alias => self.prefix.to_lowercase(),
            IndexLayout::Monthly => shard_name(&self.prefix, None, created_ms),
            IndexLayout::MonthlyByType => shard_name(&self.prefix, discriminator, created_ms),
        }
    }

    /// Returns the pattern matching every shard of the collection.
    pub fn wildcard(&self) -> String {
        match self.layout {
            IndexLayout::Alias => self.prefix.to_lowercase(),
            IndexLayout::Monthly | IndexLayout::MonthlyByType => {
                format!("{}_*", self.prefix.to_lowercase())
            }
        }
    }
}

/// Builds `{prefix}_{discriminator?}_{YYYYMM}` in lower case.
///
/// Month boundaries are taken in UTC.
pub fn shard_name(prefix: &str, discriminator: Option<&str>, created_ms: i64) -> String {
    let created: DateTime<Utc> = DateTime::from_timestamp_millis(created_ms).unwrap_or_default();
    let month = format!("{:04}{:02}", created.year(), created.month());

    let name = match discriminator.filter(|d| !d.is_empty()) {
        Some(discriminator) => format!("{}_{}_{}", prefix, discriminator, month),
        None => format!("{}_{}", prefix, month),
    };
    name.to_lowercase()
}
