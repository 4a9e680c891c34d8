//! Relation configuration.

use serde::Serialize;

/// Per-relation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelationConfig {
    /// Track membership changes on loaded collections and mirror saves and
    /// deletes of related entities into them.
    pub keep_synced: bool,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self { keep_synced: true }
    }
}

impl RelationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep_synced(mut self, keep_synced: bool) -> Self {
        self.keep_synced = keep_synced;
        self
    }
}
