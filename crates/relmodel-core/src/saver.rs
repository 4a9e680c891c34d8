//! Single-entity persistence contract.

use asupersync::{Cx, Outcome};

use crate::Error;
use crate::connection::Connection;
use crate::entity::{EntityRef, RelationId, RelationSet};
use crate::key::Key;

/// Options for [`Saver::save`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Loaded relations that must not be persisted along with the entity.
    pub exclude: RelationSet,
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options excluding a single relation, or none when `id` is `None`.
    pub fn excluding(id: Option<RelationId>) -> Self {
        let mut options = Self::default();
        if let Some(id) = id {
            options.exclude.insert(id);
        }
        options
    }

    pub fn exclude(mut self, id: RelationId) -> Self {
        self.exclude.insert(id);
        self
    }

    pub fn is_excluded(&self, id: &RelationId) -> bool {
        self.exclude.contains(id)
    }
}

/// Persists one entity at a time.
///
/// A saver writes the entity's own row and may cascade into the entity's
/// loaded relations, except those listed in [`SaveOptions::exclude`].
pub trait Saver {
    /// Insert or update `entity`, returning the saved entity.
    fn save<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        entity: &EntityRef,
        options: &SaveOptions,
    ) -> impl Future<Output = Outcome<EntityRef, Error>>;

    /// The primary key of `entity`, or `None` while it is unsaved.
    fn primary_key_of(&self, entity: &EntityRef) -> Option<Key> {
        entity.key()
    }
}
