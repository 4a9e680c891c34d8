//! Mapped entities and relation identities.
//!
//! An [`Entity`] is one row of a [`Table`]: its converted attribute values
//! plus whichever relation collections have been loaded onto it. Entities are
//! shared through [`EntityRef`] so that every collection holding the same
//! record sees the same in-memory instance.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;

use crate::Result;
use crate::collection::CollectionRef;
use crate::key::Key;
use crate::row::Row;
use crate::table::Table;
use crate::value::Value;

/// Typed identity of a relation attribute: the owning table and the
/// attribute name under which the relation is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RelationId {
    pub table: &'static str,
    pub attribute: &'static str,
}

impl RelationId {
    pub const fn new(table: &'static str, attribute: &'static str) -> Self {
        Self { table, attribute }
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.attribute)
    }
}

/// A set of relation identities, compared by value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSet {
    ids: BTreeSet<RelationId>,
}

impl RelationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: RelationId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &RelationId) -> bool {
        self.ids.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationId> {
        self.ids.iter()
    }
}

impl FromIterator<RelationId> for RelationSet {
    fn from_iter<I: IntoIterator<Item = RelationId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// A mapped record.
pub struct Entity {
    table: Rc<Table>,
    attributes: BTreeMap<String, Value>,
    relations: BTreeMap<RelationId, CollectionRef>,
}

impl Entity {
    /// Create an empty, unkeyed entity for `table`.
    pub fn new(table: Rc<Table>) -> Self {
        Self {
            table,
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Materialize an entity from raw storage attributes.
    ///
    /// Attributes that name a column of the table go through that column's
    /// `to_value`; anything else is kept as-is.
    pub fn from_raw_attributes<I>(table: Rc<Table>, attributes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut entity = Self::new(table);
        for (name, raw) in attributes {
            let value = match entity.table.column(&name) {
                Some(column) => column.to_value(raw)?,
                None => raw,
            };
            entity.attributes.insert(name, value);
        }
        Ok(entity)
    }

    /// Materialize an entity from a driver row, dropping the `skip` columns.
    pub fn from_row(table: Rc<Table>, row: &Row, skip: &[&str]) -> Result<Self> {
        let attributes = row
            .iter()
            .filter(|(name, _)| !skip.contains(name))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect::<Vec<_>>();
        Self::from_raw_attributes(table, attributes)
    }

    pub fn table(&self) -> &Rc<Table> {
        &self.table
    }

    pub fn table_name(&self) -> &'static str {
        self.table.name()
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(attribute.into(), value.into());
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The primary key, or `None` while the entity is unkeyed.
    pub fn primary_key(&self) -> Option<Key> {
        self.attributes
            .get(self.table.primary_key())
            .and_then(Key::from_value)
    }

    pub fn set_primary_key(&mut self, key: &Key) {
        let pk = self.table.primary_key().to_string();
        self.attributes.insert(pk, key.to_value());
    }

    pub fn is_relation_loaded(&self, id: &RelationId) -> bool {
        self.relations.contains_key(id)
    }

    /// The loaded collection for `id`, if any.
    pub fn relation(&self, id: &RelationId) -> Option<CollectionRef> {
        self.relations.get(id).cloned()
    }

    /// Attach `collection` as the loaded relation `id`, returning the
    /// collection it replaces.
    pub fn set_relation(
        &mut self,
        id: RelationId,
        collection: CollectionRef,
    ) -> Option<CollectionRef> {
        self.relations.insert(id, collection)
    }

    /// Drop a loaded relation, returning its collection.
    ///
    /// Two entities holding each other through loaded relations form a
    /// reference cycle; unloading one side breaks it.
    pub fn unload_relation(&mut self, id: &RelationId) -> Option<CollectionRef> {
        self.relations.remove(id)
    }

    pub fn loaded_relations(&self) -> impl Iterator<Item = (&RelationId, &CollectionRef)> {
        self.relations.iter()
    }

    pub fn into_ref(self) -> EntityRef {
        EntityRef(Rc::new(RefCell::new(self)))
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Relations are listed by id only; loaded pairs reference each other.
        f.debug_struct("Entity")
            .field("table", &self.table.name())
            .field("attributes", &self.attributes)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Shared handle to an [`Entity`].
///
/// Single-threaded by construction: collections, relations and event
/// handlers share entities through `Rc`, so none of them can cross threads.
#[derive(Clone)]
pub struct EntityRef(Rc<RefCell<Entity>>);

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        entity.into_ref()
    }

    pub fn borrow(&self) -> Ref<'_, Entity> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Entity> {
        self.0.borrow_mut()
    }

    pub fn key(&self) -> Option<Key> {
        self.0.borrow().primary_key()
    }

    pub fn table_name(&self) -> &'static str {
        self.0.borrow().table_name()
    }

    /// Whether both handles point at the same in-memory instance.
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakEntityRef {
        WeakEntityRef(Rc::downgrade(&self.0))
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(entity) => entity.fmt(f),
            Err(_) => f.write_str("Entity(<borrowed>)"),
        }
    }
}

/// Non-owning handle to an [`Entity`].
#[derive(Clone)]
pub struct WeakEntityRef(Weak<RefCell<Entity>>);

impl WeakEntityRef {
    pub fn upgrade(&self) -> Option<EntityRef> {
        self.0.upgrade().map(EntityRef)
    }
}
