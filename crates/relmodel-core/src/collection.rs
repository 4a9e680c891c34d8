//! Change-tracked entity collections.
//!
//! A [`Collection`] holds the related entities of one relation instance. It
//! behaves as an ordered set keyed by primary key and, while memory mode is
//! on, records what was added and removed since it was established so the
//! relation can persist just the delta.
//!
//! `added` and `removed` never overlap: adding back a member that is pending
//! removal cancels the removal, and removing a member that is pending
//! addition cancels the addition.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::entity::EntityRef;
use crate::events::Registration;
use crate::key::Key;

#[derive(Clone)]
struct Member {
    key: Option<Key>,
    entity: EntityRef,
}

/// Ordered, deduplicated, change-tracked set of entities.
///
/// Not synchronized: one collection belongs to one relation load and is
/// mutated from a single thread.
#[derive(Default)]
pub struct Collection {
    members: Vec<Member>,
    index: HashMap<Key, usize>,
    added: Vec<EntityRef>,
    removed: Vec<Key>,
    memory: bool,
    registration: Option<Registration>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new(memory: bool) -> Self {
        Self {
            memory,
            ..Self::default()
        }
    }

    /// Build an established collection from entities.
    ///
    /// The initial members are the snapshot: nothing is recorded as added.
    pub fn from_entities<I>(entities: I, memory: bool) -> Self
    where
        I: IntoIterator<Item = EntityRef>,
    {
        let mut collection = Self::new(false);
        for entity in entities {
            collection.add(entity);
        }
        collection.memory = memory;
        collection
    }

    /// Enable or disable memory mode.
    pub fn keep_memory(&mut self, memory: bool) {
        self.memory = memory;
    }

    pub fn is_keeping_memory(&self) -> bool {
        self.memory
    }

    /// Add an entity.
    ///
    /// A keyed entity replaces any member with the same key; an unkeyed one is
    /// deduplicated by identity. Returns `true` when membership grew.
    pub fn add(&mut self, entity: EntityRef) -> bool {
        let key = entity.key();

        if let Some(pos) = self.position(key.as_ref(), &entity) {
            // A member keyed after it joined picks up its key here.
            if self.members[pos].key.is_none() {
                if let Some(key) = &key {
                    self.index.insert(key.clone(), pos);
                    self.members[pos].key = Some(key.clone());
                }
            }
            let old = std::mem::replace(&mut self.members[pos].entity, entity.clone());
            // The replacement inherits a pending addition, whatever the mode.
            if let Some(pending) = self.added.iter_mut().find(|a| a.ptr_eq(&old)) {
                *pending = entity;
            }
            if self.memory {
                if let Some(key) = &key {
                    self.removed.retain(|k| k != key);
                }
            }
            return false;
        }

        if self.memory {
            let was_removed = key
                .as_ref()
                .is_some_and(|k| self.removed.iter().any(|r| r == k));
            if was_removed {
                if let Some(key) = &key {
                    self.removed.retain(|k| k != key);
                }
            } else if !self.added.iter().any(|a| a.ptr_eq(&entity)) {
                self.added.push(entity.clone());
            }
        }

        if let Some(key) = &key {
            self.index.insert(key.clone(), self.members.len());
        }
        self.members.push(Member { key, entity });
        true
    }

    /// Remove the member with `key`, returning it.
    pub fn remove(&mut self, key: &Key) -> Option<EntityRef> {
        let pos = self.index.get(key).copied()?;
        Some(self.remove_at(pos))
    }

    /// Remove a specific entity, by key when it has one and by identity
    /// otherwise.
    pub fn remove_entity(&mut self, entity: &EntityRef) -> bool {
        let key = entity.key();
        match self.position(key.as_ref(), entity) {
            Some(pos) => {
                self.remove_at(pos);
                true
            }
            None => false,
        }
    }

    /// Store `entity` under `key`.
    ///
    /// Used to re-key a member whose primary key was just assigned. If the
    /// entity is already a member its index entry moves to `key`; otherwise it
    /// is added.
    pub fn set(&mut self, key: Key, entity: EntityRef) {
        let pos = self
            .members
            .iter()
            .position(|m| m.entity.ptr_eq(&entity))
            .or_else(|| self.index.get(&key).copied());

        match pos {
            Some(pos) => {
                if let Some(old) = self.members[pos].key.take() {
                    self.index.remove(&old);
                }
                // Another member already stored under this key is superseded.
                if let Some(dup) = self.index.get(&key).copied() {
                    if dup != pos {
                        self.members.remove(dup);
                        self.rebuild_index();
                        return self.set(key, entity);
                    }
                }
                self.index.insert(key.clone(), pos);
                self.members[pos] = Member {
                    key: Some(key),
                    entity,
                };
            }
            None => {
                self.add(entity);
            }
        }
    }

    /// Run `f` with change tracking disabled.
    ///
    /// Membership changes made inside `f` do not touch `added`/`removed`.
    /// The previous memory flag is restored when `f` returns or unwinds.
    pub fn mutate_without_tracking<R>(&mut self, f: impl FnOnce(&mut Collection) -> R) -> R {
        let memory = std::mem::replace(&mut self.memory, false);
        let guard = TrackingGuard {
            collection: self,
            memory,
        };
        f(&mut *guard.collection)
    }

    /// Keep `registration` alive for as long as this collection, releasing
    /// any earlier one.
    pub fn hold_events(&mut self, registration: Registration) {
        self.registration = Some(registration);
    }

    /// Cancel the event subscriptions held by this collection.
    pub fn release_events(&mut self) {
        self.registration = None;
    }

    pub fn is_synced(&self) -> bool {
        self.registration.is_some()
    }

    /// Clear `added` and `removed`, making the current members the snapshot.
    pub fn reconcile(&mut self) {
        self.added.clear();
        self.removed.clear();
    }

    pub fn get(&self, key: &Key) -> Option<&EntityRef> {
        self.index.get(key).map(|&pos| &self.members[pos].entity)
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        let key = entity.key();
        self.position(key.as_ref(), entity).is_some()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRef> {
        self.members.iter().map(|m| &m.entity)
    }

    /// Snapshot of the members in insertion order.
    pub fn entities(&self) -> Vec<EntityRef> {
        self.iter().cloned().collect()
    }

    /// Keys of the keyed members, in insertion order.
    pub fn keys(&self) -> Vec<Key> {
        self.members.iter().filter_map(|m| m.key.clone()).collect()
    }

    /// Entities added since the collection was established.
    pub fn added(&self) -> &[EntityRef] {
        &self.added
    }

    /// Keys removed since the collection was established.
    pub fn removed(&self) -> &[Key] {
        &self.removed
    }

    /// Whether an entity currently keyed `key` is pending addition.
    ///
    /// Keys are read at call time, so an entity that was unkeyed when added
    /// matches once it has been saved.
    pub fn added_contains(&self, key: &Key) -> bool {
        self.added.iter().any(|e| e.key().as_ref() == Some(key))
    }

    pub fn removed_contains(&self, key: &Key) -> bool {
        self.removed.iter().any(|k| k == key)
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Finds a member by key, then by identity. A member that was unkeyed
    /// when it joined is matched by the key it carries now.
    fn position(&self, key: Option<&Key>, entity: &EntityRef) -> Option<usize> {
        key.and_then(|key| {
            self.index.get(key).copied().or_else(|| {
                self.members
                    .iter()
                    .position(|m| m.key.is_none() && m.entity.key().as_ref() == Some(key))
            })
        })
        .or_else(|| self.members.iter().position(|m| m.entity.ptr_eq(entity)))
    }

    fn remove_at(&mut self, pos: usize) -> EntityRef {
        let member = self.members.remove(pos);
        self.rebuild_index();

        if self.memory {
            let pending = self.added.iter().position(|a| {
                a.ptr_eq(&member.entity)
                    || (member.key.is_some() && a.key().as_ref() == member.key.as_ref())
            });
            match (pending, &member.key) {
                (Some(i), _) => {
                    self.added.remove(i);
                }
                (None, Some(key)) => {
                    if !self.removed.contains(key) {
                        self.removed.push(key.clone());
                    }
                }
                // Never persisted and never pending: nothing to record.
                (None, None) => {}
            }
        }
        member.entity
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (pos, member) in self.members.iter().enumerate() {
            if let Some(key) = &member.key {
                self.index.insert(key.clone(), pos);
            }
        }
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("keys", &self.keys())
            .field("len", &self.members.len())
            .field("added", &self.added.len())
            .field("removed", &self.removed)
            .field("memory", &self.memory)
            .field("synced", &self.registration.is_some())
            .finish()
    }
}

struct TrackingGuard<'a> {
    collection: &'a mut Collection,
    memory: bool,
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        self.collection.memory = self.memory;
    }
}

/// Shared handle to a [`Collection`], as stored on a parent entity.
#[derive(Clone, Default)]
pub struct CollectionRef(Rc<RefCell<Collection>>);

impl CollectionRef {
    pub fn new(collection: Collection) -> Self {
        Self(Rc::new(RefCell::new(collection)))
    }

    pub fn borrow(&self) -> Ref<'_, Collection> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Collection> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &CollectionRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakCollectionRef {
        WeakCollectionRef(Rc::downgrade(&self.0))
    }
}

impl fmt::Debug for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(collection) => collection.fmt(f),
            Err(_) => f.write_str("Collection(<borrowed>)"),
        }
    }
}

/// Non-owning handle to a [`Collection`], held by event subscriptions.
#[derive(Clone)]
pub struct WeakCollectionRef(Weak<RefCell<Collection>>);

impl WeakCollectionRef {
    pub fn upgrade(&self) -> Option<CollectionRef> {
        self.0.upgrade().map(CollectionRef)
    }
}
