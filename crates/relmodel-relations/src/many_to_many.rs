//! Many-to-many relations through an association table.
//!
//! For a relation owned by table `P` and pointing at table `R`, the
//! association table carries two foreign keys:
//!
//! - `other_column` references `P`, the parent side
//! - `primary_column` references `R`, the related side
//!
//! Both are derived once from the association table when the relation is
//! defined. A [`ManyToManyDef`] holds everything that does not depend on a
//! particular parent, including the batch [`eager_load`](ManyToManyDef::eager_load).
//! A [`ManyToMany`] binds a definition to one parent entity and a [`Saver`].

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use asupersync::{Cx, Outcome};
use relmodel_core::{
    AssociationTable, Collection, CollectionRef, Column, Connection, Delivery, Entity, EntityRef,
    Error, Events, Key, Registration, RelationErrorKind, RelationId, Result, SaveOptions, Saver,
    Subscription, Table, Value,
};
use relmodel_query::{DeleteBuilder, Expr, InsertBuilder, Join, Select};

use crate::config::RelationConfig;
use crate::relation::Relation;

/// Parent-independent description of a many-to-many relation.
#[derive(Debug, Clone)]
pub struct ManyToManyDef {
    id: RelationId,
    related: Rc<Table>,
    association: AssociationTable,
    other_column: &'static str,
    primary_column: &'static str,
    mirror: Option<RelationId>,
    config: RelationConfig,
}

impl ManyToManyDef {
    /// Define relation `id` from `id.table` to `related` through `association`.
    ///
    /// Fails with a `ColumnMismatch` relation error when the association
    /// table does not link the two tables.
    pub fn new(id: RelationId, related: Rc<Table>, association: AssociationTable) -> Result<Self> {
        let other_column = association.column_for(id.table)?;
        let primary_column = association.other_column_for(id.table)?;
        if association.table_of(primary_column) != Some(related.name()) {
            return Err(Error::relation(
                RelationErrorKind::ColumnMismatch,
                id.to_string(),
                format!(
                    "association table {} does not reference {}",
                    association.name(),
                    related.name()
                ),
            ));
        }

        Ok(Self {
            id,
            related,
            association,
            other_column,
            primary_column,
            mirror: None,
            config: RelationConfig::default(),
        })
    }

    /// Name the relation attribute on the related table that points back at
    /// this relation's table.
    pub fn mirrored_by(mut self, attribute: &'static str) -> Self {
        self.mirror = Some(RelationId::new(self.related.name(), attribute));
        self
    }

    pub fn with_config(mut self, config: RelationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> RelationId {
        self.id
    }

    pub fn related(&self) -> &Rc<Table> {
        &self.related
    }

    pub fn association(&self) -> &AssociationTable {
        &self.association
    }

    /// Association column referencing the parent table.
    pub fn other_column(&self) -> &'static str {
        self.other_column
    }

    /// Association column referencing the related table.
    pub fn primary_column(&self) -> &'static str {
        self.primary_column
    }

    pub fn mirror(&self) -> Option<RelationId> {
        self.mirror
    }

    pub fn config(&self) -> &RelationConfig {
        &self.config
    }

    /// Bind this definition to `parent`.
    pub fn bind<S: Saver>(self: &Rc<Self>, parent: EntityRef, saver: S, events: Events) -> ManyToMany<S> {
        ManyToMany::new(Rc::clone(self), parent, saver, events)
    }

    /// Convert `key` for binding against association column `column`.
    fn storage_key(&self, column: &'static str, key: &Key) -> Result<Value> {
        match self.association.key_column(column) {
            Some(column) => column.to_storage(&key.to_value()),
            None => Ok(key.to_value()),
        }
    }

    /// `related.pk = association.primary_column`
    fn join_condition(&self) -> Expr {
        Expr::qualified(self.related.name(), self.related.primary_key())
            .eq(Expr::qualified(self.association.name(), self.primary_column))
    }

    /// Load this relation for a batch of parents with one query.
    ///
    /// Every parent gets a collection attached, empty when nothing matched.
    /// Related entities are materialized once per key and shared across
    /// all collections of the batch. `customize` may extend the query (for
    /// ordering or extra filters) before it runs. Returns every distinct
    /// related entity loaded.
    #[tracing::instrument(
        level = "debug",
        skip(self, cx, conn, parents, events, customize),
        fields(relation = %self.id)
    )]
    pub async fn eager_load<C, F>(
        &self,
        cx: &Cx,
        conn: &C,
        parents: &[EntityRef],
        events: &Events,
        customize: F,
    ) -> Outcome<Collection, Error>
    where
        C: Connection,
        F: FnOnce(Select) -> Select,
    {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for parent in parents {
            let Some(key) = parent.key() else {
                continue;
            };
            if seen.insert(key.clone()) {
                match self.storage_key(self.other_column, &key) {
                    Ok(value) => keys.push(value),
                    Err(e) => return Outcome::Err(e),
                }
            }
        }

        tracing::info!(
            related = self.related.name(),
            association = self.association.name(),
            parent_count = parents.len(),
            query_parent_count = keys.len(),
            "Eager loading many-to-many relation"
        );

        let queried = !keys.is_empty();
        let mut distinct = Collection::new(false);
        let mut buckets: HashMap<Key, Vec<EntityRef>> = HashMap::new();

        if queried {
            let related = self.related.name();
            let association = self.association.name();
            let query = Select::from(related)
                .distinct()
                .column(Expr::all_of(related))
                .column(Expr::qualified(association, self.other_column))
                .column(Expr::qualified(association, self.primary_column))
                .join(Join::left(
                    association,
                    self.join_condition()
                        .and(Expr::qualified(association, self.other_column).in_list(keys)),
                ));

            let rows = match customize(query).all(cx, conn).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            for row in &rows {
                // No association row matched under the LEFT join.
                let Some(parent_key) = row.get_by_name(self.other_column).and_then(Key::from_value)
                else {
                    continue;
                };

                let entity = match Entity::from_row(
                    Rc::clone(&self.related),
                    row,
                    &[self.other_column, self.primary_column],
                ) {
                    Ok(entity) => entity,
                    Err(e) => return Outcome::Err(e),
                };
                let Some(key) = entity.primary_key() else {
                    tracing::warn!(related = related, "related row without a primary key skipped");
                    continue;
                };

                let existing = distinct.get(&key).cloned();
                let entity = match existing {
                    Some(existing) => existing,
                    None => {
                        let entity = entity.into_ref();
                        distinct.add(entity.clone());
                        entity
                    }
                };
                buckets.entry(parent_key).or_default().push(entity);
            }
        }

        let memory = self.config.keep_synced;
        for parent in parents {
            let bucket = parent
                .key()
                .and_then(|key| buckets.get(&key).cloned())
                .unwrap_or_default();
            let collection = CollectionRef::new(Collection::from_entities(bucket, memory));
            self.attach(events, parent, &collection);
        }

        tracing::debug!(
            query_count = usize::from(queried),
            related_count = distinct.len(),
            "Many-to-many eager load complete"
        );

        Outcome::Ok(distinct)
    }

    /// Attach `collection` to `parent` as this relation.
    ///
    /// A collection it replaces gives up its event subscriptions. With
    /// `keep_synced` the new one subscribes and holds its registration, so
    /// the handlers live exactly as long as the collection.
    pub fn attach(&self, events: &Events, parent: &EntityRef, collection: &CollectionRef) {
        let previous = parent
            .borrow_mut()
            .set_relation(self.id, collection.clone());
        if let Some(previous) = previous.filter(|p| !p.ptr_eq(collection)) {
            previous.borrow_mut().release_events();
        }
        if self.config.keep_synced {
            let subscriptions = self.register_events(events, parent, collection);
            collection
                .borrow_mut()
                .hold_events(Registration::new(events, subscriptions));
        }
    }

    /// Subscribe `collection`, loaded for `parent`, to the related table's
    /// lifecycle events.
    ///
    /// A saved related entity whose mirror relation is loaded and records the
    /// parent as added (or removed) is added to (or removed from) the
    /// collection without touching its change tracking. A deleted related
    /// entity is removed from the collection. Handlers drop themselves once
    /// the collection is gone.
    pub fn register_events(
        &self,
        events: &Events,
        parent: &EntityRef,
        collection: &CollectionRef,
    ) -> Vec<Subscription> {
        let related = self.related.name();
        let mut subscriptions = Vec::with_capacity(2);

        if let Some(mirror) = self.mirror {
            let weak_collection = collection.downgrade();
            let weak_parent = parent.downgrade();
            subscriptions.push(events.on_saved(related, move |model| {
                let (Some(collection), Some(parent)) =
                    (weak_collection.upgrade(), weak_parent.upgrade())
                else {
                    return Delivery::Unsubscribe;
                };
                mirror_saved(&collection, &parent, model, &mirror);
                Delivery::Keep
            }));
        }

        let weak_collection = collection.downgrade();
        let relation = self.id;
        subscriptions.push(events.on_deleted(related, move |model| {
            let Some(collection) = weak_collection.upgrade() else {
                return Delivery::Unsubscribe;
            };
            if let Some(key) = model.key() {
                if collection.borrow_mut().remove(&key).is_some() {
                    tracing::trace!(relation = %relation, key = %key, "deleted entity dropped from collection");
                }
            }
            Delivery::Keep
        }));

        tracing::debug!(
            relation = %self.id,
            related = related,
            mirrored = self.mirror.is_some(),
            "registered relation events"
        );
        subscriptions
    }

    /// Delete every association row whose `column` holds `key`.
    pub async fn unlink_all<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        column: &'static str,
        key: &Key,
    ) -> Outcome<u64, Error> {
        let value = match self.storage_key(column, key) {
            Ok(value) => value,
            Err(e) => return Outcome::Err(e),
        };
        let deleted = match DeleteBuilder::from(self.association.name())
            .filter(Expr::col(column).eq(value))
            .execute(cx, conn)
            .await
        {
            Outcome::Ok(n) => n,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(
            association = self.association.name(),
            column = column,
            key = %key,
            deleted = deleted,
            "association rows removed"
        );
        Outcome::Ok(deleted)
    }

    /// Remove the association rows pointing at a related entity that is
    /// being deleted.
    pub async fn detach_related<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        related: &EntityRef,
    ) -> Outcome<u64, Error> {
        match related.key() {
            Some(key) => self.unlink_all(cx, conn, self.primary_column, &key).await,
            None => Outcome::Ok(0),
        }
    }
}

fn mirror_saved(collection: &CollectionRef, parent: &EntityRef, model: &EntityRef, mirror: &RelationId) {
    let Some(parent_key) = parent.key() else {
        return;
    };
    let Some(mirrored) = model.borrow().relation(mirror) else {
        return;
    };
    let (added, removed) = {
        let mirrored = mirrored.borrow();
        (
            mirrored.added_contains(&parent_key),
            mirrored.removed_contains(&parent_key),
        )
    };

    if added {
        collection.borrow_mut().mutate_without_tracking(|c| {
            c.add(model.clone());
        });
        tracing::trace!(mirror = %mirror, parent = %parent_key, "mirrored addition");
    }
    if removed {
        if let Some(key) = model.key() {
            collection.borrow_mut().mutate_without_tracking(|c| {
                c.remove(&key);
            });
            tracing::trace!(mirror = %mirror, parent = %parent_key, "mirrored removal");
        }
    }
}

/// A many-to-many relation bound to one parent entity.
#[derive(Debug)]
pub struct ManyToMany<S> {
    def: Rc<ManyToManyDef>,
    parent: EntityRef,
    saver: S,
    events: Events,
}

impl<S: Saver> ManyToMany<S> {
    pub fn new(def: Rc<ManyToManyDef>, parent: EntityRef, saver: S, events: Events) -> Self {
        Self {
            def,
            parent,
            saver,
            events,
        }
    }

    pub fn def(&self) -> &ManyToManyDef {
        &self.def
    }

    pub fn saver(&self) -> &S {
        &self.saver
    }

    fn parent_key(&self) -> Option<Key> {
        self.saver.primary_key_of(&self.parent)
    }

    /// Whether an association row links the parent to `candidate`.
    ///
    /// Asks storage directly, whether or not the relation is loaded.
    #[tracing::instrument(level = "debug", skip(self, cx, conn, candidate), fields(relation = %self.def.id))]
    pub async fn model_matches_relation<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        candidate: &EntityRef,
    ) -> Outcome<bool, Error> {
        let (Some(parent_key), Some(candidate_key)) =
            (self.parent_key(), self.saver.primary_key_of(candidate))
        else {
            return Outcome::Ok(false);
        };

        let def = &self.def;
        let parent_value = match def.storage_key(def.other_column, &parent_key) {
            Ok(value) => value,
            Err(e) => return Outcome::Err(e),
        };
        let candidate_value = match def.storage_key(def.primary_column, &candidate_key) {
            Ok(value) => value,
            Err(e) => return Outcome::Err(e),
        };

        Select::from(def.association.name())
            .column(Expr::raw("1"))
            .filter(Expr::col(def.other_column).eq(parent_value))
            .filter(Expr::col(def.primary_column).eq(candidate_value))
            .first(cx, conn)
            .await
            .map(|row| row.is_some())
    }

    /// Delete the association rows for removed members in one statement.
    async fn persist_removed<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        parent_key: &Key,
        removed: &[Key],
    ) -> Outcome<u64, Error> {
        let def = &self.def;
        let parent_value = match def.storage_key(def.other_column, parent_key) {
            Ok(value) => value,
            Err(e) => return Outcome::Err(e),
        };

        let mut clauses = Vec::with_capacity(removed.len());
        for key in removed {
            let value = match def.storage_key(def.primary_column, key) {
                Ok(value) => value,
                Err(e) => return Outcome::Err(e),
            };
            clauses.push(
                Expr::col(def.other_column)
                    .eq(parent_value.clone())
                    .and(Expr::col(def.primary_column).eq(value)),
            );
        }

        let deleted = match DeleteBuilder::from(def.association.name())
            .filter(Expr::any_of(clauses))
            .execute(cx, conn)
            .await
        {
            Outcome::Ok(n) => n,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(removed = removed.len(), deleted = deleted, "unlinked removed members");
        Outcome::Ok(deleted)
    }

    /// Save every member, re-keying the collection as keys are assigned.
    ///
    /// Returns the members that received their first key.
    async fn persist_do_save<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        collection: &CollectionRef,
    ) -> Outcome<Vec<EntityRef>, Error> {
        let members = collection.borrow().entities();
        let options = SaveOptions::excluding(self.def.mirror);
        let mut newly_keyed = Vec::new();

        for member in members {
            let was_new = self.saver.primary_key_of(&member).is_none();
            let saved = match self.saver.save(cx, conn, &member, &options).await {
                Outcome::Ok(saved) => saved,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let Some(key) = self.saver.primary_key_of(&saved) else {
                continue;
            };
            if was_new {
                newly_keyed.push(saved.clone());
            }
            collection.borrow_mut().mutate_without_tracking(|c| {
                if !saved.ptr_eq(&member) {
                    c.remove_entity(&member);
                }
                c.set(key, saved);
            });
        }

        Outcome::Ok(newly_keyed)
    }

    /// Insert one association row per entity, ignoring rows that already
    /// exist.
    async fn persist_added<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        pending: &[EntityRef],
    ) -> Outcome<(), Error> {
        let mut keys: Vec<Key> = Vec::with_capacity(pending.len());
        for entity in pending {
            if let Some(key) = self.saver.primary_key_of(entity) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        if keys.is_empty() {
            return Outcome::Ok(());
        }

        let def = &self.def;
        let Some(parent_key) = self.parent_key() else {
            return Outcome::Err(Error::relation(
                RelationErrorKind::UnsavedParent,
                def.id.to_string(),
                "cannot link related entities to a parent without a primary key",
            ));
        };
        let parent_value = match def.storage_key(def.other_column, &parent_key) {
            Ok(value) => value,
            Err(e) => return Outcome::Err(e),
        };

        let mut insert = InsertBuilder::into(def.association.name())
            .columns([def.other_column, def.primary_column])
            .ignore_duplicates();
        for key in &keys {
            let value = match def.storage_key(def.primary_column, key) {
                Ok(value) => value,
                Err(e) => return Outcome::Err(e),
            };
            insert = insert.values(vec![parent_value.clone(), value]);
        }

        let inserted = match insert.execute(cx, conn).await {
            Outcome::Ok(n) => n,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        tracing::debug!(linked = keys.len(), inserted = inserted, "linked added members");
        Outcome::Ok(())
    }
}

impl<S: Saver> Relation for ManyToMany<S> {
    fn id(&self) -> RelationId {
        self.def.id
    }

    fn parent(&self) -> &EntityRef {
        &self.parent
    }

    fn config(&self) -> &RelationConfig {
        &self.def.config
    }

    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(relation = %self.def.id))]
    async fn fetch_results<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<CollectionRef, Error> {
        let Some(parent_key) = self.parent_key() else {
            tracing::debug!("parent has no key yet; starting from an empty collection");
            return Outcome::Ok(CollectionRef::new(Collection::new(true)));
        };

        let def = &self.def;
        let parent_value = match def.storage_key(def.other_column, &parent_key) {
            Ok(value) => value,
            Err(e) => return Outcome::Err(e),
        };
        let related = def.related.name();
        let association = def.association.name();
        let query = Select::from(related)
            .distinct()
            .column(Expr::all_of(related))
            .join(Join::inner(
                association,
                def.join_condition()
                    .and(Expr::qualified(association, def.other_column).eq(parent_value)),
            ));

        let rows = match query.all(cx, conn).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            match Entity::from_row(Rc::clone(&def.related), row, &[]) {
                Ok(entity) => entities.push(entity.into_ref()),
                Err(e) => return Outcome::Err(e),
            }
        }
        tracing::debug!(parent = %parent_key, count = entities.len(), "fetched related entities");

        Outcome::Ok(CollectionRef::new(Collection::from_entities(entities, true)))
    }

    fn register_events(&self, collection: &CollectionRef) -> Vec<Subscription> {
        self.def.register_events(&self.events, &self.parent, collection)
    }

    fn attach(&self, collection: &CollectionRef) {
        self.def.attach(&self.events, &self.parent, collection);
    }

    /// Reconcile `collection` against the association table.
    ///
    /// Rows for removed members are deleted first, then every member is
    /// saved (without cascading back through the mirror relation), and
    /// finally rows are inserted for added members and for members that
    /// were keyed by this save. Change tracking is left as is; the caller
    /// reconciles the collection once the parent's save is complete.
    #[tracing::instrument(level = "debug", skip(self, cx, conn, collection), fields(relation = %self.def.id))]
    async fn persist<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        collection: &CollectionRef,
    ) -> Outcome<(), Error> {
        let removed = collection.borrow().removed().to_vec();
        if !removed.is_empty() {
            if let Some(parent_key) = self.parent_key() {
                match self.persist_removed(cx, conn, &parent_key, &removed).await {
                    Outcome::Ok(_) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
        }

        let newly_keyed = match self.persist_do_save(cx, conn, collection).await {
            Outcome::Ok(entities) => entities,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let mut pending = collection.borrow().added().to_vec();
        for entity in newly_keyed {
            if !pending.iter().any(|p| p.ptr_eq(&entity)) {
                pending.push(entity);
            }
        }

        self.persist_added(cx, conn, &pending).await
    }

    async fn on_delete<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        parent: &EntityRef,
    ) -> Outcome<u64, Error> {
        match self.saver.primary_key_of(parent) {
            Some(key) => {
                self.def
                    .unlink_all(cx, conn, self.def.other_column, &key)
                    .await
            }
            None => Outcome::Ok(0),
        }
    }
}
