//! Row persistence that cascades into loaded relations.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::rc::Rc;

use asupersync::{Cx, Outcome};
use relmodel_core::{
    Collection, CollectionRef, Connection, EntityRef, Error, Events, Key, LifecycleEvent,
    RelationId, SaveOptions, Saver, Table, Value,
};
use relmodel_query::{DeleteBuilder, Expr, InsertBuilder, Select, UpdateBuilder};

use crate::many_to_many::ManyToMany;
use crate::registry::RelationRegistry;
use crate::relation::Relation;

type PersistFuture<'a> = Pin<Box<dyn Future<Output = Outcome<(), Error>> + 'a>>;

/// Saves and deletes entity rows.
///
/// Saving writes the entity's row, persists every loaded relation not
/// excluded by the [`SaveOptions`], publishes `Saved` and then reconciles the
/// persisted collections. Deleting clears the association rows that mention
/// the entity, deletes the row and publishes `Deleted`.
#[derive(Debug, Clone)]
pub struct RowSaver {
    registry: Rc<RelationRegistry>,
    events: Events,
}

impl RowSaver {
    pub fn new(registry: Rc<RelationRegistry>, events: Events) -> Self {
        Self { registry, events }
    }

    pub fn registry(&self) -> &RelationRegistry {
        &self.registry
    }

    pub fn events(&self) -> &Events {
        &self.events
    }

    /// Bind relation `id` to `parent`, if it is registered.
    pub fn relation(&self, parent: &EntityRef, id: &RelationId) -> Option<ManyToMany<RowSaver>> {
        self.registry
            .get(id)
            .map(|def| def.bind(parent.clone(), self.clone(), self.events.clone()))
    }

    /// The collection of relation `id` on `parent`, loading it on first
    /// access.
    pub async fn load<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        parent: &EntityRef,
        id: &RelationId,
    ) -> Outcome<CollectionRef, Error> {
        match self.relation(parent, id) {
            Some(relation) => relation.get_results(cx, conn).await,
            None => Outcome::Err(unknown_relation(id)),
        }
    }

    /// Eager-load relation `id` for `parents`.
    pub async fn eager_load<C, F>(
        &self,
        cx: &Cx,
        conn: &C,
        parents: &[EntityRef],
        id: &RelationId,
        customize: F,
    ) -> Outcome<Collection, Error>
    where
        C: Connection,
        F: FnOnce(Select) -> Select,
    {
        match self.registry.get(id) {
            Some(def) => {
                def.eager_load(cx, conn, parents, &self.events, customize)
                    .await
            }
            None => Outcome::Err(unknown_relation(id)),
        }
    }

    /// INSERT an unkeyed entity (assigning its key) or UPDATE a keyed one.
    async fn write_row<C: Connection>(&self, cx: &Cx, conn: &C, entity: &EntityRef) -> Outcome<(), Error> {
        let (table, key, assignments) = {
            let entity = entity.borrow();
            let table = Rc::clone(entity.table());
            let mut assignments = Vec::new();
            for column in table.columns() {
                if column.name() == table.primary_key() {
                    continue;
                }
                let Some(value) = entity.get(column.name()) else {
                    continue;
                };
                match column.to_storage(value) {
                    Ok(value) => assignments.push((column.name().to_string(), value)),
                    Err(e) => return Outcome::Err(e),
                }
            }
            (table, entity.primary_key(), assignments)
        };

        match key {
            None => {
                let insert = if assignments.is_empty() {
                    InsertBuilder::into(table.name())
                        .columns([table.primary_key()])
                        .values(vec![Value::Default])
                } else {
                    let (names, values): (Vec<String>, Vec<Value>) = assignments.into_iter().unzip();
                    InsertBuilder::into(table.name()).columns(names).values(values)
                };
                let id = match insert.execute_returning_id(cx, conn).await {
                    Outcome::Ok(id) => id,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                };
                entity.borrow_mut().set_primary_key(&Key::Int(id));
                tracing::debug!(table = table.name(), id = id, "row inserted");
            }
            Some(key) => {
                if assignments.is_empty() {
                    return Outcome::Ok(());
                }
                let key_value = match key_storage(&table, &key) {
                    Ok(value) => value,
                    Err(e) => return Outcome::Err(e),
                };
                let mut update = UpdateBuilder::table(table.name());
                for (name, value) in assignments {
                    update = update.set(name, value);
                }
                let affected = match update
                    .filter(Expr::col(table.primary_key()).eq(key_value))
                    .execute(cx, conn)
                    .await
                {
                    Outcome::Ok(n) => n,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                };
                tracing::debug!(table = table.name(), key = %key, affected = affected, "row updated");
            }
        }
        Outcome::Ok(())
    }

    /// Delete `entity` and every association row that mentions it.
    ///
    /// Collections that hold the entity hear about it through the `Deleted`
    /// event. Deleting an unkeyed entity does nothing.
    #[tracing::instrument(level = "debug", skip(self, cx, conn, entity), fields(table = entity.table_name()))]
    pub async fn delete<C: Connection>(&self, cx: &Cx, conn: &C, entity: &EntityRef) -> Outcome<(), Error> {
        let Some(key) = entity.key() else {
            tracing::debug!("entity has no key; nothing to delete");
            return Outcome::Ok(());
        };
        let table = Rc::clone(entity.borrow().table());

        // (association table, column) pairs already cleared for this key
        let mut cleared = BTreeSet::new();

        for def in self.registry.owned_by(table.name()) {
            if !cleared.insert((def.association().name(), def.other_column())) {
                continue;
            }
            let relation = def.bind(entity.clone(), self.clone(), self.events.clone());
            match relation.on_delete(cx, conn, entity).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        for def in self.registry.referencing(table.name()) {
            if !cleared.insert((def.association().name(), def.primary_column())) {
                continue;
            }
            match def.detach_related(cx, conn, entity).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let key_value = match key_storage(&table, &key) {
            Ok(value) => value,
            Err(e) => return Outcome::Err(e),
        };
        let deleted = match DeleteBuilder::from(table.name())
            .filter(Expr::col(table.primary_key()).eq(key_value))
            .execute(cx, conn)
            .await
        {
            Outcome::Ok(n) => n,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let delivered = self.events.emit(table.name(), LifecycleEvent::Deleted, entity);
        tracing::debug!(key = %key, deleted = deleted, delivered = delivered, "entity deleted");
        Outcome::Ok(())
    }
}

impl Saver for RowSaver {
    #[tracing::instrument(level = "debug", skip(self, cx, conn, entity, options), fields(table = entity.table_name()))]
    async fn save<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        entity: &EntityRef,
        options: &SaveOptions,
    ) -> Outcome<EntityRef, Error> {
        match self.write_row(cx, conn, entity).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let relations: Vec<(RelationId, CollectionRef)> = entity
            .borrow()
            .loaded_relations()
            .filter(|(id, _)| !options.is_excluded(id))
            .map(|(id, collection)| (*id, collection.clone()))
            .collect();

        let mut persisted = Vec::with_capacity(relations.len());
        for (id, collection) in relations {
            let Some(relation) = self.relation(entity, &id) else {
                tracing::warn!(relation = %id, "loaded relation is not registered; skipped");
                continue;
            };
            match persist_boxed(&relation, cx, conn, &collection).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
            persisted.push(collection);
        }

        // Mirror handlers read the deltas, so they are cleared only after.
        let delivered = self
            .events
            .emit(entity.table_name(), LifecycleEvent::Saved, entity);
        for collection in &persisted {
            collection.borrow_mut().reconcile();
        }

        tracing::debug!(
            relations = persisted.len(),
            delivered = delivered,
            "entity saved"
        );
        Outcome::Ok(entity.clone())
    }
}

/// Relation persistence recurses back into [`RowSaver::save`] for related
/// entities, so the future is boxed to give it a finite size.
fn persist_boxed<'a, C: Connection>(
    relation: &'a ManyToMany<RowSaver>,
    cx: &'a Cx,
    conn: &'a C,
    collection: &'a CollectionRef,
) -> PersistFuture<'a> {
    Box::pin(relation.persist(cx, conn, collection))
}

fn key_storage(table: &Table, key: &Key) -> relmodel_core::Result<Value> {
    match table.column(table.primary_key()) {
        Some(column) => column.to_storage(&key.to_value()),
        None => Ok(key.to_value()),
    }
}

fn unknown_relation(id: &RelationId) -> Error {
    Error::Custom(format!("relation {id} is not registered"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::many_to_many::ManyToManyDef;
    use crate::mock::{MockConnection, unwrap_outcome};
    use asupersync::runtime::RuntimeBuilder;
    use relmodel_core::{AssociationTable, Entity, IntegerColumn, TextColumn};

    fn table(name: &'static str) -> Rc<Table> {
        Table::builder(name, "id")
            .column(IntegerColumn::big("id").unsigned().auto_increment())
            .column(TextColumn::varchar("name", 64))
            .build()
            .unwrap()
    }

    fn post_tags() -> AssociationTable {
        AssociationTable::new("post_tags", ("post_id", "posts"), ("tag_id", "tags")).unwrap()
    }

    fn post_tags_id() -> RelationId {
        RelationId::new("posts", "tags")
    }

    fn tag_posts_id() -> RelationId {
        RelationId::new("tags", "posts")
    }

    /// `posts.tags` and its mirror `tags.posts`.
    fn saver() -> RowSaver {
        let mut registry = RelationRegistry::new();
        registry.register(
            ManyToManyDef::new(post_tags_id(), table("tags"), post_tags())
                .unwrap()
                .mirrored_by("posts"),
        );
        registry.register(
            ManyToManyDef::new(tag_posts_id(), table("posts"), post_tags())
                .unwrap()
                .mirrored_by("tags"),
        );
        RowSaver::new(Rc::new(registry), Events::new())
    }

    fn entity(table_name: &'static str, id: Option<i64>, name: &str) -> EntityRef {
        let mut entity = Entity::new(table(table_name));
        if let Some(id) = id {
            entity.set("id", id);
        }
        entity.set("name", name);
        entity.into_ref()
    }

    #[test]
    fn test_save_inserts_unkeyed_entity() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let saver = saver();
        let tag = entity("tags", None, "rust");

        rt.block_on(async {
            let saved = unwrap_outcome(saver.save(&cx, &conn, &tag, &SaveOptions::new()).await);
            assert!(saved.ptr_eq(&tag));
        });

        assert_eq!(tag.key(), Some(Key::Int(101)));
        let state = conn.state.lock().unwrap();
        assert_eq!(state.executed_sql(), vec!["INSERT INTO \"tags\" (\"name\") VALUES ($1)"]);
        assert_eq!(state.executed[0].1, vec![Value::Text("rust".into())]);
    }

    #[test]
    fn test_save_updates_keyed_entity() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let saver = saver();
        let tag = entity("tags", Some(5), "sql");

        rt.block_on(async {
            unwrap_outcome(saver.save(&cx, &conn, &tag, &SaveOptions::new()).await);
        });

        let state = conn.state.lock().unwrap();
        assert_eq!(
            state.executed_sql(),
            vec!["UPDATE \"tags\" SET \"name\" = $1 WHERE \"id\" = $2"]
        );
        assert_eq!(
            state.executed[0].1,
            vec![Value::Text("sql".into()), Value::BigInt(5)]
        );
    }

    #[test]
    fn test_save_cascades_into_loaded_relation() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let saver = saver();

        let post = entity("posts", Some(1), "hello");
        let fresh = entity("tags", None, "new");
        let tags = CollectionRef::new(Collection::new(true));
        tags.borrow_mut().add(fresh.clone());
        tags.borrow_mut().add(entity("tags", Some(3), "orm"));
        post.borrow_mut().set_relation(post_tags_id(), tags.clone());
        // Loaded but unknown relations are left alone.
        post.borrow_mut().set_relation(
            RelationId::new("posts", "authors"),
            CollectionRef::new(Collection::new(true)),
        );

        rt.block_on(async {
            unwrap_outcome(saver.save(&cx, &conn, &post, &SaveOptions::new()).await);
        });

        assert_eq!(fresh.key(), Some(Key::Int(101)));
        assert!(!tags.borrow().has_changes());
        assert!(tags.borrow().get(&Key::Int(101)).unwrap().ptr_eq(&fresh));

        let state = conn.state.lock().unwrap();
        assert_eq!(
            state.executed_sql(),
            vec![
                "UPDATE \"posts\" SET \"name\" = $1 WHERE \"id\" = $2",
                "INSERT INTO \"tags\" (\"name\") VALUES ($1)",
                "UPDATE \"tags\" SET \"name\" = $1 WHERE \"id\" = $2",
                "INSERT INTO \"post_tags\" (\"post_id\", \"tag_id\") VALUES ($1, $2), ($3, $4) \
                 ON CONFLICT DO NOTHING",
            ]
        );
        assert_eq!(
            state.executed[3].1,
            vec![
                Value::BigInt(1),
                Value::BigInt(101),
                Value::BigInt(1),
                Value::BigInt(3)
            ]
        );
    }

    #[test]
    fn test_save_skips_excluded_relation() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let saver = saver();

        let post = entity("posts", Some(1), "hello");
        let tags = CollectionRef::new(Collection::new(true));
        tags.borrow_mut().add(entity("tags", Some(3), "orm"));
        post.borrow_mut().set_relation(post_tags_id(), tags.clone());

        rt.block_on(async {
            let options = SaveOptions::new().exclude(post_tags_id());
            unwrap_outcome(saver.save(&cx, &conn, &post, &options).await);
        });

        assert!(tags.borrow().has_changes());
        assert_eq!(conn.state.lock().unwrap().executed.len(), 1);
    }

    #[test]
    fn test_delete_clears_association_rows_once() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let saver = saver();

        let post = entity("posts", Some(1), "hello");
        let tag = entity("tags", Some(7), "rust");
        let posts_of_tag = CollectionRef::new(Collection::from_entities([post.clone()], true));
        saver
            .registry()
            .get(&tag_posts_id())
            .unwrap()
            .register_events(saver.events(), &tag, &posts_of_tag);

        rt.block_on(async {
            unwrap_outcome(saver.delete(&cx, &conn, &post).await);
        });

        let state = conn.state.lock().unwrap();
        assert_eq!(
            state.executed_sql(),
            vec![
                "DELETE FROM \"post_tags\" WHERE \"post_id\" = $1",
                "DELETE FROM \"posts\" WHERE \"id\" = $1",
            ]
        );
        assert!(posts_of_tag.borrow().is_empty());
    }

    #[test]
    fn test_delete_detaches_from_referencing_relations() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let mut registry = RelationRegistry::new();
        registry.register(ManyToManyDef::new(post_tags_id(), table("tags"), post_tags()).unwrap());
        let saver = RowSaver::new(Rc::new(registry), Events::new());

        rt.block_on(async {
            unwrap_outcome(saver.delete(&cx, &conn, &entity("tags", Some(7), "rust")).await);
            // Never stored: nothing to delete.
            unwrap_outcome(saver.delete(&cx, &conn, &entity("tags", None, "draft")).await);
        });

        let state = conn.state.lock().unwrap();
        assert_eq!(
            state.executed_sql(),
            vec![
                "DELETE FROM \"post_tags\" WHERE \"tag_id\" = $1",
                "DELETE FROM \"tags\" WHERE \"id\" = $1",
            ]
        );
        assert_eq!(state.executed[0].1, vec![Value::BigInt(7)]);
    }

    #[test]
    fn test_load_requires_registered_relation() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let conn = MockConnection::new();
        let saver = saver();
        let post = entity("posts", Some(1), "hello");

        rt.block_on(async {
            let loaded = unwrap_outcome(saver.load(&cx, &conn, &post, &post_tags_id()).await);
            assert!(loaded.borrow().is_empty());
            assert!(post.borrow().is_relation_loaded(&post_tags_id()));

            match saver
                .load(&cx, &conn, &post, &RelationId::new("posts", "authors"))
                .await
            {
                Outcome::Err(Error::Custom(msg)) => assert!(msg.contains("posts.authors")),
                other => panic!("expected unknown relation error, got {other:?}"),
            }
        });
        assert_eq!(conn.query_count(), 1);
    }
}
