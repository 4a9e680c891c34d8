//! relmodel - many-to-many relations over association tables.
//!
//! relmodel loads, tracks and persists the members of a relation that is
//! stored as rows of a pure join table:
//!
//! - Column contracts that convert attribute values to and from storage
//! - Change-tracked collections that record what was added and removed
//! - Lazy and batch eager loading, one query per relation
//! - Bidirectional synchronization between the two sides of a loaded pair
//! - Delta persistence and delete cascades through a row-level saver
//!
//! # Quick Start
//!
//! ```ignore
//! use relmodel::prelude::*;
//!
//! async fn tag_post(cx: &Cx, conn: &impl Connection) {
//!     let posts = Table::builder("posts", "id")
//!         .column(IntegerColumn::big("id").unsigned().auto_increment())
//!         .build()
//!         .unwrap();
//!     let tags = Table::builder("tags", "id")
//!         .column(IntegerColumn::big("id").unsigned().auto_increment())
//!         .column(TextColumn::varchar("name", 64))
//!         .build()
//!         .unwrap();
//!     let post_tags =
//!         AssociationTable::new("post_tags", ("post_id", "posts"), ("tag_id", "tags")).unwrap();
//!
//!     let mut registry = RelationRegistry::new();
//!     let def = ManyToManyDef::new(RelationId::new("posts", "tags"), tags.clone(), post_tags)
//!         .unwrap()
//!         .mirrored_by("posts");
//!     registry.register(def);
//!     let saver = RowSaver::new(Rc::new(registry), Events::new());
//!
//!     let post = Entity::new(posts).into_ref();
//!     let collection = saver
//!         .load(cx, conn, &post, &RelationId::new("posts", "tags"))
//!         .await
//!         .unwrap();
//!
//!     let mut rust = Entity::new(tags);
//!     rust.set("name", "rust");
//!     collection.borrow_mut().add(rust.into_ref());
//!
//!     // Inserts the post, the tag and the association row.
//!     saver.save(cx, conn, &post, &SaveOptions::new()).await.unwrap();
//! }
//! ```
//!
//! # Threading
//!
//! Entities, collections and event channels are shared through `Rc` and
//! live on the thread that drives the request. Drivers implementing
//! [`Connection`] may still run their I/O anywhere.

pub use relmodel_core::{
    // asupersync re-exports
    Cx,
    Outcome,
    // Storage boundary
    Connection,
    Dialect,
    Key,
    Row,
    Value,
    // Errors
    Error,
    RelationError,
    RelationErrorKind,
    Result,
    // Columns and tables
    AssociationTable,
    Column,
    ForeignColumn,
    ForeignEntityColumn,
    IntegerColumn,
    IntegerWidth,
    SqlType,
    Table,
    TableBuilder,
    TextColumn,
    // Entities and collections
    Collection,
    CollectionRef,
    Entity,
    EntityRef,
    RelationId,
    RelationSet,
    // Lifecycle
    Delivery,
    Events,
    LifecycleEvent,
    SaveOptions,
    Saver,
    Subscription,
};
pub use relmodel_query::{
    DeleteBuilder, Expr, InsertBuilder, Join, JoinType, OrderBy, Select, UpdateBuilder,
};
pub use relmodel_relations::{
    ManyToMany, ManyToManyDef, Relation, RelationConfig, RelationRegistry, RowSaver,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        AssociationTable, Collection, CollectionRef, Column, Connection, Cx, Entity, EntityRef,
        Error, Events, Expr, IntegerColumn, Key, ManyToMany, ManyToManyDef, OrderBy, Outcome,
        Relation, RelationConfig, RelationId, RelationRegistry, Result, Row, RowSaver,
        SaveOptions, Saver, Select, Table, TextColumn, Value,
    };
    pub use std::rc::Rc;
}
