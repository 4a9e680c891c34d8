//! Core types and contracts for relmodel.
//!
//! - `Value`, `Key` and `Row` for data crossing the driver boundary
//! - `Column` contracts for storage conversion, including foreign references
//! - `Table` and `AssociationTable` descriptors
//! - `Entity` and the change-tracked `Collection`
//! - `Events` lifecycle channels and the `Saver` contract
//! - `Connection` trait for the storage driver
//! - `Outcome` and `Cx` re-exported from asupersync

pub use asupersync::{Cx, Outcome};

pub mod collection;
pub mod column;
pub mod connection;
pub mod entity;
pub mod error;
pub mod events;
pub mod key;
pub mod row;
pub mod saver;
pub mod table;
pub mod types;
pub mod value;

pub use collection::{Collection, CollectionRef, WeakCollectionRef};
pub use column::{
    Column, ForeignColumn, ForeignEntityColumn, IntegerColumn, IntegerWidth, TextColumn,
};
pub use connection::{Connection, Dialect};
pub use entity::{Entity, EntityRef, RelationId, RelationSet, WeakEntityRef};
pub use error::{
    Error, InvalidColumnData, QueryError, RelationError, RelationErrorKind, Result,
};
pub use events::{Delivery, Events, LifecycleEvent, Registration, Subscription};
pub use key::Key;
pub use row::Row;
pub use saver::{SaveOptions, Saver};
pub use table::{AssociationTable, ForeignRef, Table, TableBuilder, validate_identifier};
pub use types::SqlType;
pub use value::Value;
