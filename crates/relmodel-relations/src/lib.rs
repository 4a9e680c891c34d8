//! Relation engine for relmodel.
//!
//! `relmodel-relations` connects entities through association tables:
//!
//! - [`ManyToManyDef`] / [`ManyToMany`]: lazy fetch, batch eager loading,
//!   event mirroring between the two sides of a loaded pair, membership
//!   checks and delta persistence
//! - [`Relation`]: the contract relation kinds share
//! - [`RelationRegistry`]: relation definitions by identity
//! - [`RowSaver`]: the row-level [`Saver`](relmodel_core::Saver) that cascades
//!   saves into loaded relations and clears association rows on delete
//!
//! Everything here runs on the caller's thread. Entities and collections
//! are shared through `Rc`, so the compiler keeps them there.

pub mod config;
pub mod many_to_many;
pub mod registry;
pub mod relation;
pub mod row_saver;

#[cfg(test)]
pub(crate) mod mock;

pub use config::RelationConfig;
pub use many_to_many::{ManyToMany, ManyToManyDef};
pub use registry::RelationRegistry;
pub use relation::Relation;
pub use row_saver::RowSaver;
