//! SQL statement builders for relmodel.
//!
//! `relmodel-query` is the **query construction layer**: an expression DSL
//! plus SELECT / INSERT / UPDATE / DELETE builders that render dialect-aware
//! SQL and bound parameters. Statements execute through the `Connection`
//! trait from `relmodel-core`.

pub mod builder;
pub mod clause;
pub mod expr;
pub mod join;
pub mod select;

pub use builder::{DeleteBuilder, InsertBuilder, OnConflict, UpdateBuilder};
pub use clause::{Filter, OrderBy};
pub use expr::{BinaryOp, Expr};
pub use join::{Join, JoinType};
pub use relmodel_core::Dialect;
pub use select::Select;
