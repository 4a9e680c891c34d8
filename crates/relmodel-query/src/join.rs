//! Joins from the related table onto the association table.

use crate::expr::Expr;
use relmodel_core::{Dialect, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// Lazy fetch: only related rows linked to the parent.
    Inner,
    /// Eager load: keeps the association columns nullable in the result.
    Left,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinType,
    pub table: String,
    pub on: Expr,
}

impl Join {
    pub fn inner(table: impl Into<String>, on: Expr) -> Self {
        Self {
            kind: JoinType::Inner,
            table: table.into(),
            on,
        }
    }

    pub fn left(table: impl Into<String>, on: Expr) -> Self {
        Self {
            kind: JoinType::Left,
            table: table.into(),
            on,
        }
    }

    /// ` INNER JOIN "t" ON ...`, with a leading space.
    pub fn render(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let keyword = match self.kind {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        };
        format!(
            " {keyword} {} ON {}",
            dialect.quote_identifier(&self.table),
            self.on.render(dialect, params)
        )
    }
}
