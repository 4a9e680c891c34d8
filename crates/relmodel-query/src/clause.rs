//! Pieces shared by the statement builders: the accumulated WHERE filter
//! and ORDER BY terms.

use crate::expr::Expr;
use relmodel_core::{Dialect, Value};

/// Conditions ANDed together as they are added.
#[derive(Debug, Clone, Default)]
pub struct Filter(Option<Expr>);

impl Filter {
    #[must_use]
    pub fn and(self, expr: Expr) -> Self {
        Filter(Some(match self.0 {
            Some(existing) => existing.and(expr),
            None => expr,
        }))
    }

    /// Append ` WHERE <conditions>` to `sql`; nothing when empty.
    pub fn write_into(&self, sql: &mut String, dialect: Dialect, params: &mut Vec<Value>) {
        if let Some(expr) = &self.0 {
            sql.push_str(" WHERE ");
            sql.push_str(&expr.render(dialect, params));
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone)]
pub struct OrderBy {
    expr: Expr,
    descending: bool,
}

impl OrderBy {
    pub fn asc(expr: impl Into<Expr>) -> Self {
        Self {
            expr: expr.into(),
            descending: false,
        }
    }

    pub fn desc(expr: impl Into<Expr>) -> Self {
        Self {
            expr: expr.into(),
            descending: true,
        }
    }

    pub fn render(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let direction = if self.descending { "DESC" } else { "ASC" };
        format!("{} {direction}", self.expr.render(dialect, params))
    }
}
