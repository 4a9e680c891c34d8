//! SELECT query builder.

use crate::clause::{Filter, OrderBy};
use crate::expr::Expr;
use crate::join::Join;
use asupersync::{Cx, Outcome};
use relmodel_core::{Connection, Dialect, Row, Value};

/// A SELECT over one table, with joins.
///
/// Relation fetches hand a `Select` to caller customization before running
/// it, so everything here is additive.
#[derive(Debug, Clone)]
pub struct Select {
    table: String,
    /// Empty renders as `*`.
    columns: Vec<Expr>,
    filter: Filter,
    order_by: Vec<OrderBy>,
    joins: Vec<Join>,
    limit: Option<u64>,
    distinct: bool,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filter: Filter::default(),
            order_by: Vec::new(),
            joins: Vec::new(),
            limit: None,
            distinct: false,
        }
    }

    pub fn column(mut self, expr: Expr) -> Self {
        self.columns.push(expr);
        self
    }

    /// ANDed with earlier filters.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = self.filter.and(expr);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Build the SQL and parameters for `dialect`.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = String::from("SELECT ");

        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<_> = self
                .columns
                .iter()
                .map(|c| c.render(dialect, &mut params))
                .collect();
            sql.push_str(&cols.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&dialect.quote_identifier(&self.table));

        for join in &self.joins {
            sql.push_str(&join.render(dialect, &mut params));
        }

        self.filter.write_into(&mut sql, dialect, &mut params);

        if !self.order_by.is_empty() {
            let terms: Vec<_> = self
                .order_by
                .iter()
                .map(|o| o.render(dialect, &mut params))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        (sql, params)
    }

    /// Run and return every row.
    pub async fn all<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<Vec<Row>, relmodel_core::Error> {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "Executing SELECT");
        conn.query(cx, &sql, &params).await
    }

    /// Run with `LIMIT 1`.
    pub async fn first<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<Option<Row>, relmodel_core::Error> {
        let query = self.clone().limit(1);
        let (sql, params) = query.build_with_dialect(conn.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "Executing SELECT (first)");
        conn.query_one(cx, &sql, &params).await
    }
}
