//! Write statements: entity rows, association links and unlinks.

use crate::clause::Filter;
use crate::expr::Expr;
use asupersync::{Cx, Outcome};
use relmodel_core::{Connection, Dialect, Value};

/// Conflict handling for INSERT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Skip rows that violate a uniqueness constraint.
    DoNothing,
}

/// Multi-row INSERT builder.
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    on_conflict: Option<OnConflict>,
}

impl InsertBuilder {
    /// Create a new INSERT into `table`.
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            on_conflict: None,
        }
    }

    /// Set the column list.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Append a row of values, in column order.
    pub fn values(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    /// Silently skip rows that would violate a uniqueness constraint.
    pub fn ignore_duplicates(mut self) -> Self {
        self.on_conflict = Some(OnConflict::DoNothing);
        self
    }

    /// Build the INSERT SQL and parameters for `dialect`.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::with_capacity(self.rows.len() * self.columns.len());
        let mut tuples = Vec::with_capacity(self.rows.len());

        for row in &self.rows {
            let placeholders: Vec<_> = row
                .iter()
                .map(|value| Expr::Literal(value.clone()).render(dialect, &mut params))
                .collect();
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let columns: Vec<_> = self
            .columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect();

        let verb = match (self.on_conflict, dialect) {
            (Some(OnConflict::DoNothing), Dialect::Mysql) => "INSERT IGNORE INTO",
            (Some(OnConflict::DoNothing), Dialect::Sqlite) => "INSERT OR IGNORE INTO",
            _ => "INSERT INTO",
        };

        let mut sql = format!(
            "{verb} {} ({}) VALUES {}",
            dialect.quote_identifier(&self.table),
            columns.join(", "),
            tuples.join(", ")
        );

        if self.on_conflict == Some(OnConflict::DoNothing) && dialect == Dialect::Postgres {
            sql.push_str(" ON CONFLICT DO NOTHING");
        }

        (sql, params)
    }

    /// Execute the INSERT and return rows affected.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<u64, relmodel_core::Error> {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "Executing INSERT");
        conn.execute(cx, &sql, &params).await
    }

    /// Execute a single-row INSERT and return the generated ID.
    pub async fn execute_returning_id<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<i64, relmodel_core::Error> {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "Executing INSERT (returning id)");
        conn.insert(cx, &sql, &params).await
    }
}

/// UPDATE query builder.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    sets: Vec<(String, Value)>,
    filter: Filter,
}

impl UpdateBuilder {
    /// Create a new UPDATE of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            filter: Filter::default(),
        }
    }

    /// Assign `value` to `column`.
    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.sets.push((column.into(), value));
        self
    }

    /// Add a WHERE condition, ANDed with any existing one.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = self.filter.and(expr);
        self
    }

    pub fn has_assignments(&self) -> bool {
        !self.sets.is_empty()
    }

    /// Build the UPDATE SQL and parameters for `dialect`.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let set_clauses: Vec<_> = self
            .sets
            .iter()
            .map(|(name, value)| {
                let placeholder =
                    Expr::Literal(value.clone()).render(dialect, &mut params);
                format!("{} = {}", dialect.quote_identifier(name), placeholder)
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_identifier(&self.table),
            set_clauses.join(", ")
        );

        self.filter.write_into(&mut sql, dialect, &mut params);

        (sql, params)
    }

    /// Execute the UPDATE and return rows affected.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<u64, relmodel_core::Error> {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "Executing UPDATE");
        conn.execute(cx, &sql, &params).await
    }
}

/// DELETE query builder.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    table: String,
    filter: Filter,
}

impl DeleteBuilder {
    /// Create a new DELETE from `table`.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::default(),
        }
    }

    /// Add a WHERE condition, ANDed with any existing one.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = self.filter.and(expr);
        self
    }

    /// Build the DELETE SQL and parameters for `dialect`.
    pub fn build_with_dialect(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(&self.table));

        self.filter.write_into(&mut sql, dialect, &mut params);

        (sql, params)
    }

    /// Execute the DELETE and return rows affected.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<u64, relmodel_core::Error> {
        let (sql, params) = self.build_with_dialect(conn.dialect());
        tracing::trace!(sql = %sql, params = params.len(), "Executing DELETE");
        conn.execute(cx, &sql, &params).await
    }
}
