//! Table and association table descriptors.

use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;

use crate::column::{Column, IntegerColumn};
use crate::error::{Error, RelationErrorKind};
use crate::Result;

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$") {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(error = %e, "identifier pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Check that `name` is a plain SQL identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid = identifier_pattern().is_some_and(|re| re.is_match(name));
    if valid {
        Ok(())
    } else {
        Err(Error::Custom(format!("invalid SQL identifier: {name:?}")))
    }
}

/// Descriptor of an entity table.
pub struct Table {
    name: &'static str,
    primary_key: &'static str,
    columns: Vec<Rc<dyn Column>>,
}

impl Table {
    pub fn builder(name: &'static str, primary_key: &'static str) -> TableBuilder {
        TableBuilder {
            name,
            primary_key,
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn primary_key(&self) -> &'static str {
        self.primary_key
    }

    pub fn column(&self, name: &str) -> Option<&Rc<dyn Column>> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Rc<dyn Column>> {
        self.columns.iter()
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("primary_key", &self.primary_key)
            .field(
                "columns",
                &self.columns.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Table`].
pub struct TableBuilder {
    name: &'static str,
    primary_key: &'static str,
    columns: Vec<Rc<dyn Column>>,
}

impl TableBuilder {
    pub fn column(mut self, column: impl Column + 'static) -> Self {
        self.columns.push(Rc::new(column));
        self
    }

    pub fn shared_column(mut self, column: Rc<dyn Column>) -> Self {
        self.columns.push(column);
        self
    }

    /// Validate identifiers and finish the descriptor.
    ///
    /// The primary key must be one of the declared columns.
    pub fn build(self) -> Result<Rc<Table>> {
        validate_identifier(self.name)?;
        for column in &self.columns {
            validate_identifier(column.name())?;
        }
        if !self.columns.iter().any(|c| c.name() == self.primary_key) {
            return Err(Error::Custom(format!(
                "table {} does not declare its primary key column {}",
                self.name, self.primary_key
            )));
        }
        Ok(Rc::new(Table {
            name: self.name,
            primary_key: self.primary_key,
            columns: self.columns,
        }))
    }
}

/// One foreign-key column of an association table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignRef {
    pub column: &'static str,
    pub table: &'static str,
}

/// A pure join table: two integer foreign keys and nothing else.
///
/// Rows are unique per `(first.column, second.column)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTable {
    name: &'static str,
    first: ForeignRef,
    second: ForeignRef,
}

impl AssociationTable {
    /// Describe a join table linking `first_table` (via `first_column`) and
    /// `second_table` (via `second_column`).
    pub fn new(
        name: &'static str,
        (first_column, first_table): (&'static str, &'static str),
        (second_column, second_table): (&'static str, &'static str),
    ) -> Result<Self> {
        validate_identifier(name)?;
        validate_identifier(first_column)?;
        validate_identifier(second_column)?;
        if first_column == second_column {
            return Err(Error::Custom(format!(
                "association table {name} needs two distinct columns"
            )));
        }
        Ok(Self {
            name,
            first: ForeignRef {
                column: first_column,
                table: first_table,
            },
            second: ForeignRef {
                column: second_column,
                table: second_table,
            },
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn first(&self) -> ForeignRef {
        self.first
    }

    pub fn second(&self) -> ForeignRef {
        self.second
    }

    /// The column referencing `table`.
    ///
    /// When both columns reference `table` the first one is returned.
    pub fn column_for(&self, table: &str) -> Result<&'static str> {
        if self.first.table == table {
            Ok(self.first.column)
        } else if self.second.table == table {
            Ok(self.second.column)
        } else {
            Err(self.mismatch(table))
        }
    }

    /// The column opposite the one referencing `table`.
    pub fn other_column_for(&self, table: &str) -> Result<&'static str> {
        if self.first.table == table {
            Ok(self.second.column)
        } else if self.second.table == table {
            Ok(self.first.column)
        } else {
            Err(self.mismatch(table))
        }
    }

    /// The table referenced by `column`.
    pub fn table_of(&self, column: &str) -> Option<&'static str> {
        if self.first.column == column {
            Some(self.first.table)
        } else if self.second.column == column {
            Some(self.second.table)
        } else {
            None
        }
    }

    /// The two key columns, as unsigned BIGINT columns.
    pub fn columns(&self) -> [IntegerColumn; 2] {
        [
            IntegerColumn::big(self.first.column).unsigned().not_null(),
            IntegerColumn::big(self.second.column).unsigned().not_null(),
        ]
    }

    /// The key column named `column`, if it belongs to this table.
    pub fn key_column(&self, column: &str) -> Option<IntegerColumn> {
        self.columns().into_iter().find(|c| c.name() == column)
    }

    fn mismatch(&self, table: &str) -> Error {
        Error::relation(
            RelationErrorKind::ColumnMismatch,
            self.name,
            format!("no column references table {table}"),
        )
    }
}
