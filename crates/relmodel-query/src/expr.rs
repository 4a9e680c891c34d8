//! Predicate and projection expressions.
//!
//! Relation queries only need a narrow slice of SQL: qualified columns,
//! equality chains, `IN` lists over parent keys and OR-ed removal clauses.
//! Every literal is bound as a parameter; placeholders are numbered by the
//! length of the shared parameter vector, so fragments rendered into one
//! statement number consecutively.

use relmodel_core::{Dialect, Key, Value};

#[derive(Debug, Clone)]
pub enum Expr {
    Column {
        table: Option<String>,
        name: String,
    },
    /// `"table".*`
    AllOf(String),
    /// Bound as a parameter, except [`Value::Default`].
    Literal(Value),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
    },
    IsNull(Box<Expr>),
    /// Emitted verbatim.
    Raw(String),
    Paren(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// `"table"."column"`
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    pub fn all_of(table: impl Into<String>) -> Self {
        Expr::AllOf(table.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// `1 = 0`, the seed of an OR chain.
    pub fn never() -> Self {
        Expr::raw("1 = 0")
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other.into())
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other.into())
    }

    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other.into())
    }

    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other.into())
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull(Box::new(self))
    }

    /// Membership in `values`. With no values the result is [`Expr::never`],
    /// since `IN ()` is not valid SQL.
    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        if values.is_empty() {
            return Expr::never();
        }
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paren(self) -> Self {
        Expr::Paren(Box::new(self))
    }

    /// `1 = 0 OR (a) OR (b) ...`
    ///
    /// An empty input yields a predicate that matches nothing.
    pub fn any_of(exprs: impl IntoIterator<Item = Expr>) -> Self {
        exprs
            .into_iter()
            .fold(Expr::never(), |acc, e| acc.or(e.paren()))
    }

    fn binary(self, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    /// Render for `dialect`, pushing bound values onto `params`.
    pub fn render(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        match self {
            Expr::Column { table: None, name } => dialect.quote_identifier(name),
            Expr::Column {
                table: Some(table),
                name,
            } => format!(
                "{}.{}",
                dialect.quote_identifier(table),
                dialect.quote_identifier(name)
            ),
            Expr::AllOf(table) => format!("{}.*", dialect.quote_identifier(table)),
            Expr::Literal(Value::Default) => "DEFAULT".to_string(),
            Expr::Literal(value) => {
                params.push(value.clone());
                dialect.placeholder(params.len())
            }
            Expr::Binary { left, op, right } => {
                let left = left.render(dialect, params);
                let right = right.render(dialect, params);
                format!("{left} {} {right}", op.as_str())
            }
            Expr::In { expr, values } => {
                let expr = expr.render(dialect, params);
                let list: Vec<_> = values.iter().map(|v| v.render(dialect, params)).collect();
                format!("{expr} IN ({})", list.join(", "))
            }
            Expr::IsNull(expr) => format!("{} IS NULL", expr.render(dialect, params)),
            Expr::Raw(sql) => sql.clone(),
            Expr::Paren(expr) => format!("({})", expr.render(dialect, params)),
        }
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<Key> for Expr {
    fn from(key: Key) -> Self {
        Expr::Literal(key.to_value())
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(s.into())
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(n.into())
    }
}
