//! Storage types a column declares.

use std::fmt;

/// The SQL type a column stores its values as.
///
/// Only the integer widths and the two text shapes relation columns need
/// are modelled; the rendered name is what appears in a column definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    TinyInt,
    SmallInt,
    MediumInt,
    Integer,
    BigInt,
    /// Bounded text with its maximum length in characters.
    VarChar(u32),
    Text,
}

impl SqlType {
    /// Name used when rendering a column definition.
    #[must_use]
    pub fn sql_name(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::TinyInt => f.write_str("TINYINT"),
            SqlType::SmallInt => f.write_str("SMALLINT"),
            SqlType::MediumInt => f.write_str("MEDIUMINT"),
            SqlType::Integer => f.write_str("INTEGER"),
            SqlType::BigInt => f.write_str("BIGINT"),
            SqlType::VarChar(len) => write!(f, "VARCHAR({len})"),
            SqlType::Text => f.write_str("TEXT"),
        }
    }
}
