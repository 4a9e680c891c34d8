//! Result rows handed back by a [`Connection`](crate::Connection).

use std::sync::Arc;

use crate::value::Value;

/// One row of a result set.
///
/// Column names are shared between the rows of one result set. When a
/// name repeats, lookups by name see its first occurrence.
#[derive(Debug, Clone)]
pub struct Row {
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_names(names.into(), values)
    }

    /// A row sharing `names` with its siblings.
    pub fn with_names(names: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { names, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// `(column, value)` pairs in result order, duplicates included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.column_names().zip(&self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_row_exposes_association_columns() {
        let row = Row::new(
            vec!["id".into(), "name".into(), "post_id".into()],
            vec![Value::BigInt(1), Value::Text("rust".into()), Value::Null],
        );
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some(&Value::BigInt(1)));
        assert_eq!(row.get_by_name("post_id"), Some(&Value::Null));
        assert!(row.get_by_name("tag_id").is_none());
    }

    #[test]
    fn test_repeated_name_resolves_to_first() {
        let names: Arc<[String]> = vec!["id".to_string(), "id".to_string()].into();
        let row = Row::with_names(Arc::clone(&names), vec![Value::BigInt(1), Value::BigInt(2)]);
        assert_eq!(row.get_by_name("id"), Some(&Value::BigInt(1)));
        let seen: Vec<_> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(seen, ["id", "id"]);
        assert_eq!(Arc::strong_count(&names), 2);
    }
}
