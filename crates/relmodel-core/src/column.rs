//! Column contracts.
//!
//! A column knows its storage type and how to convert between raw storage
//! values and attribute values. Conversions never coerce silently: input a
//! column cannot represent is an [`Error::InvalidColumnData`].

use std::rc::Rc;

use asupersync::{Cx, Outcome};

use crate::connection::Connection;
use crate::entity::{Entity, EntityRef};
use crate::events::{Delivery, Events, Subscription};
use crate::key::Key;
use crate::saver::{SaveOptions, Saver};
use crate::table::Table;
use crate::types::SqlType;
use crate::value::Value;
use crate::{Error, Result};

/// Storage conversion contract shared by every column type.
pub trait Column {
    fn name(&self) -> &str;

    /// The storage type descriptor.
    fn storage_type(&self) -> SqlType;

    /// Column definition fragment as used in DDL, e.g.
    /// `post_id BIGINT(20) unsigned NOT NULL`.
    fn definition(&self) -> String;

    /// Convert a raw storage value into an attribute value.
    fn to_value(&self, raw: Value) -> Result<Value>;

    /// Convert an attribute value into the value to bind for storage.
    fn to_storage(&self, value: &Value) -> Result<Value>;
}

/// Integer storage widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerWidth {
    Tiny,
    Small,
    Medium,
    Int,
    Big,
}

impl IntegerWidth {
    pub fn sql_type(self) -> SqlType {
        match self {
            IntegerWidth::Tiny => SqlType::TinyInt,
            IntegerWidth::Small => SqlType::SmallInt,
            IntegerWidth::Medium => SqlType::MediumInt,
            IntegerWidth::Int => SqlType::Integer,
            IntegerWidth::Big => SqlType::BigInt,
        }
    }

    const fn display_width(self) -> u8 {
        match self {
            IntegerWidth::Tiny => 4,
            IntegerWidth::Small => 6,
            IntegerWidth::Medium => 9,
            IntegerWidth::Int => 11,
            IntegerWidth::Big => 20,
        }
    }

    /// Inclusive bounds. Unsigned BIGINT is capped at `i64::MAX`, the
    /// largest value a bound parameter can carry.
    fn bounds(self, unsigned: bool) -> (i128, i128) {
        match (self, unsigned) {
            (IntegerWidth::Tiny, false) => (-128, 127),
            (IntegerWidth::Tiny, true) => (0, 255),
            (IntegerWidth::Small, false) => (-32_768, 32_767),
            (IntegerWidth::Small, true) => (0, 65_535),
            (IntegerWidth::Medium, false) => (-8_388_608, 8_388_607),
            (IntegerWidth::Medium, true) => (0, 16_777_215),
            (IntegerWidth::Int, false) => (i128::from(i32::MIN), i128::from(i32::MAX)),
            (IntegerWidth::Int, true) => (0, i128::from(u32::MAX)),
            (IntegerWidth::Big, false) => (i128::from(i64::MIN), i128::from(i64::MAX)),
            (IntegerWidth::Big, true) => (0, i128::from(i64::MAX)),
        }
    }
}

/// A fixed-width integer column.
///
/// NULL passes through unchanged. Integers, booleans, floats (truncated
/// toward zero) and numeric text are accepted; everything else, and any value
/// outside the configured width, is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerColumn {
    name: String,
    width: IntegerWidth,
    unsigned: bool,
    not_null: bool,
    auto_increment: bool,
}

impl IntegerColumn {
    pub fn new(name: impl Into<String>, width: IntegerWidth) -> Self {
        Self {
            name: name.into(),
            width,
            unsigned: false,
            not_null: false,
            auto_increment: false,
        }
    }

    pub fn tiny(name: impl Into<String>) -> Self {
        Self::new(name, IntegerWidth::Tiny)
    }

    pub fn small(name: impl Into<String>) -> Self {
        Self::new(name, IntegerWidth::Small)
    }

    pub fn medium(name: impl Into<String>) -> Self {
        Self::new(name, IntegerWidth::Medium)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, IntegerWidth::Int)
    }

    pub fn big(name: impl Into<String>) -> Self {
        Self::new(name, IntegerWidth::Big)
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.not_null = true;
        self
    }

    pub fn width(&self) -> IntegerWidth {
        self.width
    }

    pub fn is_unsigned(&self) -> bool {
        self.unsigned
    }

    fn convert(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let n = integer_of(&self.name, value)?;
        let (min, max) = self.width.bounds(self.unsigned);
        let out_of_range = || {
            Error::invalid_column_data(
                self.name.clone(),
                value.type_name(),
                format!("{n} is outside [{min}, {max}]"),
            )
        };
        if n < min || n > max {
            return Err(out_of_range());
        }
        i64::try_from(n).map(Value::BigInt).map_err(|_| out_of_range())
    }
}

impl Column for IntegerColumn {
    fn name(&self) -> &str {
        &self.name
    }

    fn storage_type(&self) -> SqlType {
        self.width.sql_type()
    }

    fn definition(&self) -> String {
        let mut def = format!(
            "{} {}({})",
            self.name,
            self.width.sql_type().sql_name(),
            self.width.display_width()
        );
        if self.unsigned {
            def.push_str(" unsigned");
        }
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        if self.auto_increment {
            def.push_str(" auto_increment");
        }
        def
    }

    fn to_value(&self, raw: Value) -> Result<Value> {
        self.convert(&raw)
    }

    fn to_storage(&self, value: &Value) -> Result<Value> {
        self.convert(value)
    }
}

/// A character column, optionally length-limited.
///
/// Scalars are stored as their text form; non-scalars are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextColumn {
    name: String,
    max_length: Option<u32>,
    not_null: bool,
}

impl TextColumn {
    /// An unbounded TEXT column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_length: None,
            not_null: false,
        }
    }

    /// A VARCHAR column holding at most `max_length` characters.
    pub fn varchar(name: impl Into<String>, max_length: u32) -> Self {
        Self {
            max_length: Some(max_length),
            ..Self::new(name)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    fn convert(&self, value: &Value) -> Result<Value> {
        let reject = |reason: String| {
            Error::invalid_column_data(self.name.clone(), value.type_name(), reason)
        };
        let text = match value {
            Value::Null => return Ok(Value::Null),
            Value::Text(text) => text.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Double(f) => f.to_string(),
            other => match other.as_i64() {
                Some(n) => n.to_string(),
                None => return Err(reject("non-scalar value".to_string())),
            },
        };
        if let Some(max) = self.max_length {
            let len = text.chars().count();
            if len > usize::try_from(max).unwrap_or(usize::MAX) {
                return Err(reject(format!("{len} characters exceed the limit of {max}")));
            }
        }
        Ok(Value::Text(text))
    }
}

impl Column for TextColumn {
    fn name(&self) -> &str {
        &self.name
    }

    fn storage_type(&self) -> SqlType {
        match self.max_length {
            Some(len) => SqlType::VarChar(len),
            None => SqlType::Text,
        }
    }

    fn definition(&self) -> String {
        let mut def = format!("{} {}", self.name, self.storage_type().sql_name());
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        def
    }

    fn to_value(&self, raw: Value) -> Result<Value> {
        self.convert(&raw)
    }

    fn to_storage(&self, value: &Value) -> Result<Value> {
        self.convert(value)
    }
}

/// Read a scalar as an integer, truncating floats toward zero.
fn integer_of(column: &str, value: &Value) -> Result<i128> {
    let reject = |reason: &str| Error::invalid_column_data(column, value.type_name(), reason);

    if !value.is_scalar() {
        return Err(reject("non-scalar value"));
    }
    if let Some(n) = value.as_i64() {
        return Ok(i128::from(n));
    }
    let float = match value {
        Value::Text(text) => {
            let text = text.trim();
            if let Ok(n) = text.parse::<i64>() {
                return Ok(i128::from(n));
            }
            text.parse::<f64>()
                .map_err(|_| reject("text is not numeric"))?
        }
        other => other
            .as_f64()
            .ok_or_else(|| reject("not convertible to an integer"))?,
    };
    if !float.is_finite() {
        return Err(reject("non-finite number"));
    }
    Ok(float.trunc() as i128)
}

/// A column holding a reference to an entity of another table.
pub trait ForeignColumn: Column {
    /// The referenced table.
    fn foreign_table(&self) -> &Rc<Table>;

    /// The referenced column, the foreign table's primary key by default.
    fn foreign_key_column(&self) -> &str {
        self.foreign_table().primary_key()
    }

    /// The key a referenced entity would be stored under.
    fn primary_key_of(&self, entity: &EntityRef) -> Option<Key>;

    /// Persist a referenced entity and return the value to store in this
    /// column.
    fn save<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        entity: &EntityRef,
    ) -> impl Future<Output = Outcome<Value, Error>>;

    /// Call `callback` whenever a referenced entity is deleted, with the
    /// deleted key, so rows pointing at it can be reconciled.
    fn on_delete_of_referenced<F>(&self, events: &Events, callback: F) -> Subscription
    where
        F: Fn(&Key, &EntityRef) + 'static,
    {
        events.on_deleted(self.foreign_table().name(), move |entity| {
            if let Some(key) = entity.key() {
                callback(&key, entity);
            }
            Delivery::Keep
        })
    }
}

/// Foreign-key column referencing an entity table by its integer key.
///
/// Stored as an unsigned BIGINT; storage conversion keeps the absolute
/// integer value. Persistence of the referenced entity goes through `S`.
pub struct ForeignEntityColumn<S> {
    name: String,
    foreign: Rc<Table>,
    saver: S,
}

impl<S: Saver> ForeignEntityColumn<S> {
    pub fn new(name: impl Into<String>, foreign: Rc<Table>, saver: S) -> Self {
        Self {
            name: name.into(),
            foreign,
            saver,
        }
    }

    /// Load the entity referenced by `value`, if it exists.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(column = %self.name, table = self.foreign.name()))]
    pub async fn resolve<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        value: &Value,
    ) -> Outcome<Option<EntityRef>, Error> {
        let stored = match self.to_storage(value) {
            Ok(stored) => stored,
            Err(e) => return Outcome::Err(e),
        };
        if stored.is_null() {
            return Outcome::Ok(None);
        }

        let dialect = conn.dialect();
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {} LIMIT 1",
            dialect.quote_identifier(self.foreign.name()),
            dialect.quote_identifier(self.foreign_key_column()),
            dialect.placeholder(1)
        );
        tracing::trace!(sql = %sql, "resolving foreign entity");

        let row = match conn.query_one(cx, &sql, &[stored]).await {
            Outcome::Ok(row) => row,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match row {
            Some(row) => match Entity::from_row(Rc::clone(&self.foreign), &row, &[]) {
                Ok(entity) => Outcome::Ok(Some(entity.into_ref())),
                Err(e) => Outcome::Err(e),
            },
            None => Outcome::Ok(None),
        }
    }
}

impl<S> Column for ForeignEntityColumn<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn storage_type(&self) -> SqlType {
        SqlType::BigInt
    }

    fn definition(&self) -> String {
        format!("{} BIGINT(20) unsigned NOT NULL", self.name)
    }

    fn to_value(&self, raw: Value) -> Result<Value> {
        self.to_storage(&raw)
    }

    fn to_storage(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let n = integer_of(&self.name, value)?.unsigned_abs();
        i64::try_from(n).map(Value::BigInt).map_err(|_| {
            Error::invalid_column_data(self.name.clone(), value.type_name(), "key out of range")
        })
    }
}

impl<S: Saver> ForeignColumn for ForeignEntityColumn<S> {
    fn foreign_table(&self) -> &Rc<Table> {
        &self.foreign
    }

    fn primary_key_of(&self, entity: &EntityRef) -> Option<Key> {
        self.saver.primary_key_of(entity)
    }

    async fn save<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        entity: &EntityRef,
    ) -> Outcome<Value, Error> {
        let saved = match self.saver.save(cx, conn, entity, &SaveOptions::new()).await {
            Outcome::Ok(saved) => saved,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match self.saver.primary_key_of(&saved) {
            Some(key) => match self.to_storage(&key.to_value()) {
                Ok(value) => Outcome::Ok(value),
                Err(e) => Outcome::Err(e),
            },
            None => Outcome::Ok(Value::Null),
        }
    }
}
