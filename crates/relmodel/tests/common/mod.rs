//! In-memory store that interprets the SQL relmodel generates.
//!
//! Entity tables are maps from integer id to attributes; association tables
//! are sets of key pairs with a uniqueness constraint. Every statement is
//! logged so tests can count round trips.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard};

use regex::Regex;
use relmodel::prelude::*;
use relmodel::{Dialect, Events};

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

#[derive(Debug, Default)]
struct EntityTable {
    columns: Vec<String>,
    rows: BTreeMap<i64, BTreeMap<String, Value>>,
    last_id: i64,
}

#[derive(Debug)]
struct LinkTable {
    columns: [String; 2],
    pairs: BTreeSet<(i64, i64)>,
}

#[derive(Debug, Default)]
struct Store {
    tables: BTreeMap<String, EntityTable>,
    links: BTreeMap<String, LinkTable>,
    log: Vec<String>,
}

struct Patterns {
    placeholder: Regex,
    insert: Regex,
    tuple: Regex,
    update: Regex,
    assignment: Regex,
    delete: Regex,
    exists: Regex,
    by_key: Regex,
    join: Regex,
}

impl Patterns {
    fn new() -> Self {
        let re = |pattern: &str| Regex::new(pattern).expect("valid test pattern");
        Self {
            placeholder: re(r"^\$(\d+)$"),
            insert: re(r#"^INSERT INTO "(\w+)" \(([^)]*)\) VALUES (.*?)( ON CONFLICT DO NOTHING)?$"#),
            tuple: re(r"\(([^)]*)\)"),
            update: re(r#"^UPDATE "(\w+)" SET (.*) WHERE "(\w+)" = \$(\d+)$"#),
            assignment: re(r#"^"(\w+)" = \$(\d+)$"#),
            delete: re(r#"^DELETE FROM "(\w+)" WHERE (.*)$"#),
            exists: re(r#"^SELECT 1 FROM "(\w+)" WHERE (.*) LIMIT 1$"#),
            by_key: re(r#"^SELECT \* FROM "(\w+)" WHERE "(\w+)" = \$(\d+) LIMIT 1$"#),
            join: re(concat!(
                r#"^SELECT DISTINCT "(\w+)"\.\*(?:, "\w+"\."\w+")* FROM "\w+" (INNER|LEFT) JOIN "(\w+)" "#,
                r#"ON "\w+"\."\w+" = "\w+"\."(\w+)" AND "\w+"\."(\w+)" (?:= \$(\d+)|IN \(([^)]*)\))"#,
                r#"(?: ORDER BY "\w+"\."(\w+)" (ASC|DESC))?$"#
            )),
        }
    }
}

/// A [`Connection`] backed by in-memory tables.
#[derive(Clone)]
pub struct MemoryStore {
    store: Arc<Mutex<Store>>,
    patterns: Arc<Patterns>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            patterns: Arc::new(Patterns::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().expect("store lock poisoned")
    }

    pub fn create_table(&self, table: &Table) {
        let columns = table.columns().map(|c| c.name().to_string()).collect();
        self.lock().tables.insert(
            table.name().to_string(),
            EntityTable {
                columns,
                ..EntityTable::default()
            },
        );
    }

    pub fn create_association(&self, association: &AssociationTable) {
        self.lock().links.insert(
            association.name().to_string(),
            LinkTable {
                columns: [
                    association.first().column.to_string(),
                    association.second().column.to_string(),
                ],
                pairs: BTreeSet::new(),
            },
        );
    }

    /// Key pairs of `association`, in column order.
    pub fn links(&self, association: &str) -> Vec<(i64, i64)> {
        self.lock().links[association].pairs.iter().copied().collect()
    }

    pub fn link(&self, association: &str, first: i64, second: i64) {
        self.lock()
            .links
            .get_mut(association)
            .expect("unknown association")
            .pairs
            .insert((first, second));
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables[table].rows.len()
    }

    pub fn attribute(&self, table: &str, id: i64, column: &str) -> Option<Value> {
        self.lock().tables[table]
            .rows
            .get(&id)
            .and_then(|row| row.get(column).cloned())
    }

    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn statement_count(&self) -> usize {
        self.lock().log.len()
    }

    pub fn queries_since(&self, mark: usize) -> Vec<String> {
        self.lock().log[mark..]
            .iter()
            .filter(|sql| sql.starts_with("SELECT"))
            .cloned()
            .collect()
    }

    fn param(&self, token: &str, params: &[Value]) -> Result<Value> {
        let token = token.trim();
        if token == "DEFAULT" {
            return Ok(Value::Default);
        }
        let index: usize = self
            .patterns
            .placeholder
            .captures(token)
            .and_then(|c| c[1].parse().ok())
            .ok_or_else(|| Error::Custom(format!("not a placeholder: {token}")))?;
        params
            .get(index - 1)
            .cloned()
            .ok_or_else(|| Error::Custom(format!("missing parameter {index}")))
    }

    /// `"a" = $1 AND "b" = $2` into column/value pairs.
    fn conditions(&self, clause: &str, params: &[Value]) -> Result<Vec<(String, Value)>> {
        clause
            .split(" AND ")
            .map(|part| {
                let caps = self
                    .patterns
                    .assignment
                    .captures(part.trim())
                    .ok_or_else(|| Error::Custom(format!("unsupported condition: {part}")))?;
                Ok((caps[1].to_string(), self.param(&format!("${}", &caps[2]), params)?))
            })
            .collect()
    }

    /// A WHERE clause as a disjunction of conjunctions. `1 = 0` never matches.
    fn predicate(&self, clause: &str, params: &[Value]) -> Result<Vec<Vec<(String, Value)>>> {
        let mut groups = Vec::new();
        for group in clause.split(" OR ") {
            let group = group.trim().trim_start_matches('(').trim_end_matches(')');
            if group == "1 = 0" {
                continue;
            }
            groups.push(self.conditions(group, params)?);
        }
        Ok(groups)
    }

    fn run_insert(&self, sql: &str, params: &[Value]) -> Result<(u64, i64)> {
        let caps = self
            .patterns
            .insert
            .captures(sql)
            .ok_or_else(|| unsupported(sql))?;
        let table = &caps[1];
        let columns: Vec<String> = caps[2]
            .split(", ")
            .map(|c| c.trim_matches('"').to_string())
            .collect();
        let ignore = caps.get(4).is_some();
        let mut tuples = Vec::new();
        for tuple in self.patterns.tuple.captures_iter(&caps[3]) {
            let values = tuple[1]
                .split(", ")
                .map(|token| self.param(token, params))
                .collect::<Result<Vec<_>>>()?;
            tuples.push(columns.iter().cloned().zip(values).collect::<BTreeMap<_, _>>());
        }

        let mut store = self.lock();
        if let Some(link) = store.links.get_mut(table) {
            let mut inserted = 0;
            for tuple in tuples {
                let key = |column: &str| tuple.get(column).and_then(Value::as_i64);
                let (Some(first), Some(second)) = (key(&link.columns[0]), key(&link.columns[1]))
                else {
                    return Err(Error::Custom(format!("incomplete association row in {table}")));
                };
                if link.pairs.insert((first, second)) {
                    inserted += 1;
                } else if !ignore {
                    return Err(Error::Custom(format!(
                        "UNIQUE constraint failed: {table} ({first}, {second})"
                    )));
                }
            }
            return Ok((inserted, 0));
        }

        let entity_table = store
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::Custom(format!("no such table: {table}")))?;
        let mut last = 0;
        for tuple in tuples {
            let mut row: BTreeMap<String, Value> = tuple
                .into_iter()
                .filter(|(_, v)| !matches!(v, Value::Default))
                .collect();
            entity_table.last_id += 1;
            let id = entity_table.last_id;
            row.insert("id".to_string(), Value::BigInt(id));
            entity_table.rows.insert(id, row);
            last = id;
        }
        Ok((1, last))
    }

    fn run_execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        if sql.starts_with("INSERT") {
            return self.run_insert(sql, params).map(|(n, _)| n);
        }

        if let Some(caps) = self.patterns.update.captures(sql) {
            let sets = caps[2]
                .split(", ")
                .map(|s| self.conditions(s, params).map(|mut c| c.remove(0)))
                .collect::<Result<Vec<_>>>()?;
            let key = self.param(&format!("${}", &caps[4]), params)?;
            let id = key.as_i64().ok_or_else(|| unsupported(sql))?;
            let mut store = self.lock();
            let table = store
                .tables
                .get_mut(&caps[1])
                .ok_or_else(|| unsupported(sql))?;
            return Ok(match table.rows.get_mut(&id) {
                Some(row) => {
                    row.extend(sets);
                    1
                }
                None => 0,
            });
        }

        if let Some(caps) = self.patterns.delete.captures(sql) {
            let groups = self.predicate(&caps[2], params)?;
            let mut store = self.lock();
            if let Some(link) = store.links.get_mut(&caps[1]) {
                let columns = link.columns.clone();
                let before = link.pairs.len();
                link.pairs.retain(|&(a, b)| {
                    let row = pair_row(&columns, a, b);
                    !groups.iter().any(|g| matches_all(&row, g))
                });
                return Ok((before - link.pairs.len()) as u64);
            }
            let table = store
                .tables
                .get_mut(&caps[1])
                .ok_or_else(|| unsupported(sql))?;
            let before = table.rows.len();
            table
                .rows
                .retain(|_, row| !groups.iter().any(|g| matches_all(row, g)));
            return Ok((before - table.rows.len()) as u64);
        }

        Err(unsupported(sql))
    }

    fn run_query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if let Some(caps) = self.patterns.exists.captures(sql) {
            let conditions = self.conditions(&caps[2], params)?;
            let store = self.lock();
            let link = store.links.get(&caps[1]).ok_or_else(|| unsupported(sql))?;
            let found = link
                .pairs
                .iter()
                .any(|&(a, b)| matches_all(&pair_row(&link.columns, a, b), &conditions));
            return Ok(if found {
                vec![Row::new(vec!["1".to_string()], vec![Value::Int(1)])]
            } else {
                Vec::new()
            });
        }

        if let Some(caps) = self.patterns.by_key.captures(sql) {
            let key = self.param(&format!("${}", &caps[3]), params)?;
            let store = self.lock();
            let table = store.tables.get(&caps[1]).ok_or_else(|| unsupported(sql))?;
            return Ok(key
                .as_i64()
                .and_then(|id| table.rows.get(&id))
                .map(|row| entity_row(table, row, &[]))
                .into_iter()
                .collect());
        }

        if let Some(caps) = self.patterns.join.captures(sql) {
            let left = &caps[2] == "LEFT";
            let association = &caps[3];
            let (primary_column, other_column) = (&caps[4], &caps[5]);
            let keys: Vec<i64> = match (caps.get(6), caps.get(7)) {
                (Some(single), _) => vec![self.param(&format!("${}", single.as_str()), params)?],
                (None, Some(list)) => list
                    .as_str()
                    .split(", ")
                    .map(|token| self.param(token, params))
                    .collect::<Result<Vec<_>>>()?,
                (None, None) => Vec::new(),
            }
            .iter()
            .filter_map(Value::as_i64)
            .collect();

            let store = self.lock();
            let table = store.tables.get(&caps[1]).ok_or_else(|| unsupported(sql))?;
            let link = store.links.get(association).ok_or_else(|| unsupported(sql))?;
            let position = |column: &str| link.columns.iter().position(|c| c == column);
            let (Some(p), Some(o)) = (position(primary_column), position(other_column)) else {
                return Err(unsupported(sql));
            };

            let mut rows = Vec::new();
            for (id, row) in &table.rows {
                let matches: Vec<i64> = link
                    .pairs
                    .iter()
                    .map(|&(a, b)| [a, b])
                    .filter(|pair| pair[p] == *id && keys.contains(&pair[o]))
                    .map(|pair| pair[o])
                    .collect();
                if left {
                    let extra = |parent: Option<i64>| {
                        let link_value = |v: Option<i64>| v.map_or(Value::Null, Value::BigInt);
                        vec![
                            (other_column.to_string(), link_value(parent)),
                            (primary_column.to_string(), link_value(parent.map(|_| *id))),
                        ]
                    };
                    if matches.is_empty() {
                        rows.push(entity_row(table, row, &extra(None)));
                    }
                    for parent in matches {
                        rows.push(entity_row(table, row, &extra(Some(parent))));
                    }
                } else if !matches.is_empty() {
                    rows.push(entity_row(table, row, &[]));
                }
            }

            if let Some(order) = caps.get(8) {
                let descending = caps.get(9).is_some_and(|d| d.as_str() == "DESC");
                let column = order.as_str();
                rows.sort_by(|a, b| {
                    let text = |r: &Row| {
                        r.get_by_name(column)
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string()
                    };
                    let ordering = text(a).cmp(&text(b));
                    if descending { ordering.reverse() } else { ordering }
                });
            }
            return Ok(rows);
        }

        Err(unsupported(sql))
    }

    fn record(&self, sql: &str) {
        self.lock().log.push(sql.to_string());
    }
}

fn unsupported(sql: &str) -> Error {
    Error::query(sql, "unsupported statement")
}

fn pair_row(columns: &[String; 2], a: i64, b: i64) -> BTreeMap<String, Value> {
    BTreeMap::from([
        (columns[0].clone(), Value::BigInt(a)),
        (columns[1].clone(), Value::BigInt(b)),
    ])
}

fn matches_all(row: &BTreeMap<String, Value>, conditions: &[(String, Value)]) -> bool {
    conditions.iter().all(|(column, expected)| {
        row.get(column).is_some_and(|actual| {
            match (Key::from_value(actual), Key::from_value(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => actual == expected,
            }
        })
    })
}

fn entity_row(table: &EntityTable, row: &BTreeMap<String, Value>, extra: &[(String, Value)]) -> Row {
    let mut names = Vec::with_capacity(table.columns.len() + extra.len());
    let mut values = Vec::with_capacity(names.capacity());
    for column in &table.columns {
        names.push(column.clone());
        values.push(row.get(column).cloned().unwrap_or(Value::Null));
    }
    for (name, value) in extra {
        names.push(name.clone());
        values.push(value.clone());
    }
    Row::new(names, values)
}

fn done<T: Send + 'static>(result: Result<T>) -> impl Future<Output = Outcome<T, Error>> + Send {
    let outcome = match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    };
    async move { outcome }
}

impl Connection for MemoryStore {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.record(sql);
        done(self.run_query(sql, params))
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        self.record(sql);
        done(
            self.run_query(sql, params)
                .map(|rows| rows.into_iter().next()),
        )
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.record(sql);
        done(self.run_execute(sql, params))
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        self.record(sql);
        done(self.run_insert(sql, params).map(|(_, id)| id))
    }
}

/// Posts and tags linked through `post_tags`, with both relation sides
/// registered and mirrored.
pub struct Blog {
    pub store: MemoryStore,
    pub posts: Rc<Table>,
    pub tags: Rc<Table>,
    pub saver: RowSaver,
}

pub fn post_tags_id() -> RelationId {
    RelationId::new("posts", "tags")
}

pub fn tag_posts_id() -> RelationId {
    RelationId::new("tags", "posts")
}

impl Blog {
    pub fn new() -> Self {
        Self::with_config(RelationConfig::default())
    }

    pub fn with_config(config: RelationConfig) -> Self {
        let table = |name: &'static str| {
            Table::builder(name, "id")
                .column(IntegerColumn::big("id").unsigned().auto_increment())
                .column(TextColumn::varchar("name", 64).not_null())
                .build()
                .expect("valid table")
        };
        let posts = table("posts");
        let tags = table("tags");
        let post_tags = AssociationTable::new("post_tags", ("post_id", "posts"), ("tag_id", "tags"))
            .expect("valid association");

        let store = MemoryStore::new();
        store.create_table(&posts);
        store.create_table(&tags);
        store.create_association(&post_tags);

        let mut registry = RelationRegistry::new();
        registry.register(
            ManyToManyDef::new(post_tags_id(), Rc::clone(&tags), post_tags.clone())
                .expect("posts.tags")
                .mirrored_by("posts")
                .with_config(config),
        );
        registry.register(
            ManyToManyDef::new(tag_posts_id(), Rc::clone(&posts), post_tags)
                .expect("tags.posts")
                .mirrored_by("tags")
                .with_config(config),
        );

        Self {
            store,
            posts,
            tags,
            saver: RowSaver::new(Rc::new(registry), Events::new()),
        }
    }

    pub fn post(&self, name: &str) -> EntityRef {
        new_entity(&self.posts, name)
    }

    pub fn tag(&self, name: &str) -> EntityRef {
        new_entity(&self.tags, name)
    }

    /// A stored entity read back the way a query would materialize it.
    pub fn stored(&self, table: &Rc<Table>, id: i64) -> EntityRef {
        let name = self
            .store
            .attribute(table.name(), id, "name")
            .unwrap_or(Value::Null);
        Entity::from_raw_attributes(
            Rc::clone(table),
            [("id".to_string(), Value::BigInt(id)), ("name".to_string(), name)],
        )
        .expect("stored entity")
        .into_ref()
    }
}

fn new_entity(table: &Rc<Table>, name: &str) -> EntityRef {
    let mut entity = Entity::new(Rc::clone(table));
    entity.set("name", name);
    entity.into_ref()
}
