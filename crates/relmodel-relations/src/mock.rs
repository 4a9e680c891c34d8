//! Recording connection for unit tests.

use std::sync::{Arc, Mutex};

use asupersync::{Cx, Outcome};
use relmodel_core::{Connection, Dialect, Error, Row, Value};

pub(crate) fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Rows handed out by `query`, one batch per call.
    pub(crate) results: Vec<Vec<Row>>,
    /// Row handed out by `query_one`.
    pub(crate) first: Option<Row>,
    pub(crate) next_id: i64,
    pub(crate) queries: Vec<(String, Vec<Value>)>,
    pub(crate) executed: Vec<(String, Vec<Value>)>,
}

impl MockState {
    pub(crate) fn executed_sql(&self) -> Vec<&str> {
        self.executed.iter().map(|(sql, _)| sql.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockConnection {
    pub(crate) state: Arc<Mutex<MockState>>,
    dialect: Dialect,
}

impl MockConnection {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_id: 100,
                ..MockState::default()
            })),
            dialect: Dialect::Postgres,
        }
    }

    pub(crate) fn with_results(self, results: Vec<Vec<Row>>) -> Self {
        self.state.lock().expect("lock poisoned").results = results;
        self
    }

    pub(crate) fn with_first(self, row: Row) -> Self {
        self.state.lock().expect("lock poisoned").first = Some(row);
        self
    }

    pub(crate) fn query_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").queries.len()
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.queries.push((sql, params));
            let rows = if guard.results.is_empty() {
                Vec::new()
            } else {
                guard.results.remove(0)
            };
            Outcome::Ok(rows)
        }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.queries.push((sql, params));
            Outcome::Ok(guard.first.clone())
        }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.executed.push((sql, params));
            Outcome::Ok(1)
        }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        let state = Arc::clone(&self.state);
        let sql = sql.to_string();
        let params = params.to_vec();
        async move {
            let mut guard = state.lock().expect("lock poisoned");
            guard.executed.push((sql, params));
            guard.next_id += 1;
            Outcome::Ok(guard.next_id)
        }
    }
}
