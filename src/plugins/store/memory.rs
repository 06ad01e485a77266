use futures::future::{self, FutureExt};
use futures::stream::{self, LocalBoxStream, StreamExt};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use super::client::{ClientError, ClientFuture, Request, ResourceClient};
use crate::interp::Value;

type Tables = BTreeMap<String, Vec<Value>>;

struct Scope {
    tables: RefCell<Tables>,
    parent: Option<Rc<Scope>>,
    closed: Cell<bool>,
}

/// In-memory table store with snapshot transactions.
///
/// `begin` and `savepoint` both snapshot the current tables into a child
/// scope; `commit` writes the child's tables back over its parent and
/// `rollback` drops them. Every operation, including scope transitions, is
/// appended to a log shared by all scopes of one store.
///
/// Supported operations, all taking a record of arguments:
///
/// | op       | args                          | result              |
/// |----------|-------------------------------|---------------------|
/// | `insert` | `table`, `row`                | the inserted row    |
/// | `select` | `table`, optional `where`     | matching rows       |
/// | `count`  | `table`, optional `where`     | number of matches   |
/// | `delete` | `table`, optional `where`     | number removed      |
/// | `fail`   | `code`, `message`             | always fails        |
#[derive(Clone)]
pub struct MemoryStore {
    scope: Rc<Scope>,
    log: Rc<RefCell<Vec<String>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("tables", &self.scope.tables.borrow().keys().collect::<Vec<_>>())
            .field("nested", &self.scope.parent.is_some())
            .finish()
    }
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            scope: Rc::new(Scope {
                tables: RefCell::new(Tables::new()),
                parent: None,
                closed: Cell::new(false),
            }),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Seed `table` with `rows`.
    pub fn with_rows(self, table: &str, rows: impl IntoIterator<Item = Value>) -> Self {
        self.scope
            .tables
            .borrow_mut()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        self
    }

    /// Rows of `table` as seen by this scope.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.scope
            .tables
            .borrow()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Every operation performed so far, in order.
    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn note(&self, entry: impl Into<String>) {
        self.log.borrow_mut().push(entry.into());
    }

    fn open(&self) -> Result<(), ClientError> {
        if self.scope.closed.get() {
            return Err(ClientError::new("CLOSED", "scope already committed or rolled back"));
        }
        Ok(())
    }

    fn child(&self, label: &str) -> Result<Rc<dyn ResourceClient>, ClientError> {
        self.open()?;
        self.note(label);
        let snapshot = self.scope.tables.borrow().clone();
        Ok(Rc::new(MemoryStore {
            scope: Rc::new(Scope {
                tables: RefCell::new(snapshot),
                parent: Some(self.scope.clone()),
                closed: Cell::new(false),
            }),
            log: self.log.clone(),
        }))
    }

    fn close(&self, label: &str) -> Result<(), ClientError> {
        self.open()?;
        self.note(label);
        self.scope.closed.set(true);
        Ok(())
    }

    fn execute(&self, request: &Request) -> Result<Value, ClientError> {
        self.open()?;
        self.note(request.op.as_str());
        let args = &request.args;
        match request.op.as_str() {
            "insert" => {
                let table = table_name(args)?;
                let row = args
                    .get("row")
                    .cloned()
                    .ok_or_else(|| ClientError::new("BAD_REQUEST", "insert needs a 'row'"))?;
                self.scope
                    .tables
                    .borrow_mut()
                    .entry(table)
                    .or_default()
                    .push(row.clone());
                Ok(row)
            }
            "select" => Ok(Value::List(self.select(args)?)),
            "count" => Ok(Value::from(self.select(args)?.len())),
            "delete" => {
                let table = table_name(args)?;
                let filter = args.get("where");
                let mut tables = self.scope.tables.borrow_mut();
                let rows = tables.entry(table).or_default();
                let before = rows.len();
                rows.retain(|row| !row_matches(row, filter));
                Ok(Value::from(before - rows.len()))
            }
            "fail" => {
                let field = |key: &str| {
                    args.get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                Err(ClientError::new(field("code"), field("message")))
            }
            other => Err(ClientError::new(
                "UNKNOWN_OP",
                format!("memory store has no operation '{other}'"),
            )),
        }
    }

    fn select(&self, args: &Value) -> Result<Vec<Value>, ClientError> {
        let table = table_name(args)?;
        let filter = args.get("where");
        Ok(self
            .scope
            .tables
            .borrow()
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn table_name(args: &Value) -> Result<String, ClientError> {
    args.get("table")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ClientError::new("BAD_REQUEST", "request needs a 'table'"))
}

fn row_matches(row: &Value, filter: Option<&Value>) -> bool {
    match filter {
        Some(Value::Record(wanted)) => wanted
            .iter()
            .all(|(key, value)| row.get(key) == Some(value)),
        _ => true,
    }
}

impl ResourceClient for MemoryStore {
    fn request(&self, request: Request) -> ClientFuture<Value> {
        future::ready(self.execute(&request)).boxed_local()
    }

    fn begin(&self) -> ClientFuture<Rc<dyn ResourceClient>> {
        future::ready(self.child("begin")).boxed_local()
    }

    fn savepoint(&self) -> ClientFuture<Rc<dyn ResourceClient>> {
        future::ready(self.child("savepoint")).boxed_local()
    }

    fn commit(&self) -> ClientFuture<()> {
        let outcome = self.close("commit").map(|()| {
            if let Some(parent) = &self.scope.parent {
                let tables = self.scope.tables.borrow().clone();
                *parent.tables.borrow_mut() = tables;
            }
        });
        future::ready(outcome).boxed_local()
    }

    fn rollback(&self) -> ClientFuture<()> {
        future::ready(self.close("rollback")).boxed_local()
    }

    fn stream(
        &self,
        request: Request,
        batch_size: usize,
    ) -> LocalBoxStream<'static, Result<Vec<Value>, ClientError>> {
        let rows = self.open().and_then(|()| {
            self.note(format!("stream:{}", request.op));
            match request.op.as_str() {
                "select" => self.select(&request.args),
                other => Err(ClientError::new(
                    "UNKNOWN_OP",
                    format!("memory store cannot stream '{other}'"),
                )),
            }
        });
        match rows {
            Ok(rows) => {
                let batches: Vec<_> = rows
                    .chunks(batch_size.max(1))
                    .map(|chunk| Ok(chunk.to_vec()))
                    .collect();
                stream::iter(batches).boxed_local()
            }
            Err(err) => stream::once(future::ready(Err(err))).boxed_local(),
        }
    }
}
