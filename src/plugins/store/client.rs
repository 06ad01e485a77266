use futures::future::LocalBoxFuture;
use futures::stream::LocalBoxStream;
use std::rc::Rc;
use thiserror::Error;

use crate::error::Fault;
use crate::interp::Value;

/// One primitive operation against a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Operation name, e.g. `insert` or `select`.
    pub op: String,
    /// Operation arguments, usually a record.
    pub args: Value,
}

impl Request {
    /// Request `op` with `args`.
    pub fn new(op: impl Into<String>, args: Value) -> Self {
        Self {
            op: op.into(),
            args,
        }
    }
}

/// A failure reported by a resource client.
///
/// Client failures are ordinary DSL-level failures: they surface to the
/// program as a raised `{code, message}` record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ClientError {
    /// Machine-readable code, matched by `try` arms.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl ClientError {
    /// Error with `code` and `message`.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<ClientError> for Fault {
    fn from(err: ClientError) -> Self {
        Fault::raise(&err.code, err.message)
    }
}

/// Future returned by client operations.
pub type ClientFuture<T> = LocalBoxFuture<'static, Result<T, ClientError>>;

/// Capability of a stateful external resource.
///
/// `begin` and `savepoint` return a client scoped to the new unit of work;
/// requests made through it are only visible to the parent once the scoped
/// client commits.
pub trait ResourceClient {
    /// Run one primitive operation.
    fn request(&self, request: Request) -> ClientFuture<Value>;

    /// Open a transaction.
    fn begin(&self) -> ClientFuture<Rc<dyn ResourceClient>>;

    /// Open a savepoint nested in this client's unit of work.
    fn savepoint(&self) -> ClientFuture<Rc<dyn ResourceClient>>;

    /// Make this scope's writes visible to its parent.
    fn commit(&self) -> ClientFuture<()>;

    /// Discard this scope's writes.
    fn rollback(&self) -> ClientFuture<()>;

    /// Run a streaming operation, yielding rows in batches of at most
    /// `batch_size`.
    fn stream(
        &self,
        request: Request,
        batch_size: usize,
    ) -> LocalBoxStream<'static, Result<Vec<Value>, ClientError>>;
}
