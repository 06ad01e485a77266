use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;

use crate::error::{EvalError, Fault, Outcome};
use crate::interp::value::Value;

/// Services named effects yielded by fragments.
///
/// Swapping the handler is how one program runs locally, against mocks,
/// batched, or proxied across a process boundary.
pub trait EffectHandler {
    /// Perform the effect `tag` with `payload`.
    fn handle(&self, tag: &str, payload: Value) -> LocalBoxFuture<'static, Outcome>;
}

impl<F, Fut> EffectHandler for F
where
    F: Fn(&str, Value) -> Fut,
    Fut: Future<Output = Outcome> + 'static,
{
    fn handle(&self, tag: &str, payload: Value) -> LocalBoxFuture<'static, Outcome> {
        self(tag, payload).boxed_local()
    }
}

/// Handler that rejects every effect as a fatal misconfiguration.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unhandled;

impl EffectHandler for Unhandled {
    fn handle(&self, tag: &str, _payload: Value) -> LocalBoxFuture<'static, Outcome> {
        let err = EvalError::UnhandledEffect {
            tag: tag.to_string(),
        };
        futures::future::ready(Err(Fault::Fatal(err))).boxed_local()
    }
}

/// Test double that answers effects from queued responses and records calls.
///
/// Responses for a tag are consumed in order; the last one repeats once the
/// queue is down to a single entry.
#[derive(Debug, Default)]
pub struct MockHandler {
    responses: RefCell<HashMap<String, VecDeque<Outcome>>>,
    calls: RefCell<Vec<(String, Value)>>,
}

impl MockHandler {
    /// Empty mock; unknown tags are fatal like [`Unhandled`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for `tag`.
    pub fn respond(self, tag: &str, value: impl Into<Value>) -> Self {
        self.push(tag, Ok(value.into()));
        self
    }

    /// Queue a raised failure for `tag`.
    pub fn fail(self, tag: &str, error: impl Into<Value>) -> Self {
        self.push(tag, Err(Fault::Raised(error.into())));
        self
    }

    /// Every `(tag, payload)` seen so far.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.borrow().clone()
    }

    /// Number of calls seen for `tag`.
    pub fn count(&self, tag: &str) -> usize {
        self.calls.borrow().iter().filter(|(t, _)| t == tag).count()
    }

    fn push(&self, tag: &str, outcome: Outcome) {
        self.responses
            .borrow_mut()
            .entry(tag.to_string())
            .or_default()
            .push_back(outcome);
    }
}

impl EffectHandler for MockHandler {
    fn handle(&self, tag: &str, payload: Value) -> LocalBoxFuture<'static, Outcome> {
        tracing::trace!(tag, %payload, "mock effect");
        self.calls.borrow_mut().push((tag.to_string(), payload));
        let mut responses = self.responses.borrow_mut();
        let outcome = match responses.get_mut(tag) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        let outcome = outcome.unwrap_or_else(|| {
            Err(Fault::Fatal(EvalError::UnhandledEffect {
                tag: tag.to_string(),
            }))
        });
        futures::future::ready(outcome).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_consumes_queue_then_repeats_last() {
        let mock = MockHandler::new()
            .fail("db/get", "busy")
            .respond("db/get", 5);
        let run =
            |mock: &MockHandler| futures::executor::block_on(mock.handle("db/get", Value::Null));
        assert!(matches!(run(&mock), Err(Fault::Raised(_))));
        assert_eq!(run(&mock), Ok(Value::Number(5.0)));
        assert_eq!(run(&mock), Ok(Value::Number(5.0)));
        assert_eq!(mock.count("db/get"), 3);
    }

    #[test]
    fn closures_are_handlers() {
        let handler = |tag: &str, payload: Value| {
            let echoed = Value::record([("tag", Value::from(tag)), ("payload", payload)]);
            async move { Ok(echoed) }
        };
        let out = futures::executor::block_on(handler.handle("echo", Value::Number(1.0))).unwrap();
        assert_eq!(out.get("tag"), Some(&Value::from("echo")));
    }

    #[test]
    fn unhandled_is_fatal() {
        let out = futures::executor::block_on(Unhandled.handle("x", Value::Null));
        assert!(matches!(out, Err(Fault::Fatal(EvalError::UnhandledEffect { .. }))));
    }
}
