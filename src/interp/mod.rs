//! Evaluation of built programs.
//!
//! An [`Interpreter`] owns a checked set of [`Fragment`]s and an
//! [`EffectHandler`]. Each call to [`Interpreter::run`] gets a fresh memo
//! cache, cell store and node arena copy; nothing is shared between
//! independent evaluations, even of the same [`Program`].

/// Driver loop and the visitor context.
pub mod driver;
/// Placeholder bindings.
pub mod env;
/// The fragment protocol.
pub mod fragment;
/// Named-effect handlers.
pub mod handler;
/// Memoization and taint.
pub mod memo;
/// Runtime values.
pub mod value;

pub use driver::Cx;
pub use env::{Binding, Env};
pub use fragment::{Fragment, FragmentTable, LegacyFragment, StepEffect, Visit};
pub use handler::{EffectHandler, MockHandler, Unhandled};
pub use memo::{Memo, MemoStats};
pub use value::Value;

use futures::future::poll_fn;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::task::Poll;
use tracing::{info, warn};

use crate::config::EvalConfig;
use crate::error::{ConfigError, EvalError, Fault, Outcome};
use crate::graph::Program;
use driver::{Arena, Shared};

/// Outcome of one evaluation plus cache counters.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    /// The program's value or failure.
    pub outcome: Outcome,
    /// Root-scope memo statistics.
    pub stats: MemoStats,
}

/// A configured interpreter: fragments, effect handler and settings.
#[derive(Clone)]
pub struct Interpreter {
    table: Rc<FragmentTable>,
    handler: Rc<dyn EffectHandler>,
    config: EvalConfig,
}

impl Interpreter {
    /// Register `fragments`; overlapping kinds are rejected here rather than
    /// at each visit.
    pub fn new(fragments: impl IntoIterator<Item = Rc<dyn Fragment>>) -> Result<Self, ConfigError> {
        Ok(Self {
            table: Rc::new(FragmentTable::new(fragments)?),
            handler: Rc::new(Unhandled),
            config: EvalConfig::default(),
        })
    }

    /// Replace the named-effect handler.
    pub fn with_handler(mut self, handler: Rc<dyn EffectHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Registered fragment names.
    pub fn fragment_names(&self) -> Vec<&str> {
        self.table.names()
    }

    /// Evaluate on a private current-thread runtime.
    ///
    /// Must not be called from inside an async context; use
    /// [`Interpreter::run_async`] there.
    pub fn run(&self, program: &Program, inputs: Value) -> Outcome {
        self.block_on(self.run_async(program, inputs))
    }

    /// Evaluate and report cache statistics, on a private runtime.
    pub fn evaluate(&self, program: &Program, inputs: Value) -> EvalReport {
        match self.runtime() {
            Ok(runtime) => runtime.block_on(self.evaluate_async(program, inputs)),
            Err(fault) => EvalReport {
                outcome: Err(fault),
                stats: MemoStats::default(),
            },
        }
    }

    /// Evaluate within the caller's tokio runtime.
    pub async fn run_async(&self, program: &Program, inputs: Value) -> Outcome {
        self.evaluate_async(program, inputs).await.outcome
    }

    /// Evaluate within the caller's tokio runtime, reporting cache statistics.
    pub async fn evaluate_async(&self, program: &Program, inputs: Value) -> EvalReport {
        let shared = Rc::new(Shared {
            arena: Arena::from_program(program, &self.table),
            table: self.table.clone(),
            handler: self.handler.clone(),
            inputs,
            cells: RefCell::new(HashMap::new()),
            recursions: program.recursions.clone(),
            background: Default::default(),
            config: self.config.clone(),
        });
        info!(hash = %program.hash, nodes = program.len(), "evaluation started");

        let cx = Cx::root(shared.clone());
        let mut root = cx.recurse(program.root);
        let outcome = poll_fn(|task| {
            if let Poll::Ready(outcome) = root.as_mut().poll(task) {
                return Poll::Ready(outcome);
            }
            shared.background.poll(task);
            Poll::Pending
        })
        .await;

        if self.config.drain_detached {
            poll_fn(|task| match shared.background.poll(task) {
                0 => Poll::Ready(()),
                _ => Poll::Pending,
            })
            .await;
        }
        let abandoned = shared.background.clear();
        if abandoned > 0 {
            warn!(abandoned, "dropping detached branches at end of evaluation");
        }

        let stats = cx.memo().stats();
        match &outcome {
            Ok(_) => info!(visits = stats.visits, hits = stats.hits, "evaluation finished"),
            Err(fault) => info!(%fault, "evaluation failed"),
        }
        EvalReport { outcome, stats }
    }

    fn runtime(&self) -> Result<tokio::runtime::Runtime, Fault> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Fault::Fatal(EvalError::Setup(err.to_string())))
    }

    fn block_on(&self, fut: impl Future<Output = Outcome>) -> Outcome {
        self.runtime()?.block_on(fut)
    }
}

/// Evaluate `program` with `inputs` using exactly `fragments` and no effect
/// handler.
pub fn run(
    program: &Program,
    inputs: Value,
    fragments: impl IntoIterator<Item = Rc<dyn Fragment>>,
) -> Outcome {
    let interpreter = Interpreter::new(fragments)
        .map_err(|err| Fault::Fatal(EvalError::Setup(err.to_string())))?;
    interpreter.run(program, inputs)
}
