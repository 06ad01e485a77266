//! effgraph – typed programs as expression graphs
//!
//! This crate builds and evaluates programs that are data:
//! - A build closure runs once against a [`Builder`], producing an immutable
//!   [`Program`] graph with a structural hash
//! - Polymorphic operations (`eq`, `lt`, ...) resolve to concrete node kinds
//!   at build time through plugin-declared trait implementations
//! - Evaluation walks the graph through pluggable interpreter fragments that
//!   suspend on child visits and named effects
//! - Shared subexpressions are evaluated once per evaluation, except where
//!   they depend on loop variables or streamed batches
//! - Concurrency, deadline, retry and error-recovery combinators, plus
//!   transactional scoping for stateful external resources
//!
//! ```no_run
//! use effgraph::prelude::*;
//!
//! let plugins = PluginSet::standard()?;
//! let schema = Schema::record([("x", Schema::Number)]);
//! let program = plugins.build(schema, |b| b.input().get("x").mul(2))?;
//! let out = plugins.interpreter()?.run(&program, Value::from(serde_json::json!({"x": 21})));
//! assert_eq!(out, Ok(Value::Number(42.0)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Program construction
pub mod builder;
/// Evaluation settings
pub mod config;
/// Error types
pub mod error;
/// Program graphs, schemas and hashing
pub mod graph;
/// The evaluation driver and fragment protocol
pub mod interp;
/// Plugin registry and composition
pub mod plugin;
/// Stock plugins
pub mod plugins;

// Re-export key types for convenience
pub use builder::{Builder, Expr, Lift};
pub use config::EvalConfig;
pub use error::{BuildError, BuildResult, ConfigError, EvalError, Fault, Outcome};
pub use graph::{Program, Schema, TypeTag};
pub use interp::{EffectHandler, EvalReport, Interpreter, MockHandler, Value};
pub use plugin::{Plugin, PluginSet, TraitImpl};

/// Current version of effgraph
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build a program against the standard plugin set.
pub fn build<F>(schema: Schema, f: F) -> BuildResult<Program>
where
    F: for<'b> FnOnce(&'b Builder) -> Expr<'b>,
{
    PluginSet::standard()?.build(schema, f)
}

/// Everything a build closure usually needs in scope.
pub mod prelude {
    pub use crate::builder::{Builder, Expr, Lift};
    pub use crate::graph::{Program, Schema};
    pub use crate::interp::{Interpreter, MockHandler, Value};
    pub use crate::plugin::PluginSet;
    pub use crate::plugins::boolean::BoolOps;
    pub use crate::plugins::effect::EffectOps;
    pub use crate::plugins::error::ErrorOps;
    pub use crate::plugins::fiber::FiberOps;
    pub use crate::plugins::num::NumOps;
    pub use crate::plugins::store::StoreOps;
    pub use crate::plugins::text::TextOps;
}
