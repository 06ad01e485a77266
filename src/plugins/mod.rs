//! Stock plugins.
//!
//! [`standard`] returns every plugin that needs no external resource;
//! [`store::plugin`] is added separately because it is parameterised by a
//! client.

/// Logical operators and the boolean `eq` implementation.
pub mod boolean;
/// Literals, structure, sequencing, cells, loops, lambdas and recursion.
pub mod core;
/// Named effects delegated to the injected handler.
pub mod effect;
/// Raising and recovering from failures.
pub mod error;
/// Concurrency, deadlines and retry.
pub mod fiber;
/// Arithmetic and the number implementations of `eq` and `ord`.
pub mod num;
/// Transactional external resources.
pub mod store;
/// Strings and the string implementations of `eq` and `ord`.
pub mod text;

use crate::plugin::Plugin;

/// The core, scalar, error, fiber and effect plugins, in that order.
pub fn standard() -> Vec<Plugin> {
    vec![
        core::plugin(),
        num::plugin(),
        boolean::plugin(),
        text::plugin(),
        error::plugin(),
        fiber::plugin(),
        effect::plugin(),
    ]
}
