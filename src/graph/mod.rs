//! Immutable program graphs
//!
//! A [`Program`] is an append-only arena of [`Node`]s built once by the
//! [`crate::builder`] and never mutated afterwards. Node identities are dense
//! indices, so every per-node side table (reachability marks, memo slots,
//! taint bits) is a plain vector indexed by [`NodeId`].

/// Structural digest of a program graph.
pub mod hash;
/// Node, field and identifier types.
pub mod node;
/// The built program container.
pub mod program;
/// Build-time orphan detection.
pub mod reach;
/// Input schema and semantic type tags.
pub mod schema;

pub use node::{Field, Node, NodeId};
pub use program::Program;
pub use schema::{Schema, TypeTag};
