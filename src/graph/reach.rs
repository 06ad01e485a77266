//! Orphan detection for freshly built graphs.
//!
//! Every node a build closure creates must be reachable from the program's
//! statements or result. A node that is not, and is not one of the inert
//! kinds (literals, placeholders, the input root), almost always means an
//! effect the author forgot to sequence with `do_`.

use super::node::{Node, NodeId};
use crate::error::BuildError;

/// Visit marks for one build pass.
pub struct Reachability {
    visited: Vec<bool>,
}

impl Reachability {
    /// Mark everything reachable from `roots` in `nodes`.
    pub fn mark(nodes: &[Node], roots: impl IntoIterator<Item = NodeId>) -> Self {
        let mut visited = vec![false; nodes.len()];
        let mut stack: Vec<NodeId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            let Some(slot) = visited.get_mut(id.index()) else {
                continue;
            };
            if *slot {
                continue;
            }
            *slot = true;
            stack.extend(nodes[id.index()].edges());
        }
        Self { visited }
    }

    /// Whether `id` was reached.
    pub fn is_reached(&self, id: NodeId) -> bool {
        self.visited.get(id.index()).copied().unwrap_or(false)
    }

    /// Unreached nodes whose kind is not inert.
    pub fn orphans<'n>(&self, nodes: &'n [Node], is_inert: impl Fn(&str) -> bool) -> Vec<&'n Node> {
        nodes
            .iter()
            .filter(|node| !self.is_reached(node.id) && !is_inert(&node.kind))
            .collect()
    }
}

/// Fail with [`BuildError::UnreachableNodes`] when any non-inert node is orphaned.
pub fn check(
    nodes: &[Node],
    statements: &[NodeId],
    result: NodeId,
    is_inert: impl Fn(&str) -> bool,
) -> Result<(), BuildError> {
    let marks = Reachability::mark(
        nodes,
        statements.iter().copied().chain(std::iter::once(result)),
    );
    let orphans = marks.orphans(nodes, is_inert);
    if orphans.is_empty() {
        Ok(())
    } else {
        Err(BuildError::UnreachableNodes {
            kinds: orphans.iter().map(|node| node.kind.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::Field;

    fn graph() -> Vec<Node> {
        vec![
            Node::new(NodeId(0), "core/input"),
            Node::new(NodeId(1), "core/prop").with("object", Field::Child(NodeId(0))),
            Node::new(NodeId(2), "effect/perform").with("payload", Field::Child(NodeId(1))),
            Node::new(NodeId(3), "core/literal"),
        ]
    }

    #[test]
    fn reports_unreachable_effects() {
        let nodes = graph();
        let err = check(&nodes, &[], NodeId(1), |kind| {
            matches!(kind, "core/literal" | "core/input")
        })
        .unwrap_err();
        match err {
            BuildError::UnreachableNodes { kinds } => assert_eq!(kinds, vec!["effect/perform"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn statements_count_as_roots() {
        let nodes = graph();
        assert!(check(&nodes, &[NodeId(2)], NodeId(1), |kind| kind == "core/literal").is_ok());
    }
}
