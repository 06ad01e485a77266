//! Blake3 structural hashing.
//!
//! Each node's digest covers its kind and fields, with child references
//! replaced by the child's digest. Node identities never enter the digest, and
//! synthetic idents are renumbered by order of first appearance so two builds
//! of the same closure hash identically.

use blake3::Hasher;
use std::collections::HashMap;

use super::node::{Field, Node, NodeId};

/// Compute the structural digest of the graph rooted at `root`.
pub fn structural_hash(nodes: &[Node], root: NodeId) -> String {
    let mut idents: HashMap<u32, u32> = HashMap::new();
    let mut digests: Vec<[u8; 32]> = Vec::with_capacity(nodes.len());

    // Children always precede parents, so one forward pass suffices.
    for node in nodes {
        let mut hasher = Hasher::new();
        hasher.update(node.kind.as_bytes());
        hasher.update(&[0]);
        for (name, field) in &node.fields {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            match field {
                Field::Child(id) => {
                    hasher.update(b"c");
                    hasher.update(&digests[id.index()]);
                }
                Field::Children(ids) => {
                    hasher.update(b"l");
                    hasher.update(&(ids.len() as u64).to_le_bytes());
                    for id in ids {
                        hasher.update(&digests[id.index()]);
                    }
                }
                Field::Entries(entries) => {
                    hasher.update(b"e");
                    hasher.update(&(entries.len() as u64).to_le_bytes());
                    for (key, id) in entries {
                        hasher.update(key.as_bytes());
                        hasher.update(&[0]);
                        hasher.update(&digests[id.index()]);
                    }
                }
                Field::Data(value) => {
                    hasher.update(b"d");
                    hasher.update(value.to_string().as_bytes());
                }
                Field::Ident(ident) => {
                    let next = idents.len() as u32;
                    let ordinal = *idents.entry(*ident).or_insert(next);
                    hasher.update(b"i");
                    hasher.update(&ordinal.to_le_bytes());
                }
            }
            hasher.update(&[0xff]);
        }
        digests.push(*hasher.finalize().as_bytes());
    }

    digests
        .get(root.index())
        .map(|digest| blake3::Hash::from(*digest).to_hex().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::value::Value;

    fn literal(id: u32, n: f64) -> Node {
        Node::new(NodeId(id), "core/literal").with("value", Field::Data(Value::Number(n)))
    }

    #[test]
    fn identities_do_not_affect_digest() {
        let a = vec![
            literal(0, 1.0),
            literal(1, 2.0),
            Node::new(NodeId(2), "num/add")
                .with("left", Field::Child(NodeId(0)))
                .with("right", Field::Child(NodeId(1))),
        ];
        // Same structure with an unrelated node interleaved.
        let b = vec![
            literal(0, 1.0),
            literal(1, 99.0),
            literal(2, 2.0),
            Node::new(NodeId(3), "num/add")
                .with("left", Field::Child(NodeId(0)))
                .with("right", Field::Child(NodeId(2))),
        ];
        assert_eq!(structural_hash(&a, NodeId(2)), structural_hash(&b, NodeId(3)));
    }

    #[test]
    fn ident_values_are_normalized() {
        let with_ident = |ident| {
            vec![Node::new(NodeId(0), "core/let_get").with("cell", Field::Ident(ident))]
        };
        assert_eq!(
            structural_hash(&with_ident(3), NodeId(0)),
            structural_hash(&with_ident(41), NodeId(0))
        );
    }

    #[test]
    fn literals_change_digest() {
        assert_ne!(
            structural_hash(&[literal(0, 1.0)], NodeId(0)),
            structural_hash(&[literal(0, 2.0)], NodeId(0))
        );
    }
}
