// ============================================================
// Layer 3 — Node Descriptors
// ============================================================
// A node names one tensor flowing in or out of a network,
// together with its per-example shape (None = variable length).
//
// The adapter accepts either a single node or a list of nodes for
// its inputs and outputs. `NodeList` normalises both forms into an
// ordered sequence.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name:  String,
    pub shape: Vec<Option<usize>>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, shape: impl Into<Vec<Option<usize>>>) -> Self {
        Self { name: name.into(), shape: shape.into() }
    }
}

impl fmt::Display for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self
            .shape
            .iter()
            .map(|d| d.map_or_else(|| "None".to_string(), |d| d.to_string()))
            .collect();
        write!(f, "{} (None, {})", self.name, dims.join(", "))
    }
}

/// Ordered, non-empty sequence of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeList(Vec<NodeSpec>);

impl NodeList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeSpec> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[NodeSpec] {
        &self.0
    }
}

impl From<NodeSpec> for NodeList {
    fn from(node: NodeSpec) -> Self {
        NodeList(vec![node])
    }
}

impl From<Vec<NodeSpec>> for NodeList {
    fn from(nodes: Vec<NodeSpec>) -> Self {
        NodeList(nodes)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_becomes_singleton() {
        let list: NodeList = NodeSpec::new("input", vec![None, Some(32)]).into();
        assert_eq!(list.len(), 1);
        assert_eq!(list.as_slice()[0].name, "input");
    }

    #[test]
    fn test_list_keeps_order() {
        let list: NodeList = vec![
            NodeSpec::new("a", vec![None]),
            NodeSpec::new("b", vec![Some(1)]),
        ].into();
        let names: Vec<&str> = list.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_display_shape() {
        let node = NodeSpec::new("labels", vec![None]);
        assert_eq!(node.to_string(), "labels (None, None)");
    }
}
