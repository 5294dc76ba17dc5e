use crate::element::ElementKind;
use crate::error::FemError;
use crate::tree::TreeIdx;

use std::sync::Arc;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// A quadrilateral element of the mesh.
///
/// Nodes are ordered SW, SE, NW, NE; edges are ordered S, N, W, E. An element
/// stays in the arena for the life of the mesh: refinement deactivates the
/// father (its sons take over the geometry) and de-refinement deactivates the
/// sons and reactivates the father. Only active elements participate in
/// interpolation, numbering and assembly.
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    pub nodes: [usize; 4],
    pub edges: [usize; 4],
    pub kind: Arc<dyn ElementKind>,
    /// Number of refinement generations between this element and its
    /// level-0 ancestor
    pub refine_level: u8,
    /// Diagnostic id assigned by external drivers; -1 when unset
    pub number: i64,
    pub tree: Option<TreeIdx>,
    pub active: bool,
}

impl Elem {
    pub fn new(id: usize, nodes: [usize; 4], edges: [usize; 4], kind: Arc<dyn ElementKind>) -> Self {
        Self {
            id,
            nodes,
            edges,
            kind,
            refine_level: 0,
            number: -1,
            tree: None,
            active: true,
        }
    }

    /// Which side of its k-th edge this element occupies
    pub fn side_on_edge(k: usize) -> usize {
        1 - (k & 1)
    }

    /// Produce a Json Object that describes this Elem
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "nodes": JsonValue::from(self.nodes.to_vec()),
            "edges": JsonValue::from(self.edges.to_vec()),
            "kind": self.kind.name(),
            "refine_level": self.refine_level,
            "number": self.number,
            "active": self.active,
        }
    }
}

/// An element whose sons are being constructed: node and edge slots fill in
/// as the refinement executor discovers or creates them. Converted to a full
/// `Elem` once every slot is set.
#[derive(Debug, Clone)]
pub struct ElemUninit {
    pub id: usize,
    pub nodes: [Option<usize>; 4],
    pub edges: [Option<usize>; 4],
    pub kind: Arc<dyn ElementKind>,
    pub refine_level: u8,
    pub tree: Option<TreeIdx>,
}

impl ElemUninit {
    pub fn new(id: usize, kind: Arc<dyn ElementKind>, refine_level: u8) -> Self {
        Self {
            id,
            nodes: [None; 4],
            edges: [None; 4],
            kind,
            refine_level,
            tree: None,
        }
    }

    /// Fill the q-th node slot. Re-assignment with the same id is a no-op;
    /// disagreement is a bug in the refinement executor.
    pub fn set_node(&mut self, q: usize, node_id: usize) {
        match self.nodes[q] {
            None => self.nodes[q] = Some(node_id),
            Some(existing) => assert_eq!(
                existing, node_id,
                "Node {} of uninitialized Elem {} was already set to a different node!",
                q, self.id,
            ),
        }
    }

    pub fn set_edge(&mut self, k: usize, edge_id: usize) {
        match self.edges[k] {
            None => self.edges[k] = Some(edge_id),
            Some(existing) => assert_eq!(
                existing, edge_id,
                "Edge {} of uninitialized Elem {} was already set to a different edge!",
                k, self.id,
            ),
        }
    }

    /// Have all node slots been filled?
    pub fn nodes_built(&self) -> bool {
        self.nodes.iter().all(Option::is_some)
    }

    pub fn into_elem(self) -> Result<Elem, FemError> {
        match (
            self.nodes[0], self.nodes[1], self.nodes[2], self.nodes[3],
            self.edges[0], self.edges[1], self.edges[2], self.edges[3],
        ) {
            (Some(n0), Some(n1), Some(n2), Some(n3), Some(e0), Some(e1), Some(e2), Some(e3)) => {
                Ok(Elem {
                    id: self.id,
                    nodes: [n0, n1, n2, n3],
                    edges: [e0, e1, e2, e3],
                    kind: self.kind,
                    refine_level: self.refine_level,
                    number: -1,
                    tree: self.tree,
                    active: true,
                })
            }
            _ => Err(FemError::topology(
                "ElemUninit::into_elem()",
                format!(
                    "uninitialized Elem {} is missing nodes or edges (nodes: {:?}, edges: {:?})",
                    self.id, self.nodes, self.edges,
                ),
            )),
        }
    }
}
