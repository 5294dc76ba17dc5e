use super::space::ParaDir;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// An edge between two `Node`s, shared by up to two `Elem`s.
///
/// Edge nodes are stored in ascending-coordinate order: West to East for
/// U-directed edges, South to North for V-directed ones. When the element on
/// one side of an edge is refined the edge is bisected: it keeps its own
/// identity (the coarse side still refers to it) and gains two child edges
/// plus the midpoint node they share.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: usize,
    pub nodes: [usize; 2],
    pub dir: ParaDir,
    pub boundary: bool,
    parent: Option<usize>,
    children: Option<[usize; 2]>,
    midpoint: Option<usize>,
    // adjacent element per side; for a U edge side 0 is below and side 1 is
    // above, for a V edge side 0 is left (West) and side 1 is right (East)
    elems: [Option<usize>; 2],
}

impl Edge {
    pub fn new(id: usize, nodes: [usize; 2], dir: ParaDir, boundary: bool) -> Self {
        Self {
            id,
            nodes,
            dir,
            boundary,
            parent: None,
            children: None,
            midpoint: None,
            elems: [None, None],
        }
    }

    pub fn new_child(id: usize, nodes: [usize; 2], parent: &Self) -> Self {
        Self {
            id,
            nodes,
            dir: parent.dir,
            boundary: parent.boundary,
            parent: Some(parent.id),
            children: None,
            midpoint: None,
            elems: [None, None],
        }
    }

    /// Record this edge's bisection. Panics if it was already bisected with a
    /// different midpoint (edges are shared; bisection must agree).
    pub fn set_children(&mut self, children: [usize; 2], midpoint: usize) {
        match self.midpoint {
            None => {
                self.children = Some(children);
                self.midpoint = Some(midpoint);
            }
            Some(existing) => assert_eq!(
                existing, midpoint,
                "Edge {} was already bisected with a different midpoint node!",
                self.id,
            ),
        }
    }

    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// Child edges in the same node order as the parent: [first-half, second-half]
    pub fn children(&self) -> Option<[usize; 2]> {
        self.children
    }

    pub fn midpoint_node(&self) -> Option<usize> {
        self.midpoint
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn set_elem(&mut self, side: usize, elem_id: usize) {
        self.elems[side] = Some(elem_id);
    }

    pub fn clear_elem(&mut self, side: usize) {
        self.elems[side] = None;
    }

    pub fn elem_on_side(&self, side: usize) -> Option<usize> {
        self.elems[side]
    }

    /// Produce a Json Object that describes this Edge
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "nodes": JsonValue::from(self.nodes.to_vec()),
            "dir": self.dir,
            "boundary": self.boundary,
            "children": match self.children {
                Some(children) => JsonValue::from(children.to_vec()),
                None => JsonValue::from(Vec::<usize>::new()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bisection_is_recorded_once() {
        let mut edge = Edge::new(0, [3, 4], ParaDir::U, false);
        assert!(!edge.has_children());

        edge.set_children([10, 11], 9);
        assert!(edge.has_children());
        assert_eq!(edge.children(), Some([10, 11]));
        assert_eq!(edge.midpoint_node(), Some(9));

        // agreeing re-registration from the other side is fine
        edge.set_children([10, 11], 9);
        assert_eq!(edge.midpoint_node(), Some(9));
    }

    #[test]
    #[should_panic]
    fn conflicting_bisection_is_rejected() {
        let mut edge = Edge::new(0, [3, 4], ParaDir::V, false);
        edge.set_children([10, 11], 9);
        edge.set_children([12, 13], 8);
    }

    #[test]
    fn children_inherit_direction_and_boundary() {
        let parent = Edge::new(2, [0, 1], ParaDir::V, true);
        let child = Edge::new_child(5, [0, 9], &parent);
        assert_eq!(child.dir, ParaDir::V);
        assert!(child.boundary);
        assert_eq!(child.parent(), Some(2));
    }
}
