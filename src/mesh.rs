pub mod edge;
pub mod elem;
pub mod hanging;
pub mod node;
pub mod refinement;
pub mod space;

use crate::element::{local_node_coords, ElementKind};
use crate::error::FemError;
use crate::tree::Tree;
use edge::Edge;
use elem::{Elem, ElemUninit};
use hanging::HangInfo;
use node::Node;
use refinement::RefinementPlan;
use space::{ParaDir, Point};

use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// Elements with an edge shorter than twice this length refuse to split
pub const MIN_EDGE_LENGTH: f64 = 3.0518e-5;

/// Maximum number of refinement generations below a level-0 element
pub const MAX_REFINE_LEVEL: u8 = 15;

/// Interface discrepancies above this magnitude are logged as warnings by
/// `Mesh::check_integrity`
pub const MAX_INTEGRITY_TOLERANCE: f64 = 1e-12;

/// Result of one element refinement
#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    /// Ids of the newly activated son elements (SW, SE, NW, NE)
    pub sons: SmallVec<[usize; 4]>,
    /// Ids of the nodes created by this refinement (reused neighbours'
    /// midpoints are not listed)
    pub new_node_ids: Vec<usize>,
    /// Per son: whether its node slots were already filled before this call
    pub was_already_built: SmallVec<[bool; 4]>,
}

/// 2D quadrilateral mesh with hierarchical h-refinement and hanging-node
/// constraint management.
///
/// Nodes, edges, and elements live in arenas and are addressed by index.
/// Refinement never removes entries: fathers and de-refined sons are
/// deactivated in place so that ids stay stable. Field values are read
/// through the hanging-aware accessors (`nodal_value`, `nodal_position`),
/// which resolve constraint records transparently.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub elems: Vec<Elem>,
    tree: Tree,
    ntstorage: usize,
}

impl Mesh {
    /// Construct an `nx` by `ny` rectangular mesh of equal elements spanning
    /// `[0, width] x [0, height]`, all of the given kind, with `ntstorage`
    /// history values per unknown
    pub fn rectangular(
        nx: usize,
        ny: usize,
        width: f64,
        height: f64,
        kind: Arc<dyn ElementKind>,
        ntstorage: usize,
    ) -> Self {
        assert!(nx > 0 && ny > 0, "Mesh dimensions must be nonzero!");

        let nvalue = kind.nvalue();
        let node_id = |i: usize, j: usize| j * (nx + 1) + i;

        let mut nodes = Vec::with_capacity((nx + 1) * (ny + 1));
        for j in 0..=ny {
            for i in 0..=nx {
                let coords = Point::new(
                    width * i as f64 / nx as f64,
                    height * j as f64 / ny as f64,
                );
                let boundary = i == 0 || i == nx || j == 0 || j == ny;
                nodes.push(Node::new(node_id(i, j), coords, ntstorage, nvalue, boundary));
            }
        }

        // horizontal (U) edges first, then vertical (V) edges
        let h_edge = |i: usize, j: usize| j * nx + i;
        let v_edge = |i: usize, j: usize| (ny + 1) * nx + i * ny + j;

        let mut edges = Vec::with_capacity((ny + 1) * nx + (nx + 1) * ny);
        for j in 0..=ny {
            for i in 0..nx {
                edges.push(Edge::new(
                    h_edge(i, j),
                    [node_id(i, j), node_id(i + 1, j)],
                    ParaDir::U,
                    j == 0 || j == ny,
                ));
            }
        }
        for i in 0..=nx {
            for j in 0..ny {
                edges.push(Edge::new(
                    v_edge(i, j),
                    [node_id(i, j), node_id(i, j + 1)],
                    ParaDir::V,
                    i == 0 || i == nx,
                ));
            }
        }

        let mut tree = Tree::new();
        let mut elems = Vec::with_capacity(nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                let id = j * nx + i;
                let elem_nodes = [
                    node_id(i, j),
                    node_id(i + 1, j),
                    node_id(i, j + 1),
                    node_id(i + 1, j + 1),
                ];
                let elem_edges = [h_edge(i, j), h_edge(i, j + 1), v_edge(i, j), v_edge(i + 1, j)];
                let mut elem = Elem::new(id, elem_nodes, elem_edges, kind.clone());
                elem.tree = Some(tree.new_root(id));
                for (k, &e) in elem_edges.iter().enumerate() {
                    edges[e].set_elem(Elem::side_on_edge(k), id);
                }
                elems.push(elem);
            }
        }

        Self {
            nodes,
            edges,
            elems,
            tree,
            ntstorage,
        }
    }

    /// Construct a Mesh from a JSON file of the form
    /// `{ "nodes": [[x, y], ...], "elements": [[sw, se, nw, ne], ...] }`.
    /// Edge connectivity and boundary flags are derived from the elements.
    pub fn from_file(
        path: impl AsRef<std::path::Path>,
        kind: Arc<dyn ElementKind>,
        ntstorage: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let parsed = json::parse(&std::fs::read_to_string(path)?)?;

        let points: Vec<Point> = parsed["nodes"]
            .members()
            .map(|coords| {
                match (coords[0].as_f64(), coords[1].as_f64()) {
                    (Some(x), Some(y)) => Ok(Point::new(x, y)),
                    _ => Err(FemError::topology(
                        "Mesh::from_file()",
                        "node entries must be [x, y] pairs",
                    )),
                }
            })
            .collect::<Result<_, _>>()?;

        let mut elem_nodes: Vec<[usize; 4]> = Vec::new();
        for member in parsed["elements"].members() {
            let mut ids = [0; 4];
            for (q, slot) in ids.iter_mut().enumerate() {
                *slot = member[q].as_usize().ok_or_else(|| {
                    FemError::topology(
                        "Mesh::from_file()",
                        "element entries must be 4 node ids (SW, SE, NW, NE)",
                    )
                })?;
                if *slot >= points.len() {
                    return Err(Box::new(FemError::range(
                        "Mesh::from_file()",
                        format!("node id {} does not exist; the file defines {} nodes", slot, points.len()),
                    )));
                }
            }
            elem_nodes.push(ids);
        }

        // discover shared edges; an edge referenced by a single element is a
        // boundary edge
        let mut edge_ids: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        let mut edges: Vec<Edge> = Vec::new();
        let mut edge_use_count: Vec<usize> = Vec::new();
        let mut elem_edges: Vec<[usize; 4]> = Vec::new();

        for ids in &elem_nodes {
            let sides = [
                [ids[0], ids[1]], // S
                [ids[2], ids[3]], // N
                [ids[0], ids[2]], // W
                [ids[1], ids[3]], // E
            ];
            let mut this_elems_edges = [0; 4];
            for (k, side) in sides.iter().enumerate() {
                let key = (side[0].min(side[1]), side[0].max(side[1]));
                let edge_id = *edge_ids.entry(key).or_insert_with(|| {
                    let id = edges.len();
                    let dir = points[side[0]].orientation_with(&points[side[1]]);
                    edges.push(Edge::new(id, [side[0], side[1]], dir, false));
                    edge_use_count.push(0);
                    id
                });
                edge_use_count[edge_id] += 1;
                this_elems_edges[k] = edge_id;
            }
            elem_edges.push(this_elems_edges);
        }

        let mut boundary_nodes = vec![false; points.len()];
        for (edge, &count) in edges.iter_mut().zip(edge_use_count.iter()) {
            if count == 1 {
                edge.boundary = true;
                boundary_nodes[edge.nodes[0]] = true;
                boundary_nodes[edge.nodes[1]] = true;
            }
        }

        let nvalue = kind.nvalue();
        let nodes: Vec<Node> = points
            .iter()
            .enumerate()
            .map(|(id, &coords)| Node::new(id, coords, ntstorage, nvalue, boundary_nodes[id]))
            .collect();

        let mut tree = Tree::new();
        let mut elems = Vec::with_capacity(elem_nodes.len());
        for (id, (&nodes4, &edges4)) in elem_nodes.iter().zip(elem_edges.iter()).enumerate() {
            let mut elem = Elem::new(id, nodes4, edges4, kind.clone());
            elem.tree = Some(tree.new_root(id));
            for (k, &e) in edges4.iter().enumerate() {
                edges[e].set_elem(Elem::side_on_edge(k), id);
            }
            elems.push(elem);
        }

        Ok(Self {
            nodes,
            edges,
            elems,
            tree,
            ntstorage,
        })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Number of history values stored per unknown (1 = present only)
    pub fn ntstorage(&self) -> usize {
        self.ntstorage
    }

    /// Ids of the currently active elements
    pub fn active_elems(&self) -> impl Iterator<Item = usize> + '_ {
        self.elems
            .iter()
            .filter(|elem| elem.active)
            .map(|elem| elem.id)
    }

    // ----------------------------------------------------------------------------------------------------
    // hanging-aware field access
    // ----------------------------------------------------------------------------------------------------

    /// Value of the i-th unknown at a node, resolving hanging constraints:
    /// a constrained node reports the weighted sum of its masters' values
    pub fn nodal_value(&self, t: usize, node_id: usize, i: usize) -> f64 {
        let node = &self.nodes[node_id];
        match node.hanging_for(i as i32) {
            Some(hang) if hang.is_hanging(node_id) => hang
                .masters()
                .map(|&(master, weight)| weight * self.nodal_value(t, master, i))
                .sum(),
            _ => node.value(t, i),
        }
    }

    /// Position of a node, resolving the geometric hanging constraint
    pub fn nodal_position(&self, t: usize, node_id: usize) -> Point {
        let node = &self.nodes[node_id];
        match node.hanging_for(-1) {
            Some(hang) if hang.is_hanging(node_id) => {
                hang.masters().fold(Point::new(0.0, 0.0), |acc, &(master, weight)| {
                    let pos = self.nodal_position(t, master);
                    Point::new(acc.x + weight * pos.x, acc.y + weight * pos.y)
                })
            }
            _ => node.position(t),
        }
    }

    /// Position interpolated within an element at reference coordinates `s`
    pub fn interpolated_position(&self, elem_id: usize, t: usize, s: [f64; 2]) -> Point {
        let elem = &self.elems[elem_id];
        let shape = elem.kind.shape(s);
        elem.nodes
            .iter()
            .zip(shape.iter())
            .fold(Point::new(0.0, 0.0), |acc, (&node_id, &weight)| {
                let pos = self.nodal_position(t, node_id);
                Point::new(acc.x + weight * pos.x, acc.y + weight * pos.y)
            })
    }

    /// The i-th unknown interpolated within an element at reference
    /// coordinates `s`, through the kind's interpolating basis
    pub fn interpolated_value(&self, elem_id: usize, t: usize, i: usize, s: [f64; 2]) -> f64 {
        let elem = &self.elems[elem_id];
        let value_id = i as i32;
        let basis = elem.kind.interpolating_basis(s, value_id);
        (0..elem.kind.ninterpolating_node(value_id))
            .map(|n| {
                let local = elem.kind.interpolating_node(n, value_id);
                basis[n] * self.nodal_value(t, elem.nodes[local], i)
            })
            .sum()
    }

    // ----------------------------------------------------------------------------------------------------
    // refinement
    // ----------------------------------------------------------------------------------------------------

    /// Request fresh, unbuilt sons for an active element. The sons' node and
    /// edge slots are empty; `execute_t_refinement` fills them in. Fails with
    /// a topology error if the element already has sons, is inactive, is at
    /// `MAX_REFINE_LEVEL`, or has edges too short to bisect.
    pub fn split_elem(&mut self, elem_id: usize) -> Result<Vec<ElemUninit>, FemError> {
        let elem = self.elems.get(elem_id).ok_or_else(|| {
            FemError::range(
                "Mesh::split_elem()",
                format!("element {} does not exist; the mesh has {} elements", elem_id, self.elems.len()),
            )
        })?;

        if !elem.active {
            return Err(FemError::topology(
                "Mesh::split_elem()",
                format!("element {} is not active", elem_id),
            ));
        }
        let tree_idx = elem.tree.ok_or_else(|| {
            FemError::topology(
                "Mesh::split_elem()",
                format!("element {} is not registered in the refinement tree", elem_id),
            )
        })?;
        if self.tree.nsons(tree_idx) != 0 {
            return Err(FemError::topology(
                "Mesh::split_elem()",
                format!("element {} already has sons", elem_id),
            ));
        }
        if elem.refine_level >= MAX_REFINE_LEVEL {
            return Err(FemError::topology(
                "Mesh::split_elem()",
                format!("element {} is already at the maximum refinement level", elem_id),
            ));
        }

        let nsons = elem.kind.required_nsons();
        if nsons == 0 {
            return Err(FemError::topology(
                "Mesh::split_elem()",
                format!("element kind '{}' is not splittable", elem.kind.name()),
            ));
        }
        if nsons != 4 {
            return Err(FemError::not_implemented(
                "Mesh::split_elem()",
                format!(
                    "element kind '{}' requests {} sons; only isotropic 4-son refinement is supported",
                    elem.kind.name(),
                    nsons,
                ),
            ));
        }

        for &e in &elem.edges {
            let [n0, n1] = self.edges[e].nodes;
            let length = self.nodes[n0].position(0).dist(&self.nodes[n1].position(0));
            if length / 2.0 < MIN_EDGE_LENGTH {
                return Err(FemError::topology(
                    "Mesh::split_elem()",
                    format!(
                        "element {} cannot be split; edge {} would become shorter than {:e}",
                        elem_id, e, MIN_EDGE_LENGTH,
                    ),
                ));
            }
        }

        let kind = elem.kind.clone();
        let son_level = elem.refine_level + 1;
        let son_ids: Vec<usize> = (0..nsons).map(|q| self.elems.len() + q).collect();
        let son_tree_ids = self.tree.split(tree_idx, &son_ids)?;

        Ok(son_ids
            .iter()
            .zip(son_tree_ids.iter())
            .map(|(&id, &tree_id)| {
                let mut son = ElemUninit::new(id, kind.clone(), son_level);
                son.tree = Some(tree_id);
                son
            })
            .collect())
    }

    /// Isotropic T-refinement: build the 4 sons of `father_id` from the
    /// uninitialized elements returned by `split_elem`. Corner nodes are
    /// shared with the father, edge midpoints are shared with (or created
    /// for) the bisected father edges, and the centre node is created on the
    /// first build only. Positions and all unknowns are interpolated from
    /// the father's representation for every history value.
    ///
    /// Re-building sons that were already built registers nothing new: the
    /// outcome reports `was_already_built`, `new_node_ids` stays empty, and
    /// the sons keep their node and edge ids.
    pub fn execute_t_refinement(
        &mut self,
        father_id: usize,
        mut sons: Vec<ElemUninit>,
    ) -> Result<RefinementOutcome, FemError> {
        assert_eq!(
            sons.len(),
            4,
            "T-refinement of Elem {} requires exactly 4 sons!",
            father_id,
        );
        let father_nodes = self.elems[father_id].nodes;
        let father_edges = self.elems[father_id].edges;
        let mut new_node_ids = Vec::new();

        let was_already_built: SmallVec<[bool; 4]> =
            sons.iter().map(ElemUninit::nodes_built).collect();

        // bisect (or reuse the bisection of) each father edge
        // midpoint reference coordinates in the father: S, N, W, E
        const MID_COORDS: [[f64; 2]; 4] = [[0.5, 0.0], [0.5, 1.0], [0.0, 0.5], [1.0, 0.5]];
        let mut midpoints = [0usize; 4];
        let mut edge_children = [[0usize; 2]; 4];

        for k in 0..4 {
            let e = father_edges[k];
            if let (Some(midpoint), Some(children)) =
                (self.edges[e].midpoint_node(), self.edges[e].children())
            {
                // the neighbour across this edge bisected it first; refresh
                // the midpoint's raw storage from the father, since the node
                // may have been hanging (or obsolete) until now
                self.refresh_node_from_elem(midpoint, father_id, MID_COORDS[k]);
                midpoints[k] = midpoint;
                edge_children[k] = children;
            } else {
                let boundary = self.edges[e].boundary;
                let midpoint = self.create_node_in_elem(father_id, MID_COORDS[k], boundary);
                new_node_ids.push(midpoint);

                let [n0, n1] = self.edges[e].nodes;
                let child_0 = self.edges.len();
                let child_edge_0 = Edge::new_child(child_0, [n0, midpoint], &self.edges[e]);
                let child_edge_1 = Edge::new_child(child_0 + 1, [midpoint, n1], &self.edges[e]);
                self.edges.push(child_edge_0);
                self.edges.push(child_edge_1);
                self.edges[e].set_children([child_0, child_0 + 1], midpoint);

                midpoints[k] = midpoint;
                edge_children[k] = [child_0, child_0 + 1];
            }
        }

        // a son built earlier carries the centre at local node 3 - q; only a
        // first build creates it
        let centre = match sons.iter().enumerate().find_map(|(q, son)| son.nodes[3 - q]) {
            Some(centre) => {
                self.refresh_node_from_elem(centre, father_id, [0.5, 0.5]);
                centre
            }
            None => {
                let centre = self.create_node_in_elem(father_id, [0.5, 0.5], false);
                new_node_ids.push(centre);
                centre
            }
        };

        // internal edges joining the centre to the four midpoints, reusing
        // the ids recorded in already-built sons' edge slots
        let recorded = [
            sons[0].edges[3].or(sons[1].edges[2]),
            sons[2].edges[3].or(sons[3].edges[2]),
            sons[0].edges[1].or(sons[2].edges[0]),
            sons[1].edges[1].or(sons[3].edges[0]),
        ];
        let endpoints = [
            ([midpoints[0], centre], ParaDir::V),
            ([centre, midpoints[1]], ParaDir::V),
            ([midpoints[2], centre], ParaDir::U),
            ([centre, midpoints[3]], ParaDir::U),
        ];
        let mut internal = [0usize; 4];
        for ((slot, existing), (nodes, dir)) in
            internal.iter_mut().zip(recorded).zip(endpoints)
        {
            *slot = match existing {
                Some(e) => e,
                None => {
                    let e = self.edges.len();
                    self.edges.push(Edge::new(e, nodes, dir, false));
                    e
                }
            };
        }
        let [i_s, i_n, i_w, i_e] = internal;

        // per son: nodes (SW, SE, NW, NE) and edges (S, N, W, E)
        let son_nodes = [
            [father_nodes[0], midpoints[0], midpoints[2], centre],
            [midpoints[0], father_nodes[1], centre, midpoints[3]],
            [midpoints[2], centre, father_nodes[2], midpoints[1]],
            [centre, midpoints[3], midpoints[1], father_nodes[3]],
        ];
        let son_edges = [
            [edge_children[0][0], i_w, edge_children[2][0], i_s],
            [edge_children[0][1], i_e, i_s, edge_children[3][0]],
            [i_w, edge_children[1][0], edge_children[2][1], i_n],
            [i_e, edge_children[1][1], i_n, edge_children[3][1]],
        ];

        for (q, son) in sons.iter_mut().enumerate() {
            for r in 0..4 {
                son.set_node(r, son_nodes[q][r]);
                son.set_edge(r, son_edges[q][r]);
            }
        }

        // activate the sons and retire the father; a son built earlier is
        // re-registered in place rather than pushed again
        let mut son_ids = SmallVec::new();
        for son in sons {
            let elem = son.into_elem()?;
            for (k, &e) in elem.edges.iter().enumerate() {
                self.edges[e].set_elem(Elem::side_on_edge(k), elem.id);
            }
            son_ids.push(elem.id);
            if let Some(built) = self.elems.get_mut(elem.id) {
                assert_eq!(
                    built.nodes, elem.nodes,
                    "Rebuilt son {} of Elem {} changed its nodes!",
                    elem.id, father_id,
                );
                assert_eq!(
                    built.edges, elem.edges,
                    "Rebuilt son {} of Elem {} changed its edges!",
                    elem.id, father_id,
                );
                built.active = true;
            } else {
                assert_eq!(
                    elem.id,
                    self.elems.len(),
                    "Sons of Elem {} must be registered in creation order!",
                    father_id,
                );
                self.elems.push(elem);
            }
        }

        self.elems[father_id].active = false;
        for (k, &e) in father_edges.iter().enumerate() {
            self.edges[e].clear_elem(Elem::side_on_edge(k));
        }

        log::debug!(
            "refined element {} into sons {:?} ({} new nodes)",
            father_id,
            son_ids,
            new_node_ids.len(),
        );

        Ok(RefinementOutcome {
            sons: son_ids,
            new_node_ids,
            was_already_built,
        })
    }

    /// Split an active element into 4 sons (see `split_elem` and
    /// `execute_t_refinement`). Does not run the hanging-node pass; callers
    /// doing a single refinement should follow up with `setup_hanging_nodes`,
    /// or use `apply_refinement_plan` which sequences everything.
    pub fn refine_elem(&mut self, elem_id: usize) -> Result<RefinementOutcome, FemError> {
        let sons = self.split_elem(elem_id)?;
        self.execute_t_refinement(elem_id, sons)
    }

    /// Create a node inside an element at reference coordinates `s`,
    /// interpolating position and all unknowns from the element's current
    /// representation for every history value
    fn create_node_in_elem(&mut self, elem_id: usize, s: [f64; 2], boundary: bool) -> usize {
        let id = self.nodes.len();
        let nvalue = self.elems[elem_id].kind.nvalue();

        let mut node = Node::new(id, self.interpolated_position(elem_id, 0, s), self.ntstorage, nvalue, boundary);
        for t in 0..self.ntstorage {
            node.set_position(t, self.interpolated_position(elem_id, t, s));
            for i in 0..nvalue {
                node.set_value(t, i, self.interpolated_value(elem_id, t, i, s));
            }
        }
        self.nodes.push(node);
        id
    }

    /// Refresh a reused node's raw storage from an element's current
    /// representation at reference coordinates `s`, for every history value,
    /// and clear its obsolete flag
    fn refresh_node_from_elem(&mut self, node_id: usize, elem_id: usize, s: [f64; 2]) {
        self.nodes[node_id].set_non_obsolete();
        let nvalue = self.elems[elem_id].kind.nvalue();
        for t in 0..self.ntstorage {
            let position = self.interpolated_position(elem_id, t, s);
            let mut refreshed = Vec::with_capacity(nvalue);
            for i in 0..nvalue {
                refreshed.push(self.interpolated_value(elem_id, t, i, s));
            }
            self.nodes[node_id].set_position(t, position);
            for (i, value) in refreshed.into_iter().enumerate() {
                self.nodes[node_id].set_value(t, i, value);
            }
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // de-refinement
    // ----------------------------------------------------------------------------------------------------

    /// Merge the sons of `father_id` back into their father: the father's
    /// representation is rebuilt from the sons, son-only nodes are marked
    /// obsolete, the sons are deactivated and their tree branch pruned.
    /// Fails with a topology error if any son has sons of its own.
    pub fn unrefine_elem(&mut self, father_id: usize) -> Result<(), FemError> {
        let father = self.elems.get(father_id).ok_or_else(|| {
            FemError::range(
                "Mesh::unrefine_elem()",
                format!("element {} does not exist; the mesh has {} elements", father_id, self.elems.len()),
            )
        })?;
        let tree_idx = father.tree.ok_or_else(|| {
            FemError::topology(
                "Mesh::unrefine_elem()",
                format!("element {} is not registered in the refinement tree", father_id),
            )
        })?;

        let son_ids: SmallVec<[usize; 4]> = self
            .tree
            .sons_of(tree_idx)
            .iter()
            .filter_map(|&son_idx| self.tree.element_of(son_idx))
            .collect();
        if son_ids.is_empty() {
            return Err(FemError::topology(
                "Mesh::unrefine_elem()",
                format!("element {} has no sons to merge", father_id),
            ));
        }
        for &son_tree in self.tree.sons_of(tree_idx) {
            if self.tree.nsons(son_tree) != 0 {
                return Err(FemError::topology(
                    "Mesh::unrefine_elem()",
                    format!(
                        "element {} cannot be rebuilt; some of its sons have sons of their own",
                        father_id,
                    ),
                ));
            }
        }

        self.rebuild_from_sons(father_id, &son_ids)?;

        // unbuild: son nodes the father does not reference become obsolete
        let father_nodes = self.elems[father_id].nodes;
        for &son_id in &son_ids {
            for &node_id in &self.elems[son_id].nodes {
                if !father_nodes.contains(&node_id) {
                    self.nodes[node_id].set_obsolete();
                }
            }
        }

        // deactivate the sons with both sides of each element-tree link nulled
        let detached = self.tree.prune_sons(tree_idx);
        for elem_id in detached {
            let son_edges = self.elems[elem_id].edges;
            for (k, &e) in son_edges.iter().enumerate() {
                self.edges[e].clear_elem(Elem::side_on_edge(k));
            }
            self.elems[elem_id].active = false;
            self.elems[elem_id].tree = None;
        }

        let father_edges = self.elems[father_id].edges;
        for (k, &e) in father_edges.iter().enumerate() {
            self.edges[e].set_elem(Elem::side_on_edge(k), father_id);
        }
        self.elems[father_id].active = true;

        log::debug!("merged sons {:?} back into element {}", son_ids, father_id);
        Ok(())
    }

    /// Reconstitute the father's nodal representation by sampling each son
    /// at the father node it carries. The q-th son must hold the father's
    /// q-th corner as its own q-th node; a missing vertex node means the
    /// sons were not produced by this mesh's refinement executor.
    fn rebuild_from_sons(
        &mut self,
        father_id: usize,
        son_ids: &[usize],
    ) -> Result<(), FemError> {
        let father_nodes = self.elems[father_id].nodes;
        let nvalue = self.elems[father_id].kind.nvalue();

        for (q, &son_id) in son_ids.iter().enumerate() {
            if self.elems[son_id].nodes[q] != father_nodes[q] {
                return Err(FemError::topology(
                    "Mesh::rebuild_from_sons()",
                    format!(
                        "vertex node {} of element {} is missing from son {}",
                        q, father_id, son_id,
                    ),
                ));
            }

            // sample the son at the father corner's reference location for
            // every history value; exact since the node is shared
            let s = local_node_coords(q);
            let node_id = father_nodes[q];
            for t in 0..self.ntstorage {
                let position = self.interpolated_position(son_id, t, s);
                self.nodes[node_id].set_position(t, position);
                for i in 0..nvalue {
                    let value = self.interpolated_value(son_id, t, i, s);
                    self.nodes[node_id].set_value(t, i, value);
                }
            }
            self.nodes[node_id].set_non_obsolete();
        }
        Ok(())
    }

    /// Rescue every node still referenced by an active element from the
    /// obsolete set. Run after a batch of de-refinements, before the
    /// hanging-node pass.
    pub fn reconcile_obsolete_nodes(&mut self) {
        let referenced: Vec<usize> = self
            .elems
            .iter()
            .filter(|elem| elem.active)
            .flat_map(|elem| elem.nodes.iter().copied())
            .collect();
        for node_id in referenced {
            self.nodes[node_id].set_non_obsolete();
        }
    }

    /// Apply an externally built plan in one transaction: de-refinements,
    /// then refinements, then obsolete-node reconciliation and the
    /// hanging-node pass
    pub fn apply_refinement_plan(&mut self, plan: RefinementPlan) -> Result<(), FemError> {
        for father_id in plan.unrefinements().collect::<Vec<_>>() {
            self.unrefine_elem(father_id)?;
        }
        for elem_id in plan.refinements().collect::<Vec<_>>() {
            self.refine_elem(elem_id)?;
        }
        self.reconcile_obsolete_nodes();
        self.setup_hanging_nodes();
        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // hanging-node constraints
    // ----------------------------------------------------------------------------------------------------

    /// Rebuild all hanging-node records from scratch. For every active
    /// element edge that has been bisected by a more-refined neighbour, each
    /// non-obsolete node strictly interior to the edge is constrained to the
    /// edge's two end nodes, weighted by the coarse side's edge trace at the
    /// node's fractional position. Then the per-kind hook runs for elements
    /// with mixed interpolation.
    pub fn setup_hanging_nodes(&mut self) {
        self.bake_hanging_values();
        for node in self.nodes.iter_mut() {
            node.clear_hanging();
        }

        let interfaces: Vec<(usize, Arc<dyn ElementKind>)> = self
            .elems
            .iter()
            .filter(|elem| elem.active)
            .flat_map(|elem| elem.edges.iter().map(move |&e| (e, elem.kind.clone())))
            .filter(|(e, _)| self.edges[*e].has_children())
            .collect();

        let mut hanging_count = 0;
        for (edge_id, kind) in interfaces {
            let masters = self.edges[edge_id].nodes;
            hanging_count += self.hang_edge_interior(edge_id, 0.0, 1.0, masters, kind.as_ref());
        }

        let kinds: Vec<(usize, Arc<dyn ElementKind>)> = self
            .elems
            .iter()
            .filter(|elem| elem.active)
            .map(|elem| (elem.id, elem.kind.clone()))
            .collect();
        for (elem_id, kind) in kinds {
            kind.further_setup_hanging_nodes(self, elem_id);
        }

        log::debug!("hanging-node pass complete; {} nodes constrained", hanging_count);
    }

    /// Write every constrained node's resolved position and values into its
    /// raw storage, so a node released by the next hanging pass carries the
    /// values it was reporting while constrained
    fn bake_hanging_values(&mut self) {
        let mut baked: Vec<(usize, Vec<Point>, Vec<(usize, usize, f64)>)> = Vec::new();
        for node_id in 0..self.nodes.len() {
            let node = &self.nodes[node_id];
            let positions: Vec<Point> = if node.is_hanging(-1) {
                (0..self.ntstorage).map(|t| self.nodal_position(t, node_id)).collect()
            } else {
                Vec::new()
            };
            let mut values = Vec::new();
            for i in 0..node.nvalue() {
                if node.is_hanging(i as i32) {
                    for t in 0..self.ntstorage {
                        values.push((t, i, self.nodal_value(t, node_id, i)));
                    }
                }
            }
            if !positions.is_empty() || !values.is_empty() {
                baked.push((node_id, positions, values));
            }
        }
        for (node_id, positions, values) in baked {
            for (t, position) in positions.into_iter().enumerate() {
                self.nodes[node_id].set_position(t, position);
            }
            for (t, i, value) in values {
                self.nodes[node_id].set_value(t, i, value);
            }
        }
    }

    /// Recursively constrain the interior nodes of a bisected edge; `lo` and
    /// `hi` are the current sub-edge's fractional bounds along the coarse
    /// edge, `masters` are the coarse edge's end nodes, and `kind` is the
    /// coarse element's kind, whose edge trace supplies the weights
    fn hang_edge_interior(
        &mut self,
        edge_id: usize,
        lo: f64,
        hi: f64,
        masters: [usize; 2],
        kind: &dyn ElementKind,
    ) -> usize {
        let (midpoint, children) = match (self.edges[edge_id].midpoint_node(), self.edges[edge_id].children()) {
            (Some(midpoint), Some(children)) => (midpoint, children),
            _ => return 0,
        };

        let mut count = 0;
        let f = (lo + hi) / 2.0;
        if !self.nodes[midpoint].is_obsolete() {
            let weights = kind.edge_shape(f);
            self.nodes[midpoint].set_hanging(Some(HangInfo::new(smallvec![
                (masters[0], weights[0]),
                (masters[1], weights[1]),
            ])));
            count += 1;
        }

        count += self.hang_edge_interior(children[0], lo, f, masters, kind);
        count += self.hang_edge_interior(children[1], f, hi, masters, kind);
        count
    }

    /// Maximum deviation of any hanging record's weight sum from 1, over all
    /// nodes and all per-value overrides. Zero (to rounding) on a consistent
    /// mesh.
    pub fn audit_hanging_nodes(&self) -> f64 {
        self.nodes
            .par_iter()
            .map(|node| {
                let geometric = node
                    .hanging_for(-1)
                    .filter(|hang| hang.is_hanging(node.id))
                    .map_or(0.0, |hang| (1.0 - hang.weight_sum()).abs());
                let per_value = (0..node.nvalue())
                    .filter_map(|i| node.hanging_for(i as i32))
                    .filter(|hang| hang.is_hanging(node.id))
                    .map(|hang| (1.0 - hang.weight_sum()).abs())
                    .fold(0.0, f64::max);
                geometric.max(per_value)
            })
            .reduce(|| 0.0, f64::max)
    }

    /// Sample every coarse/fine interface and compare position and all
    /// unknowns as seen from both sides. Returns the maximum discrepancy;
    /// values above `MAX_INTEGRITY_TOLERANCE` are logged as warnings. This
    /// is a diagnostic, not an error: the caller decides what to do with a
    /// leaky interface.
    pub fn check_integrity(&self) -> f64 {
        let max_discrepancy = self
            .elems
            .par_iter()
            .filter(|elem| elem.active)
            .map(|elem| {
                let mut worst: f64 = 0.0;
                for (k, &e) in elem.edges.iter().enumerate() {
                    if self.edges[e].has_children() {
                        worst = worst.max(self.check_interface(elem.id, k, e, 0.0, 1.0));
                    }
                }
                worst
            })
            .reduce(|| 0.0, f64::max);

        if max_discrepancy > MAX_INTEGRITY_TOLERANCE {
            log::warn!(
                "mesh integrity check found an interface discrepancy of {:e} (tolerance {:e})",
                max_discrepancy,
                MAX_INTEGRITY_TOLERANCE,
            );
        }
        max_discrepancy
    }

    /// Walk the fine side of one bisected coarse edge and compare both
    /// sides' interpolation at the ends and midpoint of every leaf sub-edge
    fn check_interface(&self, coarse_elem: usize, k: usize, edge_id: usize, lo: f64, hi: f64) -> f64 {
        match self.edges[edge_id].children() {
            Some(children) => {
                let f = (lo + hi) / 2.0;
                self.check_interface(coarse_elem, k, children[0], lo, f)
                    .max(self.check_interface(coarse_elem, k, children[1], f, hi))
            }
            None => {
                // leaf sub-edge: the active fine element sits on the side
                // opposite the coarse element
                let fine_side = k & 1;
                let fine_elem = match self.edges[edge_id].elem_on_side(fine_side) {
                    Some(id) if self.elems[id].active => id,
                    _ => return 0.0,
                };

                let mut worst: f64 = 0.0;
                for &fraction in &[0.0, 0.5, 1.0] {
                    let f = lo + fraction * (hi - lo);
                    let coarse_s = Self::edge_param_to_ref_coords(k, f);
                    let fine_s = Self::edge_param_to_ref_coords(k ^ 1, fraction);

                    let coarse_pos = self.interpolated_position(coarse_elem, 0, coarse_s);
                    let fine_pos = self.interpolated_position(fine_elem, 0, fine_s);
                    worst = worst.max(coarse_pos.dist(&fine_pos));

                    for i in 0..self.elems[coarse_elem].kind.nvalue() {
                        let coarse_value = self.interpolated_value(coarse_elem, 0, i, coarse_s);
                        let fine_value = self.interpolated_value(fine_elem, 0, i, fine_s);
                        worst = worst.max((coarse_value - fine_value).abs());
                    }
                }
                worst
            }
        }
    }

    /// Reference coordinates of the point at fraction `f` along edge `k`
    /// (S, N, W, E) of an element
    fn edge_param_to_ref_coords(k: usize, f: f64) -> [f64; 2] {
        match k {
            0 => [f, 0.0],
            1 => [f, 1.0],
            2 => [0.0, f],
            3 => [1.0, f],
            _ => panic!("Edge index {} is not in the range (0,3)!", k),
        }
    }

    /// Produce a Json Object that describes this Mesh
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "nodes": JsonValue::from(self.nodes.iter().map(Node::to_json).collect::<Vec<_>>()),
            "edges": JsonValue::from(self.edges.iter().map(Edge::to_json).collect::<Vec<_>>()),
            "elems": JsonValue::from(self.elems.iter().map(Elem::to_json).collect::<Vec<_>>()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{BilinearQuad, ContinuouslyInterpolated, HangingAware, Splittable};
    use crate::error::ErrorKind;
    use approx::assert_abs_diff_eq;

    fn two_quads() -> Mesh {
        Mesh::rectangular(2, 1, 2.0, 1.0, Arc::new(BilinearQuad::new(1)), 1)
    }

    /// Bilinear in the interior but with a quadratic trace along its edges
    #[derive(Debug, Clone)]
    struct QuadraticTraceQuad;

    impl Splittable for QuadraticTraceQuad {
        fn required_nsons(&self) -> usize {
            4
        }
    }

    impl ContinuouslyInterpolated for QuadraticTraceQuad {
        fn nvalue(&self) -> usize {
            1
        }

        fn shape(&self, s: [f64; 2]) -> SmallVec<[f64; 4]> {
            BilinearQuad::new(1).shape(s)
        }

        fn edge_shape(&self, f: f64) -> [f64; 2] {
            [1.0 - f * f, f * f]
        }
    }

    impl HangingAware for QuadraticTraceQuad {}

    impl ElementKind for QuadraticTraceQuad {
        fn name(&self) -> &'static str {
            "QuadraticTraceQuad"
        }
    }

    fn apply_linear_field(mesh: &mut Mesh) {
        for node_id in 0..mesh.nodes.len() {
            let pos = mesh.nodes[node_id].position(0);
            let value = 2.0 * pos.x + 3.0 * pos.y - 1.0;
            mesh.nodes[node_id].set_value(0, 0, value);
        }
    }

    #[test]
    fn rectangular_mesh_has_expected_connectivity() {
        let mesh = two_quads();
        assert_eq!(mesh.nodes.len(), 6);
        assert_eq!(mesh.edges.len(), 7);
        assert_eq!(mesh.elems.len(), 2);

        assert_eq!(mesh.elems[0].nodes, [0, 1, 3, 4]);
        assert_eq!(mesh.elems[1].nodes, [1, 2, 4, 5]);

        // the shared edge is elem 0's E edge and elem 1's W edge
        assert_eq!(mesh.elems[0].edges[3], mesh.elems[1].edges[2]);
        let shared = mesh.elems[0].edges[3];
        assert_eq!(mesh.edges[shared].nodes, [1, 4]);
        assert!(!mesh.edges[shared].boundary);
        assert_eq!(mesh.edges[shared].elem_on_side(0), Some(0));
        assert_eq!(mesh.edges[shared].elem_on_side(1), Some(1));
    }

    #[test]
    fn refining_one_quad_hangs_the_shared_edge_midpoint() {
        let mut mesh = two_quads();
        let outcome = mesh.refine_elem(0).unwrap();
        assert_eq!(outcome.sons.len(), 4);
        assert!(outcome.was_already_built.iter().all(|&built| !built));
        mesh.setup_hanging_nodes();

        // the midpoint of the shared edge (1.0, 0.5) hangs on the coarse
        // edge's ends with weights exactly (0.5, 0.5)
        let shared = mesh.elems[1].edges[2];
        let midpoint = mesh.edges[shared].midpoint_node().unwrap();
        assert_abs_diff_eq!(mesh.nodes[midpoint].position(0).x, 1.0);
        assert_abs_diff_eq!(mesh.nodes[midpoint].position(0).y, 0.5);

        assert!(mesh.nodes[midpoint].is_hanging(-1));
        let hang = mesh.nodes[midpoint].hanging_for(-1).unwrap();
        assert_eq!(hang.nmaster(), 2);
        assert_eq!(hang.master(0), (1, 0.5));
        assert_eq!(hang.master(1), (4, 0.5));

        // no other node hangs
        let hanging: Vec<usize> = (0..mesh.nodes.len())
            .filter(|&n| mesh.nodes[n].is_hanging(-1))
            .collect();
        assert_eq!(hanging, vec![midpoint]);

        assert!(mesh.audit_hanging_nodes() < 1e-14);
    }

    #[test]
    fn refinement_interpolates_a_linear_field_exactly() {
        let mut mesh = two_quads();
        apply_linear_field(&mut mesh);

        let outcome = mesh.refine_elem(0).unwrap();
        mesh.setup_hanging_nodes();

        for &node_id in &outcome.new_node_ids {
            let pos = mesh.nodes[node_id].position(0);
            assert_abs_diff_eq!(
                mesh.nodal_value(0, node_id, 0),
                2.0 * pos.x + 3.0 * pos.y - 1.0,
                epsilon = 1e-13
            );
        }

        assert!(mesh.check_integrity() < MAX_INTEGRITY_TOLERANCE);
    }

    #[test]
    fn two_level_interface_hangs_with_quarter_weights() {
        let mut mesh = two_quads();
        let outcome = mesh.refine_elem(0).unwrap();
        // refine the SE son, deepening the shared interface
        mesh.refine_elem(outcome.sons[1]).unwrap();
        mesh.setup_hanging_nodes();

        let shared = mesh.elems[1].edges[2];
        let lower_half = mesh.edges[shared].children().unwrap()[0];
        let quarter = mesh.edges[lower_half].midpoint_node().unwrap();
        assert_abs_diff_eq!(mesh.nodes[quarter].position(0).y, 0.25);

        let hang = mesh.nodes[quarter].hanging_for(-1).unwrap();
        assert_eq!(hang.master(0), (1, 0.75));
        assert_eq!(hang.master(1), (4, 0.25));
        assert!(mesh.audit_hanging_nodes() < 1e-14);

        apply_linear_field(&mut mesh);
        // corrupt the raw storage of every hanging node; the accessors must
        // ignore it and report the masters' interpolation instead
        for node_id in 0..mesh.nodes.len() {
            if mesh.nodes[node_id].is_hanging(0) {
                mesh.nodes[node_id].set_value(0, 0, 999.0);
            }
        }
        assert!(mesh.check_integrity() < MAX_INTEGRITY_TOLERANCE);
    }

    #[test]
    fn refining_both_sides_resolves_the_interface() {
        let mut mesh = two_quads();
        let before = mesh.nodes.len();
        mesh.refine_elem(0).unwrap();
        let after_first = mesh.nodes.len();
        mesh.refine_elem(1).unwrap();
        mesh.setup_hanging_nodes();

        // the shared midpoint was created by the first refinement and reused
        // by the second
        assert_eq!(after_first - before, 5);
        assert_eq!(mesh.nodes.len() - after_first, 4);

        assert_eq!(
            (0..mesh.nodes.len()).filter(|&n| mesh.nodes[n].is_hanging(-1)).count(),
            0,
        );
    }

    #[test]
    fn unrefinement_restores_the_father_and_its_field() {
        let mut mesh = two_quads();
        apply_linear_field(&mut mesh);

        let outcome = mesh.refine_elem(0).unwrap();
        mesh.setup_hanging_nodes();
        mesh.unrefine_elem(0).unwrap();
        mesh.reconcile_obsolete_nodes();
        mesh.setup_hanging_nodes();

        assert!(mesh.elems[0].active);
        for &son in &outcome.sons {
            assert!(!mesh.elems[son].active);
            assert_eq!(mesh.elems[son].tree, None);
        }

        // son-only nodes are tombstoned, father corners are not
        for &node_id in &outcome.new_node_ids {
            assert!(mesh.nodes[node_id].is_obsolete());
        }
        for &node_id in &mesh.elems[0].nodes {
            assert!(!mesh.nodes[node_id].is_obsolete());
        }

        // the linear field survives the round trip at interior sample points
        for &s in &[[0.25, 0.5], [0.5, 0.25], [0.75, 0.75]] {
            let pos = mesh.interpolated_position(0, 0, s);
            assert_abs_diff_eq!(
                mesh.interpolated_value(0, 0, 0, s),
                2.0 * pos.x + 3.0 * pos.y - 1.0,
                epsilon = 1e-13
            );
        }
        assert_eq!((0..mesh.nodes.len()).filter(|&n| mesh.nodes[n].is_hanging(-1)).count(), 0);
    }

    #[test]
    fn unrefining_under_grandsons_is_a_topology_error() {
        let mut mesh = two_quads();
        let outcome = mesh.refine_elem(0).unwrap();
        mesh.refine_elem(outcome.sons[0]).unwrap();

        let err = mesh.unrefine_elem(0).unwrap_err();
        assert!(err.to_string().contains("sons of their own"));
    }

    #[test]
    fn double_refinement_is_a_topology_error() {
        let mut mesh = two_quads();
        mesh.refine_elem(0).unwrap();
        let err = mesh.refine_elem(0).unwrap_err();
        assert!(err.to_string().contains("not active"));
    }

    #[test]
    fn refinement_plan_sequences_unrefine_refine_and_hanging() {
        let mut mesh = two_quads();
        mesh.refine_elem(0).unwrap();
        mesh.setup_hanging_nodes();

        // merge elem 0's sons back and split elem 1 instead, in one plan
        let mut plan = RefinementPlan::new();
        plan.select_sons_for_unrefinement(0);
        plan.select_for_refinement(1);
        mesh.apply_refinement_plan(plan).unwrap();

        assert!(mesh.elems[0].active);
        assert!(!mesh.elems[1].active);

        // the hanging interface flipped: the shared midpoint (rescued from
        // the obsolete set) now hangs off elem 0's coarse edge
        let shared = mesh.elems[0].edges[3];
        let midpoint = mesh.edges[shared].midpoint_node().unwrap();
        assert!(!mesh.nodes[midpoint].is_obsolete());
        let hang = mesh.nodes[midpoint].hanging_for(-1).unwrap();
        assert_eq!(hang.master(0), (1, 0.5));
        assert_eq!(hang.master(1), (4, 0.5));
    }

    #[test]
    fn rebuilding_built_sons_registers_nothing_twice() {
        let mut mesh = two_quads();
        let first = mesh.refine_elem(0).unwrap();
        let node_count = mesh.nodes.len();
        let edge_count = mesh.edges.len();
        let elem_count = mesh.elems.len();

        // reconstruct uninitialized sons carrying the slots of the first
        // build and run the executor again
        let sons: Vec<ElemUninit> = first
            .sons
            .iter()
            .map(|&id| {
                let built = &mesh.elems[id];
                let mut son = ElemUninit::new(id, built.kind.clone(), built.refine_level);
                son.tree = built.tree;
                for q in 0..4 {
                    son.set_node(q, built.nodes[q]);
                    son.set_edge(q, built.edges[q]);
                }
                son
            })
            .collect();
        let second = mesh.execute_t_refinement(0, sons).unwrap();

        assert!(second.was_already_built.iter().all(|&built| built));
        assert!(second.new_node_ids.is_empty());
        assert_eq!(second.sons, first.sons);
        assert_eq!(mesh.nodes.len(), node_count);
        assert_eq!(mesh.edges.len(), edge_count);
        assert_eq!(mesh.elems.len(), elem_count);
        assert!(!mesh.elems[0].active);
        for &son_id in &second.sons {
            assert!(mesh.elems[son_id].active);
        }
    }

    #[test]
    fn hanging_weights_come_from_the_coarse_kinds_edge_trace() {
        let mut mesh = Mesh::rectangular(2, 1, 2.0, 1.0, Arc::new(QuadraticTraceQuad), 1);
        mesh.refine_elem(0).unwrap();
        mesh.setup_hanging_nodes();

        // the shared edge's midpoint sits at f = 0.5, where the quadratic
        // trace gives (0.75, 0.25) instead of the linear (0.5, 0.5)
        let shared = mesh.elems[1].edges[2];
        let midpoint = mesh.edges[shared].midpoint_node().unwrap();
        let hang = mesh.nodes[midpoint].hanging_for(-1).unwrap();
        assert_eq!(hang.master(0), (1, 0.75));
        assert_eq!(hang.master(1), (4, 0.25));

        assert!(mesh.audit_hanging_nodes() < 1e-14);
    }

    #[test]
    fn out_of_range_ids_are_range_errors_even_on_an_empty_mesh() {
        let dir = std::env::temp_dir();
        let path = dir.join("fem_refine_no_elements.json");
        std::fs::write(
            &path,
            r#"{ "nodes": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]], "elements": [] }"#,
        )
        .unwrap();
        let mut mesh = Mesh::from_file(&path, Arc::new(BilinearQuad::new(1)), 1).unwrap();
        assert!(mesh.elems.is_empty());

        let err = mesh.split_elem(0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        let err = mesh.unrefine_elem(0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);

        let path = dir.join("fem_refine_no_nodes.json");
        std::fs::write(&path, r#"{ "nodes": [], "elements": [[0, 1, 2, 3]] }"#).unwrap();
        assert!(Mesh::from_file(&path, Arc::new(BilinearQuad::new(1)), 1).is_err());
    }

    #[test]
    fn refine_level_tracks_tree_depth() {
        let mut mesh = two_quads();
        let outcome = mesh.refine_elem(0).unwrap();
        let grandsons = mesh.refine_elem(outcome.sons[3]).unwrap();

        assert_eq!(mesh.elems[outcome.sons[3]].refine_level, 1);
        assert_eq!(mesh.elems[grandsons.sons[0]].refine_level, 2);
        let tree_idx = mesh.elems[grandsons.sons[0]].tree.unwrap();
        assert_eq!(mesh.tree().depth(tree_idx), 2);
    }

    #[test]
    fn hanging_value_accessor_follows_the_masters() {
        let mut mesh = two_quads();
        mesh.refine_elem(0).unwrap();
        mesh.setup_hanging_nodes();

        let shared = mesh.elems[1].edges[2];
        let midpoint = mesh.edges[shared].midpoint_node().unwrap();

        mesh.nodes[1].set_value(0, 0, 2.0);
        mesh.nodes[4].set_value(0, 0, 6.0);
        // the stored value at the hanging node is ignored
        mesh.nodes[midpoint].set_value(0, 0, -100.0);
        assert_abs_diff_eq!(mesh.nodal_value(0, midpoint, 0), 4.0);
    }
}
