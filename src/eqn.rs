use crate::mesh::Mesh;

use nalgebra::DMatrix;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Element-local equation numbering over nodal unknowns, including the
/// unknowns reached only through hanging-node constraints.
///
/// Ordinary numbering runs over the element's own nodes: one local equation
/// per free (unpinned, unconstrained) value. The hanging extension then
/// numbers every master of every constrained value; masters may be nodes of
/// this element (they reuse their ordinary number: one unknown, one local
/// equation) or external to it (they get fresh numbers, keyed by node id).
/// Pinned values and constrained values carry -1.
///
/// Positional (solid-mechanics) numbering is an extension of the same map;
/// see the `solid` module.
#[derive(Debug, Clone)]
pub struct LocalEqnMap {
    pub(crate) nodal: Vec<SmallVec<[i32; 4]>>,
    pub(crate) hang: BTreeMap<(usize, usize), i32>,
    pub(crate) position: Vec<DMatrix<i32>>,
    pub(crate) position_hang: BTreeMap<usize, DMatrix<i32>>,
    pub(crate) ndof: usize,
    nvalue: usize,
}

impl LocalEqnMap {
    /// Assign local equation numbers for the nodal unknowns of an element.
    /// Re-entrant: each call produces an independent numbering.
    pub fn assign(mesh: &Mesh, elem_id: usize) -> Self {
        let elem = &mesh.elems[elem_id];
        let nvalue = elem.kind.nvalue();
        let mut map = Self {
            nodal: Vec::with_capacity(elem.nodes.len()),
            hang: BTreeMap::new(),
            position: Vec::new(),
            position_hang: BTreeMap::new(),
            ndof: 0,
            nvalue,
        };

        for &node_id in &elem.nodes {
            let node = &mesh.nodes[node_id];
            let mut eqns = SmallVec::new();
            for i in 0..nvalue {
                if node.is_pinned(i) || node.is_hanging(i as i32) {
                    eqns.push(-1);
                } else {
                    eqns.push(map.next_eqn());
                }
            }
            map.nodal.push(eqns);
        }

        map.assign_hanging_local_eqn_numbers(mesh, elem_id);
        map
    }

    /// Number the masters of every value hanging at one of this element's
    /// nodes. Masters that are themselves hanging (on some other interface)
    /// are left at -1; their unknowns belong to their own masters.
    fn assign_hanging_local_eqn_numbers(&mut self, mesh: &Mesh, elem_id: usize) {
        let elem = &mesh.elems[elem_id];
        for &node_id in &elem.nodes {
            let node = &mesh.nodes[node_id];
            for i in 0..self.nvalue {
                if !node.is_hanging(i as i32) {
                    continue;
                }
                let masters: Vec<usize> = node
                    .hanging_for(i as i32)
                    .map(|hang| hang.masters().map(|&(master, _)| master).collect())
                    .unwrap_or_default();

                for master in masters {
                    if self.hang.contains_key(&(master, i)) {
                        continue;
                    }
                    let eqn = match elem.nodes.iter().position(|&n| n == master) {
                        Some(q) => self.nodal[q][i],
                        None => {
                            let master_node = &mesh.nodes[master];
                            if master_node.is_pinned(i) || master_node.is_hanging(i as i32) {
                                -1
                            } else {
                                self.next_eqn()
                            }
                        }
                    };
                    self.hang.insert((master, i), eqn);
                }
            }
        }
    }

    pub(crate) fn next_eqn(&mut self) -> i32 {
        let eqn = self.ndof as i32;
        self.ndof += 1;
        eqn
    }

    /// Total number of local unknowns (nodal plus hanging plus positional)
    pub fn ndof(&self) -> usize {
        self.ndof
    }

    /// Ordinary local equation of value `i` at the element's q-th node;
    /// -1 if pinned or constrained
    pub fn nodal_local_eqn(&self, q: usize, i: usize) -> i32 {
        #[cfg(feature = "range_checking")]
        self.check_value_index(i, "LocalEqnMap::nodal_local_eqn()");

        self.nodal[q][i]
    }

    /// Local equation of value `i` at a master node (keyed globally, since
    /// masters may be external to the element); -1 for pinned or unknown
    /// masters
    pub fn local_hang_eqn(&self, node_id: usize, i: usize) -> i32 {
        #[cfg(feature = "range_checking")]
        self.check_value_index(i, "LocalEqnMap::local_hang_eqn()");

        self.hang.get(&(node_id, i)).copied().unwrap_or(-1)
    }

    #[cfg(feature = "range_checking")]
    fn check_value_index(&self, i: usize, caller: &str) {
        if i >= self.nvalue {
            panic!(
                "Range Error in {}: value {} does not exist; the element interpolates {} values",
                caller, i, self.nvalue,
            );
        }
    }
}
