use crate::assembly::{fd_column, fill_in_jacobian_from_nodal_by_fd, Target};
use crate::eqn::LocalEqnMap;
use crate::error::FemError;
use crate::mesh::Mesh;

use nalgebra::{DMatrix, DVector};
use std::collections::BTreeSet;

impl LocalEqnMap {
    /// Local equation of the (position type, coordinate) dof at the
    /// element's q-th node; -1 if pinned or constrained. Only meaningful
    /// after `assign_solid_local_eqn_numbers`.
    pub fn position_local_eqn(&self, q: usize, p: usize, k: usize) -> i32 {
        self.position[q][(p, k)]
    }

    /// The [position type][coordinate] table of local equations for a master
    /// of a geometrically hanging node; None for nodes that master nothing
    /// in this element
    pub fn local_position_hang_eqn(&self, node_id: usize) -> Option<&DMatrix<i32>> {
        self.position_hang.get(&node_id)
    }
}

/// Extend an element's local numbering with its positional dofs: one per
/// (position type, coordinate) at each non-hanging node, with pinned entries
/// at -1, followed by the masters of every geometrically hanging node
/// (internal masters reuse their ordinary positional numbers). Fails with a
/// NotImplemented error for kinds with generalized positional dofs.
pub fn assign_solid_local_eqn_numbers(
    mesh: &Mesh,
    elem_id: usize,
    eqn: &mut LocalEqnMap,
) -> Result<(), FemError> {
    let elem = &mesh.elems[elem_id];
    if elem.kind.nposition_type() != 1 {
        return Err(FemError::not_implemented(
            "assign_solid_local_eqn_numbers()",
            format!(
                "element kind '{}' stores {} position types; positional numbering only supports 1",
                elem.kind.name(),
                elem.kind.nposition_type(),
            ),
        ));
    }

    eqn.position.clear();
    eqn.position_hang.clear();

    for &node_id in &elem.nodes {
        let node = &mesh.nodes[node_id];
        let ntype = node.nposition_type();
        let mut table = DMatrix::from_element(ntype, 2, -1);
        if !node.is_hanging(-1) {
            for p in 0..ntype {
                for k in 0..2 {
                    if !node.is_position_pinned(p, k) {
                        table[(p, k)] = eqn.next_eqn();
                    }
                }
            }
        }
        eqn.position.push(table);
    }

    assign_solid_hanging_local_eqn_numbers(mesh, elem_id, eqn);
    Ok(())
}

/// Number the positional dofs of every master of a geometrically hanging
/// node of this element
fn assign_solid_hanging_local_eqn_numbers(mesh: &Mesh, elem_id: usize, eqn: &mut LocalEqnMap) {
    let elem = &mesh.elems[elem_id];
    for &node_id in &elem.nodes {
        let node = &mesh.nodes[node_id];
        if !node.is_hanging(-1) {
            continue;
        }
        let masters: Vec<usize> = node
            .hanging_for(-1)
            .map(|hang| hang.masters().map(|&(master, _)| master).collect())
            .unwrap_or_default();

        for master in masters {
            if eqn.position_hang.contains_key(&master) {
                continue;
            }
            let table = match elem.nodes.iter().position(|&n| n == master) {
                Some(q) => eqn.position[q].clone(),
                None => {
                    let master_node = &mesh.nodes[master];
                    let ntype = master_node.nposition_type();
                    let mut table = DMatrix::from_element(ntype, 2, -1);
                    if !master_node.is_hanging(-1) {
                        for p in 0..ntype {
                            for k in 0..2 {
                                if !master_node.is_position_pinned(p, k) {
                                    table[(p, k)] = eqn.next_eqn();
                                }
                            }
                        }
                    }
                    table
                }
            };
            eqn.position_hang.insert(master, table);
        }
    }
}

/// Fill `residuals` and the positional block of `jacobian` for one element
/// by forward finite differencing of nodal coordinates.
///
/// Mirrors the nodal-value filler: conforming nodes are perturbed directly;
/// for a geometrically hanging node the masters' raw coordinates are
/// perturbed instead, with the hanging-aware position accessor propagating
/// the constraint weights. Each (node, coordinate) pair is perturbed at most
/// once, and pinned or unnumbered columns are skipped. The numbering must
/// have been extended by `assign_solid_local_eqn_numbers` first.
pub fn fill_in_jacobian_from_solid_position_by_fd<F>(
    mesh: &mut Mesh,
    elem_id: usize,
    eqn: &LocalEqnMap,
    residual_fn: &mut F,
    residuals: &mut DVector<f64>,
    jacobian: &mut DMatrix<f64>,
) where
    F: FnMut(&Mesh, &mut DVector<f64>),
{
    let elem_nodes = mesh.elems[elem_id].nodes;
    assert_eq!(
        eqn.position.len(),
        elem_nodes.len(),
        "Positional numbering of Elem {} must be assigned before assembly!",
        elem_id,
    );
    assert_eq!(
        jacobian.ncols(),
        eqn.ndof(),
        "Jacobian of Elem {} must have one column per local unknown!",
        elem_id,
    );

    residual_fn(mesh, residuals);
    let baseline = residuals.clone();

    let mut visited: BTreeSet<(usize, usize)> = BTreeSet::new();

    for (q, &node_id) in elem_nodes.iter().enumerate() {
        if mesh.nodes[node_id].is_hanging(-1) {
            let masters: Vec<usize> = mesh.nodes[node_id]
                .hanging_for(-1)
                .map(|hang| hang.masters().map(|&(master, _)| master).collect())
                .unwrap_or_default();

            for master in masters {
                for k in 0..2 {
                    if !visited.insert((master, k)) {
                        continue;
                    }
                    let col = match eqn.local_position_hang_eqn(master) {
                        Some(table) => table[(0, k)],
                        None => -1,
                    };
                    if col < 0 {
                        continue;
                    }
                    fd_column(
                        mesh,
                        master,
                        Target::Coordinate { t: 0, k },
                        col as usize,
                        &baseline,
                        residual_fn,
                        jacobian,
                    );
                }
            }
        } else {
            for k in 0..2 {
                if !visited.insert((node_id, k)) {
                    continue;
                }
                let col = eqn.position_local_eqn(q, 0, k);
                if col < 0 {
                    continue;
                }
                fd_column(
                    mesh,
                    node_id,
                    Target::Coordinate { t: 0, k },
                    col as usize,
                    &baseline,
                    residual_fn,
                    jacobian,
                );
            }
        }
    }
}

/// Fill the full element Jacobian: nodal-value columns first, then
/// positional columns
pub fn fill_in_jacobian_by_fd<F>(
    mesh: &mut Mesh,
    elem_id: usize,
    eqn: &LocalEqnMap,
    residual_fn: &mut F,
    residuals: &mut DVector<f64>,
    jacobian: &mut DMatrix<f64>,
) where
    F: FnMut(&Mesh, &mut DVector<f64>),
{
    fill_in_jacobian_from_nodal_by_fd(mesh, elem_id, eqn, residual_fn, residuals, jacobian);
    fill_in_jacobian_from_solid_position_by_fd(mesh, elem_id, eqn, residual_fn, residuals, jacobian);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{
        BilinearQuad, ContinuouslyInterpolated, ElementKind, HangingAware, Splittable,
    };
    use approx::assert_abs_diff_eq;
    use smallvec::SmallVec;
    use std::sync::Arc;

    fn refined_two_quads() -> Mesh {
        let mut mesh = Mesh::rectangular(2, 1, 2.0, 1.0, Arc::new(BilinearQuad::new(1)), 1);
        mesh.refine_elem(0).unwrap();
        mesh.setup_hanging_nodes();
        mesh
    }

    fn solid_numbering(mesh: &Mesh, elem_id: usize) -> LocalEqnMap {
        let mut eqn = LocalEqnMap::assign(mesh, elem_id);
        assign_solid_local_eqn_numbers(mesh, elem_id, &mut eqn).unwrap();
        eqn
    }

    #[test]
    fn positional_numbering_extends_the_nodal_map() {
        let mesh = refined_two_quads();
        // SE son: nodes [6, 1, 10, 9]; node 9 hangs on masters 1 and 4
        let eqn = solid_numbering(&mesh, 3);

        // 4 nodal dofs, then 2 coordinates for each of the 3 conforming
        // nodes, then 2 for the external master (node 4)
        assert_eq!(eqn.ndof(), 4 + 6 + 2);

        assert_eq!(eqn.position_local_eqn(0, 0, 0), 4);
        assert_eq!(eqn.position_local_eqn(0, 0, 1), 5);
        // the hanging node has no positional equations of its own
        assert_eq!(eqn.position_local_eqn(3, 0, 0), -1);
        assert_eq!(eqn.position_local_eqn(3, 0, 1), -1);

        // internal master reuses its ordinary positional numbers
        let internal = eqn.local_position_hang_eqn(1).unwrap();
        assert_eq!(internal[(0, 0)], eqn.position_local_eqn(1, 0, 0));
        // external master gets fresh ones
        let external = eqn.local_position_hang_eqn(4).unwrap();
        assert_eq!(external[(0, 0)], 10);
        assert_eq!(external[(0, 1)], 11);
    }

    #[test]
    fn position_pinning_removes_equations() {
        let mut mesh = refined_two_quads();
        mesh.nodes[4].pin_position(0, 0);
        mesh.nodes[4].pin_position(0, 1);

        let eqn = solid_numbering(&mesh, 3);
        assert_eq!(eqn.ndof(), 4 + 6);
        let external = eqn.local_position_hang_eqn(4).unwrap();
        assert_eq!(external[(0, 0)], -1);
        assert_eq!(external[(0, 1)], -1);
    }

    #[test]
    fn solid_columns_carry_the_geometric_constraint_weights() {
        let mut mesh = refined_two_quads();
        let eqn = solid_numbering(&mesh, 3);

        // r0 reads the hanging node's y position, r1 a conforming node's x
        let mut kernel = |m: &Mesh, r: &mut DVector<f64>| {
            r[0] = m.nodal_position(0, 9).y;
            r[1] = m.nodal_position(0, 6).x;
        };
        let mut residuals = DVector::zeros(2);
        let mut jacobian = DMatrix::zeros(2, eqn.ndof());
        fill_in_jacobian_from_solid_position_by_fd(
            &mut mesh,
            3,
            &eqn,
            &mut kernel,
            &mut residuals,
            &mut jacobian,
        );

        let internal_y = eqn.local_position_hang_eqn(1).unwrap()[(0, 1)] as usize;
        let external_y = eqn.local_position_hang_eqn(4).unwrap()[(0, 1)] as usize;
        assert_abs_diff_eq!(jacobian[(0, internal_y)], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(jacobian[(0, external_y)], 0.5, epsilon = 1e-6);

        let conforming_x = eqn.position_local_eqn(0, 0, 0) as usize;
        assert_abs_diff_eq!(jacobian[(1, conforming_x)], 1.0, epsilon = 1e-6);

        // the baseline resolved the geometric constraint
        assert_abs_diff_eq!(residuals[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn combined_filler_covers_both_blocks() {
        let mut mesh = refined_two_quads();
        for node_id in 0..mesh.nodes.len() {
            mesh.nodes[node_id].set_value(0, 0, node_id as f64);
        }
        let eqn = solid_numbering(&mesh, 3);

        let mut kernel = |m: &Mesh, r: &mut DVector<f64>| {
            r[0] = m.nodal_value(0, 9, 0) + m.nodal_position(0, 9).x;
        };
        let mut residuals = DVector::zeros(1);
        let mut jacobian = DMatrix::zeros(1, eqn.ndof());
        fill_in_jacobian_by_fd(&mut mesh, 3, &eqn, &mut kernel, &mut residuals, &mut jacobian);

        // value block: masters of the hanging value
        assert_abs_diff_eq!(jacobian[(0, 1)], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(jacobian[(0, eqn.local_hang_eqn(4, 0) as usize)], 0.5, epsilon = 1e-6);
        // positional block: x coordinates of the geometric masters
        let internal_x = eqn.local_position_hang_eqn(1).unwrap()[(0, 0)] as usize;
        let external_x = eqn.local_position_hang_eqn(4).unwrap()[(0, 0)] as usize;
        assert_abs_diff_eq!(jacobian[(0, internal_x)], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(jacobian[(0, external_x)], 0.5, epsilon = 1e-6);
    }

    #[derive(Debug)]
    struct GeneralizedQuad;

    impl Splittable for GeneralizedQuad {
        fn required_nsons(&self) -> usize {
            4
        }
    }
    impl ContinuouslyInterpolated for GeneralizedQuad {
        fn nvalue(&self) -> usize {
            1
        }
        fn shape(&self, s: [f64; 2]) -> SmallVec<[f64; 4]> {
            BilinearQuad::new(1).shape(s)
        }
    }
    impl HangingAware for GeneralizedQuad {}
    impl ElementKind for GeneralizedQuad {
        fn name(&self) -> &'static str {
            "GeneralizedQuad"
        }
        fn nposition_type(&self) -> usize {
            2
        }
    }

    #[test]
    fn generalized_positional_dofs_are_not_implemented() {
        let mesh = Mesh::rectangular(1, 1, 1.0, 1.0, Arc::new(GeneralizedQuad), 1);
        let mut eqn = LocalEqnMap::assign(&mesh, 0);
        let err = assign_solid_local_eqn_numbers(&mesh, 0, &mut eqn).unwrap_err();
        assert!(err.to_string().contains("position types"));
    }
}
