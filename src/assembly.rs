use crate::eqn::LocalEqnMap;
use crate::mesh::Mesh;

use nalgebra::{DMatrix, DVector};
use std::collections::BTreeSet;

/// Forward finite-difference step used by the Jacobian fillers
pub const DEFAULT_FD_STEP: f64 = 1e-8;

#[derive(Clone, Copy, Debug)]
pub(crate) enum Target {
    Value { t: usize, i: usize },
    Coordinate { t: usize, k: usize },
}

/// Scoped perturbation of one stored nodal quantity. The original value is
/// restored when the guard drops, on every exit path, so a panicking
/// residual kernel cannot leave the mesh in a perturbed state.
pub struct Perturbation<'a> {
    mesh: &'a mut Mesh,
    node_id: usize,
    target: Target,
    original: f64,
}

impl<'a> Perturbation<'a> {
    /// Perturb the raw stored value of unknown `i` at a node by `step`
    pub fn value(mesh: &'a mut Mesh, node_id: usize, t: usize, i: usize, step: f64) -> Self {
        let original = mesh.nodes[node_id].value(t, i);
        mesh.nodes[node_id].set_value(t, i, original + step);
        Self {
            mesh,
            node_id,
            target: Target::Value { t, i },
            original,
        }
    }

    /// Perturb the raw stored k-th coordinate of a node by `step`
    pub fn coordinate(mesh: &'a mut Mesh, node_id: usize, t: usize, k: usize, step: f64) -> Self {
        let original = mesh.nodes[node_id].coordinate(t, k);
        mesh.nodes[node_id].set_coordinate(t, k, original + step);
        Self {
            mesh,
            node_id,
            target: Target::Coordinate { t, k },
            original,
        }
    }

    pub fn mesh(&self) -> &Mesh {
        self.mesh
    }
}

impl Drop for Perturbation<'_> {
    fn drop(&mut self) {
        match self.target {
            Target::Value { t, i } => self.mesh.nodes[self.node_id].set_value(t, i, self.original),
            Target::Coordinate { t, k } => {
                self.mesh.nodes[self.node_id].set_coordinate(t, k, self.original)
            }
        }
    }
}

/// Fill one Jacobian column by forward differencing the residual kernel
/// under a scoped perturbation
pub(crate) fn fd_column<F>(
    mesh: &mut Mesh,
    node_id: usize,
    target: Target,
    col: usize,
    baseline: &DVector<f64>,
    residual_fn: &mut F,
    jacobian: &mut DMatrix<f64>,
) where
    F: FnMut(&Mesh, &mut DVector<f64>),
{
    let mut perturbed = DVector::zeros(baseline.len());
    {
        let guard = match target {
            Target::Value { t, i } => Perturbation::value(mesh, node_id, t, i, DEFAULT_FD_STEP),
            Target::Coordinate { t, k } => {
                Perturbation::coordinate(mesh, node_id, t, k, DEFAULT_FD_STEP)
            }
        };
        residual_fn(guard.mesh(), &mut perturbed);
    }
    for r in 0..baseline.len() {
        jacobian[(r, col)] = (perturbed[r] - baseline[r]) / DEFAULT_FD_STEP;
    }
}

/// Fill `residuals` and the nodal-value block of `jacobian` for one element
/// by forward finite differencing.
///
/// `residual_fn` is the physics kernel; it must read nodal values through the
/// hanging-aware accessors. Unconstrained values are perturbed directly and
/// land in their ordinary local-equation column. For a hanging value the
/// *masters'* raw values are perturbed instead: the hanging-aware accessors
/// propagate each perturbation into every dependent node, so the constraint
/// weights appear in the Jacobian without ever being applied explicitly.
/// Each (node, value) pair is perturbed at most once, so masters shared by
/// several hanging nodes (or doubling as ordinary nodes of this element) are
/// not double-counted. Pinned and unnumbered columns are skipped.
pub fn fill_in_jacobian_from_nodal_by_fd<F>(
    mesh: &mut Mesh,
    elem_id: usize,
    eqn: &LocalEqnMap,
    residual_fn: &mut F,
    residuals: &mut DVector<f64>,
    jacobian: &mut DMatrix<f64>,
) where
    F: FnMut(&Mesh, &mut DVector<f64>),
{
    assert_eq!(
        jacobian.ncols(),
        eqn.ndof(),
        "Jacobian of Elem {} must have one column per local unknown!",
        elem_id,
    );
    assert_eq!(
        jacobian.nrows(),
        residuals.len(),
        "Jacobian of Elem {} must have one row per residual!",
        elem_id,
    );

    residual_fn(mesh, residuals);
    let baseline = residuals.clone();

    let elem_nodes = mesh.elems[elem_id].nodes;
    let nvalue = mesh.elems[elem_id].kind.nvalue();
    let mut visited: BTreeSet<(usize, usize)> = BTreeSet::new();

    for (q, &node_id) in elem_nodes.iter().enumerate() {
        for i in 0..nvalue {
            if mesh.nodes[node_id].is_hanging(i as i32) {
                let masters: Vec<usize> = mesh.nodes[node_id]
                    .hanging_for(i as i32)
                    .map(|hang| hang.masters().map(|&(master, _)| master).collect())
                    .unwrap_or_default();

                for master in masters {
                    if !visited.insert((master, i)) {
                        continue;
                    }
                    let col = eqn.local_hang_eqn(master, i);
                    if col < 0 {
                        continue;
                    }
                    fd_column(
                        mesh,
                        master,
                        Target::Value { t: 0, i },
                        col as usize,
                        &baseline,
                        residual_fn,
                        jacobian,
                    );
                }
            } else {
                if !visited.insert((node_id, i)) {
                    continue;
                }
                let col = eqn.nodal_local_eqn(q, i);
                if col < 0 {
                    continue;
                }
                fd_column(
                    mesh,
                    node_id,
                    Target::Value { t: 0, i },
                    col as usize,
                    &baseline,
                    residual_fn,
                    jacobian,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::BilinearQuad;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn refined_two_quads() -> Mesh {
        let mut mesh = Mesh::rectangular(2, 1, 2.0, 1.0, Arc::new(BilinearQuad::new(1)), 1);
        mesh.refine_elem(0).unwrap();
        mesh.setup_hanging_nodes();
        mesh
    }

    #[test]
    fn perturbation_guard_restores_on_drop() {
        let mut mesh = refined_two_quads();
        mesh.nodes[1].set_value(0, 0, 3.0);
        {
            let guard = Perturbation::value(&mut mesh, 1, 0, 0, 1e-3);
            assert_abs_diff_eq!(guard.mesh().nodes[1].value(0, 0), 3.0 + 1e-3);
        }
        assert_abs_diff_eq!(mesh.nodes[1].value(0, 0), 3.0);
    }

    #[test]
    fn hanging_master_columns_carry_the_constraint_weights() {
        let mut mesh = refined_two_quads();
        for node_id in 0..mesh.nodes.len() {
            mesh.nodes[node_id].set_value(0, 0, 1.0 + node_id as f64);
        }

        // the SE son's nodes: S midpoint (6), corner (1), centre (10), and
        // the hanging E midpoint (9) with masters 1 and 4
        let se_son = 3;
        let eqn = LocalEqnMap::assign(&mesh, se_son);
        assert_eq!(eqn.ndof(), 4);

        // toy kernel: r0 reads the hanging node, r1 a conforming node, both
        // through the hanging-aware accessor
        let mut kernel = |m: &Mesh, r: &mut nalgebra::DVector<f64>| {
            r[0] = m.nodal_value(0, 9, 0);
            r[1] = m.nodal_value(0, 6, 0);
        };

        let mut residuals = nalgebra::DVector::zeros(2);
        let mut jacobian = nalgebra::DMatrix::zeros(2, 4);
        fill_in_jacobian_from_nodal_by_fd(
            &mut mesh,
            se_son,
            &eqn,
            &mut kernel,
            &mut residuals,
            &mut jacobian,
        );

        // the hanging node's residual depends on its two masters with
        // exactly the constraint weights, and on nothing else
        assert_abs_diff_eq!(jacobian[(0, 1)], 0.5, epsilon = 1e-6); // master 1
        assert_abs_diff_eq!(jacobian[(0, 3)], 0.5, epsilon = 1e-6); // master 4
        assert_abs_diff_eq!(jacobian[(0, 0)], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(jacobian[(0, 2)], 0.0, epsilon = 1e-6);

        // each master column is half the column of a conforming node in the
        // same shape-function role
        assert_abs_diff_eq!(jacobian[(1, 0)], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(jacobian[(0, 1)], 0.5 * jacobian[(1, 0)], epsilon = 1e-6);

        // the baseline residual resolved the constraint: 0.5 * (v1 + v4)
        assert_abs_diff_eq!(residuals[0], 0.5 * (2.0 + 5.0), epsilon = 1e-12);
    }

    #[test]
    fn assembly_leaves_the_mesh_unperturbed() {
        let mut mesh = refined_two_quads();
        for node_id in 0..mesh.nodes.len() {
            mesh.nodes[node_id].set_value(0, 0, 0.25 * node_id as f64);
        }
        let before: Vec<f64> = (0..mesh.nodes.len()).map(|n| mesh.nodes[n].value(0, 0)).collect();

        let eqn = LocalEqnMap::assign(&mesh, 3);
        let mut kernel = |m: &Mesh, r: &mut nalgebra::DVector<f64>| {
            r[0] = m.nodal_value(0, 9, 0) * m.nodal_value(0, 10, 0);
        };
        let mut residuals = nalgebra::DVector::zeros(1);
        let mut jacobian = nalgebra::DMatrix::zeros(1, eqn.ndof());
        fill_in_jacobian_from_nodal_by_fd(&mut mesh, 3, &eqn, &mut kernel, &mut residuals, &mut jacobian);

        let after: Vec<f64> = (0..mesh.nodes.len()).map(|n| mesh.nodes[n].value(0, 0)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn pinned_masters_contribute_no_column() {
        let mut mesh = refined_two_quads();
        mesh.nodes[4].pin(0);
        let eqn = LocalEqnMap::assign(&mesh, 3);
        assert_eq!(eqn.ndof(), 3);

        let mut kernel = |m: &Mesh, r: &mut nalgebra::DVector<f64>| {
            r[0] = m.nodal_value(0, 9, 0);
        };
        let mut residuals = nalgebra::DVector::zeros(1);
        let mut jacobian = nalgebra::DMatrix::zeros(1, 3);
        fill_in_jacobian_from_nodal_by_fd(&mut mesh, 3, &eqn, &mut kernel, &mut residuals, &mut jacobian);

        // only master 1 (reusing its ordinary column) is seen
        assert_abs_diff_eq!(jacobian[(0, 1)], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(jacobian[(0, 0)], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(jacobian[(0, 2)], 0.0, epsilon = 1e-6);
    }
}
