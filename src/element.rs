use crate::mesh::Mesh;

use smallvec::{smallvec, SmallVec};
use std::fmt;

/// An element kind that can be h-refined by splitting into sons
pub trait Splittable {
    /// How many sons one refinement step produces (4 for isotropic quads)
    fn required_nsons(&self) -> usize;
}

/// An element kind whose unknowns are interpolated continuously from nodal
/// values. The default hooks describe isoparametric interpolation, where
/// every unknown is carried by every node; kinds with mixed interpolation
/// (e.g. lower-order pressure) override them per value id, with -1 addressing
/// the geometry.
pub trait ContinuouslyInterpolated {
    /// Number of continuously interpolated unknowns stored at each node
    fn nvalue(&self) -> usize;

    /// Shape functions of the 4 local nodes at reference coordinates
    /// `s = (s0, s1)` on the unit square, ordered SW, SE, NW, NE
    fn shape(&self, s: [f64; 2]) -> SmallVec<[f64; 4]>;

    /// 1D trace of the shape functions along one edge: weights of the edge's
    /// two end nodes at fractional position `f` in [0, 1]
    fn edge_shape(&self, f: f64) -> [f64; 2] {
        [1.0 - f, f]
    }

    /// Number of nodes interpolating `value_id` (isoparametric: all 4)
    fn ninterpolating_node(&self, _value_id: i32) -> usize {
        4
    }

    /// Local node index of the n-th node interpolating `value_id`
    fn interpolating_node(&self, n: usize, _value_id: i32) -> usize {
        n
    }

    /// 1D reference-coordinate fraction of the n1d-th interpolating node
    /// along one direction (isoparametric bilinear: the two ends)
    fn local_one_d_fraction_of_interpolating_node(&self, n1d: usize, _value_id: i32) -> f64 {
        n1d as f64
    }

    /// Basis used to interpolate `value_id` (isoparametric: the shape functions)
    fn interpolating_basis(&self, s: [f64; 2], _value_id: i32) -> SmallVec<[f64; 4]> {
        self.shape(s)
    }
}

/// Per-kind hook run after the geometric hanging-node pass, for kinds whose
/// unknowns are not all interpolated by every node. Installs per-value
/// overrides on the nodes of `elem_id`. When a node admits more than one
/// valid master configuration the kind picks one; the choice only has to be
/// made consistently across the mesh.
pub trait HangingAware {
    fn further_setup_hanging_nodes(&self, _mesh: &mut Mesh, _elem_id: usize) {}
}

/// The full capability set of a refineable element kind
pub trait ElementKind:
    Splittable + ContinuouslyInterpolated + HangingAware + fmt::Debug + Send + Sync
{
    fn name(&self) -> &'static str;

    /// Generalized positional coordinate types (1 unless the kind stores
    /// positional derivatives at nodes)
    fn nposition_type(&self) -> usize {
        1
    }
}

/// Bilinear quadrilateral with `nvalue` isoparametrically interpolated
/// unknowns per node. Refines isotropically into 4 sons.
#[derive(Debug, Clone)]
pub struct BilinearQuad {
    nvalue: usize,
}

impl BilinearQuad {
    pub fn new(nvalue: usize) -> Self {
        Self { nvalue }
    }
}

impl Splittable for BilinearQuad {
    fn required_nsons(&self) -> usize {
        4
    }
}

impl ContinuouslyInterpolated for BilinearQuad {
    fn nvalue(&self) -> usize {
        self.nvalue
    }

    fn shape(&self, s: [f64; 2]) -> SmallVec<[f64; 4]> {
        let [s0, s1] = s;
        smallvec![
            (1.0 - s0) * (1.0 - s1),
            s0 * (1.0 - s1),
            (1.0 - s0) * s1,
            s0 * s1,
        ]
    }
}

impl HangingAware for BilinearQuad {}

impl ElementKind for BilinearQuad {
    fn name(&self) -> &'static str {
        "BilinearQuad"
    }
}

/// Reference coordinates of local node `q` (SW, SE, NW, NE)
pub fn local_node_coords(q: usize) -> [f64; 2] {
    [(q & 1) as f64, (q >> 1) as f64]
}
