//! 2D finite element h-refinement with hanging-node constraint management.
//!
//! A [`Mesh`] of quadrilateral elements can be refined non-uniformly: each
//! element splits into 4 sons, tracked in a refinement [`Tree`], and the
//! nodes stranded on the fine side of a coarse/fine interface are constrained
//! to the coarse edge's end nodes ([`HangInfo`]) so that the interpolated
//! fields stay continuous. Local equation numbering ([`LocalEqnMap`]) and
//! finite-difference Jacobian assembly (the [`assembly`] and [`solid`]
//! modules) resolve those constraints transparently, so physics kernels only
//! ever read fields through the hanging-aware accessors.

pub mod assembly;
pub mod element;
pub mod eqn;
pub mod error;
pub mod mesh;
pub mod solid;
pub mod tree;

pub use assembly::{fill_in_jacobian_from_nodal_by_fd, Perturbation, DEFAULT_FD_STEP};
pub use element::{
    BilinearQuad, ContinuouslyInterpolated, ElementKind, HangingAware, Splittable,
};
pub use eqn::LocalEqnMap;
pub use error::{ErrorKind, FemError};
pub use mesh::edge::Edge;
pub use mesh::elem::{Elem, ElemUninit};
pub use mesh::hanging::HangInfo;
pub use mesh::node::Node;
pub use mesh::refinement::RefinementPlan;
pub use mesh::space::{ParaDir, Point};
pub use mesh::{
    Mesh, RefinementOutcome, MAX_INTEGRITY_TOLERANCE, MAX_REFINE_LEVEL, MIN_EDGE_LENGTH,
};
pub use solid::{
    assign_solid_local_eqn_numbers, fill_in_jacobian_by_fd,
    fill_in_jacobian_from_solid_position_by_fd,
};
pub use tree::{Tree, TreeIdx};
