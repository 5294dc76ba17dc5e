use std::collections::BTreeSet;

/// Externally owned selection of refinement and de-refinement targets.
///
/// Error estimators and adaptivity drivers mark elements here instead of
/// mutating per-element flags; the plan is then handed to
/// `Mesh::apply_refinement_plan`, which consumes it in one transaction:
/// de-refinements first, then refinements, then the hanging-node pass.
#[derive(Debug, Clone, Default)]
pub struct RefinementPlan {
    refine: BTreeSet<usize>,
    unrefine: BTreeSet<usize>,
}

impl RefinementPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an active element for splitting
    pub fn select_for_refinement(&mut self, elem_id: usize) {
        self.refine.insert(elem_id);
    }

    pub fn deselect_for_refinement(&mut self, elem_id: usize) {
        self.refine.remove(&elem_id);
    }

    /// Mark the sons of `father_id` for merging back into their father
    pub fn select_sons_for_unrefinement(&mut self, father_id: usize) {
        self.unrefine.insert(father_id);
    }

    pub fn deselect_sons_for_unrefinement(&mut self, father_id: usize) {
        self.unrefine.remove(&father_id);
    }

    pub fn is_selected_for_refinement(&self, elem_id: usize) -> bool {
        self.refine.contains(&elem_id)
    }

    pub fn sons_selected_for_unrefinement(&self, father_id: usize) -> bool {
        self.unrefine.contains(&father_id)
    }

    /// Element ids selected for refinement, in ascending order
    pub fn refinements(&self) -> impl Iterator<Item = usize> + '_ {
        self.refine.iter().copied()
    }

    /// Father ids whose sons are selected for de-refinement, in ascending order
    pub fn unrefinements(&self) -> impl Iterator<Item = usize> + '_ {
        self.unrefine.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.refine.is_empty() && self.unrefine.is_empty()
    }
}
