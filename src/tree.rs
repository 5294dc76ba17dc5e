use crate::error::FemError;

use smallvec::SmallVec;

/// Stable handle to a node of the refinement forest
pub type TreeIdx = usize;

#[derive(Debug, Clone)]
struct TreeNode {
    elem: Option<usize>,
    father: Option<TreeIdx>,
    sons: SmallVec<[TreeIdx; 4]>,
    pruned: bool,
}

/// The refinement forest: one hierarchy per original (level-0) element.
///
/// All tree nodes live in a single arena and are addressed by `TreeIdx`
/// handles, so father/son navigation never dangles. De-refined branches are
/// tombstoned with the `pruned` flag rather than removed, keeping every
/// handle stable for the life of the mesh.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    roots: Vec<TreeIdx>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new hierarchy for an original mesh element
    pub fn new_root(&mut self, elem_id: usize) -> TreeIdx {
        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            elem: Some(elem_id),
            father: None,
            sons: SmallVec::new(),
            pruned: false,
        });
        self.roots.push(idx);
        idx
    }

    pub fn roots(&self) -> &[TreeIdx] {
        &self.roots
    }

    /// The ultimate ancestor of `idx` (the original, level-0 element's node)
    pub fn root_of(&self, idx: TreeIdx) -> TreeIdx {
        let mut current = idx;
        while let Some(father) = self.nodes[current].father {
            current = father;
        }
        current
    }

    pub fn father_of(&self, idx: TreeIdx) -> Option<TreeIdx> {
        self.nodes[idx].father
    }

    /// The i-th son, or None if `idx` has not been split (or i is out of range)
    pub fn son_of(&self, idx: TreeIdx, i: usize) -> Option<TreeIdx> {
        self.nodes[idx].sons.get(i).copied()
    }

    pub fn sons_of(&self, idx: TreeIdx) -> &[TreeIdx] {
        &self.nodes[idx].sons
    }

    pub fn nsons(&self, idx: TreeIdx) -> usize {
        self.nodes[idx].sons.len()
    }

    /// Number of refinement generations between `idx` and its root
    pub fn depth(&self, idx: TreeIdx) -> usize {
        let mut count = 0;
        let mut current = idx;
        while let Some(father) = self.nodes[current].father {
            current = father;
            count += 1;
        }
        count
    }

    pub fn is_pruned(&self, idx: TreeIdx) -> bool {
        self.nodes[idx].pruned
    }

    /// Attach one fresh son per entry of `son_elem_ids` under `idx`
    pub fn split(
        &mut self,
        idx: TreeIdx,
        son_elem_ids: &[usize],
    ) -> Result<Vec<TreeIdx>, FemError> {
        if !self.nodes[idx].sons.is_empty() {
            return Err(FemError::topology(
                "Tree::split()",
                format!("tree node {} already has sons", idx),
            ));
        }
        if self.nodes[idx].pruned {
            return Err(FemError::topology(
                "Tree::split()",
                format!("tree node {} has been pruned", idx),
            ));
        }

        let son_indices: Vec<TreeIdx> = son_elem_ids
            .iter()
            .map(|&elem_id| {
                let son_idx = self.nodes.len();
                self.nodes.push(TreeNode {
                    elem: Some(elem_id),
                    father: Some(idx),
                    sons: SmallVec::new(),
                    pruned: false,
                });
                son_idx
            })
            .collect();

        self.nodes[idx].sons = son_indices.iter().copied().collect();
        Ok(son_indices)
    }

    /// De-refinement: tombstone the entire branch below `idx` and detach it.
    /// Returns the element ids the pruned nodes pointed at, with both sides
    /// of each element-tree link nulled before any reuse can occur.
    pub fn prune_sons(&mut self, idx: TreeIdx) -> Vec<usize> {
        let mut detached = Vec::new();
        let mut stack: Vec<TreeIdx> = self.nodes[idx].sons.iter().copied().collect();
        self.nodes[idx].sons.clear();

        while let Some(current) = stack.pop() {
            stack.extend(self.nodes[current].sons.iter().copied());
            self.nodes[current].sons.clear();
            self.nodes[current].pruned = true;
            if let Some(elem_id) = self.nodes[current].elem.take() {
                detached.push(elem_id);
            }
        }

        detached
    }

    pub fn element_of(&self, idx: TreeIdx) -> Option<usize> {
        self.nodes[idx].elem
    }

    pub fn set_element(&mut self, idx: TreeIdx, elem_id: usize) {
        self.nodes[idx].elem = Some(elem_id);
    }

    pub fn clear_element(&mut self, idx: TreeIdx) {
        self.nodes[idx].elem = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_counts_refinement_generations() {
        let mut tree = Tree::new();
        let root = tree.new_root(0);
        assert_eq!(tree.depth(root), 0);

        let sons = tree.split(root, &[1, 2, 3, 4]).unwrap();
        assert_eq!(tree.nsons(root), 4);
        for &son in &sons {
            assert_eq!(tree.depth(son), 1);
            assert_eq!(tree.father_of(son), Some(root));
            assert_eq!(tree.root_of(son), root);
        }

        let grandsons = tree.split(sons[2], &[5, 6, 7, 8]).unwrap();
        assert_eq!(tree.depth(grandsons[0]), 2);
        assert_eq!(tree.root_of(grandsons[0]), root);
    }

    #[test]
    fn double_split_is_a_topology_error() {
        let mut tree = Tree::new();
        let root = tree.new_root(0);
        tree.split(root, &[1, 2, 3, 4]).unwrap();
        let err = tree.split(root, &[5, 6, 7, 8]).unwrap_err();
        assert!(err.to_string().contains("already has sons"));
    }

    #[test]
    fn prune_detaches_the_whole_branch_and_keeps_handles_stable() {
        let mut tree = Tree::new();
        let root = tree.new_root(0);
        let sons = tree.split(root, &[1, 2, 3, 4]).unwrap();
        let grandsons = tree.split(sons[0], &[5, 6, 7, 8]).unwrap();

        let mut detached = tree.prune_sons(root);
        detached.sort_unstable();
        assert_eq!(detached, vec![1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(tree.nsons(root), 0);
        for &idx in sons.iter().chain(grandsons.iter()) {
            assert!(tree.is_pruned(idx));
            assert_eq!(tree.element_of(idx), None);
        }

        // the hierarchy can be split again with fresh sons
        let fresh = tree.split(root, &[9, 10, 11, 12]).unwrap();
        assert_eq!(tree.element_of(fresh[0]), Some(9));
    }

    #[test]
    fn navigation_past_the_root_yields_none() {
        let mut tree = Tree::new();
        let root = tree.new_root(7);
        assert_eq!(tree.father_of(root), None);
        assert_eq!(tree.son_of(root, 0), None);
        assert_eq!(tree.element_of(root), Some(7));
    }
}
