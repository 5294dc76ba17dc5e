use smallvec::{smallvec, SmallVec};

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// Constraint record for a hanging node: an ordered list of (master node,
/// weight) pairs such that the node's value equals the weighted sum of the
/// master nodal values for every stored history value.
///
/// The weights at a given derivative order must sum to 1 (partition of
/// unity), which guarantees that constant fields are reproduced exactly
/// across non-matching element boundaries.
#[derive(Clone, Debug, PartialEq)]
pub struct HangInfo {
    masters: SmallVec<[(usize, f64); 4]>,
}

impl HangInfo {
    /// Construct a constraint record from a list of (master node id, weight) pairs
    pub fn new(masters: SmallVec<[(usize, f64); 4]>) -> Self {
        assert!(
            !masters.is_empty(),
            "A hanging-node record must have at least one master!"
        );
        Self { masters }
    }

    /// Record for a conforming node: a single master, itself, with weight 1
    pub fn conforming(node_id: usize) -> Self {
        Self {
            masters: smallvec![(node_id, 1.0)],
        }
    }

    pub fn nmaster(&self) -> usize {
        self.masters.len()
    }

    /// The m-th (master node id, weight) pair
    pub fn master(&self, m: usize) -> (usize, f64) {
        self.masters[m]
    }

    pub fn masters(&self) -> impl Iterator<Item = &(usize, f64)> + '_ {
        self.masters.iter()
    }

    /// A node with exactly one master, itself, carrying weight 1 is not hanging
    pub fn is_hanging(&self, self_id: usize) -> bool {
        !(self.masters.len() == 1
            && self.masters[0].0 == self_id
            && (self.masters[0].1 - 1.0).abs() < 1e-14)
    }

    /// Sum of the master weights; 1.0 for a consistent record
    pub fn weight_sum(&self) -> f64 {
        self.masters.iter().map(|(_, w)| w).sum()
    }

    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::from(
            self.masters
                .iter()
                .map(|(master_id, weight)| {
                    object! {
                        "master": *master_id,
                        "weight": *weight,
                    }
                })
                .collect::<Vec<_>>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn midpoint_record_is_a_partition_of_unity() {
        let hang = HangInfo::new(smallvec![(3, 0.5), (7, 0.5)]);
        assert_eq!(hang.nmaster(), 2);
        assert!(hang.is_hanging(12));
        assert_abs_diff_eq!(hang.weight_sum(), 1.0, epsilon = 1e-14);
    }

    #[test]
    fn self_master_with_unit_weight_is_not_hanging() {
        let hang = HangInfo::conforming(4);
        assert!(!hang.is_hanging(4));
        // the same record attached to a different node is a genuine constraint
        assert!(hang.is_hanging(5));
    }

    #[test]
    #[should_panic]
    fn empty_master_list_is_rejected() {
        let _ = HangInfo::new(SmallVec::new());
    }
}
