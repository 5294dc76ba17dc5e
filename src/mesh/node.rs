use super::hanging::HangInfo;
use super::space::Point;

use smallvec::SmallVec;
use std::collections::BTreeMap;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// A mesh vertex shared by up to four `Elem`s.
///
/// Nodes own the field-value storage for every continuously interpolated
/// unknown (with `ntstorage` history values per unknown, `t = 0` being the
/// present) and their own positional history. They also carry the hanging
/// constraint records installed by the mesh-wide hanging-node pass.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: usize,
    pub boundary: bool,
    coords: SmallVec<[Point; 2]>,
    values: Vec<f64>,
    nvalue: usize,
    ntstorage: usize,
    nposition_type: usize,
    pinned: SmallVec<[bool; 4]>,
    position_pinned: SmallVec<[bool; 2]>,
    obsolete: bool,
    hang: Option<HangInfo>,
    value_hang: BTreeMap<usize, HangInfo>,
}

impl Node {
    /// Construct a new Node at `coords` with storage for `nvalue` unknowns,
    /// each with `ntstorage` history values
    pub fn new(id: usize, coords: Point, ntstorage: usize, nvalue: usize, boundary: bool) -> Self {
        assert!(ntstorage > 0, "Nodes must store at least one history value!");

        Self {
            id,
            boundary,
            coords: std::iter::repeat(coords).take(ntstorage).collect(),
            values: vec![0.0; ntstorage * nvalue],
            nvalue,
            ntstorage,
            nposition_type: 1,
            pinned: std::iter::repeat(false).take(nvalue).collect(),
            position_pinned: std::iter::repeat(false).take(2).collect(),
            obsolete: false,
            hang: None,
            value_hang: BTreeMap::new(),
        }
    }

    pub fn nvalue(&self) -> usize {
        self.nvalue
    }

    pub fn ntstorage(&self) -> usize {
        self.ntstorage
    }

    /// Number of generalized positional coordinate types (1 unless the node
    /// stores positional derivatives, e.g. for Hermite elements)
    pub fn nposition_type(&self) -> usize {
        self.nposition_type
    }

    // ----------------------------------------------------------------------------------------------------
    // value / position storage
    // ----------------------------------------------------------------------------------------------------

    /// Raw stored value of the i-th unknown at history level t. Does not
    /// resolve hanging constraints; see `Mesh::nodal_value` for that.
    pub fn value(&self, t: usize, i: usize) -> f64 {
        #[cfg(feature = "range_checking")]
        self.check_value_index(t, i, "Node::value()");

        self.values[t * self.nvalue + i]
    }

    pub fn set_value(&mut self, t: usize, i: usize, value: f64) {
        #[cfg(feature = "range_checking")]
        self.check_value_index(t, i, "Node::set_value()");

        self.values[t * self.nvalue + i] = value;
    }

    /// Raw stored position at history level t
    pub fn position(&self, t: usize) -> Point {
        self.coords[t]
    }

    pub fn set_position(&mut self, t: usize, coords: Point) {
        self.coords[t] = coords;
    }

    /// The k-th coordinate (0 = x, 1 = y) at history level t
    pub fn coordinate(&self, t: usize, k: usize) -> f64 {
        match k {
            0 => self.coords[t].x,
            1 => self.coords[t].y,
            _ => panic!("Coordinate index {} is not in the range (0,1)!", k),
        }
    }

    pub fn set_coordinate(&mut self, t: usize, k: usize, value: f64) {
        match k {
            0 => self.coords[t].x = value,
            1 => self.coords[t].y = value,
            _ => panic!("Coordinate index {} is not in the range (0,1)!", k),
        }
    }

    #[cfg(feature = "range_checking")]
    fn check_value_index(&self, t: usize, i: usize, caller: &str) {
        if i >= self.nvalue {
            panic!(
                "Range Error in {}: value {} does not exist; the node stores {} values",
                caller, i, self.nvalue,
            );
        }
        if t >= self.ntstorage {
            panic!(
                "Range Error in {}: history value {} does not exist; the node stores {} history values",
                caller, t, self.ntstorage,
            );
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // pinning
    // ----------------------------------------------------------------------------------------------------

    /// Remove the i-th unknown from the set of equations (e.g. to apply a boundary condition)
    pub fn pin(&mut self, i: usize) {
        self.pinned[i] = true;
    }

    pub fn unpin(&mut self, i: usize) {
        self.pinned[i] = false;
    }

    pub fn is_pinned(&self, i: usize) -> bool {
        self.pinned[i]
    }

    /// Pin the k-th coordinate of the p-th position type
    pub fn pin_position(&mut self, p: usize, k: usize) {
        self.position_pinned[p * 2 + k] = true;
    }

    pub fn unpin_position(&mut self, p: usize, k: usize) {
        self.position_pinned[p * 2 + k] = false;
    }

    pub fn is_position_pinned(&self, p: usize, k: usize) -> bool {
        self.position_pinned[p * 2 + k]
    }

    // ----------------------------------------------------------------------------------------------------
    // obsolescence (garbage collection of de-refined nodes)
    // ----------------------------------------------------------------------------------------------------

    pub fn set_obsolete(&mut self) {
        self.obsolete = true;
    }

    pub fn set_non_obsolete(&mut self) {
        self.obsolete = false;
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete
    }

    // ----------------------------------------------------------------------------------------------------
    // hanging records
    // ----------------------------------------------------------------------------------------------------

    /// Install (or clear) the geometric hanging record, which constrains the
    /// nodal position and all continuously interpolated unknowns that have no
    /// per-value override
    pub fn set_hanging(&mut self, hang: Option<HangInfo>) {
        self.hang = hang;
    }

    /// Install (or clear) a hanging record for the i-th unknown only; used by
    /// element kinds whose unknowns are not all interpolated by every node
    pub fn set_value_hanging(&mut self, i: usize, hang: Option<HangInfo>) {
        match hang {
            Some(h) => {
                self.value_hang.insert(i, h);
            }
            None => {
                self.value_hang.remove(&i);
            }
        }
    }

    /// Remove all hanging records (both geometric and per-value)
    pub fn clear_hanging(&mut self) {
        self.hang = None;
        self.value_hang.clear();
    }

    /// The hanging record governing `value_id`. An id of -1 addresses the
    /// geometric (positional) record; non-negative ids resolve to a per-value
    /// override if one exists and fall back to the geometric record otherwise.
    pub fn hanging_for(&self, value_id: i32) -> Option<&HangInfo> {
        if value_id >= 0 {
            if let Some(hang) = self.value_hang.get(&(value_id as usize)) {
                return Some(hang);
            }
        }
        self.hang.as_ref()
    }

    /// Is this node constrained for `value_id`? (-1 addresses the position)
    pub fn is_hanging(&self, value_id: i32) -> bool {
        self.hanging_for(value_id)
            .map_or(false, |hang| hang.is_hanging(self.id))
    }

    /// Produce a Json Object that describes this Node
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "coords": self.coords[0],
            "boundary": self.boundary,
            "obsolete": self.obsolete,
            "hanging": match &self.hang {
                Some(hang) if hang.is_hanging(self.id) => hang.to_json(),
                _ => JsonValue::from(Vec::<JsonValue>::new()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use smallvec::smallvec;

    #[test]
    fn value_storage_is_indexed_by_history_then_unknown() {
        let mut node = Node::new(0, Point::new(0.5, 0.25), 3, 2, false);
        assert_eq!(node.ntstorage(), 3);
        assert_eq!(node.nvalue(), 2);

        node.set_value(0, 1, 4.0);
        node.set_value(2, 0, -1.5);
        assert_abs_diff_eq!(node.value(0, 1), 4.0);
        assert_abs_diff_eq!(node.value(2, 0), -1.5);
        assert_abs_diff_eq!(node.value(1, 0), 0.0);
    }

    #[test]
    fn per_value_hanging_overrides_the_geometric_record() {
        let mut node = Node::new(9, Point::new(1.0, 0.5), 1, 2, false);
        node.set_hanging(Some(HangInfo::new(smallvec![(3, 0.5), (4, 0.5)])));
        node.set_value_hanging(1, Some(HangInfo::conforming(9)));

        // position and value 0 follow the geometric record
        assert!(node.is_hanging(-1));
        assert!(node.is_hanging(0));
        // value 1 was released by its override
        assert!(!node.is_hanging(1));

        node.clear_hanging();
        assert!(!node.is_hanging(-1));
        assert!(!node.is_hanging(0));
    }

    #[test]
    fn positional_pinning_is_per_coordinate() {
        let mut node = Node::new(2, Point::new(0.0, 0.0), 1, 1, true);
        node.pin_position(0, 1);
        assert!(!node.is_position_pinned(0, 0));
        assert!(node.is_position_pinned(0, 1));
    }
}
