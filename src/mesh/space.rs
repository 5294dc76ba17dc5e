use std::fmt;

#[cfg(feature = "json_export")]
use json::{array, JsonValue};

/// A point in 2D real space
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dist(&self, other: &Self) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Whether a line drawn to `other` is closer to the x-axis (U) or the y-axis (V)
    pub fn orientation_with(&self, other: &Self) -> ParaDir {
        if (other.x - self.x).abs() >= (other.y - self.y).abs() {
            ParaDir::U
        } else {
            ParaDir::V
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:.10}, {:.10})", self.x, self.y)
    }
}

#[cfg(feature = "json_export")]
impl From<Point> for JsonValue {
    fn from(point: Point) -> Self {
        array![point.x, point.y]
    }
}

/// Orientation of an `Edge` relative to the two axes of the mesh
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParaDir {
    /// Roughly parallel to the x-axis
    U,
    /// Roughly parallel to the y-axis
    V,
}

#[cfg(feature = "json_export")]
impl From<ParaDir> for JsonValue {
    fn from(dir: ParaDir) -> Self {
        match dir {
            ParaDir::U => JsonValue::from("U"),
            ParaDir::V => JsonValue::from("V"),
        }
    }
}
