use std::fmt;
use std::panic::Location;

/// Classification of the structured errors raised by the refinement core
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A precondition on the mesh/tree topology was violated (e.g. splitting
    /// an element that already has sons)
    Topology,
    /// An index passed to a checked accessor was out of range
    Range,
    /// The requested operation is not implemented for this element kind
    NotImplemented,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Topology => write!(f, "Topology Error"),
            Self::Range => write!(f, "Range Error"),
            Self::NotImplemented => write!(f, "Not Implemented"),
        }
    }
}

/// Structured runtime error carrying a message, the identity of the throwing
/// function and its source location.
///
/// These errors are fatal to the current operation and are never retried;
/// the caller is expected to have violated a precondition.
#[derive(Debug)]
pub struct FemError {
    pub kind: ErrorKind,
    pub message: String,
    pub function: &'static str,
    pub location: &'static Location<'static>,
}

impl FemError {
    #[track_caller]
    pub fn topology(function: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Topology,
            message: message.into(),
            function,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn range(function: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Range,
            message: message.into(),
            function,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn not_implemented(function: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotImplemented,
            message: message.into(),
            function,
            location: Location::caller(),
        }
    }
}

impl fmt::Display for FemError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} in {} ({}:{}): {}",
            self.kind,
            self.function,
            self.location.file(),
            self.location.line(),
            self.message,
        )
    }
}

impl std::error::Error for FemError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_carries_function_and_location() {
        let err = FemError::topology("Tree::split()", "node already has sons");
        assert_eq!(err.kind, ErrorKind::Topology);
        let printed = err.to_string();
        assert!(printed.contains("Tree::split()"));
        assert!(printed.contains("node already has sons"));
        assert!(printed.contains("error.rs"));
    }
}
