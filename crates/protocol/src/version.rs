//! Trace format version management

use serde::{Deserialize, Serialize};

/// Trace format version using semantic versioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Version written into new trace files
pub const CURRENT_VERSION: TraceVersion = TraceVersion {
    major: 1,
    minor: 0,
    patch: 0,
};

impl TraceVersion {
    /// A reader at `self` can replay traces written at `other`
    pub fn is_compatible_with(&self, other: &TraceVersion) -> bool {
        self.major == other.major && self.minor >= other.minor
    }
}

impl std::fmt::Display for TraceVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
