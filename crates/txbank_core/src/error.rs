//! Technology-neutral error classification.
//!
//! Every layer keeps its own error enum; [`ErrorKind`] is the shared tag
//! callers match on without naming storage-specific types.

use std::fmt::{Display, Formatter};

/// Coarse failure category shared by store and service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No account matches the requested id.
    NotFound,
    /// Insert collided with an existing primary key.
    DuplicateKey,
    /// Any other storage or connection failure.
    DataAccessFailure,
    /// Input or business-rule rejection.
    ValidationFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::DuplicateKey => "duplicate_key",
            Self::DataAccessFailure => "data_access_failure",
            Self::ValidationFailure => "validation_failure",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
