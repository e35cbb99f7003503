//! Error types for registry operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entry::RangeInfo;

/// Registry error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Malformed range, zero length, overflow, overlap or conflicting re-registration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No entry matches the address or handle
    #[error("Not found: {0}")]
    NotFound(String),

    /// Query range straddles the boundary of a registered buffer
    #[error("Range straddles registered buffer {0}")]
    Conflict(RangeInfo),

    /// Allocation failure or configured limit reached
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Error codes carried over IPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    Conflict,
    OutOfMemory,
}

impl RegistryError {
    /// Convert to IPC error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::OutOfMemory(_) => ErrorCode::OutOfMemory,
        }
    }

    /// Errno value a device-style transport would return
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::NotFound(_) => libc::ENOENT,
            Self::Conflict(_) => libc::EEXIST,
            Self::OutOfMemory(_) => libc::ENOMEM,
        }
    }

    /// Data of the straddled entry, only present for `Conflict`
    pub fn conflict_range(&self) -> Option<RangeInfo> {
        match self {
            Self::Conflict(range) => Some(*range),
            _ => None,
        }
    }

    /// Should a consumer treat this as "not my buffer" rather than escalate?
    pub fn is_foreign_range(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Conflict(_))
    }

    /// Rebuild an error received over IPC
    pub fn from_code(code: ErrorCode, message: String, range: Option<RangeInfo>) -> Self {
        match (code, range) {
            (ErrorCode::InvalidArgument, _) => Self::InvalidArgument(message),
            (ErrorCode::NotFound, _) => Self::NotFound(message),
            (ErrorCode::Conflict, Some(range)) => Self::Conflict(range),
            // A conflict without its range can only come from a broken peer
            (ErrorCode::Conflict, None) => Self::InvalidArgument(message),
            (ErrorCode::OutOfMemory, _) => Self::OutOfMemory(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::HandleId;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(RegistryError::InvalidArgument("x".into()).errno(), libc::EINVAL);
        assert_eq!(RegistryError::NotFound("x".into()).errno(), libc::ENOENT);
        assert_eq!(RegistryError::OutOfMemory("x".into()).errno(), libc::ENOMEM);

        let range = RangeInfo { base: 100, size: 50, handle: HandleId(7) };
        let conflict = RegistryError::Conflict(range);
        assert_eq!(conflict.errno(), libc::EEXIST);
        assert_eq!(conflict.conflict_range(), Some(range));
        assert!(conflict.is_foreign_range());
    }

    #[test]
    fn test_code_roundtrip() {
        let range = RangeInfo { base: 0x1000, size: 0x2000, handle: HandleId(4) };
        let errors = [
            RegistryError::InvalidArgument("bad".into()),
            RegistryError::NotFound("missing".into()),
            RegistryError::Conflict(range),
            RegistryError::OutOfMemory("full".into()),
        ];

        for err in errors {
            let rebuilt = RegistryError::from_code(
                err.code(),
                match &err {
                    RegistryError::InvalidArgument(m)
                    | RegistryError::NotFound(m)
                    | RegistryError::OutOfMemory(m) => m.clone(),
                    RegistryError::Conflict(_) => err.to_string(),
                },
                err.conflict_range(),
            );
            assert_eq!(rebuilt, err);
        }
    }
}
