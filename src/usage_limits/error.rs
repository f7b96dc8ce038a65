use std::fmt;
use thiserror::Error;

/// Platform capabilities the engine consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    UsageEvents,
    Overlay,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::UsageEvents => write!(f, "usage events"),
            Capability::Overlay => write!(f, "overlay"),
        }
    }
}

/// Failure of an external capability. Never fatal: the loop skips the tick.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{0} permission is not granted")]
    PermissionDenied(Capability),

    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

/// Rejected pause request
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PauseError {
    #[error("no pause grants left today for {app_id} (limit {max} per day)")]
    Exhausted { app_id: String, max: u32 },
}

/// Record file failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode records: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode records: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unsupported schema version {found} in namespace '{namespace}' (expected {expected})")]
    UnsupportedVersion {
        namespace: String,
        found: u32,
        expected: u32,
    },

    #[error("record file belongs to namespace '{found}', expected '{expected}'")]
    WrongNamespace { expected: String, found: String },
}
