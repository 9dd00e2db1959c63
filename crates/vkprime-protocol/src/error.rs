use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum ProtocolError {
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("unexpected record: expected {expected}, found {found}")]
    UnexpectedRecord { expected: String, found: String },

    #[error("stream format version {found} is not supported (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("stream truncated after {records} records")]
    Truncated { records: u64 },
}
