use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::header::HASH_KEY;

/// Structural damage found while parsing archive bytes.
///
/// Always fatal to the current parse; nothing is silently recovered.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Truncated length prefix: expected 8 bytes, found {found}")]
    TruncatedLength { found: usize },
    #[error("Truncated payload: declared {declared} bytes, found {found}")]
    TruncatedPayload { declared: u64, found: u64 },
    #[error("Malformed type tag")]
    MalformedTag,
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
    #[error("Fragment index is corrupt: {0}")]
    CorruptIndex(String),
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

#[derive(Error, Debug)]
pub enum BakedError {
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
    #[error("Unsupported data type: {0}")]
    UnsupportedType(String),
    #[error("Type already registered: {0}")]
    DuplicateType(String),
    #[error("Float {0} has no decimal wire form")]
    UnrepresentableFloat(f64),
    #[error("'{}' metadata key is reserved for the content hash", HASH_KEY)]
    ReservedKey,
    #[error("Invalid identifier '{component}' in {}", .path.display())]
    Naming { component: String, path: PathBuf },
    #[error("Metadata must be a dict, got {0}")]
    MetadataNotDict(&'static str),
    #[error("Source path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("Not a baked archive: {}", .0.display())]
    NotAnArchive(PathBuf),
    #[error("Cannot decode archive header: {0}")]
    CorruptHeader(&'static str),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BakedError>;
