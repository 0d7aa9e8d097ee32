//! Crate-wide error type for the unpack pipeline.
//!
//! Every variant is fatal for the current run.  Errors carry the offending
//! identifier (method name, path, byte counts) so the caller can report them
//! without re-deriving context.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::CryptoError;

pub type Result<T> = std::result::Result<T, UnpackError>;

#[derive(Error, Debug)]
pub enum UnpackError {
    /// A compression method name has no registered decompressor.
    #[error("Decompression method '{method}' not known")]
    UnknownCodec { method: String },

    /// A block references a slot outside the compression method table.
    #[error("Compression method index {index} out of range ({available} methods declared)")]
    InvalidMethodIndex { index: u8, available: usize },

    /// The data blob ended before the declared block size could be read.
    #[error("Could not read the correct size at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead { offset: u64, expected: u64, actual: u64 },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Invalid container metadata: {0}")]
    InvalidMetadata(String),

    #[error("Metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure tied to a concrete output path.
    #[error("IO error on {}: {source}", .path.display())]
    Path {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl UnpackError {
    pub(crate) fn at_path(path: impl Into<PathBuf>, source: io::Error) -> Self {
        UnpackError::Path { path: path.into(), source }
    }
}
