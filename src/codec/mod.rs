//! Codec registry: compression-method names → decompressors.
//!
//! # Identity rules
//! IoStore containers name their compression methods in the table of
//! contents (`"None"`, `"Zlib"`, `"Oodle"`, ...) and every block refers to one
//! of them by index.  A [`CodecRegistry`] maps those names to [`Codec`]
//! implementations.  Lookup ignores ASCII case.
//!
//! The registry is a value handed to the unpacker, never a global.  A
//! reader that cannot resolve a method name MUST fail; there is no fallback
//! codec.
//!
//! # Built-ins
//! `None`, `Zlib`, `Gzip`, `LZ4` and `Zstd` ship with the crate.  Oodle is
//! proprietary and must be registered by the caller, e.g. with a closure:
//!
//! ```
//! use ucas_unpack::codec::{CodecError, CodecRegistry};
//!
//! let mut codecs = CodecRegistry::with_builtins();
//! codecs.register("Oodle", |data: &[u8], size: usize| -> Result<Vec<u8>, CodecError> {
//!     // hand off to an external Oodle binding here
//!     let _ = data;
//!     Ok(vec![0u8; size])
//! });
//! assert!(codecs.contains("oodle"));
//! ```

use flate2::read::{GzDecoder, ZlibDecoder};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decompression error ({method}): {message}")]
    Decompression { method: String, message: String },
    /// The codec produced a different length than the block declares.
    #[error("{method} produced {actual} bytes, block declares {expected}")]
    SizeMismatch { method: String, expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    pub fn decompression(method: &str, err: impl fmt::Display) -> Self {
        CodecError::Decompression { method: method.to_owned(), message: err.to_string() }
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

/// A block decompressor.
///
/// `uncompressed_size` is the block's declared output length.  Codecs are
/// expected to return exactly that many bytes.
pub trait Codec: Send + Sync {
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, CodecError>;
}

impl<F> Codec for F
where
    F: Fn(&[u8], usize) -> Result<Vec<u8>, CodecError> + Send + Sync,
{
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, CodecError> {
        self(data, uncompressed_size)
    }
}

// ── Built-in codec implementations ──────────────────────────────────────────

/// Stored verbatim.  Output is the input truncated or zero-extended to the
/// declared size.
pub struct NoneCodec;
impl Codec for NoneCodec {
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![0u8; uncompressed_size];
        let n = data.len().min(uncompressed_size);
        out[..n].copy_from_slice(&data[..n]);
        Ok(out)
    }
}

pub struct ZlibCodec;
impl Codec for ZlibCodec {
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(uncompressed_size);
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::decompression("Zlib", e))?;
        Ok(out)
    }
}

pub struct GzipCodec;
impl Codec for GzipCodec {
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(uncompressed_size);
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::decompression("Gzip", e))?;
        Ok(out)
    }
}

/// Raw LZ4 block format (no frame, no size prefix).
pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, CodecError> {
        lz4_flex::block::decompress(data, uncompressed_size)
            .map_err(|e| CodecError::decompression("LZ4", e))
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, CodecError> {
        zstd::bulk::decompress(data, uncompressed_size)
            .map_err(|e| CodecError::decompression("Zstd", e))
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Name-keyed set of decompressors for one unpack run.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// An empty registry.  Every lookup fails until codecs are registered.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("None", NoneCodec);
        reg.register("Zlib", ZlibCodec);
        reg.register("Gzip", GzipCodec);
        reg.register("LZ4",  Lz4Codec);
        reg.register("Zstd", ZstdCodec);
        reg
    }

    /// Add or replace the codec for `name`.
    pub fn register(&mut self, name: &str, codec: impl Codec + 'static) -> &mut Self {
        self.codecs.insert(name.to_ascii_lowercase(), Arc::new(codec));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Codec> {
        self.codecs.get(&name.to_ascii_lowercase()).map(|c| c.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, lowercased and sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry").field("codecs", &self.names()).finish()
    }
}
