//! Table-of-contents model consumed by the unpack pipeline.
//!
//! The binary `.utoc` parser lives outside this crate.  It hands over a
//! [`ContainerMetadata`] either as a value or as its JSON serialisation:
//!
//! ```json
//! {
//!   "mount_point": "../../../",
//!   "compression_methods": ["None", "Zlib"],
//!   "is_encrypted": false,
//!   "files": [
//!     { "file_path": "Game/Content/Foo.uasset", "total_length": 100,
//!       "compression_blocks": [
//!         { "offset": 0, "compressed_size": 64,
//!           "uncompressed_size": 100, "compression_method_index": 1 } ] }
//!   ]
//! }
//! ```
//!
//! `cipher_key` is serialised as a hex string.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;

use crate::error::{Result, UnpackError};

/// Path of the dependency manifest IoStore keeps alongside real assets.
/// It is never extracted.
pub const DEP_FILE_NAME: &str = "dependencies";

/// Location and coding of one compression block inside the data blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    /// Absolute byte offset into the `.ucas` blob.
    pub offset:                   u64,
    pub compressed_size:          u32,
    pub uncompressed_size:        u32,
    /// Index into [`ContainerMetadata::compression_methods`].
    pub compression_method_index: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file_path:          String,
    /// Declared reconstructed length.  Used for progress accounting only.
    pub total_length:       u64,
    pub compression_blocks: Vec<BlockDescriptor>,
}

impl FileEntry {
    /// Sum of the declared uncompressed block sizes.
    pub fn blocks_uncompressed_size(&self) -> u64 {
        self.compression_blocks
            .iter()
            .map(|b| b.uncompressed_size as u64)
            .sum()
    }

    pub fn blocks_compressed_size(&self) -> u64 {
        self.compression_blocks
            .iter()
            .map(|b| b.compressed_size as u64)
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    #[serde(default)]
    pub mount_point:         String,
    pub compression_methods: Vec<String>,
    #[serde(default)]
    pub is_encrypted:        bool,
    #[serde(default, with = "hex_key", skip_serializing_if = "Option::is_none")]
    pub cipher_key:          Option<Vec<u8>>,
    pub files:               Vec<FileEntry>,
}

impl ContainerMetadata {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Name of the compression method referenced by `index`.
    pub fn method_name(&self, index: u8) -> Result<&str> {
        self.compression_methods
            .get(index as usize)
            .map(String::as_str)
            .ok_or(UnpackError::InvalidMethodIndex {
                index,
                available: self.compression_methods.len(),
            })
    }

    /// Check the structural invariants a run relies on.
    ///
    /// Codec availability is not checked here; that depends on the registry
    /// the caller injects.  Neither is the key: a cipher may be supplied
    /// separately from the metadata.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.files.len());
        for file in &self.files {
            if !seen.insert(file.file_path.as_str()) {
                return Err(UnpackError::InvalidMetadata(format!(
                    "duplicate file path: {}",
                    file.file_path
                )));
            }
            for block in &file.compression_blocks {
                self.method_name(block.compression_method_index)?;
            }
        }
        Ok(())
    }
}

mod hex_key {
    use super::*;

    pub fn serialize<S: Serializer>(key: &Option<Vec<u8>>, s: S) -> std::result::Result<S::Ok, S::Error> {
        match key {
            Some(k) => s.serialize_some(&hex::encode(k)),
            None    => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| {
            let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(&s);
            hex::decode(s).map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}
