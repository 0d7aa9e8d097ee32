//! Reassembly of decompressed blocks into file contents, and persistence.
//!
//! The output buffer is allocated once at the file's full size.  Each block
//! lands at the offset implied by the declared sizes of the blocks before
//! it, so blocks may be placed in any order.

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::codec::CodecError;
use crate::error::{Result, UnpackError};
use crate::toc::BlockDescriptor;

/// Paths at or above this many characters get the Windows long-path prefix.
pub const LONG_PATH_THRESHOLD: usize = 255;

pub struct FileAssembler {
    offsets: Vec<usize>,
    sizes:   Vec<usize>,
    buf:     Vec<u8>,
}

impl FileAssembler {
    pub fn new(blocks: &[BlockDescriptor]) -> Self {
        let mut offsets = Vec::with_capacity(blocks.len());
        let mut sizes   = Vec::with_capacity(blocks.len());
        let mut total   = 0usize;
        for b in blocks {
            offsets.push(total);
            sizes.push(b.uncompressed_size as usize);
            total += b.uncompressed_size as usize;
        }
        Self { offsets, sizes, buf: vec![0u8; total] }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Copy block `index` into its slot.
    pub fn place(&mut self, index: usize, data: &[u8]) -> Result<()> {
        let (offset, size) = match (self.offsets.get(index), self.sizes.get(index)) {
            (Some(&o), Some(&s)) => (o, s),
            _ => {
                return Err(UnpackError::InvalidMetadata(format!(
                    "block index {index} out of range ({} blocks)",
                    self.offsets.len()
                )))
            }
        };
        if data.len() != size {
            return Err(CodecError::SizeMismatch {
                method:   format!("block {index}"),
                expected: size,
                actual:   data.len(),
            }
            .into());
        }
        self.buf[offset..offset + size].copy_from_slice(data);
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Place every block in order and return the file contents.
    pub fn assemble(blocks: &[BlockDescriptor], decompressed: &[Vec<u8>]) -> Result<Vec<u8>> {
        let mut asm = Self::new(blocks);
        for (i, data) in decompressed.iter().enumerate() {
            asm.place(i, data)?;
        }
        Ok(asm.finish())
    }
}

/// `output_dir / mount_point / file_path`.
///
/// Only normal components of the mount point and file path are kept, so
/// mount points such as `../../../` and absolute paths cannot escape
/// `output_dir`.
pub fn destination(output_dir: &Path, mount_point: &str, file_path: &str) -> PathBuf {
    let mut path = output_dir.to_path_buf();
    for part in [mount_point, file_path] {
        for comp in Path::new(&part.replace('\\', "/")).components() {
            if let Component::Normal(c) = comp {
                path.push(c);
            }
        }
    }
    path
}

/// Write `data` to `path`, creating parents and replacing any existing file.
pub fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| UnpackError::at_path(parent, e))?;
    }
    let target = long_path(path);
    fs::write(&target, data).map_err(|e| UnpackError::at_path(path, e))?;
    debug!(path = %path.display(), bytes = data.len(), "wrote file");
    Ok(())
}

/// Windows rejects paths past MAX_PATH unless they carry the `\\?\` prefix,
/// which in turn requires an absolute path with backslashes.
#[cfg(windows)]
fn long_path(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text.len() < LONG_PATH_THRESHOLD || text.starts_with(r"\\?\") {
        return path.to_path_buf();
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    PathBuf::from(format!(r"\\?\{}", absolute.to_string_lossy().replace('/', "\\")))
}

#[cfg(not(windows))]
fn long_path(path: &Path) -> PathBuf {
    path.to_path_buf()
}
