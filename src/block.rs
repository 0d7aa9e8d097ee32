//! Raw block retrieval from the `.ucas` data blob.
//!
//! Each block is read at its absolute offset.  For encrypted containers the
//! on-disk span is the compressed size rounded up to [`CIPHER_BLOCK_SIZE`];
//! the whole span is decrypted and then cut back to the compressed size.

use std::io::{Read, Seek, SeekFrom};
use tracing::trace;

use crate::crypto::{BlockCipher, CIPHER_BLOCK_SIZE};
use crate::error::{Result, UnpackError};
use crate::toc::BlockDescriptor;

/// Upper bound on the buffer reserved before a block is read.
const MAX_PREALLOC: u64 = 1 << 20;

/// Round `x` up to the next multiple of `a`.  `x` is returned unchanged when
/// already aligned.
#[inline]
pub fn align(x: u64, a: u64) -> u64 {
    x + ((a - (x % a)) % a)
}

/// Reads one file's blocks, decrypting when a cipher is attached.
pub struct BlockReader<'a, R: Read + Seek> {
    reader: &'a mut R,
    cipher: Option<&'a dyn BlockCipher>,
}

impl<'a, R: Read + Seek> BlockReader<'a, R> {
    pub fn new(reader: &'a mut R, cipher: Option<&'a dyn BlockCipher>) -> Self {
        Self { reader, cipher }
    }

    /// Bytes occupied on disk by `block`.
    pub fn span(&self, block: &BlockDescriptor) -> u64 {
        let size = block.compressed_size as u64;
        if self.cipher.is_some() {
            align(size, CIPHER_BLOCK_SIZE as u64)
        } else {
            size
        }
    }

    /// Raw (still compressed) bytes of `block`, exactly `compressed_size` long.
    pub fn read_block(&mut self, block: &BlockDescriptor) -> Result<Vec<u8>> {
        let span = self.span(block);
        self.reader.seek(SeekFrom::Start(block.offset))?;

        // Sizes come from the table of contents; grow with what the blob holds.
        let mut buf = Vec::with_capacity(span.min(MAX_PREALLOC) as usize);
        let actual = (&mut *self.reader).take(span).read_to_end(&mut buf)?;
        if actual as u64 != span {
            return Err(UnpackError::ShortRead {
                offset:   block.offset,
                expected: span,
                actual:   actual as u64,
            });
        }

        if let Some(cipher) = self.cipher {
            cipher.decrypt_in_place(&mut buf)?;
            buf.truncate(block.compressed_size as usize);
        }

        trace!(offset = block.offset, on_disk = span, size = buf.len(), "read block");
        Ok(buf)
    }

    /// Raw bytes of every block, in block order.
    pub fn read_blocks(&mut self, blocks: &[BlockDescriptor]) -> Result<Vec<Vec<u8>>> {
        blocks.iter().map(|b| self.read_block(b)).collect()
    }
}
