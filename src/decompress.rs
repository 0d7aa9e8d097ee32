//! Per-block decompression dispatch.
//!
//! Blocks name their codec indirectly: an index into the container's
//! compression method table, whose entry is then resolved through the
//! injected [`CodecRegistry`].

use tracing::trace;

use crate::codec::{Codec, CodecError, CodecRegistry};
use crate::error::{Result, UnpackError};
use crate::toc::BlockDescriptor;

pub struct Decompressor<'a> {
    registry: &'a CodecRegistry,
    methods:  &'a [String],
}

impl<'a> Decompressor<'a> {
    pub fn new(registry: &'a CodecRegistry, methods: &'a [String]) -> Self {
        Self { registry, methods }
    }

    /// Resolve a method index to its name and codec.
    pub fn resolve(&self, index: u8) -> Result<(&'a str, &'a dyn Codec)> {
        let method = self
            .methods
            .get(index as usize)
            .ok_or(UnpackError::InvalidMethodIndex { index, available: self.methods.len() })?;
        let codec = self
            .registry
            .get(method)
            .ok_or_else(|| UnpackError::UnknownCodec { method: method.clone() })?;
        Ok((method.as_str(), codec))
    }

    /// Fail early if any block of a file needs a codec this run lacks.
    pub fn check(&self, blocks: &[BlockDescriptor]) -> Result<()> {
        blocks
            .iter()
            .try_for_each(|b| self.resolve(b.compression_method_index).map(|_| ()))
    }

    pub fn decompress_block(&self, raw: &[u8], block: &BlockDescriptor) -> Result<Vec<u8>> {
        let (method, codec) = self.resolve(block.compression_method_index)?;
        let expected = block.uncompressed_size as usize;
        let out = codec.decompress(raw, expected)?;
        if out.len() != expected {
            return Err(CodecError::SizeMismatch {
                method: method.to_owned(),
                expected,
                actual: out.len(),
            }
            .into());
        }
        trace!(method, compressed = raw.len(), uncompressed = expected, "decompressed block");
        Ok(out)
    }

    /// Decompress `raw[i]` with `blocks[i]`, preserving order.
    pub fn decompress_blocks(&self, raw: &[Vec<u8>], blocks: &[BlockDescriptor]) -> Result<Vec<Vec<u8>>> {
        raw.iter()
            .zip(blocks)
            .map(|(data, block)| self.decompress_block(data, block))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: u8, size: u32) -> BlockDescriptor {
        BlockDescriptor {
            offset: 0,
            compressed_size: size,
            uncompressed_size: size,
            compression_method_index: index,
        }
    }

    #[test]
    fn unknown_method_is_named() {
        let reg = CodecRegistry::with_builtins();
        let methods = vec!["None".to_string(), "Oodle".to_string()];
        let d = Decompressor::new(&reg, &methods);
        match d.decompress_block(b"xx", &block(1, 2)) {
            Err(UnpackError::UnknownCodec { method }) => assert_eq!(method, "Oodle"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(d.check(&[block(0, 1), block(1, 1)]).is_err());
        assert!(d.check(&[block(0, 1)]).is_ok());
    }

    #[test]
    fn index_out_of_range() {
        let reg = CodecRegistry::with_builtins();
        let methods = vec!["None".to_string()];
        let d = Decompressor::new(&reg, &methods);
        assert!(matches!(
            d.decompress_block(b"x", &block(3, 1)),
            Err(UnpackError::InvalidMethodIndex { index: 3, available: 1 })
        ));
    }

    #[test]
    fn wrong_output_length_is_rejected() {
        let mut reg = CodecRegistry::new();
        reg.register("Short", |_: &[u8], _: usize| -> std::result::Result<Vec<u8>, CodecError> { Ok(vec![1]) });
        let methods = vec!["Short".to_string()];
        let d = Decompressor::new(&reg, &methods);
        assert!(matches!(
            d.decompress_block(b"abcd", &block(0, 4)),
            Err(UnpackError::Codec(CodecError::SizeMismatch { expected: 4, actual: 1, .. }))
        ));
    }

    #[test]
    fn blocks_keep_order() {
        let reg = CodecRegistry::with_builtins();
        let methods = vec!["None".to_string()];
        let d = Decompressor::new(&reg, &methods);
        let raw = vec![b"ab".to_vec(), b"cde".to_vec()];
        let out = d.decompress_blocks(&raw, &[block(0, 2), block(0, 3)]).unwrap();
        assert_eq!(out, raw);
    }
}
