//! The unpack run: filter → read → decrypt → decompress → assemble → write.
//!
//! ```no_run
//! use ucas_unpack::codec::CodecRegistry;
//! use ucas_unpack::toc::ContainerMetadata;
//! use ucas_unpack::unpack::Unpacker;
//!
//! let meta = ContainerMetadata::from_json(&std::fs::read("global.json")?)?;
//! let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins())?;
//! let n = unpacker.unpack("global.ucas", "out", "*.uasset", &[])?;
//! println!("{n} files");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A run is synchronous and single-threaded.  The blob is opened once and
//! held until the run ends.  The first error aborts the run; files written
//! before it stay on disk.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::assemble::{destination, write_file, FileAssembler};
use crate::block::BlockReader;
use crate::codec::CodecRegistry;
use crate::crypto::{Aes256Ecb, BlockCipher, CryptoError};
use crate::decompress::Decompressor;
use crate::error::{Result, UnpackError};
use crate::filter::FilterMatcher;
use crate::toc::{ContainerMetadata, FileEntry};

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`Unpacker::unpack_with`].
#[derive(Debug, Clone)]
pub struct UnpackOptions {
    /// Filter string, see [`FilterMatcher`].
    pub filter:  String,
    /// Worker threads for the `parallel` feature.  `0` lets rayon decide.
    /// Ignored by sequential runs.
    pub workers: usize,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            filter:  "*".to_owned(),
            workers: 0,
        }
    }
}

// ── Notifications ────────────────────────────────────────────────────────────

/// Sent after each file has been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUnpacked {
    pub path:           String,
    /// 1-based position of this file in the run.
    pub index:          usize,
    pub total_files:    usize,
    /// Bytes produced so far, this file included.
    pub unpacked_bytes: u64,
    /// Declared size of the whole selection.
    pub total_bytes:    u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnpackEvent {
    FileUnpacked(FileUnpacked),
    Finished { files_unpacked: usize },
}

/// Receives progress from a run.  Called on the thread doing the work.
pub trait UnpackObserver: Send + Sync {
    fn file_unpacked(&self, _event: &FileUnpacked) {}
    fn finished(&self, _files_unpacked: usize) {}
}

/// Forwards events into a channel.  A dropped receiver is ignored.
impl UnpackObserver for Sender<UnpackEvent> {
    fn file_unpacked(&self, event: &FileUnpacked) {
        let _ = self.send(UnpackEvent::FileUnpacked(event.clone()));
    }

    fn finished(&self, files_unpacked: usize) {
        let _ = self.send(UnpackEvent::Finished { files_unpacked });
    }
}

pub(crate) fn notify_file(observers: &[&dyn UnpackObserver], event: &FileUnpacked) {
    for o in observers {
        o.file_unpacked(event);
    }
}

pub(crate) fn notify_finished(observers: &[&dyn UnpackObserver], files_unpacked: usize) {
    for o in observers {
        o.finished(files_unpacked);
    }
}

// ── Unpacker ─────────────────────────────────────────────────────────────────

pub struct Unpacker<'m> {
    meta:   &'m ContainerMetadata,
    codecs: CodecRegistry,
    cipher: Option<Box<dyn BlockCipher>>,
}

impl<'m> Unpacker<'m> {
    /// Validate `meta` and prepare a run with `codecs`.
    ///
    /// For encrypted containers the metadata key, when present, builds an
    /// AES-256-ECB cipher.  A container without a key fails with
    /// `MissingKey` once an encrypted file is read, unless a cipher is
    /// attached with [`with_cipher`](Self::with_cipher).
    pub fn new(meta: &'m ContainerMetadata, codecs: CodecRegistry) -> Result<Self> {
        meta.validate()?;
        let cipher: Option<Box<dyn BlockCipher>> = match meta.cipher_key.as_deref() {
            Some(key) if meta.is_encrypted => Some(Box::new(Aes256Ecb::new(key)?)),
            _ => None,
        };
        Ok(Self { meta, codecs, cipher })
    }

    /// Like [`new`](Self::new), but decrypts with `cipher` and ignores any
    /// key in the metadata.
    pub fn with_cipher_for(
        meta:   &'m ContainerMetadata,
        codecs: CodecRegistry,
        cipher: impl BlockCipher + 'static,
    ) -> Result<Self> {
        meta.validate()?;
        Ok(Self { meta, codecs, cipher: Some(Box::new(cipher)) })
    }

    /// Use `cipher` for encrypted blocks instead of the metadata key.
    pub fn with_cipher(mut self, cipher: impl BlockCipher + 'static) -> Self {
        self.cipher = Some(Box::new(cipher));
        self
    }

    pub fn metadata(&self) -> &'m ContainerMetadata {
        self.meta
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Files selected by `filter`, in table-of-contents order.
    pub fn select(&self, filter: &str) -> Vec<&'m FileEntry> {
        FilterMatcher::new(filter).select(&self.meta.files)
    }

    fn cipher(&self) -> Result<Option<&dyn BlockCipher>> {
        if !self.meta.is_encrypted {
            return Ok(None);
        }
        match self.cipher.as_deref() {
            Some(c) => Ok(Some(c)),
            None => Err(CryptoError::MissingKey.into()),
        }
    }

    /// Reconstruct one file's contents without touching the filesystem.
    ///
    /// Codec availability is checked before any block is read.
    pub fn unpack_file_to_buffer<R: Read + Seek>(&self, reader: &mut R, entry: &FileEntry) -> Result<Vec<u8>> {
        let blocks = &entry.compression_blocks;
        let decompressor = Decompressor::new(&self.codecs, &self.meta.compression_methods);
        decompressor.check(blocks)?;

        let mut block_reader = BlockReader::new(reader, self.cipher()?);
        let mut asm = FileAssembler::new(blocks);
        for (i, block) in blocks.iter().enumerate() {
            let raw = block_reader.read_block(block)?;
            let data = decompressor.decompress_block(&raw, block)?;
            asm.place(i, &data)?;
        }
        debug!(path = %entry.file_path, blocks = blocks.len(), bytes = asm.len(), "reconstructed file");
        Ok(asm.finish())
    }

    /// Reconstruct `entry` and write it below `output_dir`.  Returns the
    /// number of bytes written.
    pub fn unpack_file<R: Read + Seek>(&self, reader: &mut R, entry: &FileEntry, output_dir: &Path) -> Result<u64> {
        let blocks_size = entry.blocks_uncompressed_size();
        if blocks_size != entry.total_length {
            warn!(
                path = %entry.file_path,
                declared = entry.total_length,
                blocks = blocks_size,
                "block sizes differ from declared length"
            );
        }
        let data = self.unpack_file_to_buffer(reader, entry)?;
        let path = destination(output_dir, &self.meta.mount_point, &entry.file_path);
        write_file(&path, &data)?;
        Ok(data.len() as u64)
    }

    /// Extract every file matching `filter` from the blob at `blob_path`.
    pub fn unpack(
        &self,
        blob_path:  impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        filter:     &str,
        observers:  &[&dyn UnpackObserver],
    ) -> Result<usize> {
        let blob_path = blob_path.as_ref();
        let file = File::open(blob_path).map_err(|e| UnpackError::at_path(blob_path, e))?;
        self.unpack_from_reader(&mut BufReader::new(file), output_dir.as_ref(), filter, observers)
    }

    pub fn unpack_with(
        &self,
        blob_path:  impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        opts:       &UnpackOptions,
        observers:  &[&dyn UnpackObserver],
    ) -> Result<usize> {
        self.unpack(blob_path, output_dir, &opts.filter, observers)
    }

    /// Same as [`unpack`](Self::unpack) over an already-open source.
    pub fn unpack_from_reader<R: Read + Seek>(
        &self,
        reader:     &mut R,
        output_dir: &Path,
        filter:     &str,
        observers:  &[&dyn UnpackObserver],
    ) -> Result<usize> {
        let files = self.select(filter);
        let total_files = files.len();
        let total_bytes: u64 = files.iter().map(|f| f.total_length).sum();
        info!(files = total_files, bytes = total_bytes, filter, "unpacking");

        let mut files_unpacked = 0usize;
        let mut unpacked_bytes = 0u64;
        for entry in files {
            unpacked_bytes += self.unpack_file(reader, entry, output_dir)?;
            files_unpacked += 1;
            notify_file(observers, &FileUnpacked {
                path: entry.file_path.clone(),
                index: files_unpacked,
                total_files,
                unpacked_bytes,
                total_bytes,
            });
        }

        notify_finished(observers, files_unpacked);
        info!(files = files_unpacked, bytes = unpacked_bytes, "unpack finished");
        Ok(files_unpacked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;
    use crate::toc::BlockDescriptor;
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<UnpackEvent>>,
    }

    impl UnpackObserver for Recorder {
        fn file_unpacked(&self, event: &FileUnpacked) {
            self.events.lock().unwrap().push(UnpackEvent::FileUnpacked(event.clone()));
        }
        fn finished(&self, n: usize) {
            self.events.lock().unwrap().push(UnpackEvent::Finished { files_unpacked: n });
        }
    }

    /// Stored (method 0) files laid out back to back in one blob.
    fn stored(files: &[(&str, &[u8])]) -> (ContainerMetadata, Vec<u8>) {
        let mut blob = Vec::new();
        let mut entries = Vec::new();
        for (path, data) in files {
            entries.push(FileEntry {
                file_path: (*path).into(),
                total_length: data.len() as u64,
                compression_blocks: vec![BlockDescriptor {
                    offset: blob.len() as u64,
                    compressed_size: data.len() as u32,
                    uncompressed_size: data.len() as u32,
                    compression_method_index: 0,
                }],
            });
            blob.extend_from_slice(data);
        }
        let meta = ContainerMetadata {
            mount_point: "../../../".into(),
            compression_methods: vec!["None".into()],
            files: entries,
            ..Default::default()
        };
        (meta, blob)
    }

    #[test]
    fn progress_is_cumulative() {
        let (meta, blob) = stored(&[
            ("Game/a.uasset", &[1u8; 10]),
            ("Game/b.uasset", &[2u8; 20]),
            ("Game/c.uasset", &[3u8; 30]),
        ]);
        let dir = tempdir().unwrap();
        let rec = Recorder::default();
        let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins()).unwrap();
        let n = unpacker
            .unpack_from_reader(&mut Cursor::new(blob), dir.path(), "*", &[&rec])
            .unwrap();
        assert_eq!(n, 3);

        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 4);
        let cumulative: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                UnpackEvent::FileUnpacked(f) => {
                    assert_eq!(f.total_bytes, 60);
                    assert_eq!(f.total_files, 3);
                    Some(f.unpacked_bytes)
                }
                _ => None,
            })
            .collect();
        assert_eq!(cumulative, vec![10, 30, 60]);
        assert_eq!(events[3], UnpackEvent::Finished { files_unpacked: 3 });
        assert_eq!(std::fs::read(dir.path().join("Game/b.uasset")).unwrap(), vec![2u8; 20]);
    }

    #[test]
    fn independent_observers_all_notified() {
        let (meta, blob) = stored(&[("x.bin", b"xyz")]);
        let dir = tempdir().unwrap();
        let a = Recorder::default();
        let (tx, rx) = mpsc::channel();
        let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins()).unwrap();
        unpacker
            .unpack_from_reader(&mut Cursor::new(blob), dir.path(), "*", &[&a, &tx])
            .unwrap();
        drop(tx);

        let via_channel: Vec<UnpackEvent> = rx.iter().collect();
        assert_eq!(via_channel, *a.events.lock().unwrap());
        assert_eq!(via_channel.len(), 2);
        match &via_channel[0] {
            UnpackEvent::FileUnpacked(f) => {
                assert_eq!(f.path, "x.bin");
                assert_eq!(f.index, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_method_stops_run() {
        let (mut meta, blob) = stored(&[("first.bin", b"111"), ("second.bin", b"222")]);
        meta.compression_methods.push("Oodle".into());
        meta.files[1].compression_blocks[0].compression_method_index = 1;

        let dir = tempdir().unwrap();
        let rec = Recorder::default();
        let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins()).unwrap();
        let err = unpacker
            .unpack_from_reader(&mut Cursor::new(blob), dir.path(), "*", &[&rec])
            .unwrap_err();
        assert!(err.to_string().contains("Oodle"));

        assert_eq!(std::fs::read(dir.path().join("first.bin")).unwrap(), b"111");
        assert!(!dir.path().join("second.bin").exists());
        let events = rec.events.lock().unwrap();
        assert_eq!(events.len(), 1, "no completion after an abort");
    }

    #[test]
    fn buffer_mode_touches_no_files() {
        let (meta, blob) = stored(&[("only.bin", b"payload")]);
        let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins()).unwrap();
        let data = unpacker
            .unpack_file_to_buffer(&mut Cursor::new(blob), &meta.files[0])
            .unwrap();
        assert_eq!(data, b"payload");
    }

    #[test]
    fn filter_limits_selection() {
        let (meta, blob) = stored(&[("a.uasset", b"a"), ("a.uexp", b"b"), ("dependencies", b"c")]);
        let dir = tempdir().unwrap();
        let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins()).unwrap();
        let n = unpacker
            .unpack_from_reader(&mut Cursor::new(blob), dir.path(), "*.uexp;*.uasset", &[])
            .unwrap();
        assert_eq!(n, 2);
        assert!(!dir.path().join("dependencies").exists());
    }

    /// Single-byte XOR, enough to tell decrypted from raw bytes.
    struct Xor(u8);

    impl BlockCipher for Xor {
        fn decrypt_in_place(&self, data: &mut [u8]) -> std::result::Result<(), CryptoError> {
            data.iter_mut().for_each(|b| *b ^= self.0);
            Ok(())
        }
    }

    /// One encrypted stored file whose block is padded to 16 bytes.
    fn xor_container(plain: &[u8], key: u8) -> (ContainerMetadata, Vec<u8>) {
        let (mut meta, _) = stored(&[("secret.bin", plain)]);
        meta.is_encrypted = true;
        let mut blob = plain.to_vec();
        blob.resize(crate::block::align(plain.len() as u64, 16) as usize, 0);
        blob.iter_mut().for_each(|b| *b ^= key);
        (meta, blob)
    }

    #[test]
    fn encrypted_without_key_fails_on_read() {
        let (meta, blob) = xor_container(b"hidden", 0x5A);
        let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins()).unwrap();
        assert_eq!(unpacker.select("*").len(), 1);
        assert!(matches!(
            unpacker.unpack_file_to_buffer(&mut Cursor::new(blob), &meta.files[0]),
            Err(UnpackError::Crypto(CryptoError::MissingKey))
        ));
    }

    #[test]
    fn injected_cipher_needs_no_metadata_key() {
        let (meta, blob) = xor_container(b"hidden", 0x5A);
        let unpacker = Unpacker::with_cipher_for(&meta, CodecRegistry::with_builtins(), Xor(0x5A)).unwrap();
        let data = unpacker
            .unpack_file_to_buffer(&mut Cursor::new(blob.clone()), &meta.files[0])
            .unwrap();
        assert_eq!(data, b"hidden");

        let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins())
            .unwrap()
            .with_cipher(Xor(0x5A));
        let data = unpacker
            .unpack_file_to_buffer(&mut Cursor::new(blob), &meta.files[0])
            .unwrap();
        assert_eq!(data, b"hidden");
    }

    #[test]
    fn short_metadata_key_is_rejected() {
        let (mut meta, _) = xor_container(b"hidden", 0x5A);
        meta.cipher_key = Some(vec![1u8; 16]);
        assert!(matches!(
            Unpacker::new(&meta, CodecRegistry::with_builtins()),
            Err(UnpackError::Crypto(CryptoError::InvalidKeyLength(16)))
        ));
    }

    #[test]
    fn progress_follows_actual_bytes_when_declared_length_differs() {
        let (mut meta, blob) = stored(&[("Game/a.bin", &[1u8; 10]), ("Game/b.bin", &[2u8; 20])]);
        meta.files[0].total_length = 15;
        let dir = tempdir().unwrap();
        let rec = Recorder::default();
        let unpacker = Unpacker::new(&meta, CodecRegistry::with_builtins()).unwrap();
        unpacker
            .unpack_from_reader(&mut Cursor::new(blob), dir.path(), "*", &[&rec])
            .unwrap();

        let progress: Vec<(u64, u64)> = rec
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                UnpackEvent::FileUnpacked(f) => Some((f.unpacked_bytes, f.total_bytes)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(10, 35), (30, 35)]);
        assert_eq!(std::fs::read(dir.path().join("Game/a.bin")).unwrap().len(), 10);
    }

    #[test]
    fn injected_codec_is_used() {
        let (mut meta, blob) = stored(&[("up.txt", b"abc")]);
        meta.compression_methods[0] = "Upper".into();
        let mut codecs = CodecRegistry::new();
        codecs.register("Upper", |d: &[u8], _: usize| -> std::result::Result<Vec<u8>, CodecError> {
            Ok(d.to_ascii_uppercase())
        });
        let unpacker = Unpacker::new(&meta, codecs).unwrap();
        let data = unpacker
            .unpack_file_to_buffer(&mut Cursor::new(blob), &meta.files[0])
            .unwrap();
        assert_eq!(data, b"ABC");
    }
}
