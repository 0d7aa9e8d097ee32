pub mod toc;
pub mod filter;
pub mod crypto;
pub mod block;
pub mod codec;
pub mod decompress;
pub mod assemble;
pub mod unpack;
pub mod perf;
pub mod error;

pub use toc::{ContainerMetadata, FileEntry, BlockDescriptor};
pub use codec::{Codec, CodecRegistry};
pub use error::{UnpackError, Result};
pub use unpack::{Unpacker, UnpackOptions, UnpackObserver, UnpackEvent, FileUnpacked};
