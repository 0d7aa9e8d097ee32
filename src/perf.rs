//! Performance utilities: parallel file extraction.
//!
//! [`unpack_parallel`] extracts the selected files concurrently using Rayon.
//! Each worker opens its own handle to the blob, so no read position is
//! shared.  Blocks within a file are still read and placed in order.
//!
//! Progress counters live behind one mutex that is also held while the
//! observers run, so cumulative bytes and file indices reach every observer
//! in increasing order even though files complete out of order.
//!
//! Without the `parallel` feature this falls back to the sequential run.

use std::path::Path;

use crate::error::Result;
use crate::unpack::{UnpackObserver, UnpackOptions, Unpacker};

pub fn unpack_parallel(
    unpacker:   &Unpacker<'_>,
    blob_path:  &Path,
    output_dir: &Path,
    opts:       &UnpackOptions,
    observers:  &[&dyn UnpackObserver],
) -> Result<usize> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        use std::fs::File;
        use std::io::{self, BufReader};
        use std::sync::{Mutex, PoisonError};
        use tracing::info;

        use crate::error::UnpackError;
        use crate::unpack::{notify_file, notify_finished, FileUnpacked};

        let files = unpacker.select(&opts.filter);
        let total_files = files.len();
        let total_bytes: u64 = files.iter().map(|f| f.total_length).sum();
        info!(files = total_files, bytes = total_bytes, workers = opts.workers, "unpacking in parallel");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.workers)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        // (files unpacked, bytes unpacked)
        let progress = Mutex::new((0usize, 0u64));

        pool.install(|| {
            files.par_iter().try_for_each_init(
                || File::open(blob_path).map(BufReader::new),
                |reader, entry| {
                    let reader = match reader {
                        Ok(r) => r,
                        Err(e) => {
                            return Err(UnpackError::at_path(blob_path, io::Error::new(e.kind(), e.to_string())))
                        }
                    };
                    let written = unpacker.unpack_file(reader, entry, output_dir)?;

                    let mut guard = progress.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.0 += 1;
                    guard.1 += written;
                    notify_file(observers, &FileUnpacked {
                        path: entry.file_path.clone(),
                        index: guard.0,
                        total_files,
                        unpacked_bytes: guard.1,
                        total_bytes,
                    });
                    Ok(())
                },
            )
        })?;

        let (files_unpacked, unpacked_bytes) = progress.into_inner().unwrap_or_else(PoisonError::into_inner);
        notify_finished(observers, files_unpacked);
        info!(files = files_unpacked, bytes = unpacked_bytes, "unpack finished");
        Ok(files_unpacked)
    }

    #[cfg(not(feature = "parallel"))]
    {
        unpacker.unpack(blob_path, output_dir, &opts.filter, observers)
    }
}
