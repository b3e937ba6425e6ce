//! Whole-entry splitting of an oversized base archive
//!
//! Entries are raw-copied (no recompression) from the base archive into
//! consecutive chunk files. The writer keeps a running estimate of each
//! chunk's final size and opens a new chunk whenever the next entry would
//! push it past the limit.

use crate::error::{ArchiveError, Result};
use crate::order::chunk_name;
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::{ZipArchive, ZipWriter};

/// Local file header without name/extra
const LOCAL_HEADER_LEN: u64 = 30;
/// Central directory header without name/extra/comment
const CENTRAL_HEADER_LEN: u64 = 46;
/// Extra fields the writer may emit per header (zip64, timestamps)
const EXTRA_ALLOWANCE: u64 = 64;
/// End of central directory plus the zip64 locator and record
const TRAILER_LEN: u64 = 22 + 20 + 56;

/// Upper bound on the bytes an entry adds to a chunk
fn entry_cost(name_len: u64, compressed_size: u64) -> u64 {
    LOCAL_HEADER_LEN + CENTRAL_HEADER_LEN + 2 * (name_len + EXTRA_ALLOWANCE) + compressed_size
}

/// Split `base` into `out_dir/output1.zip ..= output<N>.zip`, each at most `max_size` bytes
///
/// On failure every chunk written so far is removed and the base archive is
/// left untouched.
pub(crate) fn split_archive(base: &Path, out_dir: &Path, max_size: u64) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    match write_chunks(base, out_dir, max_size, &mut written) {
        Ok(()) => Ok(written),
        Err(e) => {
            for path in &written {
                if let Err(rm) = std::fs::remove_file(path)
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %path.display(), error = %rm, "Failed to remove partial chunk");
                }
            }
            Err(e)
        }
    }
}

fn write_chunks(
    base: &Path,
    out_dir: &Path,
    max_size: u64,
    written: &mut Vec<PathBuf>,
) -> Result<()> {
    let mut archive = ZipArchive::new(File::open(base)?)?;
    let mut writer: Option<ZipWriter<File>> = None;
    let mut chunk_size = 0u64;
    let mut chunk_entries = 0usize;

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let cost = entry_cost(entry.name().len() as u64, entry.compressed_size());

        if cost + TRAILER_LEN > max_size {
            return Err(ArchiveError::Split {
                reason: format!(
                    "entry {:?} needs {} bytes, more than the {} byte limit",
                    entry.name(),
                    cost + TRAILER_LEN,
                    max_size
                ),
            }
            .into());
        }

        let needs_new_chunk = match writer {
            None => true,
            Some(_) => chunk_entries > 0 && chunk_size + cost + TRAILER_LEN > max_size,
        };

        if needs_new_chunk {
            if let Some(mut full) = writer.take() {
                full.finish()?;
            }
            let path = out_dir.join(chunk_name(written.len() + 1));
            writer = Some(ZipWriter::new(File::create(&path)?));
            tracing::debug!(chunk = written.len() + 1, path = %path.display(), "Opened chunk");
            written.push(path);
            chunk_size = 0;
            chunk_entries = 0;
        }

        if let Some(current) = writer.as_mut() {
            current.raw_copy_file(entry)?;
        }
        chunk_size += cost;
        chunk_entries += 1;
    }

    if let Some(mut last) = writer.take() {
        last.finish()?;
    }

    for path in written.iter() {
        let size = std::fs::metadata(path)?.len();
        if size > max_size {
            return Err(ArchiveError::Split {
                reason: format!(
                    "{} is {size} bytes, above the {max_size} byte limit",
                    path.display()
                ),
            }
            .into());
        }
    }

    Ok(())
}
