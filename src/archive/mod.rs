//! Archive rebuilds for orders
//!
//! Every call to [`ArchiveBuilder::build`] reconstructs the complete output
//! set of an order from its current cache, so repeated fulfillment runs merge
//! naturally: whatever is in `cache/` and `cache_oversize/` ends up in the
//! published archives.
//!
//! The build is synchronous and disk-bound; async callers run it on the
//! blocking pool while holding the order's [`crate::guard::OrderLock`].

mod split;

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Error, Result};
use crate::order::{OrderLayout, chunk_name};
use crate::types::ArchiveSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the base archive inside the scratch directory
const BASE_NAME: &str = "output.zip";

/// Rebuilds the published archive set of an order
#[derive(Clone, Debug)]
pub struct ArchiveBuilder {
    max_zip_size: u64,
}

impl ArchiveBuilder {
    /// Builder enforcing the configured chunk size limit
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            max_zip_size: config.max_zip_size,
        }
    }

    /// Builder with an explicit chunk size limit in bytes
    pub fn with_max_size(max_zip_size: u64) -> Self {
        Self { max_zip_size }
    }

    /// The chunk size limit in bytes
    pub fn max_zip_size(&self) -> u64 {
        self.max_zip_size
    }

    /// Rebuild the archive set of the order rooted at `order_dir`
    ///
    /// Files in `cache_dir` larger than the limit are moved to the order's
    /// `cache_oversize/` directory first; each of them ends up alone in its
    /// own chunk, which is the only way a chunk may exceed the limit.
    pub fn build(&self, order_dir: &Path, cache_dir: &Path) -> Result<ArchiveSet> {
        let layout = OrderLayout::new(order_dir);
        let oversize_dir = layout.oversize_dir();
        let split_dir = layout.split_dir();

        self.move_oversize(cache_dir, &oversize_dir)?;
        recreate_dir(&split_dir)?;

        let base = split_dir.join(BASE_NAME);
        let base_entries = write_base_archive(cache_dir, &base)?;
        let base_size = std::fs::metadata(&base)?.len();
        debug!(
            path = %base.display(),
            entries = base_entries,
            size = base_size,
            "Built base archive"
        );

        let mut chunks = Vec::new();
        if base_size > self.max_zip_size {
            match split::split_archive(&base, &split_dir, self.max_zip_size) {
                Ok(split_chunks) => {
                    info!(chunks = split_chunks.len(), "Split base archive");
                    chunks = split_chunks;
                }
                Err(e) => {
                    warn!(error = %e, size = base_size, "Split failed, keeping unsplit archive");
                }
            }
        }

        let oversize = sorted_files(&oversize_dir)?;
        if !oversize.is_empty() {
            if chunks.is_empty() && base_entries > 0 {
                let promoted = split_dir.join(chunk_name(1));
                std::fs::rename(&base, &promoted)?;
                chunks.push(promoted);
            }

            for source in &oversize {
                let chunk = split_dir.join(chunk_name(chunks.len() + 1));
                write_oversize_chunk(source, &chunk)?;
                debug!(
                    source = %source.display(),
                    chunk = %chunk.display(),
                    "Packed oversize file"
                );
                chunks.push(chunk);
            }

            for chunk in &chunks {
                verify_archive(chunk)?;
            }
        }

        let set = publish(&layout, &base, chunks)?;
        info!(
            order_dir = %order_dir.display(),
            canonical = set.canonical.is_some(),
            chunks = set.chunks.len(),
            "Published archive set"
        );
        Ok(set)
    }

    fn move_oversize(&self, cache_dir: &Path, oversize_dir: &Path) -> Result<()> {
        for path in sorted_files(cache_dir)? {
            let size = std::fs::metadata(&path)?.len();
            if size <= self.max_zip_size {
                continue;
            }
            std::fs::create_dir_all(oversize_dir)?;
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = oversize_dir.join(name);
            std::fs::rename(&path, &target)?;
            info!(
                file = %target.display(),
                size,
                max = self.max_zip_size,
                "Moved oversize file out of the cache"
            );
        }
        Ok(())
    }
}

/// Regular files directly inside `dir`, sorted by name; a missing directory is empty
fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn recreate_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

fn entry_options(size: u64) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(size >= u64::from(u32::MAX))
}

fn entry_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ArchiveError::Build {
                path: path.to_path_buf(),
                reason: "file name is not valid UTF-8".to_string(),
            }
            .into()
        })
}

/// Deflate every cache file into `dest`; returns the entry count
fn write_base_archive(cache_dir: &Path, dest: &Path) -> Result<usize> {
    let files = sorted_files(cache_dir)?;
    let mut writer = ZipWriter::new(File::create(dest)?);

    for path in &files {
        let size = std::fs::metadata(path)?.len();
        writer
            .start_file(entry_name(path)?, entry_options(size))
            .map_err(|e| build_error(dest, e))?;
        let mut source = BufReader::new(File::open(path)?);
        std::io::copy(&mut source, &mut writer)?;
    }

    writer.finish().map_err(|e| build_error(dest, e))?;
    Ok(files.len())
}

/// Pack one oversize file as a chunk of its own
///
/// A file that already is a zip archive is copied verbatim instead of being
/// nested inside another archive, unless the copy fails verification; then
/// it is packed like any other file.
fn write_oversize_chunk(source: &Path, dest: &Path) -> Result<()> {
    if is_zip_archive(source) {
        std::fs::copy(source, dest)?;
        match verify_archive(dest) {
            Ok(()) => return Ok(()),
            Err(e) => warn!(
                source = %source.display(),
                error = %e,
                "Zip source failed verification, packing it as a plain file"
            ),
        }
    }

    let size = std::fs::metadata(source)?.len();
    let mut writer = ZipWriter::new(File::create(dest)?);
    writer
        .start_file(entry_name(source)?, entry_options(size))
        .map_err(|e| build_error(dest, e))?;
    let mut reader = BufReader::new(File::open(source)?);
    std::io::copy(&mut reader, &mut writer)?;
    writer.finish().map_err(|e| build_error(dest, e))?;
    Ok(())
}

fn is_zip_archive(path: &Path) -> bool {
    File::open(path)
        .ok()
        .and_then(|f| ZipArchive::new(f).ok())
        .is_some()
}

/// Read every entry of `path` to the end, which checks each CRC
pub(crate) fn verify_archive(path: &Path) -> Result<()> {
    let verify_error = |reason: String| -> Error {
        ArchiveError::Verify {
            path: path.to_path_buf(),
            reason,
        }
        .into()
    };

    let mut archive =
        ZipArchive::new(File::open(path)?).map_err(|e| verify_error(e.to_string()))?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| verify_error(e.to_string()))?;
        std::io::copy(&mut entry, &mut std::io::sink())
            .map_err(|e| verify_error(format!("entry {index}: {e}")))?;
    }
    Ok(())
}

fn build_error(path: &Path, e: zip::result::ZipError) -> Error {
    ArchiveError::Build {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
    .into()
}

/// Replace the previously published outputs with the new set
fn publish(layout: &OrderLayout, base: &Path, chunks: Vec<PathBuf>) -> Result<ArchiveSet> {
    for stale in layout.published_outputs()? {
        std::fs::remove_file(&stale)?;
    }

    match chunks.len() {
        0 => {
            let canonical = layout.canonical_output();
            std::fs::rename(base, &canonical)?;
            Ok(ArchiveSet {
                canonical: Some(canonical),
                chunks: Vec::new(),
            })
        }
        1 => {
            remove_if_exists(base)?;
            let canonical = layout.canonical_output();
            std::fs::rename(&chunks[0], &canonical)?;
            Ok(ArchiveSet {
                canonical: Some(canonical),
                chunks: Vec::new(),
            })
        }
        _ => {
            remove_if_exists(base)?;
            let mut published = Vec::with_capacity(chunks.len());
            for (offset, chunk) in chunks.iter().enumerate() {
                let target = layout.chunk_output(offset + 1);
                std::fs::rename(chunk, &target)?;
                published.push(target);
            }
            Ok(ArchiveSet {
                canonical: None,
                chunks: published,
            })
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Number of entries in a zip file
pub fn entry_count<R: Read + Seek>(reader: R) -> Result<usize> {
    Ok(ZipArchive::new(reader)?.len())
}
