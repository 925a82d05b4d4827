//! Bulk archive retrieval: throttled streaming to a temporary zip, extraction into
//! the per-book working directory, and removal of the temporary file.

use crate::api::ApiClient;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default bytes per read.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
/// Default pause after each chunk; with 1 KiB chunks this caps throughput near 300 KB/s.
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(3);

/// The raw encrypted content could not be obtained (download or extraction failed).
#[derive(Debug, Error)]
#[error("Failed to download archive: {message}")]
pub struct AcquisitionError {
    pub message: String,
}

impl AcquisitionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Pacing for the archive stream. The delay is a self-imposed ceiling, not backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    pub chunk_size: usize,
    pub chunk_delay: Duration,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: DEFAULT_CHUNK_DELAY,
        }
    }
}

/// Temporary archive path for a book under `work_root`.
pub fn archive_path(work_root: &Path, book_id: &str) -> PathBuf {
    work_root.join(format!("{}.zip", book_id))
}

/// Working directory for a book under `work_root`.
pub fn working_dir(work_root: &Path, book_id: &str) -> PathBuf {
    work_root.join(book_id)
}

/// Stream `link` into `dest`, calling `progress(bytes_so_far, content_length)` after each chunk.
///
/// Any failure removes the partial file and is reported as an [AcquisitionError].
pub fn download_archive(
    client: &ApiClient,
    link: &str,
    dest: &Path,
    throttle: Throttle,
    progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<u64, AcquisitionError> {
    let result = stream_to_file(client, link, dest, throttle, progress);
    if result.is_err() {
        let _ = std::fs::remove_file(dest);
    }
    result
}

fn stream_to_file(
    client: &ApiClient,
    link: &str,
    dest: &Path,
    throttle: Throttle,
    progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<u64, AcquisitionError> {
    let mut response = client
        .get_stream(link)
        .map_err(|e| AcquisitionError::new(e.to_string()))?;
    let total = response.content_length();
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            AcquisitionError::new(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    let mut file = File::create(dest).map_err(|e| {
        AcquisitionError::new(format!("cannot create {}: {}", dest.display(), e))
    })?;

    let mut buf = vec![0u8; throttle.chunk_size.max(1)];
    let mut written: u64 = 0;
    loop {
        let n = response
            .read(&mut buf)
            .map_err(|e| AcquisitionError::new(format!("reading {}: {}", link, e)))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(|e| {
            AcquisitionError::new(format!("writing {}: {}", dest.display(), e))
        })?;
        written += n as u64;
        if let Some(cb) = progress {
            cb(written, total);
        }
        if !throttle.chunk_delay.is_zero() {
            std::thread::sleep(throttle.chunk_delay);
        }
    }
    file.flush()
        .map_err(|e| AcquisitionError::new(format!("writing {}: {}", dest.display(), e)))?;

    if let Some(expected) = total {
        if written != expected {
            return Err(AcquisitionError::new(format!(
                "connection closed after {} of {} bytes",
                written, expected
            )));
        }
    }
    Ok(written)
}

/// Extract `archive` into a fresh `workdir`, delete the archive, and return the extracted members.
///
/// Leftovers from an earlier failed run are removed first.
pub fn extract_archive(archive: &Path, workdir: &Path) -> Result<Vec<PathBuf>, AcquisitionError> {
    match std::fs::remove_dir_all(workdir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(AcquisitionError::new(format!(
                "cannot clear {}: {}",
                workdir.display(),
                e
            )))
        }
    }
    std::fs::create_dir_all(workdir).map_err(|e| {
        AcquisitionError::new(format!("cannot create {}: {}", workdir.display(), e))
    })?;
    let file = File::open(archive)
        .map_err(|e| AcquisitionError::new(format!("cannot open {}: {}", archive.display(), e)))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| AcquisitionError::new(format!("invalid archive: {}", e)))?;
    zip.extract(workdir)
        .map_err(|e| AcquisitionError::new(format!("cannot extract archive: {}", e)))?;
    drop(zip);
    let _ = std::fs::remove_file(archive);
    list_members(workdir)
        .map_err(|e| AcquisitionError::new(format!("cannot list {}: {}", workdir.display(), e)))
}

/// Regular files directly inside `dir`, sorted by name.
pub fn list_members(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut members = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            members.push(entry.path());
        }
    }
    members.sort();
    Ok(members)
}
