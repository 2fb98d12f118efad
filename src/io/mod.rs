//! Bounded file access for in-place image edits.
//!
//! `ImageFile` opens the target for reading and writing with a size limit.
//! Writable memory maps are handed out as `MappedView` guards that flush and
//! unmap when dropped, so the view never outlives the handle it came from.

pub mod error;

use crate::io::error::{IoError, Result};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Defines the resource limits for I/O operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024, // 512MB
        }
    }
}

/// An image opened read/write for one pipeline stage.
///
/// No lock is taken on the file; other processes may read or write it
/// concurrently.
pub struct ImageFile {
    path: PathBuf,
    file: File,
    file_size: u64,
}

impl ImageFile {
    /// Opens `path` for reading and writing.
    ///
    /// Fails if the file size exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| IoError::Open {
                path: path.display().to_string(),
                source,
            })?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Opened image for update"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            file_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file when it was opened, or after the last `set_len`.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Truncates or extends the underlying file.
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        self.file_size = len;
        Ok(())
    }

    /// Maps the whole file writable for the lifetime of the returned guard.
    pub fn map_mut(&mut self) -> Result<MappedView<'_>> {
        if self.file_size == 0 {
            return Err(IoError::EmptyFile);
        }
        // Safety: the map is backed by a regular file opened read/write and
        // is dropped before the handle it borrows. Concurrent external writers
        // are outside what this crate guards against.
        let map = unsafe { MmapMut::map_mut(&self.file) }.map_err(IoError::Map)?;
        trace!(path = %self.path.display(), len = map.len(), "Mapped view acquired");
        Ok(MappedView {
            map,
            path: &self.path,
        })
    }
}

/// Reads a whole image into memory, enforcing `limits`.
pub fn read_image<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|source| IoError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let file_size = file.metadata()?.len();
    if file_size > limits.max_file_size {
        return Err(IoError::FileTooLarge {
            limit: limits.max_file_size,
            found: file_size,
        });
    }
    let mut data = Vec::with_capacity(file_size as usize);
    file.read_to_end(&mut data)?;
    trace!(path = %path.display(), len = data.len(), "Read image");
    Ok(data)
}

/// A writable view of an [`ImageFile`].
///
/// Dirty pages are flushed and the mapping released when the guard drops,
/// on success and error paths alike.
pub struct MappedView<'a> {
    map: MmapMut,
    path: &'a Path,
}

impl MappedView<'_> {
    /// Flushes outstanding writes, reporting any failure.
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

impl Deref for MappedView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map
    }
}

impl DerefMut for MappedView<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

impl Drop for MappedView<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.map.flush() {
            warn!(path = %self.path.display(), error = %e, "Flush on unmap failed");
        }
        trace!(path = %self.path.display(), "Mapped view released");
    }
}
