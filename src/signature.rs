//! Removal of embedded Authenticode signatures.
//!
//! Exactly one signature is the only signed state the pipeline handles: an
//! unsigned image passes through untouched, a single certificate is removed,
//! and anything more is refused before the file is modified.

use crate::error::Result;
use crate::formats::pe::{CertificateTable, PeError, PeImage, WriteExt};
use crate::io::{read_image, IOLimits, ImageFile};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// What the stripper did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureOutcome {
    NoSignature,
    Removed,
}

/// Removes certificate `index` from the table in `data`.
///
/// Later records are moved down, the vacated tail is zeroed, and the
/// security directory is resized (or cleared when the table becomes empty).
/// Returns the new table size in bytes.
pub fn remove_certificate(
    data: &mut [u8],
    table: &CertificateTable,
    index: usize,
) -> std::result::Result<usize, PeError> {
    if index >= table.len() {
        return Err(PeError::CertificateIndexOutOfRange {
            index,
            count: table.len(),
        });
    }
    let directory_offset = table.directory_offset.ok_or(PeError::InvalidOffset {
        offset: table.directory.virtual_address as usize,
    })?;
    let span = table.span();

    let kept: Vec<u8> = table
        .entries
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .flat_map(|(_, entry)| {
            let end = (entry.offset + entry.padded_length()).min(span.end);
            data[entry.offset..end].to_vec()
        })
        .collect();

    data[span.start..span.start + kept.len()].copy_from_slice(&kept);
    data.fill_at(span.start + kept.len(), span.len() - kept.len(), 0)
        .ok_or(PeError::InvalidOffset { offset: span.start })?;

    let (virtual_address, size) = if kept.is_empty() {
        (0, 0)
    } else {
        (table.directory.virtual_address, kept.len() as u32)
    };
    data.write_u32_le_at(directory_offset, virtual_address)
        .and_then(|_| data.write_u32_le_at(directory_offset + 4, size))
        .ok_or(PeError::InvalidOffset {
            offset: directory_offset,
        })?;

    Ok(kept.len())
}

/// Enumerates and strips certificates of an image on disk.
#[derive(Debug, Clone, Default)]
pub struct SignatureStripper {
    limits: IOLimits,
}

impl SignatureStripper {
    pub fn new(limits: IOLimits) -> Self {
        Self { limits }
    }

    /// Number of certificate table entries in the image at `path`.
    pub fn count<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let data = read_image(path, &self.limits)?;
        let image = PeImage::parse(&data)?;
        Ok(CertificateTable::parse(&data, &image)?.len())
    }

    /// Applies the signature policy to the image at `path`.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn strip<P: AsRef<Path>>(&self, path: P) -> Result<SignatureOutcome> {
        let mut file = ImageFile::open(path.as_ref(), &self.limits)?;
        let file_size = file.size() as usize;

        let truncate_to = {
            let mut view = file.map_mut()?;
            let image = PeImage::parse(&view)?;
            let table = CertificateTable::parse(&view, &image)?;
            debug!(count = table.len(), "Enumerated certificates");

            match table.len() {
                0 => {
                    info!("No digital signature to remove");
                    return Ok(SignatureOutcome::NoSignature);
                }
                1 => {}
                n => {
                    warn!(count = n, "Unexpected number of signatures");
                    return Err(PeError::UnsupportedCertificateCount(n).into());
                }
            }

            let span = table.span();
            let remaining = remove_certificate(&mut view, &table, 0)?;
            view.flush()?;
            // A table at the very end of the file is cut off entirely.
            (span.end == file_size).then_some(span.start + remaining)
        };

        if let Some(len) = truncate_to {
            file.set_len(len as u64)?;
            debug!(len, "Truncated certificate table");
        }
        info!("Removed digital signature");
        Ok(SignatureOutcome::Removed)
    }
}
