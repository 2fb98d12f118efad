//! Attribute certificate table (security directory) enumeration
//!
//! The security directory's `virtual_address` is a file offset, not an RVA.
//! The table is a run of WIN_CERTIFICATE records, each starting on an 8-byte
//! boundary.

use crate::formats::pe::headers::PeImage;
use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;

/// The certificate table of an image as it currently sits on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateTable {
    /// File offset of the security entry in the data directory array, if the
    /// image declares one.
    pub directory_offset: Option<usize>,
    pub directory: DataDirectory,
    pub entries: Vec<CertificateEntry>,
}

impl CertificateTable {
    pub fn parse(data: &[u8], image: &PeImage) -> Result<Self> {
        let directory_offset = image.data_directory_offset(data, IMAGE_DIRECTORY_ENTRY_SECURITY)?;
        let directory = image.data_directory(data, IMAGE_DIRECTORY_ENTRY_SECURITY)?;
        if directory.is_empty() {
            return Ok(Self {
                directory_offset,
                directory,
                entries: Vec::new(),
            });
        }

        let start = directory.virtual_address as usize;
        let end = start
            .checked_add(directory.size as usize)
            .filter(|end| *end <= data.len())
            .ok_or(PeError::MalformedCertificateTable {
                offset: start,
                reason: "table extends past end of file",
            })?;

        let mut entries = Vec::new();
        let mut offset = start;
        while offset + WIN_CERTIFICATE_HEADER_SIZE <= end {
            let length = data.read_u32_le_at(offset).unwrap_or_default();
            if (length as usize) < WIN_CERTIFICATE_HEADER_SIZE {
                return Err(PeError::MalformedCertificateTable {
                    offset,
                    reason: "record shorter than its header",
                });
            }
            if offset + length as usize > end {
                return Err(PeError::MalformedCertificateTable {
                    offset,
                    reason: "record overruns the table",
                });
            }
            let entry = CertificateEntry {
                offset,
                length,
                revision: data.read_u16_le_at(offset + 4).unwrap_or_default(),
                certificate_type: data.read_u16_le_at(offset + 6).unwrap_or_default(),
            };
            offset += entry.padded_length();
            entries.push(entry);
        }

        Ok(Self {
            directory_offset,
            directory,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File range `[start, end)` covered by the table.
    pub fn span(&self) -> std::ops::Range<usize> {
        let start = self.directory.virtual_address as usize;
        start..start + self.directory.size as usize
    }
}
