//! PE header location and validation
//!
//! Only the fields the patch pipeline needs are read, each one at its
//! documented offset and each one checked against the buffer length before
//! it is trusted.

use crate::formats::pe::types::*;
use crate::formats::pe::utils::ReadExt;

/// Validated header positions inside a PE image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeImage {
    /// File offset of the `PE\0\0` signature (`e_lfanew`).
    pub nt_offset: usize,
    pub machine: Machine,
    pub variant: HeaderVariant,
    /// `Magic` of the optional header (0x10B or 0x20B).
    pub optional_magic: u16,
    pub size_of_optional_header: u16,
}

impl PeImage {
    /// Validate the DOS and NT headers of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let e_lfanew = parse_dos_header(data)?;
        parse_nt_headers(data, e_lfanew)
    }

    /// File offset of the optional header.
    pub fn optional_header_offset(&self) -> usize {
        self.nt_offset + OPTIONAL_HEADER_OFFSET
    }

    /// File offset of the `CheckSum` field for this image's header variant.
    pub fn checksum_offset(&self) -> usize {
        self.optional_header_offset() + self.variant.checksum_offset()
    }

    /// Read the stored checksum.
    pub fn stored_checksum(&self, data: &[u8]) -> Result<u32> {
        let offset = self.checksum_offset();
        data.read_u32_le_at(offset).ok_or(PeError::TruncatedHeader {
            expected: offset + 4,
            actual: data.len(),
        })
    }

    /// File offset of the data directory array.
    ///
    /// The array position depends on the optional header layout actually
    /// present in the file, so this keys off the optional header magic.
    pub fn data_directories_offset(&self) -> Result<usize> {
        let base = self.optional_header_offset();
        match self.optional_magic {
            PE32_MAGIC => Ok(base + 96),
            PE32PLUS_MAGIC => Ok(base + 112),
            other => Err(PeError::InvalidMagic(other)),
        }
    }

    /// File offset of data directory `index`, checked against the declared
    /// directory count and the buffer.
    pub fn data_directory_offset(&self, data: &[u8], index: usize) -> Result<Option<usize>> {
        let dirs = self.data_directories_offset()?;
        // NumberOfRvaAndSizes sits immediately before the directory array.
        let count = data
            .read_u32_le_at(dirs - 4)
            .ok_or(PeError::TruncatedHeader {
                expected: dirs,
                actual: data.len(),
            })?;
        if index >= count as usize {
            return Ok(None);
        }
        let offset = dirs + index * 8;
        let optional_end = self.optional_header_offset() + self.size_of_optional_header as usize;
        if offset + 8 > optional_end || offset + 8 > data.len() {
            return Err(PeError::TruncatedHeader {
                expected: offset + 8,
                actual: data.len().min(optional_end),
            });
        }
        Ok(Some(offset))
    }

    /// Read data directory `index`; absent directories read as empty.
    pub fn data_directory(&self, data: &[u8], index: usize) -> Result<DataDirectory> {
        let Some(offset) = self.data_directory_offset(data, index)? else {
            return Ok(DataDirectory::default());
        };
        Ok(DataDirectory {
            virtual_address: data.read_u32_le_at(offset).unwrap_or_default(),
            size: data.read_u32_le_at(offset + 4).unwrap_or_default(),
        })
    }
}

/// Validate the DOS header and return `e_lfanew`.
pub fn parse_dos_header(data: &[u8]) -> Result<usize> {
    if data.len() < DOS_HEADER_SIZE {
        return Err(PeError::TruncatedHeader {
            expected: DOS_HEADER_SIZE,
            actual: data.len(),
        });
    }

    let e_magic = data.read_u16_le_at(0).ok_or(PeError::InvalidDosSignature)?;
    if e_magic != DOS_SIGNATURE {
        return Err(PeError::InvalidDosSignature);
    }

    let e_lfanew = data
        .read_u32_le_at(E_LFANEW_OFFSET)
        .ok_or(PeError::InvalidOffset { offset: E_LFANEW_OFFSET })?;
    Ok(e_lfanew as usize)
}

/// Validate the NT headers at `offset` and select the header variant.
pub fn parse_nt_headers(data: &[u8], offset: usize) -> Result<PeImage> {
    // Signature, COFF header and the optional header up to and including
    // CheckSum must all lie inside the file.
    let checksum_end = offset
        .checked_add(OPTIONAL_HEADER_OFFSET + HeaderVariant::Header64.checksum_offset() + 4)
        .filter(|end| *end <= data.len());
    if checksum_end.is_none() {
        return Err(PeError::NtHeaderOutOfBounds {
            e_lfanew: offset as u32,
            file_size: data.len(),
        });
    }

    if data.read_slice_at(offset, NT_SIGNATURE_SIZE) != Some(&PE_SIGNATURE[..]) {
        return Err(PeError::InvalidPeSignature);
    }

    let coff = offset + NT_SIGNATURE_SIZE;
    let machine = Machine::from(data.read_u16_le_at(coff).unwrap_or_default());
    let size_of_optional_header = data.read_u16_le_at(coff + 16).unwrap_or_default();
    let optional_magic = data
        .read_u16_le_at(offset + OPTIONAL_HEADER_OFFSET)
        .unwrap_or_default();

    Ok(PeImage {
        nt_offset: offset,
        machine,
        variant: HeaderVariant::for_machine(machine),
        optional_magic,
        size_of_optional_header,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::pe::utils::WriteExt;

    fn minimal_image(machine: u16, magic: u16) -> Vec<u8> {
        let opt_size: u16 = if magic == PE32PLUS_MAGIC { 240 } else { 224 };
        let mut data = vec![0u8; 0x80 + 24 + opt_size as usize];
        data[0] = b'M';
        data[1] = b'Z';
        data.write_u32_le_at(E_LFANEW_OFFSET, 0x80).unwrap();
        data[0x80..0x84].copy_from_slice(&PE_SIGNATURE);
        data[0x84..0x86].copy_from_slice(&machine.to_le_bytes());
        data[0x94..0x96].copy_from_slice(&opt_size.to_le_bytes());
        data[0x98..0x9A].copy_from_slice(&magic.to_le_bytes());
        let dirs = if magic == PE32PLUS_MAGIC { 0x98 + 112 } else { 0x98 + 96 };
        data.write_u32_le_at(dirs - 4, 16).unwrap();
        data
    }

    #[test]
    fn test_parse_dos_header() {
        let mut data = vec![0u8; 64];
        data[0] = 0x4D;
        data[1] = 0x5A;
        data[60] = 0x80;

        assert_eq!(parse_dos_header(&data), Ok(0x80));

        data[0] = 0xFF;
        assert_eq!(parse_dos_header(&data), Err(PeError::InvalidDosSignature));

        assert!(matches!(
            parse_dos_header(&[0x4D, 0x5A]),
            Err(PeError::TruncatedHeader { expected: 64, actual: 2 })
        ));
    }

    #[test]
    fn test_variant_by_machine() {
        let image = PeImage::parse(&minimal_image(0x8664, PE32PLUS_MAGIC)).unwrap();
        assert_eq!(image.machine, Machine::X86_64);
        assert_eq!(image.variant, HeaderVariant::Header64);
        assert_eq!(image.checksum_offset(), 0x80 + 24 + 64);

        let image = PeImage::parse(&minimal_image(0x014c, PE32_MAGIC)).unwrap();
        assert_eq!(image.variant, HeaderVariant::Header32);
        assert_eq!(image.checksum_offset(), 0x80 + 24 + 64);
    }

    #[test]
    fn test_nt_offset_out_of_bounds() {
        let mut data = minimal_image(0x014c, PE32_MAGIC);
        data.write_u32_le_at(E_LFANEW_OFFSET, 0xFFFF_FF00).unwrap();
        assert!(matches!(
            PeImage::parse(&data),
            Err(PeError::NtHeaderOutOfBounds { e_lfanew: 0xFFFF_FF00, .. })
        ));

        // Truncated just before the end of the checksum field.
        let data = minimal_image(0x014c, PE32_MAGIC);
        let cut = &data[..0x80 + 24 + 64 + 3];
        assert!(matches!(
            PeImage::parse(cut),
            Err(PeError::NtHeaderOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_invalid_nt_signature() {
        let mut data = minimal_image(0x014c, PE32_MAGIC);
        data[0x80] = b'N';
        assert_eq!(PeImage::parse(&data), Err(PeError::InvalidPeSignature));
    }

    #[test]
    fn test_security_directory_location() {
        let mut data = minimal_image(0x8664, PE32PLUS_MAGIC);
        let image = PeImage::parse(&data).unwrap();
        let offset = image
            .data_directory_offset(&data, IMAGE_DIRECTORY_ENTRY_SECURITY)
            .unwrap()
            .unwrap();
        assert_eq!(offset, 0x98 + 112 + 4 * 8);

        data.write_u32_le_at(offset, 0x400).unwrap();
        data.write_u32_le_at(offset + 4, 0x20).unwrap();
        assert_eq!(
            image.data_directory(&data, IMAGE_DIRECTORY_ENTRY_SECURITY),
            Ok(DataDirectory { virtual_address: 0x400, size: 0x20 })
        );
    }

    #[test]
    fn test_missing_directory_reads_empty() {
        let mut data = minimal_image(0x014c, PE32_MAGIC);
        data.write_u32_le_at(0x98 + 92, 2).unwrap();
        let image = PeImage::parse(&data).unwrap();
        assert_eq!(
            image.data_directory_offset(&data, IMAGE_DIRECTORY_ENTRY_SECURITY),
            Ok(None)
        );
        assert!(image
            .data_directory(&data, IMAGE_DIRECTORY_ENTRY_SECURITY)
            .unwrap()
            .is_empty());
    }
}
