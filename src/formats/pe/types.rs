//! Core PE data types and constants used by the patch pipeline

use std::fmt;

// PE constants
pub const DOS_SIGNATURE: u16 = 0x5A4D; // MZ
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;

/// Size of the DOS header; `e_lfanew` lives in its last four bytes.
pub const DOS_HEADER_SIZE: usize = 64;
pub const E_LFANEW_OFFSET: usize = 60;

/// PE signature (4) + COFF file header (20).
pub const NT_SIGNATURE_SIZE: usize = 4;
pub const COFF_HEADER_SIZE: usize = 20;
pub const OPTIONAL_HEADER_OFFSET: usize = NT_SIGNATURE_SIZE + COFF_HEADER_SIZE;

// Data directory indices
pub const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;

// WIN_CERTIFICATE
pub const WIN_CERTIFICATE_HEADER_SIZE: usize = 8;
pub const WIN_CERT_REVISION_2_0: u16 = 0x0200;
pub const WIN_CERT_TYPE_PKCS_SIGNED_DATA: u16 = 0x0002;

/// PE parsing error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeError {
    InvalidDosSignature,
    InvalidPeSignature,
    InvalidMagic(u16),
    TruncatedHeader { expected: usize, actual: usize },
    NtHeaderOutOfBounds { e_lfanew: u32, file_size: usize },
    InvalidOffset { offset: usize },
    MalformedCertificateTable { offset: usize, reason: &'static str },
    UnsupportedCertificateCount(usize),
    CertificateIndexOutOfRange { index: usize, count: usize },
}

impl fmt::Display for PeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDosSignature => write!(f, "DOS header not found"),
            Self::InvalidPeSignature => write!(f, "NT header not found"),
            Self::InvalidMagic(m) => write!(f, "Invalid optional header magic: 0x{:04x}", m),
            Self::TruncatedHeader { expected, actual } => {
                write!(
                    f,
                    "Truncated header: expected {} bytes, got {}",
                    expected, actual
                )
            }
            Self::NtHeaderOutOfBounds { e_lfanew, file_size } => write!(
                f,
                "NT header offset 0x{:x} lies outside the {} byte file",
                e_lfanew, file_size
            ),
            Self::InvalidOffset { offset } => write!(f, "Invalid file offset: 0x{:x}", offset),
            Self::MalformedCertificateTable { offset, reason } => {
                write!(f, "Malformed certificate table at 0x{:x}: {}", offset, reason)
            }
            Self::UnsupportedCertificateCount(n) => {
                write!(f, "Unexpected number of signatures: {}", n)
            }
            Self::CertificateIndexOutOfRange { index, count } => write!(
                f,
                "Certificate index {} out of range ({} present)",
                index, count
            ),
        }
    }
}

impl std::error::Error for PeError {}

pub type Result<T> = std::result::Result<T, PeError>;

/// Machine types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    Unknown,
    I386,    // 0x014c
    X86_64,  // 0x8664
    Arm,     // 0x01c0
    Arm64,   // 0xaa64
    ArmNT,   // 0x01c4
    IA64,    // 0x0200
    Alpha64, // 0x0284
    Other(u16),
}

impl Machine {
    /// Machines whose images carry the 64-bit optional header layout.
    pub fn is_64bit(self) -> bool {
        matches!(self, Self::IA64 | Self::Alpha64 | Self::X86_64 | Self::Arm64)
    }
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        match value {
            0x014c => Self::I386,
            0x8664 => Self::X86_64,
            0x01c0 => Self::Arm,
            0xaa64 => Self::Arm64,
            0x01c4 => Self::ArmNT,
            0x0200 => Self::IA64,
            0x0284 => Self::Alpha64,
            0 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

/// Optional header layout, chosen from the COFF machine field.
///
/// Each variant knows where its own checksum field lives relative to the
/// start of the optional header; the two layouts are never reinterpreted as
/// one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVariant {
    Header32,
    Header64,
}

impl HeaderVariant {
    const HEADER32_CHECKSUM: usize = 64;
    const HEADER64_CHECKSUM: usize = 64;

    pub fn for_machine(machine: Machine) -> Self {
        if machine.is_64bit() {
            Self::Header64
        } else {
            Self::Header32
        }
    }

    /// Offset of `CheckSum` from the start of the optional header.
    pub fn checksum_offset(self) -> usize {
        match self {
            Self::Header32 => Self::HEADER32_CHECKSUM,
            Self::Header64 => Self::HEADER64_CHECKSUM,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Header32 => 32,
            Self::Header64 => 64,
        }
    }
}

impl fmt::Display for HeaderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Data directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_empty(&self) -> bool {
        self.virtual_address == 0 || self.size == 0
    }
}

/// One WIN_CERTIFICATE record inside the certificate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateEntry {
    /// Absolute file offset of the record.
    pub offset: usize,
    /// `dwLength`, header included, padding excluded.
    pub length: u32,
    pub revision: u16,
    pub certificate_type: u16,
}

impl CertificateEntry {
    /// Length rounded up to the 8-byte boundary the next record starts on.
    pub fn padded_length(&self) -> usize {
        (self.length as usize + 7) & !7
    }
}
