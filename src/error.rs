//! Error types for the pepatch pipeline.
//!
//! Every failure maps onto one category of the taxonomy below; the pipeline
//! wraps it with the stage that produced it so diagnostics name where the
//! run stopped.

use crate::formats::pe::PeError;
use crate::io::error::IoError;
use std::fmt;
use thiserror::Error;

/// Main error type for pepatch operations.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Collaborator state (backup, ownership, protected path) is missing
    #[error("Precondition not met: {0}")]
    Precondition(String),

    /// Patch list or configuration rejected before any I/O
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bounded file access errors
    #[error("I/O error: {0}")]
    File(#[from] IoError),

    /// Invalid PE headers or certificate table
    #[error("Format error: {0}")]
    Format(#[from] PeError),

    /// Stored checksum does not match the pre-mutation value
    #[error(
        "Old checksum does not match (stored {stored:08X}, expected {expected:08X})! Is this a {bits}-bit executable?"
    )]
    IntegrityGuard { stored: u32, expected: u32, bits: u32 },

    /// External signer failed
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Lowest exit status reserved for failures; also used for usage errors.
///
/// Successful runs exit with the patched count, capped at
/// [`MAX_REPORTED_PATCHES`], so the two ranges never meet.
pub const FAILURE_EXIT_BASE: i32 = 248;

/// Command line could not be parsed.
pub const EXIT_USAGE: i32 = FAILURE_EXIT_BASE;

/// Largest patched count reported through the exit status.
pub const MAX_REPORTED_PATCHES: usize = FAILURE_EXIT_BASE as usize - 1;

impl PatchError {
    /// Process exit status for this error category, in `249..=254`.
    pub fn exit_code(&self) -> i32 {
        let category = match self {
            Self::Precondition(_) => 1,
            Self::Configuration(_) => 2,
            Self::Io(_) | Self::File(_) => 3,
            Self::Format(_) => 4,
            Self::IntegrityGuard { .. } => 5,
            Self::Signing(_) => 6,
        };
        FAILURE_EXIT_BASE + category
    }
}

/// Exit status for a successful run that patched `patched` occurrences.
pub fn success_exit_code(patched: usize) -> u8 {
    patched.min(MAX_REPORTED_PATCHES) as u8
}

/// Result type alias for pepatch operations
pub type Result<T> = std::result::Result<T, PatchError>;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    /// Checksum of the untouched image, taken before patching.
    Baseline,
    Patch,
    Signature,
    Checksum,
    Sign,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preflight => "preflight",
            Stage::Baseline => "pre-patch checksum",
            Stage::Patch => "patch",
            Stage::Signature => "signature removal",
            Stage::Checksum => "checksum update",
            Stage::Sign => "signing",
        };
        f.write_str(name)
    }
}

/// A stage failure as reported by the pipeline.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: PatchError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<PatchError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }
}
