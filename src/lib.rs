//! In-place patching and resealing of PE images.
//!
//! Aligned 64-bit values are replaced in a Windows executable, after which the
//! image is returned to a loadable state: the now-invalid Authenticode
//! signature is stripped, the optional header checksum is recomputed under a
//! stale-value guard, and an external signer applies a fresh signature.

/// Checksum computation and reconciliation
pub mod checksum;
/// Pipeline configuration
pub mod config;
pub mod error;
/// Binary format parsers
pub mod formats;
/// Bounded file access
pub mod io;
pub mod logging;
/// Aligned pattern replacement
pub mod patcher;
/// Patch-and-reseal orchestration
pub mod pipeline;
pub mod preflight;
pub mod signature;
pub mod signer;

pub use checksum::{ChecksumPair, ChecksumReconciler};
pub use config::PatchConfig;
pub use error::{PatchError, PipelineError, Result, Stage};
pub use patcher::{PatchPair, PatchSet, PatternPatcher};
pub use pipeline::{PipelineOrchestrator, PipelineOutcome, PipelineState};
pub use signature::SignatureStripper;
pub use signer::{CommandSigner, NullSigner, Signer};
