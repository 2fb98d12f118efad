//! PE image checksum computation and in-place reconciliation.
//!
//! The checksum is the standard loader algorithm: the file is summed as
//! 16-bit little-endian words with the carry folded back after every
//! addition, the `CheckSum` field itself is skipped, and the file length is
//! added to the folded sum.
//!
//! Reconciliation rewrites the stored value only when it still equals the
//! checksum computed before the file was mutated. Anything else means the
//! header width was misjudged or the file changed underneath us, and the
//! field is left alone.

use crate::error::{PatchError, Result};
use crate::formats::pe::{HeaderVariant, PeError, PeImage, WriteExt};
use crate::io::{read_image, IOLimits, ImageFile};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Checksum of `data`, skipping the four bytes at `checksum_offset`.
pub fn compute_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let skip = checksum_offset..checksum_offset.saturating_add(4);
    let mut sum: u32 = 0;

    for (index, word) in data.chunks(2).enumerate() {
        let offset = index * 2;
        // Field bytes count as zero, whatever the field's alignment.
        let byte = |i: usize| match word.get(i) {
            Some(&b) if !skip.contains(&(offset + i)) => b,
            _ => 0,
        };
        let value = u16::from_le_bytes([byte(0), byte(1)]);
        sum += value as u32;
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum = (sum & 0xFFFF) + (sum >> 16);
    sum.wrapping_add(data.len() as u32)
}

/// Validates the headers of `data` and computes its checksum.
pub fn image_checksum(data: &[u8]) -> Result<u32> {
    let image = PeImage::parse(data)?;
    Ok(compute_checksum(data, image.checksum_offset()))
}

/// Computes the checksum of the image at `path`.
pub fn checksum_file<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<u32> {
    let data = read_image(path, limits)?;
    image_checksum(&data)
}

/// Checksums of the same image before and after mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumPair {
    /// Computed before any patch or signature removal.
    pub old: u32,
    /// Computed after the last mutation.
    pub new: u32,
}

impl ChecksumPair {
    pub fn is_unchanged(&self) -> bool {
        self.old == self.new
    }
}

/// What reconciliation did to the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The stored value already matched and no write was needed.
    Unchanged,
    /// The stored value was replaced with the post-mutation checksum.
    Updated(HeaderVariant),
}

/// Guarded rewrite of the stored checksum in a buffer.
pub fn reconcile_bytes(data: &mut [u8], pair: ChecksumPair) -> Result<ReconcileOutcome> {
    let image = PeImage::parse(data)?;
    let stored = image.stored_checksum(data)?;
    debug!(
        stored = format_args!("{:08X}", stored),
        old = format_args!("{:08X}", pair.old),
        new = format_args!("{:08X}", pair.new),
        variant = %image.variant,
        "Checking stored checksum"
    );

    if stored != pair.old {
        return Err(PatchError::IntegrityGuard {
            stored,
            expected: pair.old,
            bits: image.variant.bits(),
        });
    }
    if pair.is_unchanged() {
        return Ok(ReconcileOutcome::Unchanged);
    }

    let offset = image.checksum_offset();
    data.write_u32_le_at(offset, pair.new)
        .ok_or(PeError::InvalidOffset { offset })?;
    Ok(ReconcileOutcome::Updated(image.variant))
}

/// Applies a [`ChecksumPair`] to an image on disk.
#[derive(Debug, Clone, Default)]
pub struct ChecksumReconciler {
    limits: IOLimits,
}

impl ChecksumReconciler {
    pub fn new(limits: IOLimits) -> Self {
        Self { limits }
    }

    /// Validates the headers of `path` and rewrites its checksum field.
    ///
    /// The file is mapped only for the duration of this call.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn reconcile<P: AsRef<Path>>(
        &self,
        path: P,
        pair: ChecksumPair,
    ) -> Result<ReconcileOutcome> {
        let mut file = ImageFile::open(path.as_ref(), &self.limits)?;
        let outcome = {
            let mut view = file.map_mut()?;
            let outcome = reconcile_bytes(&mut view, pair)?;
            if matches!(outcome, ReconcileOutcome::Updated(_)) {
                view.flush()?;
            }
            outcome
        };

        match outcome {
            ReconcileOutcome::Updated(variant) => info!("{} checksum updated", variant),
            ReconcileOutcome::Unchanged => info!("Checksum already current"),
        }
        Ok(outcome)
    }
}
