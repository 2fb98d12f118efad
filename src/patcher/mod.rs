//! Aligned 64-bit pattern replacement.
//!
//! The image is scanned as consecutive 8-byte words starting at offset 0.
//! Each word is compared against the `original` of every [`PatchPair`] in
//! list order and the first hit is overwritten with its `replacement`. Values
//! that only occur at unaligned offsets are never seen, so callers pick
//! patterns that sit on 8-byte boundaries in the target.
//!
//! Write failures are recorded per occurrence and the scan carries on.

pub mod words;

use crate::error::{PatchError, Result};
use crate::io::{IOLimits, ImageFile};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

pub use words::{AlignedWords, Word, WORD_SIZE};

/// An (original, replacement) pair of 64-bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchPair {
    pub original: u64,
    pub replacement: u64,
}

/// Ordered, non-empty list of patch pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSet {
    pairs: Vec<PatchPair>,
}

impl PatchSet {
    pub fn new(pairs: Vec<PatchPair>) -> Result<Self> {
        if pairs.is_empty() {
            return Err(PatchError::Configuration(
                "No patch data provided".to_string(),
            ));
        }
        Ok(Self { pairs })
    }

    /// Builds pairs from a flat `[original, replacement, ...]` sequence.
    pub fn from_values(values: &[u64]) -> Result<Self> {
        if values.len() % 2 != 0 {
            return Err(PatchError::Configuration(
                "Values must be provided in [ORIGINAL PATCHED] pairs".to_string(),
            ));
        }
        let pairs = values
            .chunks_exact(2)
            .map(|pair| PatchPair {
                original: pair[0],
                replacement: pair[1],
            })
            .collect();
        Self::new(pairs)
    }

    /// Parses hexadecimal QWORD arguments into pairs.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        if args.is_empty() {
            return Err(PatchError::Configuration(
                "No patch data provided".to_string(),
            ));
        }
        if args.len() % 2 != 0 {
            return Err(PatchError::Configuration(
                "Values must be provided in [ORIGINAL PATCHED] pairs".to_string(),
            ));
        }
        let values = args
            .iter()
            .map(|arg| parse_qword(arg.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::from_values(&values)
    }

    pub fn pairs(&self) -> &[PatchPair] {
        &self.pairs
    }

    /// First pair whose `original` equals `value`.
    pub fn lookup(&self, value: u64) -> Option<&PatchPair> {
        self.pairs.iter().find(|pair| pair.original == value)
    }
}

/// Parses a 64-bit hexadecimal value, with or without a `0x` prefix.
pub fn parse_qword(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).map_err(|e| {
        PatchError::Configuration(format!("'{}' is not a 64-bit hex value: {}", text, e))
    })
}

/// A matched occurrence that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFailure {
    pub offset: u64,
    pub reason: String,
}

/// Result of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Occurrences successfully replaced.
    pub patched: usize,
    /// Aligned words examined.
    pub words_scanned: u64,
    pub failures: Vec<PatchFailure>,
}

impl PatchReport {
    pub fn is_noop(&self) -> bool {
        self.patched == 0
    }
}

/// Scans an image and replaces aligned matches in place.
#[derive(Debug, Clone)]
pub struct PatternPatcher {
    set: PatchSet,
}

impl PatternPatcher {
    pub fn new(set: PatchSet) -> Self {
        Self { set }
    }

    pub fn patch_set(&self) -> &PatchSet {
        &self.set
    }

    /// Scans `reader` and writes replacements through `writer`.
    ///
    /// Both must view the same bytes. Writes only ever land on the word that
    /// was just read, so a reader that buffers ahead stays consistent.
    pub fn apply<R, W>(&self, reader: R, writer: &mut W) -> Result<PatchReport>
    where
        R: Read,
        W: Write + Seek,
    {
        let mut report = PatchReport::default();

        for word in AlignedWords::new(reader) {
            let word = word?;
            report.words_scanned += 1;

            let Some(pair) = self.set.lookup(word.value) else {
                continue;
            };

            match overwrite(writer, word.offset, pair.replacement) {
                Ok(()) => {
                    info!(
                        "{:08X}: {:016X} -> {:016X}... SUCCESS",
                        word.offset, word.value, pair.replacement
                    );
                    report.patched += 1;
                }
                Err(e) => {
                    warn!(
                        offset = word.offset,
                        error = %e,
                        "{:08X}: {:016X} -> {:016X}... ERROR",
                        word.offset, word.value, pair.replacement
                    );
                    report.failures.push(PatchFailure {
                        offset: word.offset,
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            patched = report.patched,
            failed = report.failures.len(),
            words = report.words_scanned,
            "Scan complete"
        );
        Ok(report)
    }

    /// Patches the image at `path` in place.
    #[instrument(skip(self, path, limits), fields(path = %path.as_ref().display()))]
    pub fn apply_file<P: AsRef<Path>>(&self, path: P, limits: &IOLimits) -> Result<PatchReport> {
        let path = path.as_ref();
        let image = ImageFile::open(path, limits)?;
        let reader = BufReader::new(File::open(path)?);
        let mut writer = image.file();
        self.apply(reader, &mut writer)
    }
}

fn overwrite<W: Write + Seek>(writer: &mut W, offset: u64, value: u64) -> std::io::Result<()> {
    writer.seek(SeekFrom::Start(offset))?;
    writer.write_all(&value.to_le_bytes())?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    fn words(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn run(set: &PatchSet, data: &[u8]) -> (PatchReport, Vec<u8>) {
        let mut writer = Cursor::new(data.to_vec());
        let report = PatternPatcher::new(set.clone())
            .apply(Cursor::new(data), &mut writer)
            .unwrap();
        (report, writer.into_inner())
    }

    #[test]
    fn test_parse_qword() {
        assert_eq!(parse_qword("1122334455667788").unwrap(), 0x1122334455667788);
        assert_eq!(parse_qword("0xAABBCCDDEEFF0011").unwrap(), 0xAABBCCDDEEFF0011);
        assert_eq!(parse_qword("ff").unwrap(), 0xFF);
        assert!(matches!(parse_qword("xyz"), Err(PatchError::Configuration(_))));
        assert!(parse_qword("11223344556677889").is_err());
    }

    #[test]
    fn test_patch_set_validation() {
        assert!(matches!(
            PatchSet::parse::<&str>(&[]),
            Err(PatchError::Configuration(msg)) if msg.contains("No patch data")
        ));
        assert!(matches!(
            PatchSet::parse(&["1", "2", "3"]),
            Err(PatchError::Configuration(msg)) if msg.contains("pairs")
        ));
        let set = PatchSet::parse(&["1", "2", "3", "4"]).unwrap();
        assert_eq!(
            set.pairs(),
            &[
                PatchPair { original: 1, replacement: 2 },
                PatchPair { original: 3, replacement: 4 }
            ]
        );
    }

    #[test]
    fn test_replaces_aligned_matches() {
        let set = PatchSet::from_values(&[0x1122334455667788, 0xAABBCCDDEEFF0011]).unwrap();
        let data = words(&[0, 0x1122334455667788, 5, 0x1122334455667788]);
        let (report, out) = run(&set, &data);
        assert_eq!(report.patched, 2);
        assert_eq!(report.words_scanned, 4);
        assert_eq!(out, words(&[0, 0xAABBCCDDEEFF0011, 5, 0xAABBCCDDEEFF0011]));
    }

    #[test]
    fn test_ignores_unaligned_occurrence() {
        let set = PatchSet::from_values(&[0x1122334455667788, 0]).unwrap();
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&0x1122334455667788u64.to_le_bytes());
        data.extend_from_slice(&[0u8; 4]);
        let (report, out) = run(&set, &data);
        assert_eq!(report.patched, 0);
        assert_eq!(out, data);
    }

    #[test]
    fn test_first_matching_pair_wins() {
        let set = PatchSet::from_values(&[7, 8, 7, 9]).unwrap();
        let (report, out) = run(&set, &words(&[7]));
        assert_eq!(report.patched, 1);
        assert_eq!(out, words(&[8]));
    }

    #[test]
    fn test_second_run_is_noop() {
        let set = PatchSet::from_values(&[1, 2]).unwrap();
        let (first, once) = run(&set, &words(&[1, 1, 3]));
        assert_eq!(first.patched, 2);
        let (second, twice) = run(&set, &once);
        assert_eq!(second.patched, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_replacement_is_not_rescanned() {
        // 1 -> 2 and 2 -> 3: a freshly written 2 is never revisited.
        let set = PatchSet::from_values(&[1, 2, 2, 3]).unwrap();
        let (report, out) = run(&set, &words(&[1, 2]));
        assert_eq!(report.patched, 2);
        assert_eq!(out, words(&[2, 3]));
    }

    /// Writer that refuses writes at one offset.
    struct FailingAt {
        inner: Cursor<Vec<u8>>,
        offset: u64,
    }

    impl Write for FailingAt {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.inner.position() == self.offset {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FailingAt {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_write_failure_does_not_stop_scan() {
        let set = PatchSet::from_values(&[1, 2]).unwrap();
        let data = words(&[1, 1, 1]);
        let mut writer = FailingAt {
            inner: Cursor::new(data.clone()),
            offset: 8,
        };
        let report = PatternPatcher::new(set)
            .apply(Cursor::new(&data), &mut writer)
            .unwrap();

        assert_eq!(report.patched, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].offset, 8);
        assert_eq!(writer.inner.into_inner(), words(&[2, 1, 2]));
    }

    #[test]
    fn test_apply_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), words(&[9, 0x1122334455667788, 9])).unwrap();
        let set = PatchSet::from_values(&[0x1122334455667788, 0xAABBCCDDEEFF0011]).unwrap();

        let report = PatternPatcher::new(set)
            .apply_file(file.path(), &IOLimits::default())
            .unwrap();
        assert_eq!(report.patched, 1);
        assert_eq!(
            std::fs::read(file.path()).unwrap(),
            words(&[9, 0xAABBCCDDEEFF0011, 9])
        );
    }
}
