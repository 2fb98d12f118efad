//! Patch-and-reseal pipeline.
//!
//! Stages run strictly in order:
//!
//! ```text
//! Start -> Patched -> SignatureHandled -> ChecksumReconciled -> Resigned -> Done
//! ```
//!
//! A scan that replaces nothing goes straight from `Start` to `Done`. Any
//! stage failure ends the run; nothing is retried and earlier mutations are
//! not undone, so recovery goes through the `.bak` copy.

use crate::checksum::{checksum_file, ChecksumPair, ChecksumReconciler, ReconcileOutcome};
use crate::config::PatchConfig;
use crate::error::{PatchError, PipelineError, Stage};
use crate::log_error;
use crate::patcher::{PatchFailure, PatchSet, PatternPatcher};
use crate::preflight::{ensure_backup, ensure_not_system_file, ensure_writable, BackupStatus};
use crate::signature::{SignatureOutcome, SignatureStripper};
use crate::signer::Signer;
use std::path::Path;
use tracing::{debug, info, info_span};

/// Pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    Patched,
    SignatureHandled,
    ChecksumReconciled,
    Resigned,
    Done,
    Failed(Stage),
}

/// Everything a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// Occurrences replaced; zero means the run was a no-op.
    pub patched: usize,
    pub patch_failures: Vec<PatchFailure>,
    pub backup: Option<BackupStatus>,
    pub signature: Option<SignatureOutcome>,
    pub checksum: Option<ChecksumPair>,
    pub reconcile: Option<ReconcileOutcome>,
    /// States visited, `Start` through `Done`.
    pub states: Vec<PipelineState>,
}

impl PipelineOutcome {
    pub fn is_noop(&self) -> bool {
        self.patched == 0
    }
}

/// A failed run: the error plus the states visited before it.
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub states: Vec<PipelineState>,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.error)
    }
}

impl PipelineFailure {
    pub fn stage(&self) -> Stage {
        self.error.stage
    }

    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

struct Run {
    states: Vec<PipelineState>,
}

impl Run {
    fn new() -> Self {
        Self {
            states: vec![PipelineState::Start],
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(from = ?self.states.last(), to = ?next, "Pipeline transition");
        self.states.push(next);
    }

    fn fail(&mut self, stage: Stage, err: PatchError) -> PipelineFailure {
        let error = log_error!(PipelineError::new(stage, err));
        self.advance(PipelineState::Failed(stage));
        PipelineFailure {
            error,
            states: std::mem::take(&mut self.states),
        }
    }
}

/// Sequences the patch, strip, checksum and sign stages for one file.
pub struct PipelineOrchestrator<S> {
    config: PatchConfig,
    signer: S,
}

impl<S: Signer> PipelineOrchestrator<S> {
    pub fn new(config: PatchConfig, signer: S) -> Self {
        Self { config, signer }
    }

    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Runs the whole pipeline against `path`.
    pub fn run(&self, path: &Path, patches: &PatchSet) -> Result<PipelineOutcome, PipelineFailure> {
        let span = info_span!("pipeline", path = %path.display());
        let _guard = span.enter();

        let limits = self.config.limits();
        let mut run = Run::new();

        let backup = self
            .preflight(path)
            .map_err(|e| run.fail(Stage::Preflight, e))?;

        // Taken before anything is written so the header guard can tell a
        // stale or misread checksum from a current one.
        let old = checksum_file(path, &limits).map_err(|e| run.fail(Stage::Baseline, e))?;

        let report = PatternPatcher::new(patches.clone())
            .apply_file(path, &limits)
            .map_err(|e| run.fail(Stage::Patch, e))?;
        if report.is_noop() {
            info!("No elements were patched - aborting");
            run.advance(PipelineState::Done);
            return Ok(PipelineOutcome {
                patched: 0,
                patch_failures: report.failures,
                backup,
                signature: None,
                checksum: None,
                reconcile: None,
                states: run.states,
            });
        }
        run.advance(PipelineState::Patched);

        let signature = SignatureStripper::new(limits.clone())
            .strip(path)
            .map_err(|e| run.fail(Stage::Signature, e))?;
        run.advance(PipelineState::SignatureHandled);

        let new = checksum_file(path, &limits).map_err(|e| run.fail(Stage::Checksum, e))?;
        info!("PE Checksum: {:08X}", new);
        let pair = ChecksumPair { old, new };
        let reconcile = ChecksumReconciler::new(limits)
            .reconcile(path, pair)
            .map_err(|e| run.fail(Stage::Checksum, e))?;
        run.advance(PipelineState::ChecksumReconciled);

        info!("Applying digital signature...");
        self.signer
            .sign(path, &self.config.certificate_subject)
            .map_err(|e| run.fail(Stage::Sign, e))?;
        run.advance(PipelineState::Resigned);

        info!("Successfully patched '{}'", path.display());
        run.advance(PipelineState::Done);
        Ok(PipelineOutcome {
            patched: report.patched,
            patch_failures: report.failures,
            backup,
            signature: Some(signature),
            checksum: Some(pair),
            reconcile: Some(reconcile),
            states: run.states,
        })
    }

    fn preflight(&self, path: &Path) -> crate::error::Result<Option<BackupStatus>> {
        ensure_not_system_file(path, &self.config.system_directory)?;
        ensure_writable(path)?;
        if self.config.create_backup {
            Ok(Some(ensure_backup(path)?))
        } else {
            Ok(None)
        }
    }
}
