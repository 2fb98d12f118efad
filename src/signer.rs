//! Re-signing collaborator.
//!
//! The pipeline only needs "embed a fresh signature for this subject into
//! this file". `CommandSigner` delegates that to an external signing tool;
//! `NullSigner` leaves the file unsigned.

use crate::config::SignerConfig;
use crate::error::{PatchError, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

/// Embeds a signature into an image on disk.
pub trait Signer {
    fn sign(&self, path: &Path, subject: &str) -> Result<()>;
}

impl<S: Signer + ?Sized> Signer for &S {
    fn sign(&self, path: &Path, subject: &str) -> Result<()> {
        (**self).sign(path, subject)
    }
}

impl<S: Signer + ?Sized> Signer for Box<S> {
    fn sign(&self, path: &Path, subject: &str) -> Result<()> {
        (**self).sign(path, subject)
    }
}

/// Runs an external program, substituting `{file}` and `{subject}` in its
/// arguments.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    program: String,
    args: Vec<String>,
}

impl CommandSigner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &SignerConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    /// Arguments with placeholders filled in.
    pub fn render_args(&self, path: &Path, subject: &str) -> Vec<String> {
        let file = path.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{file}", &file).replace("{subject}", subject))
            .collect()
    }
}

impl Signer for CommandSigner {
    fn sign(&self, path: &Path, subject: &str) -> Result<()> {
        let args = self.render_args(path, subject);
        debug!(program = %self.program, ?args, "Invoking signer");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| PatchError::Signing(format!("could not run '{}': {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, stderr = %stderr.trim(), "Signer failed");
            return Err(PatchError::Signing(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        info!(subject, "Applied digital signature");
        Ok(())
    }
}

/// Signer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSigner;

impl Signer for NullSigner {
    fn sign(&self, path: &Path, _subject: &str) -> Result<()> {
        warn!(path = %path.display(), "Signing skipped; image left unsigned");
        Ok(())
    }
}
