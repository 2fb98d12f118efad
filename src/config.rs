//! Configuration for the patch pipeline.
//!
//! Every field has a default, so a config file only needs the values it
//! changes.

use crate::error::{PatchError, Result};
use crate::io::IOLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Subject of the certificate the re-signing step uses.
pub const DEFAULT_CERTIFICATE_SUBJECT: &str = "CN = Test Signing Certificate";

/// Fallback when `%SystemRoot%` is not set.
pub const DEFAULT_SYSTEM_DIRECTORY: &str = r"C:\Windows\System32";

/// Master configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Certificate subject passed to the signer.
    pub certificate_subject: String,
    /// Files below this directory are never patched.
    pub system_directory: String,
    /// Create `<file>.bak` before mutating.
    pub create_backup: bool,
    /// External signing tool.
    pub signer: SignerConfig,
    /// I/O limits.
    pub io: IOConfig,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            certificate_subject: DEFAULT_CERTIFICATE_SUBJECT.to_string(),
            system_directory: default_system_directory(),
            create_backup: true,
            signer: SignerConfig::default(),
            io: IOConfig::default(),
        }
    }
}

impl PatchConfig {
    /// Loads a JSON config file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PatchError::Configuration(format!("could not read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| PatchError::Configuration(format!("invalid config: {}", e)))
    }

    pub fn limits(&self) -> IOLimits {
        IOLimits {
            max_file_size: self.io.max_file_size,
        }
    }
}

/// External signer invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub program: String,
    /// `{file}` and `{subject}` are substituted.
    pub args: Vec<String>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            program: "signtool".to_string(),
            args: ["sign", "/fd", "SHA256", "/n", "{subject}", "{file}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// I/O configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IOConfig {
    /// Largest image the pipeline will open.
    pub max_file_size: u64,
}

impl Default for IOConfig {
    fn default() -> Self {
        Self {
            max_file_size: IOLimits::default().max_file_size,
        }
    }
}

fn default_system_directory() -> String {
    match std::env::var("SystemRoot") {
        Ok(root) if !root.is_empty() => format!(r"{}\System32", root.trim_end_matches('\\')),
        _ => DEFAULT_SYSTEM_DIRECTORY.to_string(),
    }
}
