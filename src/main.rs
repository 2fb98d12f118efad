//! Command-line interface for pepatch.
//!
//! Patches aligned QWORDs in a PE image, strips its signature, fixes the
//! checksum and re-signs it. The exit status is the number of patched
//! occurrences on success (capped at 247), or a category code in `248..=254`
//! on failure.

use clap::Parser;
use pepatch::error::{success_exit_code, EXIT_USAGE};
use pepatch::logging::{init_tracing, init_tracing_json};
use pepatch::preflight::program_name;
use pepatch::{CommandSigner, NullSigner, PatchConfig, PatchSet, PipelineOrchestrator, Signer};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pepatch", version)]
#[command(about = "Patch aligned QWORDs in a PE image and reseal it")]
#[command(after_help = "The QWORDs *must* be aligned to 64-bit.")]
struct Cli {
    /// Image to patch in place
    file: PathBuf,

    /// Hex values as ORIGINAL PATCHED pairs
    #[arg(value_name = "QWORD")]
    qwords: Vec<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,

    /// Leave the image unsigned
    #[arg(long)]
    no_sign: bool,

    /// Do not create <file>.bak
    #[arg(long)]
    no_backup: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::from(EXIT_USAGE as u8);
        }
        // --help and --version
        Err(e) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };
    if cli.json_logs {
        init_tracing_json();
    } else {
        init_tracing();
    }

    let argv0 = std::env::args().next().unwrap_or_default();
    eprintln!(
        "{} {}\n",
        program_name(&argv0),
        env!("CARGO_PKG_VERSION")
    );

    match run(cli) {
        Ok(patched) => ExitCode::from(success_exit_code(patched)),
        Err(Failure::Pipeline(failure)) => {
            eprintln!("{}", failure);
            ExitCode::from(failure.exit_code() as u8)
        }
        Err(Failure::Other(code, err)) => {
            eprintln!("{:#}", err);
            ExitCode::from(code as u8)
        }
    }
}

enum Failure {
    Pipeline(pepatch::pipeline::PipelineFailure),
    Other(i32, anyhow::Error),
}

fn run(cli: Cli) -> Result<usize, Failure> {
    let mut config = match &cli.config {
        Some(path) => PatchConfig::from_json_file(path)
            .map_err(|e| Failure::Other(e.exit_code(), e.into()))?,
        None => PatchConfig::default(),
    };
    if cli.no_backup {
        config.create_backup = false;
    }

    // Rejected before the file is opened.
    let patches = PatchSet::parse(&cli.qwords)
        .map_err(|e| {
            let code = e.exit_code();
            Failure::Other(code, anyhow::Error::new(e).context("invalid patch list"))
        })?;

    let signer: Box<dyn Signer> = if cli.no_sign {
        Box::new(NullSigner)
    } else {
        Box::new(CommandSigner::from_config(&config.signer))
    };

    let outcome = PipelineOrchestrator::new(config, signer)
        .run(&cli.file, &patches)
        .map_err(Failure::Pipeline)?;

    if !outcome.patch_failures.is_empty() {
        let offsets: Vec<String> = outcome
            .patch_failures
            .iter()
            .map(|f| format!("{:08X}", f.offset))
            .collect();
        let warning = anyhow::anyhow!("{} occurrence(s) could not be written", offsets.len())
            .context(format!("at offsets {}", offsets.join(", ")));
        eprintln!("warning: {:#}", warning);
    }
    Ok(outcome.patched)
}
