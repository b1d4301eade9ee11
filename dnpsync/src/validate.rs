//! External check that KiCad still opens the files.
//!
//! Rewritten files are handed to `kicad-cli`, which has to export them without
//! error. The executable is taken from `KICAD_CLI` when set.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::project::KicadProject;

pub const KICAD_CLI_ENV: &str = "KICAD_CLI";
const DEFAULT_KICAD_CLI: &str = "kicad-cli";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Failed to run {program}: {source}. Is KiCad installed?")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("KiCad rejected {file} (exit {status}): {stderr}")]
    Rejected {
        file: PathBuf,
        status: i32,
        stderr: String,
    },
    #[error("Not a KiCad schematic or board: {0}")]
    Unsupported(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait Validator {
    fn name(&self) -> &str;

    /// Succeeds when KiCad accepts `file`.
    fn validate(&self, file: &Path) -> Result<(), ValidationError>;
}

/// `kicad-cli` driven validator. Exports go to a scratch directory that is
/// removed afterwards.
#[derive(Debug, Clone)]
pub struct KicadCli {
    program: String,
}

impl KicadCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var(KICAD_CLI_ENV).unwrap_or_else(|_| DEFAULT_KICAD_CLI.to_string()))
    }

    fn run(&self, file: &Path, args: &[&str], output: &Path) -> Result<(), ValidationError> {
        let result = Command::new(&self.program)
            .args(args)
            .arg("-o")
            .arg(output)
            .arg(file)
            .output()
            .map_err(|source| ValidationError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(ValidationError::Rejected {
                file: file.to_path_buf(),
                status: result.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for KicadCli {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Validator for KicadCli {
    fn name(&self) -> &str {
        &self.program
    }

    fn validate(&self, file: &Path) -> Result<(), ValidationError> {
        let scratch = tempfile::tempdir()?;
        match file.extension().and_then(|e| e.to_str()) {
            Some("kicad_sch") => self.run(file, &["sch", "export", "pdf"], &scratch.path().join("out.pdf")),
            Some("kicad_pcb") => self.run(file, &["pcb", "export", "gerbers"], scratch.path()),
            _ => Err(ValidationError::Unsupported(file.to_path_buf())),
        }
    }
}

/// Checks the project's root schematic and board.
pub fn validate_project(project: &KicadProject, validator: &dyn Validator) -> Result<(), ValidationError> {
    tracing::info!("Validating {} with {}", project.name, validator.name());
    validator.validate(&project.sch_root)?;
    validator.validate(&project.pcb_file)?;
    tracing::info!("{} opens cleanly", project.name);
    Ok(())
}
