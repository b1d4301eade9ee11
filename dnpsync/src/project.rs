//! KiCad project discovery.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No KiCad project found in {0}")]
    NotFound(PathBuf),
    #[error("Several KiCad projects found in {dir}: {names}")]
    Ambiguous { dir: PathBuf, names: String },
    #[error("Project file is missing: {0}")]
    MissingFile(PathBuf),
}

/// The root schematic and board of one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KicadProject {
    pub dir: PathBuf,
    pub name: String,
    pub sch_root: PathBuf,
    pub pcb_file: PathBuf,
}

impl KicadProject {
    /// Finds the project in `dir`: the single `*.kicad_pro`, or failing that the
    /// single `*.kicad_pcb` with a schematic of the same name next to it.
    pub fn discover(dir: &Path) -> Result<Self, ProjectError> {
        let projects = files_with_extension(dir, "kicad_pro")?;
        let stem = match projects.as_slice() {
            [one] => file_stem(one),
            [] => {
                let boards = files_with_extension(dir, "kicad_pcb")?;
                match boards.as_slice() {
                    [one] => file_stem(one),
                    [] => return Err(ProjectError::NotFound(dir.to_path_buf())),
                    many => return Err(ambiguous(dir, many)),
                }
            }
            many => return Err(ambiguous(dir, many)),
        };

        let project = Self::from_files(
            dir.join(format!("{}.kicad_sch", stem)),
            dir.join(format!("{}.kicad_pcb", stem)),
        )?;
        tracing::info!("Using project {} in {}", project.name, dir.display());
        Ok(project)
    }

    /// Builds a project from explicit file paths. Both files have to exist.
    pub fn from_files(sch_root: PathBuf, pcb_file: PathBuf) -> Result<Self, ProjectError> {
        for path in [&sch_root, &pcb_file] {
            if !path.is_file() {
                return Err(ProjectError::MissingFile(path.clone()));
            }
        }
        let dir = sch_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self {
            name: file_stem(&sch_root),
            dir,
            sch_root,
            pcb_file,
        })
    }
}

fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, ProjectError> {
    let io = |source| ProjectError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn ambiguous(dir: &Path, files: &[PathBuf]) -> ProjectError {
    let names: Vec<String> = files
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .collect();
    ProjectError::Ambiguous {
        dir: dir.to_path_buf(),
        names: names.join(", "),
    }
}
