//! One KiCad file held in memory as a lossless S-expression tree.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::parser::sexp::{ParseError, SExp, SExpParser};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("S-expression parse error in {path}: {source}")]
    SExpParse { path: PathBuf, source: ParseError },
    #[error("Invalid format in {path}: {message}")]
    InvalidFormat { path: PathBuf, message: String },
    #[error("Schematic hierarchy contains a cycle through {0}")]
    SheetCycle(PathBuf),
}

#[derive(Debug, Clone)]
pub struct KicadFile {
    path: PathBuf,
    root: SExp,
    trailing: String,
    original: String,
}

impl KicadFile {
    /// Reads and parses `path`, checking the root tag (`kicad_sch`, `kicad_pcb`, ...).
    pub fn load(path: &Path, root_tags: &[&str]) -> Result<Self, DocumentError> {
        let content = fs::read_to_string(path).map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content, root_tags)
    }

    pub fn parse(path: &Path, content: &str, root_tags: &[&str]) -> Result<Self, DocumentError> {
        let (root, trailing) = SExpParser::new(content)
            .parse_document()
            .map_err(|source| DocumentError::SExpParse {
                path: path.to_path_buf(),
                source,
            })?;

        match root.tag() {
            Some(tag) if root_tags.contains(&tag) => {}
            other => {
                return Err(DocumentError::InvalidFormat {
                    path: path.to_path_buf(),
                    message: format!(
                        "Expected {} root, found {}",
                        root_tags.join(" or "),
                        other.unwrap_or("no tag")
                    ),
                })
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            root,
            trailing,
            original: content.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &SExp {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut SExp {
        &mut self.root
    }

    /// Top-level items, the root tag at index 0.
    pub fn items(&self) -> &[SExp] {
        self.root.as_list().unwrap_or(&[])
    }

    pub fn render(&self) -> String {
        format!("{}{}", self.root, self.trailing)
    }

    pub fn is_modified(&self) -> bool {
        self.render() != self.original
    }

    /// Writes the file if its rendering differs from what was loaded.
    /// Returns whether a write happened.
    pub fn save(&self) -> Result<bool, DocumentError> {
        let rendered = self.render();
        if rendered == self.original {
            return Ok(false);
        }
        write_atomic(&self.path, &rendered)?;
        Ok(true)
    }
}

/// Renders every modified file and stages each one in a temporary file next to
/// it. Only when every file is staged are they renamed over the originals, so a
/// failure while writing leaves all originals in place. Returns the paths that
/// were written.
pub fn save_all<'a, I>(files: I) -> Result<Vec<PathBuf>, DocumentError>
where
    I: IntoIterator<Item = &'a KicadFile>,
{
    let mut staged = Vec::new();
    for file in files {
        let rendered = file.render();
        if rendered != file.original {
            staged.push((file.path(), stage(file.path(), &rendered)?));
        }
    }

    let mut written = Vec::with_capacity(staged.len());
    for (path, tmp) in staged {
        tmp.persist(path).map_err(|e| DocumentError::Write {
            path: path.to_path_buf(),
            source: e.error,
        })?;
        tracing::info!("Wrote {}", path.display());
        written.push(path.to_path_buf());
    }
    Ok(written)
}

fn write_atomic(path: &Path, content: &str) -> Result<(), DocumentError> {
    stage(path, content)?
        .persist(path)
        .map_err(|e| DocumentError::Write {
            path: path.to_path_buf(),
            source: e.error,
        })?;
    Ok(())
}

/// Writes `content` to a synced temporary file in `path`'s directory.
fn stage(path: &Path, content: &str) -> Result<NamedTempFile, DocumentError> {
    let to_err = |source: std::io::Error| DocumentError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(to_err)?;
    tmp.write_all(content.as_bytes()).map_err(to_err)?;
    tmp.as_file().sync_all().map_err(to_err)?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_root() {
        let err = KicadFile::parse(Path::new("x.kicad_pcb"), "(kicad_sch)", &["kicad_pcb"])
            .unwrap_err();
        assert!(err.to_string().contains("Expected kicad_pcb root"));
    }

    #[test]
    fn test_unmodified_file_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.kicad_pcb");
        fs::write(&path, "(kicad_pcb (version 20240108))\n").unwrap();

        let file = KicadFile::load(&path, &["kicad_pcb"]).unwrap();
        assert!(!file.is_modified());
        assert!(!file.save().unwrap());
        assert!(save_all([&file]).unwrap().is_empty());
    }

    #[test]
    fn test_modified_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.kicad_pcb");
        fs::write(&path, "(kicad_pcb (version 20240108))\n").unwrap();

        let mut file = KicadFile::load(&path, &["kicad_pcb"]).unwrap();
        file.root_mut().find_mut("version").unwrap().as_list_mut().unwrap()[1].set_atom("20240109");
        assert!(file.is_modified());
        assert_eq!(save_all([&file]).unwrap(), vec![path.clone()]);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "(kicad_pcb (version 20240109))\n"
        );
    }

    #[test]
    fn test_failed_save_leaves_every_original() {
        let dir = tempfile::tempdir().unwrap();
        let sch_path = dir.path().join("board.kicad_sch");
        fs::write(&sch_path, "(kicad_sch (version 20231120))\n").unwrap();

        let mut sch = KicadFile::load(&sch_path, &["kicad_sch"]).unwrap();
        sch.root_mut().find_mut("version").unwrap().as_list_mut().unwrap()[1].set_atom("20231121");

        // the board's directory is gone by the time the run saves
        let gone = dir.path().join("removed");
        let mut board = KicadFile::parse(
            &gone.join("board.kicad_pcb"),
            "(kicad_pcb (version 20240108))\n",
            &["kicad_pcb"],
        )
        .unwrap();
        board.root_mut().find_mut("version").unwrap().as_list_mut().unwrap()[1].set_atom("20240109");

        let err = save_all([&sch, &board]).unwrap_err();
        assert!(matches!(err, DocumentError::Write { ref path, .. } if path.starts_with(&gone)));
        assert_eq!(
            fs::read_to_string(&sch_path).unwrap(),
            "(kicad_sch (version 20231120))\n"
        );
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1, "no temporary file is left behind");
    }

    #[test]
    fn test_missing_file() {
        let err = KicadFile::load(Path::new("does_not_exist.kicad_sch"), &["kicad_sch"]).unwrap_err();
        assert!(matches!(err, DocumentError::Read { .. }));
    }
}
