//! Core DNP run shared by the CLI and library users.
//! Loads a project, applies the requested passes in memory and saves atomically.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::dnp::detector::{detect, MalformationReport};
use crate::dnp::index::IndexError;
use crate::dnp::paste::{remove_dnp_paste, restore_dnp_paste, LibraryPaste, PasteSummary};
use crate::dnp::reconcile::{reconcile, ReconcileSummary};
use crate::parser::document::{save_all, DocumentError, KicadFile};
use crate::parser::library::FootprintLibrary;
use crate::parser::pcb::Board;
use crate::parser::schematic::Schematic;
use crate::project::{KicadProject, ProjectError};
use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum DnpSyncError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Report malformed symbols, change nothing.
    List,
    #[default]
    Reconcile,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PasteAction {
    Remove,
    Restore,
}

/// Options for one run.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub mode: Mode,
    pub paste: Option<PasteAction>,
    /// Directories searched for `.pretty` footprint libraries on restore, ahead of
    /// the project's `fp-lib-table` and the stock KiCad libraries.
    pub footprint_libs: Vec<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    pub project: String,
    pub mode: Mode,
    pub report: MalformationReport,
    pub reconcile: Option<ReconcileSummary>,
    pub paste: Option<PasteSummary>,
    /// Files written, or that would have been written on a dry run.
    pub files: Vec<PathBuf>,
    pub dry_run: bool,
}

impl RunOutcome {
    pub fn has_malformed(&self) -> bool {
        !self.report.is_empty()
    }
}

/// Core DNP API used by the CLI.
pub struct DnpSyncCore;

impl DnpSyncCore {
    pub fn load(project: &KicadProject) -> Result<(Schematic, Board), DnpSyncError> {
        let schematic = Schematic::load(&project.sch_root)?;
        let board = Board::load(&project.pcb_file)?;
        Ok((schematic, board))
    }

    /// Detection only. Nothing is written.
    pub fn list(project: &KicadProject) -> Result<MalformationReport, DnpSyncError> {
        let schematic = Schematic::load(&project.sch_root)?;
        let report = detect(&schematic);
        report.log();
        Ok(report)
    }

    /// Applies `options` to documents already in memory.
    pub fn apply(
        schematic: &mut Schematic,
        board: &mut Board,
        options: &RunOptions,
    ) -> Result<RunOutcome, DnpSyncError> {
        let report = detect(schematic);
        report.log();

        let mut outcome = RunOutcome {
            mode: options.mode,
            dry_run: options.dry_run,
            ..Default::default()
        };
        if options.mode == Mode::List {
            if options.paste.is_some() {
                tracing::warn!("Paste options are ignored in list mode");
            }
            outcome.report = report;
            return Ok(outcome);
        }

        let summary = reconcile(schematic, board)?;
        outcome.paste = options.paste.map(|action| match action {
            PasteAction::Remove => remove_dnp_paste(board, &summary.states),
            PasteAction::Restore => {
                let project_dir = board.path().parent().unwrap_or_else(|| Path::new("."));
                let library =
                    FootprintLibrary::for_project(project_dir, options.footprint_libs.clone());
                restore_dnp_paste(board, &summary.states, &mut LibraryPaste::new(library))
            }
        });
        outcome.report = report;
        outcome.reconcile = Some(summary);
        Ok(outcome)
    }

    /// Full run: load, apply, save every changed file. On a dry run the changed
    /// files are only listed.
    pub fn run(project: &KicadProject, options: &RunOptions) -> Result<RunOutcome, DnpSyncError> {
        let (mut schematic, mut board) = Self::load(project)?;
        let mut outcome = Self::apply(&mut schematic, &mut board, options)?;
        outcome.project = project.name.clone();

        let files = documents(&schematic, &board);
        outcome.files = if options.dry_run {
            let pending: Vec<PathBuf> = files
                .into_iter()
                .filter(|file| file.is_modified())
                .map(|file| file.path().to_path_buf())
                .collect();
            for path in &pending {
                tracing::info!("Would write {}", path.display());
            }
            pending
        } else {
            save_all(files)?
        };

        if outcome.files.is_empty() && options.mode == Mode::Reconcile {
            tracing::info!("Project is already consistent, nothing to write");
        }
        Ok(outcome)
    }
}

/// Every document the run may write, in save order.
pub fn documents<'a>(schematic: &'a Schematic, board: &'a Board) -> Vec<&'a KicadFile> {
    schematic
        .sheets()
        .iter()
        .chain(std::iter::once(board.file()))
        .collect()
}
