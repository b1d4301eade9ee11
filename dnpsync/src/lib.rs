//! dnpsync - DNP consistency for KiCad projects
//!
//! Keeps the "do not populate" state of a KiCad design consistent between the
//! schematic and the board: malformed symbol states are reported or normalized,
//! footprint flags are recomputed from the schematic, and solder paste can be
//! removed from (and later restored to) DNP footprints.
//!
//! # Quick Start
//!
//! ```no_run
//! use dnpsync::{DnpSyncCore, KicadProject, RunOptions};
//! use std::path::Path;
//!
//! let project = KicadProject::discover(Path::new("receiver")).unwrap();
//! let outcome = DnpSyncCore::run(&project, &RunOptions::default()).unwrap();
//!
//! for path in &outcome.files {
//!     println!("updated {}", path.display());
//! }
//! ```
//!
//! Documents are edited in place on a lossless S-expression tree, so anything the
//! run does not touch is written back byte for byte.

pub mod core;
pub mod dnp;
pub mod parser;
pub mod project;
pub mod validate;

// Re-export main types
pub use crate::core::{DnpSyncCore, DnpSyncError, Mode, PasteAction, RunOptions, RunOutcome};
pub use dnp::{
    detect, reconcile, remove_dnp_paste, restore_dnp_paste, DnpStates, IndexError,
    LibraryPaste, MalformationReport, NominalPaste, PasteSummary,
    ReconcileSummary,
};
pub use parser::{Board, DocumentError, FootprintLibrary, Schematic};
pub use project::{KicadProject, ProjectError};
pub use validate::{validate_project, KicadCli, ValidationError, Validator};

/// Load a schematic hierarchy (convenience wrapper).
pub fn load_schematic(path: &std::path::Path) -> Result<Schematic, DnpSyncError> {
    Schematic::load(path).map_err(DnpSyncError::from)
}

/// Load a board (convenience wrapper).
pub fn load_board(path: &std::path::Path) -> Result<Board, DnpSyncError> {
    Board::load(path).map_err(DnpSyncError::from)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        DnpSyncCore, DnpSyncError, KicadProject, MalformationReport, Mode, PasteAction,
        RunOptions, RunOutcome,
    };
}
