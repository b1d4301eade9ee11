pub mod document;
pub mod library;
pub mod pcb;
pub mod schematic;
pub mod sexp;

// Re-export for convenience
pub use document::{save_all, DocumentError, KicadFile};
pub use library::FootprintLibrary;
pub use pcb::{Board, FootprintId};
pub use schematic::{Schematic, SymbolId};
pub use sexp::{ParseError, SExp, SExpParser};
