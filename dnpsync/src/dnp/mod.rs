pub mod attributes;
pub mod detector;
pub mod index;
pub mod paste;
pub mod reconcile;

pub use detector::{
    classify, detect, Classification, Malformation, MalformationReport, MalformedSymbol,
    SymbolState,
};
pub use index::{DnpStates, FootprintIndex, IndexError, SymbolIndex};
pub use paste::{
    remove_dnp_paste, restore_dnp_paste, LibraryPaste, NominalPaste, PasteSummary,
};
pub use reconcile::{reconcile, ReconcileSummary};
