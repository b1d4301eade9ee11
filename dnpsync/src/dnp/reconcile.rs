//! Normalization of DNP fields, schematic first, then board.
//!
//! The schematic is the source of truth. Each designator's intent is settled in
//! the schematic, and the board flags are then recomputed from that state alone.

use serde::Serialize;

use crate::dnp::attributes::{
    remove_property, set_footprint_flag, set_symbol_dnp, set_symbol_in_bom, DNP_PROPERTY,
    EXCLUDE_FROM_BOM, EXCLUDE_FROM_POS_FILES,
};
use crate::dnp::index::{DnpStates, FootprintIndex, IndexError, SymbolIndex};
use crate::parser::pcb::Board;
use crate::parser::schematic::Schematic;
use crate::parser::sexp::SExp;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileSummary {
    pub symbols_changed: usize,
    pub footprints_changed: usize,
    pub dnp_designators: Vec<String>,
    /// Designators with no footprint on the board.
    pub schematic_only: Vec<String>,
    #[serde(skip)]
    pub states: DnpStates,
}

/// Brings one symbol unit to the canonical encoding of `dnp`.
pub fn normalize_symbol(symbol: &mut SExp, dnp: bool) -> bool {
    let mut changed = set_symbol_dnp(symbol, dnp);
    changed |= remove_property(symbol, DNP_PROPERTY).is_some();
    changed |= set_symbol_in_bom(symbol, !dnp);
    changed
}

/// Normalizes every indexed unit. Returns the number of units changed.
pub fn normalize_schematic(schematic: &mut Schematic, index: &SymbolIndex) -> usize {
    let mut changed = 0;
    for (designator, entry) in index.iter() {
        for &id in &entry.units {
            let Some(symbol) = schematic.symbol_mut(id) else {
                continue;
            };
            if normalize_symbol(symbol, entry.dnp) {
                tracing::debug!("Normalized {} (unit at item {}): dnp={}", designator, id.item, entry.dnp);
                changed += 1;
            }
        }
    }
    changed
}

/// Footprint attribute values implied by a designator's DNP state.
pub fn board_attributes(dnp: bool) -> [(&'static str, bool); 2] {
    [(EXCLUDE_FROM_POS_FILES, dnp), (EXCLUDE_FROM_BOM, dnp)]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Propagation {
    pub footprints_changed: usize,
    pub schematic_only: Vec<String>,
}

/// Writes `states` onto every footprint sharing each designator. Footprints of
/// designators missing from `states` are not touched.
pub fn propagate(board: &mut Board, states: &DnpStates) -> Propagation {
    let footprints = FootprintIndex::build(board);
    let mut result = Propagation::default();

    for (designator, dnp) in states.iter() {
        let ids = footprints.get(designator);
        if ids.is_empty() {
            tracing::debug!("{} has no footprint on the board", designator);
            result.schematic_only.push(designator.to_string());
            continue;
        }
        for &id in ids {
            let Some(footprint) = board.footprint_mut(id) else {
                continue;
            };
            let mut touched = false;
            for (flag, value) in board_attributes(dnp) {
                touched |= set_footprint_flag(footprint, flag, value);
            }
            if touched {
                tracing::debug!("Updated footprint {}: excluded={}", designator, dnp);
                result.footprints_changed += 1;
            }
        }
    }
    result
}

/// Runs both phases over the loaded documents.
pub fn reconcile(schematic: &mut Schematic, board: &mut Board) -> Result<ReconcileSummary, IndexError> {
    let index = SymbolIndex::build(schematic)?;
    let symbols_changed = normalize_schematic(schematic, &index);

    // the index was built from intents, which normalization turned into state
    let states = index.dnp_states();
    let propagation = propagate(board, &states);

    let summary = ReconcileSummary {
        symbols_changed,
        footprints_changed: propagation.footprints_changed,
        dnp_designators: states.dnp_designators().map(str::to_string).collect(),
        schematic_only: propagation.schematic_only,
        states,
    };
    tracing::info!(
        "Reconciled {} designators: {} symbols and {} footprints updated, {} DNP",
        index.len(),
        summary.symbols_changed,
        summary.footprints_changed,
        summary.dnp_designators.len()
    );
    Ok(summary)
}
