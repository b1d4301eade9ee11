//! Designator lookups for both documents, rebuilt on every run.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::dnp::attributes::{designator, exclude_from_bom, exclude_from_pos_files};
use crate::dnp::detector::symbol_states;
use crate::parser::pcb::{Board, FootprintId};
use crate::parser::schematic::{Schematic, SymbolId};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(
        "Units of {designator} disagree on DNP state ({dnp_units} DNP, {populated_units} populated)"
    )]
    DuplicateDesignator {
        designator: String,
        dnp_units: usize,
        populated_units: usize,
    },
}

/// All units placed under one designator and the DNP intent they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignatorEntry {
    pub units: Vec<SymbolId>,
    pub dnp: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    entries: BTreeMap<String, DesignatorEntry>,
}

impl SymbolIndex {
    /// Groups units by designator. Units count as co-equal as long as they agree on
    /// whether the part is DNP, however malformed each of them is.
    pub fn build(schematic: &Schematic) -> Result<Self, IndexError> {
        let mut grouped: BTreeMap<String, Vec<(SymbolId, bool)>> = BTreeMap::new();
        for state in symbol_states(schematic) {
            let intent = state.classification().intends_dnp();
            grouped
                .entry(state.designator)
                .or_default()
                .push((state.id, intent));
        }

        let mut entries = BTreeMap::new();
        for (designator, units) in grouped {
            let dnp_units = units.iter().filter(|(_, dnp)| *dnp).count();
            let populated_units = units.len() - dnp_units;
            if dnp_units > 0 && populated_units > 0 {
                return Err(IndexError::DuplicateDesignator {
                    designator,
                    dnp_units,
                    populated_units,
                });
            }
            entries.insert(
                designator,
                DesignatorEntry {
                    units: units.into_iter().map(|(id, _)| id).collect(),
                    dnp: dnp_units > 0,
                },
            );
        }

        Ok(Self { entries })
    }

    pub fn get(&self, designator: &str) -> Option<&DesignatorEntry> {
        self.entries.get(designator)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DesignatorEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dnp_states(&self) -> DnpStates {
        DnpStates(
            self.entries
                .iter()
                .map(|(designator, entry)| (designator.clone(), entry.dnp))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct FootprintIndex {
    entries: BTreeMap<String, Vec<FootprintId>>,
}

impl FootprintIndex {
    pub fn build(board: &Board) -> Self {
        let mut entries: BTreeMap<String, Vec<FootprintId>> = BTreeMap::new();
        for (id, footprint) in board.footprints() {
            match designator(footprint) {
                Some(reference) if !reference.is_empty() => {
                    entries.entry(reference.to_string()).or_default().push(id)
                }
                _ => tracing::debug!("Footprint at item {} has no reference", id.0),
            }
        }
        Self { entries }
    }

    /// Footprints sharing `designator`, in board order. Empty when there are none.
    pub fn get(&self, designator: &str) -> &[FootprintId] {
        self.entries
            .get(designator)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[FootprintId])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// DNP state per designator, the single input the board side is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DnpStates(BTreeMap<String, bool>);

impl DnpStates {
    /// Reads the state back from a board alone: a footprint is DNP when it is
    /// excluded from both position files and BOM. All footprints of a designator
    /// have to agree.
    pub fn from_board(board: &Board) -> Self {
        let mut states: BTreeMap<String, bool> = BTreeMap::new();
        for (_, footprint) in board.footprints() {
            let Some(reference) = designator(footprint) else {
                continue;
            };
            let dnp = exclude_from_pos_files(footprint) && exclude_from_bom(footprint);
            states
                .entry(reference.to_string())
                .and_modify(|all| *all &= dnp)
                .or_insert(dnp);
        }
        Self(states)
    }

    pub fn is_dnp(&self, designator: &str) -> Option<bool> {
        self.0.get(designator).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn dnp_designators(&self) -> impl Iterator<Item = &str> {
        self.iter().filter(|(_, dnp)| *dnp).map(|(d, _)| d)
    }
}

impl FromIterator<(String, bool)> for DnpStates {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
