//! Malformed DNP state detection.
//!
//! A symbol encodes "do not populate" three ways: the `(dnp yes)` flag, a `DNP`
//! property left over from older workflows, and `(in_bom no)`. Only two
//! combinations are consistent; [`classify`] names every other one.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::dnp::attributes::{designator, get_property, symbol_dnp, symbol_in_bom, DNP_PROPERTY};
use crate::parser::schematic::{Schematic, SymbolId};
use crate::parser::sexp::SExp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Malformation {
    /// `DNP` property present, flag not set.
    TagWithoutFlag,
    /// Flag set and out of the BOM, but the property is still there.
    RedundantTag,
    /// Flag set, still in the BOM.
    FlagInBom,
    /// Flag and property set, still in the BOM.
    TagAndFlagInBom,
    /// Populated but excluded from the BOM.
    MissingFromBom,
}

impl Malformation {
    /// What the designer most likely meant.
    pub fn intends_dnp(self) -> bool {
        !matches!(self, Malformation::MissingFromBom)
    }

    pub fn description(self) -> &'static str {
        match self {
            Malformation::TagWithoutFlag => "has a DNP property but the DNP flag is not set",
            Malformation::RedundantTag => "is DNP but still carries a DNP property",
            Malformation::FlagInBom => "is DNP but still included in the BOM",
            Malformation::TagAndFlagInBom => {
                "is DNP, carries a DNP property and is still included in the BOM"
            }
            Malformation::MissingFromBom => "is populated but excluded from the BOM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Populated,
    Dnp,
    Malformed(Malformation),
}

impl Classification {
    pub fn intends_dnp(self) -> bool {
        match self {
            Classification::Populated => false,
            Classification::Dnp => true,
            Classification::Malformed(m) => m.intends_dnp(),
        }
    }

    pub fn is_malformed(self) -> bool {
        matches!(self, Classification::Malformed(_))
    }
}

/// Decision table over (DNP flag, DNP property present, in BOM).
pub fn classify(dnp: bool, has_dnp_property: bool, in_bom: bool) -> Classification {
    use Classification::*;
    use Malformation::*;

    match (dnp, has_dnp_property, in_bom) {
        (false, false, true) => Populated,
        (true, false, false) => Dnp,
        (false, true, _) => Malformed(TagWithoutFlag),
        (true, true, false) => Malformed(RedundantTag),
        (true, false, true) => Malformed(FlagInBom),
        (true, true, true) => Malformed(TagAndFlagInBom),
        (false, false, false) => Malformed(MissingFromBom),
    }
}

/// Power symbols (`#PWR01`) and unannotated symbols (`R?`) are never populated
/// parts and are skipped by every pass.
pub fn is_addressable(designator: &str) -> bool {
    !designator.is_empty() && !designator.starts_with('#') && !designator.contains('?')
}

/// DNP-related fields of one placed symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolState {
    pub id: SymbolId,
    pub designator: String,
    pub dnp: bool,
    pub has_dnp_property: bool,
    pub in_bom: bool,
}

impl SymbolState {
    pub fn read(id: SymbolId, symbol: &SExp) -> Option<Self> {
        Some(Self {
            id,
            designator: designator(symbol)?.to_string(),
            dnp: symbol_dnp(symbol),
            has_dnp_property: get_property(symbol, DNP_PROPERTY).is_some(),
            in_bom: symbol_in_bom(symbol),
        })
    }

    pub fn classification(&self) -> Classification {
        classify(self.dnp, self.has_dnp_property, self.in_bom)
    }
}

/// States of every addressable symbol, in sheet and document order.
pub fn symbol_states(schematic: &Schematic) -> impl Iterator<Item = SymbolState> + '_ {
    schematic
        .symbols()
        .filter_map(|(id, symbol)| SymbolState::read(id, symbol))
        .filter(|state| is_addressable(&state.designator))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedSymbol {
    pub designator: String,
    pub sheet: PathBuf,
    pub malformation: Malformation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MalformationReport {
    pub entries: Vec<MalformedSymbol>,
}

impl MalformationReport {
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn designators(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.designator.as_str()).collect()
    }

    pub fn headline(&self) -> String {
        format!(
            "There are {} schematic components that have their DNP properties malformed:",
            self.count()
        )
    }

    /// Emits the report at warning level, one line per designator.
    pub fn log(&self) {
        if self.is_empty() {
            tracing::info!("No schematic components have malformed DNP properties");
            return;
        }
        tracing::warn!("{}", self.headline());
        for entry in &self.entries {
            tracing::warn!("{} {}", entry.designator, entry.malformation.description());
        }
    }
}

impl fmt::Display for MalformationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.headline())?;
        for entry in &self.entries {
            writeln!(f, "  {} {}", entry.designator, entry.malformation.description())?;
        }
        Ok(())
    }
}

/// Scans every symbol without touching the schematic. Units of a multi-unit
/// symbol are reported once, under the first malformed unit.
pub fn detect(schematic: &Schematic) -> MalformationReport {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for state in symbol_states(schematic) {
        if let Classification::Malformed(malformation) = state.classification() {
            if seen.insert(state.designator.clone()) {
                entries.push(MalformedSymbol {
                    sheet: schematic
                        .sheet_path(state.id)
                        .map(PathBuf::from)
                        .unwrap_or_default(),
                    designator: state.designator,
                    malformation,
                });
            }
        }
    }

    MalformationReport { entries }
}
