//! KiCad board (.kicad_pcb)
//!
//! Only the parts the DNP engine touches are given structure here: footprints
//! (`footprint`, or `module` before KiCad 6) and their pads. Everything else stays
//! as parsed and is written back unchanged.

use std::path::Path;

use serde::Serialize;

use crate::parser::document::{DocumentError, KicadFile};
use crate::parser::sexp::SExp;

pub const BOARD_ROOT: &str = "kicad_pcb";

/// Position of a footprint in the board's root list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FootprintId(pub usize);

#[derive(Debug, Clone)]
pub struct Board {
    file: KicadFile,
}

impl Board {
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let file = KicadFile::load(path, &[BOARD_ROOT])?;
        tracing::info!("Loaded board {}", path.display());
        Ok(Self { file })
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, DocumentError> {
        Ok(Self {
            file: KicadFile::parse(path, content, &[BOARD_ROOT])?,
        })
    }

    pub fn file(&self) -> &KicadFile {
        &self.file
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn footprints(&self) -> impl Iterator<Item = (FootprintId, &SExp)> + '_ {
        self.file
            .items()
            .iter()
            .enumerate()
            .filter(|(_, item)| is_footprint(item))
            .map(|(index, item)| (FootprintId(index), item))
    }

    pub fn footprint(&self, id: FootprintId) -> Option<&SExp> {
        self.file.items().get(id.0).filter(|item| is_footprint(item))
    }

    pub fn footprint_mut(&mut self, id: FootprintId) -> Option<&mut SExp> {
        self.file
            .root_mut()
            .as_list_mut()?
            .get_mut(id.0)
            .filter(|item| is_footprint(item))
    }

    pub fn is_modified(&self) -> bool {
        self.file.is_modified()
    }

    pub fn save(&self) -> Result<bool, DocumentError> {
        self.file.save()
    }
}

pub fn is_footprint(item: &SExp) -> bool {
    matches!(item.tag(), Some("footprint") | Some("module"))
}

/// `Resistor_SMD:R_0603_1608Metric` for `(footprint "Resistor_SMD:R_0603_1608Metric" ...)`.
pub fn footprint_lib_id(footprint: &SExp) -> Option<&str> {
    footprint.as_list()?.get(1)?.as_atom()
}

/// Copper side the footprint is placed on (`F.Cu` or `B.Cu`).
pub fn footprint_layer(footprint: &SExp) -> Option<&str> {
    footprint.value_of("layer")
}

pub fn pads(footprint: &SExp) -> impl Iterator<Item = &SExp> + '_ {
    footprint
        .as_list()
        .unwrap_or(&[])
        .iter()
        .filter(|item| item.tag() == Some("pad"))
}

pub fn pads_mut(footprint: &mut SExp) -> impl Iterator<Item = &mut SExp> + '_ {
    footprint
        .as_list_mut()
        .into_iter()
        .flatten()
        .filter(|item| item.tag() == Some("pad"))
}

/// Pad number as written (`"1"`, `"EP"`, or empty for mechanical holes).
pub fn pad_number(pad: &SExp) -> Option<&str> {
    pad.as_list()?.get(1)?.as_atom()
}
