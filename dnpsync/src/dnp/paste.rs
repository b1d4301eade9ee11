//! Solder paste suppression and restoration for DNP footprints.
//!
//! Suppression only drops paste layers, so a pad keeps its identity and position
//! in the footprint. Restoration puts back what the footprint's library definition
//! says each pad carries; a footprint without a usable definition is skipped
//! rather than guessed at.

use serde::Serialize;

use crate::dnp::attributes::{
    add_pad_layer, designator, is_paste_aperture, is_paste_layer, pad_layers, remove_paste,
};
use crate::dnp::index::DnpStates;
use crate::parser::library::FootprintLibrary;
use crate::parser::pcb::{
    footprint_layer, footprint_lib_id, pad_number, pads, pads_mut, Board, FootprintId,
};
use crate::parser::sexp::SExp;

/// Source of the paste layers a footprint's pads carry when populated.
pub trait NominalPaste {
    /// One entry per pad of `footprint`, in pad order, or `None` when the nominal
    /// layout is unknown.
    fn paste_layers(&mut self, footprint: &SExp) -> Option<Vec<Vec<String>>>;
}

/// Reads paste layers from the footprint's library definition.
///
/// Library definitions are drawn on the front side, so paste layers are mirrored
/// for footprints placed on `B.Cu`. The definition has to list the same pads in
/// the same order as the board.
#[derive(Debug, Default)]
pub struct LibraryPaste {
    library: FootprintLibrary,
}

impl LibraryPaste {
    pub fn new(library: FootprintLibrary) -> Self {
        Self { library }
    }
}

impl NominalPaste for LibraryPaste {
    fn paste_layers(&mut self, footprint: &SExp) -> Option<Vec<Vec<String>>> {
        let lib_id = footprint_lib_id(footprint)?;
        let Some(definition) = self.library.definition(lib_id) else {
            tracing::debug!("No library definition for {}", lib_id);
            return None;
        };

        let placed: Vec<Option<&str>> = pads(footprint).map(pad_number).collect();
        let nominal: Vec<&SExp> = pads(definition).collect();
        let numbers: Vec<Option<&str>> = nominal.iter().map(|pad| pad_number(pad)).collect();
        if numbers != placed {
            tracing::debug!(
                "Definition of {} has pads {:?}, the board has {:?}",
                lib_id,
                numbers,
                placed
            );
            return None;
        }

        let flip = footprint_layer(footprint) == Some("B.Cu");
        Some(
            nominal
                .into_iter()
                .map(|pad| {
                    pad_layers(pad)
                        .into_iter()
                        .filter(|l| is_paste_layer(l))
                        .map(|l| if flip { mirror(l).to_string() } else { l.to_string() })
                        .collect()
                })
                .collect(),
        )
    }
}

fn mirror(layer: &str) -> &str {
    match layer {
        "F.Paste" => "B.Paste",
        "B.Paste" => "F.Paste",
        other => other,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PasteSummary {
    pub footprints: usize,
    pub pads: usize,
    /// Pads left as they were: paste-only apertures on removal, pads of footprints
    /// without a usable definition on restore.
    pub skipped: usize,
}

fn dnp_footprints(board: &Board, states: &DnpStates) -> Vec<FootprintId> {
    board
        .footprints()
        .filter(|(_, footprint)| {
            designator(footprint).and_then(|d| states.is_dnp(d)) == Some(true)
        })
        .map(|(id, _)| id)
        .collect()
}

/// Strips paste from every pad of every DNP footprint.
pub fn remove_dnp_paste(board: &mut Board, states: &DnpStates) -> PasteSummary {
    let mut summary = PasteSummary::default();
    for id in dnp_footprints(board, states) {
        let Some(footprint) = board.footprint_mut(id) else {
            continue;
        };

        let mut touched = 0;
        let mut apertures = 0;
        for pad in pads_mut(footprint) {
            if is_paste_aperture(pad) {
                apertures += 1;
            } else if !remove_paste(pad).is_empty() {
                touched += 1;
            }
        }

        let reference = designator(footprint).unwrap_or_default();
        if apertures > 0 {
            tracing::warn!(
                "{} has {} paste-only pads, they keep their paste",
                reference,
                apertures
            );
            summary.skipped += apertures;
        }
        if touched > 0 {
            tracing::debug!("Removed paste from {} pads of {}", touched, reference);
            summary.footprints += 1;
            summary.pads += touched;
        }
    }
    tracing::info!(
        "Removed solder paste from {} pads on {} DNP footprints",
        summary.pads,
        summary.footprints
    );
    summary
}

/// Adds back the nominal paste layers of every DNP footprint. Layers already
/// present are kept, so restoring twice changes nothing.
pub fn restore_dnp_paste(
    board: &mut Board,
    states: &DnpStates,
    nominal: &mut dyn NominalPaste,
) -> PasteSummary {
    let mut summary = PasteSummary::default();
    for id in dnp_footprints(board, states) {
        let Some(footprint) = board.footprint_mut(id) else {
            continue;
        };
        let Some(layers) = nominal.paste_layers(footprint) else {
            tracing::warn!(
                "No usable library definition for {} ({}), paste not restored",
                designator(footprint).unwrap_or_default(),
                footprint_lib_id(footprint).unwrap_or_default()
            );
            summary.skipped += pads(footprint).count();
            continue;
        };

        let mut touched = 0;
        for (pad, paste) in pads_mut(footprint).zip(layers) {
            let mut added = false;
            for layer in &paste {
                added |= add_pad_layer(pad, layer);
            }
            if added {
                touched += 1;
            }
        }
        if touched > 0 {
            tracing::debug!(
                "Restored paste on {} pads of {}",
                touched,
                designator(footprint).unwrap_or_default()
            );
            summary.footprints += 1;
            summary.pads += touched;
        }
    }
    tracing::info!(
        "Restored solder paste on {} pads of {} DNP footprints",
        summary.pads,
        summary.footprints
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnp::attributes::pad_has_paste;
    use crate::parser::library::LIB_TABLE;
    use std::fs;
    use std::path::Path;

    const BOARD: &str = r#"(kicad_pcb (version 20240108)
  (footprint "Resistor_SMD:R_0603" (layer "F.Cu") (property "Reference" "R1") (attr smd exclude_from_pos_files exclude_from_bom)
    (pad "1" smd roundrect (at -0.8 0) (size 0.8 0.95) (layers "F.Cu" "F.Paste" "F.Mask"))
    (pad "2" smd roundrect (at 0.8 0) (size 0.8 0.95) (layers "F.Cu" "F.Paste" "F.Mask")))
  (footprint "Resistor_SMD:R_0603" (layer "B.Cu") (property "Reference" "R2") (attr smd exclude_from_pos_files exclude_from_bom)
    (pad "1" smd roundrect (at -0.8 0) (size 0.8 0.95) (layers "B.Cu" "B.Paste" "B.Mask"))
    (pad "2" smd roundrect (at 0.8 0) (size 0.8 0.95) (layers "B.Cu" "B.Paste" "B.Mask")))
  (footprint "Package_DFN:DFN-2-1EP" (layer "F.Cu") (property "Reference" "U2") (attr smd exclude_from_pos_files exclude_from_bom)
    (pad "1" smd rect (at -1 0) (size 0.5 0.5) (layers "F.Cu" "F.Paste" "F.Mask"))
    (pad "2" smd rect (at 1 0) (size 0.5 0.5) (layers "F.Cu" "F.Paste" "F.Mask"))
    (pad "3" smd rect (at 0 0) (size 1.5 1.5) (layers "F.Cu" "F.Mask")))
  (footprint "Connector:Pin_1x01" (layer "F.Cu") (property "Reference" "J1") (attr through_hole exclude_from_pos_files exclude_from_bom)
    (pad "1" thru_hole rect (at 0 0) (size 1.7 1.7) (drill 1) (layers "*.Cu" "*.Mask")))
  (footprint "Capacitor_SMD:C_0603" (layer "F.Cu") (property "Reference" "C26") (attr smd)
    (pad "1" smd roundrect (at -0.8 0) (size 0.8 0.95) (layers "F.Cu" "F.Paste" "F.Mask"))
    (pad "2" smd roundrect (at 0.8 0) (size 0.8 0.95) (layers "F.Cu" "F.Paste" "F.Mask")))
)
"#;

    const R0603: &str = "(footprint \"R_0603\" (layer \"F.Cu\")\n  (pad \"1\" smd roundrect (layers \"F.Cu\" \"F.Paste\" \"F.Mask\"))\n  (pad \"2\" smd roundrect (layers \"F.Cu\" \"F.Paste\" \"F.Mask\")))\n";

    const DFN: &str = r#"(footprint "DFN-2-1EP" (layer "F.Cu")
  (pad "1" smd rect (at -1 0) (size 0.5 0.5) (layers "F.Cu" "F.Paste" "F.Mask"))
  (pad "2" smd rect (at 1 0) (size 0.5 0.5) (layers "F.Cu" "F.Paste" "F.Mask"))
  (pad "3" smd rect (at 0 0) (size 1.5 1.5) (layers "F.Cu" "F.Mask"))
)
"#;

    const PIN: &str = "(footprint \"Pin_1x01\" (pad \"1\" thru_hole rect (layers \"*.Cu\" \"*.Mask\")))\n";

    fn board() -> Board {
        Board::parse(Path::new("t.kicad_pcb"), BOARD).unwrap()
    }

    fn write_definition(root: &Path, lib: &str, name: &str, content: &str) {
        let pretty = root.join(format!("{}.pretty", lib));
        fs::create_dir_all(&pretty).unwrap();
        fs::write(pretty.join(format!("{}.kicad_mod", name)), content).unwrap();
    }

    fn full_library(root: &Path) -> FootprintLibrary {
        write_definition(root, "Resistor_SMD", "R_0603", R0603);
        write_definition(root, "Package_DFN", "DFN-2-1EP", DFN);
        write_definition(root, "Connector", "Pin_1x01", PIN);
        FootprintLibrary::new(vec![root.to_path_buf()])
    }

    fn footprint<'a>(board: &'a Board, reference: &str) -> &'a SExp {
        board
            .footprints()
            .map(|(_, fp)| fp)
            .find(|fp| designator(fp) == Some(reference))
            .unwrap()
    }

    fn paste_pads(board: &Board, reference: &str) -> usize {
        pads(footprint(board, reference))
            .filter(|pad| pad_has_paste(pad))
            .count()
    }

    fn layers_of(board: &Board, reference: &str) -> Vec<Vec<String>> {
        pads(footprint(board, reference))
            .map(|pad| pad_layers(pad).into_iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_remove_only_touches_dnp() {
        let mut board = board();
        let states = DnpStates::from_board(&board);
        let summary = remove_dnp_paste(&mut board, &states);

        assert_eq!(summary, PasteSummary { footprints: 3, pads: 6, skipped: 0 });
        for reference in ["R1", "R2", "U2", "J1"] {
            assert_eq!(paste_pads(&board, reference), 0, "{}", reference);
        }
        assert_eq!(paste_pads(&board, "C26"), 2);

        let again = remove_dnp_paste(&mut board, &states);
        assert_eq!(again, PasteSummary::default());
    }

    #[test]
    fn test_restore_from_definitions_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let mut board = board();
        let original = board.file().render();
        let states = DnpStates::from_board(&board);
        let mut nominal = LibraryPaste::new(full_library(dir.path()));

        let removed = remove_dnp_paste(&mut board, &states);
        let restored = restore_dnp_paste(&mut board, &states, &mut nominal);

        assert_eq!(restored, removed);
        assert_eq!(paste_pads(&board, "U2"), 2, "exposed pad stays without paste");
        assert_eq!(paste_pads(&board, "J1"), 0);
        assert_eq!(board.file().render(), original);

        let again = restore_dnp_paste(&mut board, &states, &mut nominal);
        assert_eq!(again.pads, 0);
    }

    #[test]
    fn test_unresolved_footprints_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut board = board();
        let states = DnpStates::from_board(&board);
        let mut nominal = LibraryPaste::new(FootprintLibrary::new(vec![dir.path().to_path_buf()]));

        remove_dnp_paste(&mut board, &states);
        let stripped = board.file().render();
        let summary = restore_dnp_paste(&mut board, &states, &mut nominal);

        assert_eq!(summary, PasteSummary { footprints: 0, pads: 0, skipped: 8 });
        assert_eq!(board.file().render(), stripped, "nothing is guessed");
        assert_eq!(paste_pads(&board, "C26"), 2);
    }

    #[test]
    fn test_apertures_exposed_pads_and_fiducials_round_trip() {
        let project = tempfile::tempdir().unwrap();
        let custom = project.path().join("lib");
        write_definition(
            &custom,
            "Custom",
            "QFN-EP",
            "(footprint \"QFN-EP\" (layer \"F.Cu\")\n  (pad \"1\" smd rect (layers \"F.Cu\" \"F.Paste\" \"F.Mask\"))\n  (pad \"2\" smd rect (layers \"F.Cu\" \"F.Mask\"))\n  (pad \"\" smd rect (layers \"F.Paste\")))\n",
        );
        write_definition(
            &custom,
            "Custom",
            "Fiducial",
            "(footprint \"Fiducial\" (layer \"F.Cu\")\n  (pad \"\" smd circle (layers \"F.Cu\" \"F.Mask\")))\n",
        );
        fs::write(
            project.path().join(LIB_TABLE),
            "(fp_lib_table\n  (version 7)\n  (lib (name \"Local\")(type \"KiCad\")(uri \"${KIPRJMOD}/lib/Custom.pretty\")(options \"\")(descr \"\"))\n)\n",
        )
        .unwrap();

        let text = r#"(kicad_pcb (version 20240108)
  (footprint "Local:QFN-EP" (layer "F.Cu") (property "Reference" "U5") (attr smd exclude_from_pos_files exclude_from_bom)
    (pad "1" smd rect (at -1 0) (size 0.5 0.5) (layers "F.Cu" "F.Paste" "F.Mask"))
    (pad "2" smd rect (at 0 0) (size 1.5 1.5) (layers "F.Cu" "F.Mask"))
    (pad "" smd rect (at 0 0) (size 0.6 0.6) (layers "F.Paste")))
  (footprint "Local:Fiducial" (layer "F.Cu") (property "Reference" "FID1") (attr smd exclude_from_pos_files exclude_from_bom)
    (pad "" smd circle (at 0 0) (size 1 1) (layers "F.Cu" "F.Mask")))
)
"#;
        let mut board = Board::parse(&project.path().join("t.kicad_pcb"), text).unwrap();
        let original = board.file().render();
        let states = DnpStates::from_board(&board);
        let u5 = layers_of(&board, "U5");
        let fid = layers_of(&board, "FID1");

        let removed = remove_dnp_paste(&mut board, &states);
        assert_eq!(removed, PasteSummary { footprints: 1, pads: 1, skipped: 1 });
        assert_eq!(layers_of(&board, "U5")[2], vec!["F.Paste"], "aperture keeps its only layer");

        let library = FootprintLibrary::for_project(project.path(), vec![]);
        restore_dnp_paste(&mut board, &states, &mut LibraryPaste::new(library));

        assert_eq!(layers_of(&board, "U5"), u5);
        assert_eq!(layers_of(&board, "FID1"), fid);
        assert_eq!(board.file().render(), original);
    }

    #[test]
    fn test_library_paste_mirrors_back_side() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "Resistor_SMD", "R_0603", R0603);

        let board = board();
        let mut nominal = LibraryPaste::new(FootprintLibrary::new(vec![dir.path().to_path_buf()]));
        assert_eq!(
            nominal.paste_layers(footprint(&board, "R2")),
            Some(vec![vec!["B.Paste".to_string()], vec!["B.Paste".to_string()]])
        );
    }

    #[test]
    fn test_mismatched_definition_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(
            dir.path(),
            "Package_DFN",
            "DFN-2-1EP",
            "(footprint \"DFN-2-1EP\" (pad \"1\" smd rect (layers \"F.Cu\" \"F.Mask\")))\n",
        );
        write_definition(
            dir.path(),
            "Resistor_SMD",
            "R_0603",
            "(footprint \"R_0603\" (pad \"A\" smd rect (layers \"F.Cu\" \"F.Paste\")) (pad \"K\" smd rect (layers \"F.Cu\" \"F.Paste\")))\n",
        );

        let board = board();
        let mut nominal = LibraryPaste::new(FootprintLibrary::new(vec![dir.path().to_path_buf()]));
        assert_eq!(nominal.paste_layers(footprint(&board, "U2")), None, "pad count differs");
        assert_eq!(nominal.paste_layers(footprint(&board, "R1")), None, "pad numbers differ");
    }
}
