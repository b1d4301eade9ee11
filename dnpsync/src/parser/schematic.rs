//! KiCad schematic hierarchy (.kicad_sch).
//!
//! The root sheet is loaded first and every `(sheet ...)` it contains is followed
//! through its `Sheetfile` property. A sheet reused by several sheet instances is
//! loaded once. Placed symbols are the top-level `(symbol (lib_id ...) ...)` items;
//! the library copies nested under `lib_symbols` are not.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::parser::document::{save_all, DocumentError, KicadFile};
use crate::parser::sexp::SExp;

pub const SCHEMATIC_ROOT: &str = "kicad_sch";

/// KiCad 7+ spells it `Sheetfile`, KiCad 6 `Sheet file`.
const SHEET_FILE_PROPERTIES: [&str; 2] = ["Sheetfile", "Sheet file"];

/// Address of a placed symbol: sheet position in load order and item position in
/// that sheet's root list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SymbolId {
    pub sheet: usize,
    pub item: usize,
}

#[derive(Debug, Clone)]
pub struct Schematic {
    sheets: Vec<KicadFile>,
}

impl Schematic {
    /// Loads `root` and all sheets reachable from it.
    pub fn load(root: &Path) -> Result<Self, DocumentError> {
        let mut graph: DiGraph<PathBuf, ()> = DiGraph::new();
        let mut nodes: HashMap<PathBuf, NodeIndex> = HashMap::new();
        let mut sheets = Vec::new();

        let root_node = graph.add_node(root.to_path_buf());
        nodes.insert(sheet_key(root), root_node);
        let mut queue = VecDeque::from([(root.to_path_buf(), root_node)]);

        while let Some((path, node)) = queue.pop_front() {
            let file = KicadFile::load(&path, &[SCHEMATIC_ROOT])?;
            tracing::info!("Loaded schematic sheet {}", path.display());

            let dir = path.parent().unwrap_or_else(|| Path::new(""));
            for name in child_sheet_files(file.root()) {
                let child_path = dir.join(name);
                let key = sheet_key(&child_path);
                let child = match nodes.get(&key) {
                    Some(&existing) => existing,
                    None => {
                        let added = graph.add_node(child_path.clone());
                        nodes.insert(key, added);
                        queue.push_back((child_path, added));
                        added
                    }
                };
                graph.update_edge(node, child, ());
            }
            sheets.push(file);
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(DocumentError::SheetCycle(graph[cycle.node_id()].clone()));
        }

        Ok(Self { sheets })
    }

    /// Builds a single-sheet schematic from already parsed content.
    pub fn parse(path: &Path, content: &str) -> Result<Self, DocumentError> {
        Ok(Self {
            sheets: vec![KicadFile::parse(path, content, &[SCHEMATIC_ROOT])?],
        })
    }

    pub fn sheets(&self) -> &[KicadFile] {
        &self.sheets
    }

    pub fn root_path(&self) -> &Path {
        self.sheets[0].path()
    }

    pub fn sheet_path(&self, id: SymbolId) -> Option<&Path> {
        self.sheets.get(id.sheet).map(|s| s.path())
    }

    /// Placed symbols of every sheet, in sheet and document order.
    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &SExp)> + '_ {
        self.sheets.iter().enumerate().flat_map(|(sheet, file)| {
            file.items()
                .iter()
                .enumerate()
                .filter(|(_, item)| is_placed_symbol(item))
                .map(move |(item, node)| (SymbolId { sheet, item }, node))
        })
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&SExp> {
        self.sheets
            .get(id.sheet)?
            .items()
            .get(id.item)
            .filter(|node| is_placed_symbol(node))
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> Option<&mut SExp> {
        self.sheets
            .get_mut(id.sheet)?
            .root_mut()
            .as_list_mut()?
            .get_mut(id.item)
            .filter(|node| is_placed_symbol(node))
    }

    pub fn is_modified(&self) -> bool {
        self.sheets.iter().any(KicadFile::is_modified)
    }

    /// Writes every modified sheet. Returns the written paths.
    pub fn save(&self) -> Result<Vec<PathBuf>, DocumentError> {
        save_all(&self.sheets)
    }
}

fn is_placed_symbol(item: &SExp) -> bool {
    item.tag() == Some("symbol") && item.find("lib_id").is_some()
}

fn child_sheet_files(root: &SExp) -> Vec<String> {
    root.get_all("sheet")
        .into_iter()
        .filter_map(|sheet| {
            sheet.get_all("property").into_iter().find_map(|prop| {
                let list = prop.as_list()?;
                let name = list.get(1)?.as_atom()?;
                if SHEET_FILE_PROPERTIES.contains(&name) {
                    list.get(2)?.as_atom().map(str::to_string)
                } else {
                    None
                }
            })
        })
        .collect()
}

fn sheet_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const ROOT: &str = r#"(kicad_sch
  (version 20231120)
  (lib_symbols
    (symbol "Device:R" (in_bom yes) (on_board yes)))
  (symbol (lib_id "Device:R") (at 10 10 0) (unit 1)
    (in_bom yes) (on_board yes) (dnp no)
    (property "Reference" "R1" (at 10 8 0)))
  (sheet (at 50 50) (size 20 10)
    (property "Sheetname" "Power" (at 50 49 0))
    (property "Sheetfile" "power.kicad_sch" (at 50 61 0)))
)
"#;

    const POWER: &str = r#"(kicad_sch
  (version 20231120)
  (symbol (lib_id "Device:C") (at 10 10 0) (unit 1)
    (in_bom yes) (on_board yes) (dnp no)
    (property "Reference" "C1" (at 10 8 0)))
)
"#;

    #[test]
    fn test_load_follows_sub_sheets() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("root.kicad_sch"), ROOT).unwrap();
        fs::write(dir.path().join("power.kicad_sch"), POWER).unwrap();

        let sch = Schematic::load(&dir.path().join("root.kicad_sch")).unwrap();
        assert_eq!(sch.sheets().len(), 2);

        let symbols: Vec<_> = sch.symbols().map(|(id, _)| id).collect();
        assert_eq!(
            symbols,
            vec![SymbolId { sheet: 0, item: 3 }, SymbolId { sheet: 1, item: 2 }]
        );
        assert!(sch.symbol(SymbolId { sheet: 0, item: 2 }).is_none(), "lib_symbols is not a placed symbol");
    }

    #[test]
    fn test_missing_sub_sheet_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("root.kicad_sch"), ROOT).unwrap();

        let err = Schematic::load(&dir.path().join("root.kicad_sch")).unwrap_err();
        assert!(matches!(err, DocumentError::Read { .. }));
    }

    #[test]
    fn test_sheet_cycle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("root.kicad_sch"), ROOT).unwrap();
        fs::write(
            dir.path().join("power.kicad_sch"),
            POWER.replace(
                "(version 20231120)",
                "(version 20231120)\n  (sheet (property \"Sheetfile\" \"root.kicad_sch\"))",
            ),
        )
        .unwrap();

        let err = Schematic::load(&dir.path().join("root.kicad_sch")).unwrap_err();
        assert!(matches!(err, DocumentError::SheetCycle(_)));
    }
}
