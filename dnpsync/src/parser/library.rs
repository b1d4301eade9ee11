//! Footprint library lookup (.pretty directories of .kicad_mod files)
//!
//! Libraries are found the way KiCad finds them for a project: nicknames from the
//! project's `fp-lib-table`, then any directories given by the caller, then the
//! stock library root named by
//! `KICAD8_FOOTPRINT_DIR` (or its KiCad 7/6 spelling).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::parser::document::{DocumentError, KicadFile};
use crate::parser::sexp::SExp;

const FOOTPRINT_ROOTS: [&str; 2] = ["footprint", "module"];

pub const LIB_TABLE: &str = "fp-lib-table";
const LIB_TABLE_ROOT: &str = "fp_lib_table";
const PROJECT_VAR: &str = "KIPRJMOD";

/// Stock footprint roots, newest KiCad first.
pub const FOOTPRINT_DIR_VARS: [&str; 3] = [
    "KICAD8_FOOTPRINT_DIR",
    "KICAD7_FOOTPRINT_DIR",
    "KICAD6_FOOTPRINT_DIR",
];

/// Resolves `Library:Name` footprint ids.
///
/// A nickname listed in the project's library table wins. Otherwise each search
/// directory may either contain `Library.pretty/` folders or be a `.pretty` folder
/// itself. Definitions are parsed once per run.
#[derive(Debug, Default)]
pub struct FootprintLibrary {
    dirs: Vec<PathBuf>,
    nicknames: HashMap<String, PathBuf>,
    cache: HashMap<String, Option<SExp>>,
}

impl FootprintLibrary {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            cache: HashMap::new(),
            nicknames: HashMap::new(),
        }
    }

    /// Libraries of the project in `project_dir`: the project's `fp-lib-table`
    /// first, then `extra_dirs`, then the stock libraries from the environment.
    pub fn for_project(project_dir: &Path, extra_dirs: Vec<PathBuf>) -> Self {
        Self::with_lookup(project_dir, extra_dirs, &|name| std::env::var(name).ok())
    }

    /// Same as [`FootprintLibrary::for_project`] with variables read from `lookup`.
    pub fn with_lookup(
        project_dir: &Path,
        extra_dirs: Vec<PathBuf>,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let mut library = Self::new(extra_dirs);

        let table = project_dir.join(LIB_TABLE);
        if table.is_file() {
            match load_lib_table(&table, project_dir, lookup) {
                Ok(nicknames) => {
                    tracing::debug!("{} lists {} footprint libraries", table.display(), nicknames.len());
                    library.nicknames = nicknames;
                }
                Err(e) => tracing::warn!("Ignoring footprint library table: {}", e),
            }
        }

        if let Some(stock) = FOOTPRINT_DIR_VARS.iter().find_map(|var| lookup(var)) {
            library.dirs.push(PathBuf::from(stock));
        }
        library
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Directory of a nickname from the project's library table.
    pub fn nickname(&self, lib: &str) -> Option<&Path> {
        self.nicknames.get(lib).map(PathBuf::as_path)
    }

    /// Nominal definition of `lib_id`, or `None` when no library has it.
    /// An unreadable definition is logged and treated as missing.
    pub fn definition(&mut self, lib_id: &str) -> Option<&SExp> {
        if !self.cache.contains_key(lib_id) {
            let loaded = self.load(lib_id);
            self.cache.insert(lib_id.to_string(), loaded);
        }
        self.cache.get(lib_id).and_then(Option::as_ref)
    }

    fn load(&self, lib_id: &str) -> Option<SExp> {
        let path = self.candidates(lib_id).into_iter().find(|p| p.is_file())?;
        match KicadFile::load(&path, &FOOTPRINT_ROOTS) {
            Ok(file) => {
                tracing::debug!("Loaded footprint definition {}", path.display());
                Some(file.root().clone())
            }
            Err(e) => {
                tracing::warn!("Ignoring footprint definition {}: {}", path.display(), e);
                None
            }
        }
    }

    fn candidates(&self, lib_id: &str) -> Vec<PathBuf> {
        let (lib, name) = match lib_id.split_once(':') {
            Some((lib, name)) => (Some(lib), name),
            None => (None, lib_id),
        };
        let file_name = format!("{}.kicad_mod", name);

        let mut paths = Vec::new();
        if let Some(dir) = lib.and_then(|lib| self.nickname(lib)) {
            paths.push(dir.join(&file_name));
        }
        for dir in &self.dirs {
            match lib {
                Some(lib) => {
                    let pretty = format!("{}.pretty", lib);
                    paths.push(dir.join(&pretty).join(&file_name));
                    if dir_name(dir) == Some(pretty.as_str()) {
                        paths.push(dir.join(&file_name));
                    }
                }
                None => paths.push(dir.join(&file_name)),
            }
        }
        paths
    }
}

/// Reads the `(lib (name ..) (type KiCad) (uri ..))` entries of a footprint library
/// table. URIs may use `${KIPRJMOD}` and any variable `lookup` knows; entries that
/// cannot be resolved are skipped.
pub fn load_lib_table(
    path: &Path,
    project_dir: &Path,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<HashMap<String, PathBuf>, DocumentError> {
    let file = KicadFile::load(path, &[LIB_TABLE_ROOT])?;
    let vars = |name: &str| {
        if name == PROJECT_VAR {
            Some(project_dir.to_string_lossy().into_owned())
        } else {
            lookup(name)
        }
    };

    let mut nicknames = HashMap::new();
    for lib in file.root().get_all("lib") {
        let (Some(name), Some(uri)) = (lib.value_of("name"), lib.value_of("uri")) else {
            continue;
        };
        if !lib.value_of("type").map_or(true, |t| t.eq_ignore_ascii_case("kicad")) {
            tracing::debug!("Skipping non-KiCad footprint library {}", name);
            continue;
        }
        let Some(expanded) = expand_vars(uri, &vars) else {
            tracing::warn!("Cannot resolve footprint library {} ({})", name, uri);
            continue;
        };
        let dir = PathBuf::from(expanded);
        let dir = if dir.is_relative() { project_dir.join(dir) } else { dir };
        nicknames.insert(name.to_string(), dir);
    }
    Ok(nicknames)
}

/// Substitutes `${VAR}` and `$(VAR)`. `None` when a variable is unknown.
fn expand_vars(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Option<String> {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let close = match after.chars().next() {
            Some('{') => '}',
            Some('(') => ')',
            _ => {
                out.push('$');
                rest = after;
                continue;
            }
        };
        let end = after.find(close)?;
        out.push_str(&lookup(&after[1..end])?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn dir_name(dir: &Path) -> Option<&str> {
    dir.file_name().and_then(|n| n.to_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const R0603: &str = "(footprint \"R_0603\" (layer \"F.Cu\")\n  (pad \"1\" smd rect (layers \"F.Cu\" \"F.Paste\" \"F.Mask\")))\n";

    fn no_vars(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_resolves_pretty_folders() {
        let dir = tempfile::tempdir().unwrap();
        let pretty = dir.path().join("Resistor_SMD.pretty");
        fs::create_dir(&pretty).unwrap();
        fs::write(pretty.join("R_0603.kicad_mod"), R0603).unwrap();

        let mut from_parent = FootprintLibrary::new(vec![dir.path().to_path_buf()]);
        assert!(from_parent.definition("Resistor_SMD:R_0603").is_some());
        assert!(from_parent.definition("Resistor_SMD:R_0805").is_none());

        let mut from_pretty = FootprintLibrary::new(vec![pretty]);
        let def = from_pretty.definition("Resistor_SMD:R_0603").unwrap();
        assert_eq!(def.tag(), Some("footprint"));
    }

    #[test]
    fn test_broken_definition_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Broken.kicad_mod"), "(footprint \"Broken\"").unwrap();

        let mut lib = FootprintLibrary::new(vec![dir.path().to_path_buf()]);
        assert!(lib.definition("Broken").is_none());
    }

    #[test]
    fn test_project_lib_table() {
        let dir = tempfile::tempdir().unwrap();
        let pretty = dir.path().join("footprints").join("Parts.pretty");
        fs::create_dir_all(&pretty).unwrap();
        fs::write(pretty.join("R_0603.kicad_mod"), R0603).unwrap();
        fs::write(
            dir.path().join(LIB_TABLE),
            "(fp_lib_table\n  (version 7)\n  (lib (name \"Resistor_SMD\")(type \"KiCad\")(uri \"${KIPRJMOD}/footprints/Parts.pretty\")(options \"\")(descr \"\"))\n  (lib (name \"Vendor\")(type \"KiCad\")(uri \"${VENDOR_LIBS}/Vendor.pretty\")(options \"\")(descr \"\"))\n)\n",
        )
        .unwrap();

        let mut lib = FootprintLibrary::with_lookup(dir.path(), vec![], &no_vars);
        assert_eq!(lib.nickname("Resistor_SMD"), Some(pretty.as_path()));
        assert!(lib.nickname("Vendor").is_none(), "unknown variable");
        assert!(lib.definition("Resistor_SMD:R_0603").is_some());
    }

    #[test]
    fn test_stock_dir_from_environment() {
        let stock = tempfile::tempdir().unwrap();
        let pretty = stock.path().join("Resistor_SMD.pretty");
        fs::create_dir(&pretty).unwrap();
        fs::write(pretty.join("R_0603.kicad_mod"), R0603).unwrap();
        let project = tempfile::tempdir().unwrap();

        let root = stock.path().to_string_lossy().into_owned();
        let lookup = move |name: &str| (name == "KICAD7_FOOTPRINT_DIR").then(|| root.clone());
        let mut lib = FootprintLibrary::with_lookup(project.path(), vec![], &lookup);

        assert_eq!(lib.dirs(), [stock.path().to_path_buf()]);
        assert!(lib.definition("Resistor_SMD:R_0603").is_some());
    }

    #[test]
    fn test_expand_vars() {
        let lookup = |name: &str| (name == "LIBS").then(|| "/opt/libs".to_string());
        assert_eq!(expand_vars("${LIBS}/A.pretty", &lookup).as_deref(), Some("/opt/libs/A.pretty"));
        assert_eq!(expand_vars("$(LIBS)/A.pretty", &lookup).as_deref(), Some("/opt/libs/A.pretty"));
        assert_eq!(expand_vars("plain/A.pretty", &lookup).as_deref(), Some("plain/A.pretty"));
        assert_eq!(expand_vars("${OTHER}/A.pretty", &lookup), None);
    }
}
