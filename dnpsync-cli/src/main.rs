//! dnpsync CLI - DNP consistency for KiCad projects from the command line.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use dnpsync::{
    validate_project, DnpSyncCore, KicadCli, KicadProject, Mode, PasteAction, RunOptions,
    RunOutcome, ValidationError,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_MALFORMED: i32 = 1;
const EXIT_FATAL: i32 = 2;
const EXIT_VALIDATION: i32 = 3;

#[derive(Parser)]
#[command(name = "dnpsync")]
#[command(about = "Keep DNP state consistent across KiCad schematics and boards", long_about = None)]
#[command(version)]
struct Cli {
    /// Log every changed symbol and footprint
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check and normalize DNP fields (`-rp`/`-sp` are accepted for the paste flags)
    Dnp {
        /// Project directory
        #[arg(long, value_name = "DIR", default_value = ".")]
        project: PathBuf,

        /// Only list components with malformed DNP fields
        #[arg(short, long)]
        list: bool,

        /// Remove solder paste from DNP footprints
        #[arg(long, conflicts_with = "restore_dnp_paste")]
        remove_dnp_paste: bool,

        /// Restore solder paste on DNP footprints
        #[arg(long)]
        restore_dnp_paste: bool,

        /// Extra footprint library directory for restoring paste, searched before
        /// the project's fp-lib-table (repeatable)
        #[arg(long = "footprint-lib", value_name = "DIR")]
        footprint_libs: Vec<PathBuf>,

        /// Compute changes without writing any file
        #[arg(long)]
        dry_run: bool,

        /// Run kicad-cli on the project after writing
        #[arg(long)]
        verify: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },

    /// Check that KiCad opens the project's schematic and board
    Verify {
        /// Project directory
        #[arg(long, value_name = "DIR", default_value = ".")]
        project: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for scripts
    Json,
}

/// Options whose next argument is their value.
const VALUE_OPTIONS: [&str; 4] = ["--project", "--footprint-lib", "--format", "-f"];

/// Maps the two-letter paste shorthands onto their long flags. An argument that
/// is the value of the preceding option is passed through as is.
fn expand_aliases<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    let mut expanded = Vec::new();
    let mut is_value = false;
    for arg in args {
        let arg = match arg.to_str() {
            Some("-rp") if !is_value => OsString::from("--remove-dnp-paste"),
            Some("-sp") if !is_value => OsString::from("--restore-dnp-paste"),
            _ => arg,
        };
        is_value = !is_value && arg.to_str().map_or(false, |a| VALUE_OPTIONS.contains(&a));
        expanded.push(arg);
    }
    expanded
}

fn init_tracing(verbose: bool, quiet: bool) {
    let filter = match (verbose, quiet) {
        (true, _) => EnvFilter::new("debug"),
        (_, true) => EnvFilter::new("warn"),
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse_from(expand_aliases(std::env::args_os()));
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Dnp {
            project,
            list,
            remove_dnp_paste,
            restore_dnp_paste,
            footprint_libs,
            dry_run,
            verify,
            format,
        } => {
            let paste = match (remove_dnp_paste, restore_dnp_paste) {
                (true, _) => Some(PasteAction::Remove),
                (_, true) => Some(PasteAction::Restore),
                _ => None,
            };
            let options = RunOptions {
                mode: if list { Mode::List } else { Mode::Reconcile },
                paste,
                footprint_libs,
                dry_run,
            };
            handle_dnp(&project, &options, verify, &format)
        }
        Commands::Verify { project } => handle_verify(&project),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if is_validation_failure(&e) {
                EXIT_VALIDATION
            } else {
                EXIT_FATAL
            }
        }
    };

    process::exit(exit_code);
}

fn is_validation_failure(error: &anyhow::Error) -> bool {
    error.downcast_ref::<ValidationError>().is_some()
        || matches!(
            error.downcast_ref::<dnpsync::DnpSyncError>(),
            Some(dnpsync::DnpSyncError::Validation(_))
        )
}

fn discover(dir: &Path) -> anyhow::Result<KicadProject> {
    KicadProject::discover(dir)
        .with_context(|| format!("Cannot open KiCad project in {}", dir.display()))
}

fn handle_dnp(
    dir: &Path,
    options: &RunOptions,
    verify: bool,
    format: &OutputFormat,
) -> anyhow::Result<i32> {
    let project = discover(dir)?;
    let outcome = DnpSyncCore::run(&project, options)
        .with_context(|| format!("DNP run on {} failed", project.name))?;

    output_outcome(&outcome, format)?;

    if verify && options.mode == Mode::Reconcile && !options.dry_run {
        validate_project(&project, &KicadCli::from_env())
            .with_context(|| format!("KiCad could not open {} after the update", project.name))?;
    }

    if options.mode == Mode::List && outcome.has_malformed() {
        return Ok(EXIT_MALFORMED);
    }
    Ok(EXIT_OK)
}

fn handle_verify(dir: &Path) -> anyhow::Result<i32> {
    let project = discover(dir)?;
    validate_project(&project, &KicadCli::from_env())
        .with_context(|| format!("KiCad could not open {}", project.name))?;
    println!("{} opens cleanly", project.name);
    Ok(EXIT_OK)
}

fn output_outcome(outcome: &RunOutcome, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Human => output_human(outcome),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(outcome).context("Failed to serialize outcome")?
            );
        }
    }
    Ok(())
}

fn output_human(outcome: &RunOutcome) {
    println!("\nProject: {}", outcome.project);
    println!("{}", "─".repeat(60));

    if outcome.report.is_empty() {
        println!("  No malformed DNP properties");
    } else {
        println!("  {}", outcome.report.headline());
        for entry in &outcome.report.entries {
            println!(
                "    - {} {} ({})",
                entry.designator,
                entry.malformation.description(),
                entry.sheet.display()
            );
        }
    }

    if let Some(summary) = &outcome.reconcile {
        println!("\n  Reconciled:");
        println!("    Symbols updated:    {}", summary.symbols_changed);
        println!("    Footprints updated: {}", summary.footprints_changed);
        println!("    DNP components:     {}", summary.dnp_designators.len());
        if !summary.dnp_designators.is_empty() {
            println!("      {}", summary.dnp_designators.join(", "));
        }
        if !summary.schematic_only.is_empty() {
            println!("    Not on the board:   {}", summary.schematic_only.join(", "));
        }
    }

    if let Some(paste) = &outcome.paste {
        println!("\n  Solder paste:");
        println!("    Footprints: {}", paste.footprints);
        println!("    Pads:       {}", paste.pads);
        if paste.skipped > 0 {
            println!("    Skipped:    {} pads", paste.skipped);
        }
    }

    if outcome.mode == Mode::Reconcile {
        let verb = if outcome.dry_run { "Would write" } else { "Wrote" };
        println!();
        if outcome.files.is_empty() {
            println!("  Nothing to write");
        }
        for path in &outcome.files {
            println!("  {} {}", verb, path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_aliases() {
        let args = ["dnpsync", "dnp", "-rp", "-l", "-sp"].map(OsString::from);
        let expanded = expand_aliases(args);
        assert_eq!(
            expanded,
            ["dnpsync", "dnp", "--remove-dnp-paste", "-l", "--restore-dnp-paste"].map(OsString::from)
        );
    }

    #[test]
    fn test_expand_aliases_skips_option_values() {
        let args = ["dnpsync", "dnp", "--project", "-rp", "--footprint-lib", "-sp", "-sp"]
            .map(OsString::from);
        let expanded = expand_aliases(args);
        assert_eq!(
            expanded,
            ["dnpsync", "dnp", "--project", "-rp", "--footprint-lib", "-sp", "--restore-dnp-paste"]
                .map(OsString::from)
        );
    }

    #[test]
    fn test_paste_flags_conflict() {
        let args = expand_aliases(["dnpsync", "dnp", "-rp", "-sp"].map(OsString::from));
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
