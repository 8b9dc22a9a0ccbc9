//! gitsql-import - copy a Git repository into a SQL database
//!
//! This is the command-line entry point for the bulk importer.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use gitsql::db::RepositoryConfig;
use gitsql::import::{ImportOptions, Importer};
use gitsql::storage::SqlRepository;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut database: Option<PathBuf> = None;
    let mut options = ImportOptions::default();
    let mut verbose = false;
    let mut json = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-s" | "--source" => {
                i += 1;
                match args.get(i) {
                    Some(path) => options.source = PathBuf::from(path),
                    None => return usage_error("--source needs a path"),
                }
            }
            "-b" | "--batch" => {
                i += 1;
                match args.get(i).map(|n| n.parse::<usize>()) {
                    Some(Ok(n)) => options.flush_every = n,
                    _ => return usage_error("--batch needs a number"),
                }
            }
            "--keep" => {
                options.recreate = false;
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "--json" => {
                json = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("gitsql-import v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                if arg.starts_with('-') {
                    return usage_error(&format!("Unknown option: {}", arg));
                }
                if database.is_some() {
                    return usage_error(&format!("Unexpected argument: {}", arg));
                }
                database = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let Some(database) = database else {
        return usage_error("missing DATABASE");
    };

    init_logging(verbose);

    match run(database, options, json) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the import was clean.
fn run(database: PathBuf, options: ImportOptions, json: bool) -> Result<bool, Box<dyn std::error::Error>> {
    let repo = SqlRepository::open(RepositoryConfig::new(database))?;
    let report = Importer::new(&repo, options).run()?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report);
        for failure in &report.ref_failures {
            println!("  failed ref {}: {}", failure.name, failure.reason);
        }
        for failure in &report.object_failures {
            println!("  failed object {}: {}", failure.id, failure.reason);
        }
    }

    repo.close()?;
    Ok(report.is_clean())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn usage_error(message: &str) -> ExitCode {
    eprintln!("{}", message);
    eprintln!("Try 'gitsql-import --help' for more information.");
    ExitCode::FAILURE
}

fn print_help() {
    println!("gitsql-import - Copy a Git repository into a SQL database");
    println!();
    println!("Usage: gitsql-import [OPTIONS] <DATABASE>");
    println!();
    println!("Options:");
    println!("  -s, --source PATH      Git repository to import (default: .)");
    println!("  -b, --batch N          Objects per transaction, 0 for one (default: 100)");
    println!("      --keep             Import into existing tables instead of recreating them");
    println!("  -v, --verbose          Enable debug logging");
    println!("      --json             Print the import report as JSON");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Logging honours RUST_LOG. The exit status is 2 if some objects or refs");
    println!("could not be imported.");
    println!();
    println!("Examples:");
    println!("  gitsql-import repo.db                   Import the current directory");
    println!("  gitsql-import -s ../project repo.db     Import another repository");
    println!("  gitsql-import --json repo.db > out.json Save the report");
}
