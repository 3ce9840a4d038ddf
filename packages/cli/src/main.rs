//! `svcompose` — command-line front end for the composition middleware.
//!
//! - **`validate`** — check that a scenario file is well formed and that
//!   every peer, service and taxonomy reference resolves.
//! - **`detect`** — run collision detection over parameters against a
//!   taxonomy.
//! - **`simulate`** — run a scenario on an in-process network and print the
//!   compositions each search found.
//!
//! Every file argument accepts `-` for stdin.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use svcompose::render::render_collisions;
use svcompose::{detect, BasicTaxonomy, Parameter, TaxonomyDocument};
use svcompose_node::{run_scenario, Scenario, ScenarioReport, SearchMode};

/// svcompose — distributed service composition CLI
#[derive(Parser)]
#[command(name = "svcompose", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a scenario file.
    ///
    /// Exits 0 if the scenario is valid, 1 otherwise.
    Validate {
        /// Path to a JSON scenario, or `-` for stdin.
        file: PathBuf,
    },

    /// Detect collisions introduced by new parameters.
    ///
    /// Parameters use the `I-<concept>` / `O-<concept>` form.
    ///
    /// Example:
    ///   svcompose detect -t taxonomy.json --new O-D --old I-A --new-x-new
    Detect {
        /// Taxonomy document (`{ "root": ..., "parents": { ... } }`).
        #[arg(short = 't', long, value_name = "FILE")]
        taxonomy: PathBuf,

        /// Newly published parameters.
        #[arg(long = "new", value_name = "PARAM", num_args = 1..)]
        new: Vec<String>,

        /// Parameters already known in the overlay.
        #[arg(long = "old", value_name = "PARAM", num_args = 0..)]
        old: Vec<String>,

        /// Also pair new parameters with each other.
        #[arg(long)]
        new_x_new: bool,
    },

    /// Run a scenario and report the compositions found.
    Simulate {
        /// Path to a JSON scenario, or `-` for stdin.
        file: PathBuf,

        /// Override the search mode of the scenario.
        #[arg(short = 'm', long, env = "SVC_SEARCH_MODE")]
        mode: Option<Mode>,

        /// Print the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Forward,
    Backward,
    Bidirectional,
}

impl From<Mode> for SearchMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Forward => SearchMode::Forward,
            Mode::Backward => SearchMode::Backward,
            Mode::Bidirectional => SearchMode::Bidirectional,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "svcompose_node=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { file } => {
            let scenario = parse_scenario(&read_input(&file));
            match scenario.validate() {
                Ok(()) => println!(
                    "ok: {} peers, {} services, {} searches",
                    scenario.peers.len(),
                    scenario.services.len(),
                    scenario.searches.len()
                ),
                Err(e) => {
                    eprintln!("error: {}", e);
                    process::exit(1);
                }
            }
        }

        Command::Detect {
            taxonomy,
            new,
            old,
            new_x_new,
        } => {
            let doc: TaxonomyDocument = serde_json::from_str(&read_input(&taxonomy))
                .unwrap_or_else(|e| fatal(&format!("failed to parse taxonomy: {}", e)));
            let taxonomy = BasicTaxonomy::from_document(doc)
                .unwrap_or_else(|e| fatal(&format!("invalid taxonomy: {}", e)));
            let new = parse_parameters(&new);
            let mut all = parse_parameters(&old);
            all.extend(new.iter().cloned());
            let collisions = detect(&new, &all, new_x_new, &taxonomy);
            print!("{}", render_collisions(&collisions));
        }

        Command::Simulate { file, mode, json } => {
            let mut scenario = parse_scenario(&read_input(&file));
            if let Some(mode) = mode {
                scenario.mode = mode.into();
            }
            let runtime = tokio::runtime::Runtime::new()
                .unwrap_or_else(|e| fatal(&format!("failed to start runtime: {}", e)));
            let report = runtime
                .block_on(run_scenario(&scenario))
                .unwrap_or_else(|e| fatal(&e.to_string()));
            if json {
                let text = serde_json::to_string_pretty(&report)
                    .unwrap_or_else(|e| fatal(&format!("failed to serialise report: {}", e)));
                println!("{}", text);
            } else {
                print!("{}", render_report(&report));
            }
            if report.total_found() == 0 {
                process::exit(1);
            }
        }
    }
}

/// Read the full contents of a file, or stdin when the path is `"-"`.
fn read_input(path: &PathBuf) -> String {
    if path.to_str() == Some("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .unwrap_or_else(|e| fatal(&format!("failed to read stdin: {}", e)));
        buf
    } else {
        fs::read_to_string(path).unwrap_or_else(|e| {
            fatal(&format!("failed to read {}: {}", path.display(), e))
        })
    }
}

fn parse_scenario(json: &str) -> Scenario {
    Scenario::from_json(json).unwrap_or_else(|e| fatal(&format!("failed to parse scenario: {}", e)))
}

fn parse_parameters(raw: &[String]) -> BTreeSet<Parameter> {
    raw.iter()
        .map(|s| {
            s.parse::<Parameter>()
                .unwrap_or_else(|e| fatal(&format!("bad parameter {:?}: {}", s, e)))
        })
        .collect()
}

fn render_report(report: &ScenarioReport) -> String {
    let mut out = format!("mode: {}\n", report.mode);
    for search in &report.searches {
        out.push_str(&format!(
            "search {} ({} on {}): {} found",
            search.search,
            search.target,
            search.peer,
            search.found.len()
        ));
        for (flag, label) in [
            (search.expired, "expired"),
            (search.lost, "lost"),
            (search.modified, "modified"),
        ] {
            if flag {
                out.push_str(&format!(", {}", label));
            }
        }
        out.push('\n');
        for found in &search.found {
            out.push_str(&format!("  {} hops: {}\n", found.hops, found.services.join(" ")));
        }
    }
    out
}

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("svcompose: {}", msg);
    process::exit(2);
}
