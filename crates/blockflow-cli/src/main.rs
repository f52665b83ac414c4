//! blockflow command-line tools.
//!
//! Provides the `blockflow` binary for working with saved graph documents
//! outside the editor:
//!
//! - `check`: load a document and report every block that cannot run;
//! - `tags`: print the live type tag table of a document;
//! - `import`: import a function artifact into a `func_source` block;
//! - `export`: write the function reaching a `func_out` block as an artifact.
//!
//! Log output goes to stderr and is filtered through `RUST_LOG` (default `warn`).

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use blockflow_check::validate_graph;
use blockflow_core::{BlockId, FlowGraph};
use blockflow_storage::{
    decompose, export_function, import_artifact, read_document, recompose, write_document,
    FunctionArtifact, StorageError,
};

/// blockflow graph tools.
#[derive(Parser)]
#[command(name = "blockflow", about = "blockflow graph document tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Check that every block of a document can run.
    Check {
        /// Path to the graph document.
        document: PathBuf,
    },

    /// Print the type tags in use by a document.
    Tags {
        /// Path to the graph document.
        document: PathBuf,
    },

    /// Import a function artifact into a func_source block.
    Import {
        /// Path to the graph document; rewritten in place.
        document: PathBuf,

        /// Caption of the func_source block.
        #[arg(short, long)]
        block: String,

        /// Path to the artifact JSON.
        artifact: PathBuf,
    },

    /// Export the function reaching a func_out block.
    Export {
        /// Path to the graph document.
        document: PathBuf,

        /// Caption of the func_out block.
        #[arg(short, long)]
        block: String,

        /// Where to write the artifact JSON (default: stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Exit codes.
const OK: i32 = 0;
const EDIT_FAILED: i32 = 1;
const INVALID: i32 = 2;
const IO_ERROR: i32 = 3;

#[derive(Serialize)]
struct TagEntry<'a> {
    id: i32,
    tag: &'a str,
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Check { document } => run_check(&document),
        Commands::Tags { document } => run_tags(&document),
        Commands::Import {
            document,
            block,
            artifact,
        } => run_import(&document, &block, &artifact),
        Commands::Export {
            document,
            block,
            output,
        } => run_export(&document, &block, output.as_deref()),
    };
    process::exit(exit_code);
}

/// Loads and replays a document, printing the failure on error.
fn load(path: &Path) -> Result<FlowGraph, i32> {
    let document = read_document(path).map_err(|e| {
        eprintln!("Error: failed to read '{}': {}", path.display(), e);
        IO_ERROR
    })?;
    recompose(&document).map_err(|e| {
        eprintln!("Error: failed to load '{}': {}", path.display(), e);
        exit_code_for(&e)
    })
}

fn exit_code_for(error: &StorageError) -> i32 {
    match error {
        StorageError::Io(_) | StorageError::Serialization(_) => IO_ERROR,
        _ => EDIT_FAILED,
    }
}

fn find_block(graph: &FlowGraph, caption: &str) -> Result<BlockId, i32> {
    graph.block_by_caption(caption).ok_or_else(|| {
        eprintln!("Error: no block captioned '{}'", caption);
        EDIT_FAILED
    })
}

fn print_json<T: Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
    println!("{}", json);
}

/// Returns exit code: 0 = valid, 2 = invalid, 3 = I/O or parse error.
fn run_check(path: &Path) -> i32 {
    let graph = match load(path) {
        Ok(graph) => graph,
        Err(code) => return code,
    };
    let diagnostics = validate_graph(&graph);
    print_json(&diagnostics);
    if diagnostics.is_empty() {
        OK
    } else {
        INVALID
    }
}

fn run_tags(path: &Path) -> i32 {
    let graph = match load(path) {
        Ok(graph) => graph,
        Err(code) => return code,
    };
    let entries: Vec<TagEntry> = graph
        .registry()
        .entries()
        .map(|(id, tag)| TagEntry { id: id.0, tag })
        .collect();
    print_json(&entries);
    OK
}

fn run_import(path: &Path, caption: &str, artifact_path: &Path) -> i32 {
    let mut graph = match load(path) {
        Ok(graph) => graph,
        Err(code) => return code,
    };
    let block = match find_block(&graph, caption) {
        Ok(block) => block,
        Err(code) => return code,
    };
    let artifact = match std::fs::read_to_string(artifact_path)
        .map_err(StorageError::from)
        .and_then(|text| FunctionArtifact::from_json(&text))
    {
        Ok(artifact) => artifact,
        Err(e) => {
            eprintln!("Error: failed to read '{}': {}", artifact_path.display(), e);
            return IO_ERROR;
        }
    };

    let signature = match import_artifact(&mut graph, block, &artifact) {
        Ok(signature) => signature,
        Err(e) => {
            eprintln!("Error: import failed: {}", e);
            return exit_code_for(&e);
        }
    };
    tracing::info!(block = %caption, %signature, "imported function");

    if let Err(e) = write_document(path, &decompose(&graph)) {
        eprintln!("Error: failed to write '{}': {}", path.display(), e);
        return IO_ERROR;
    }
    OK
}

fn run_export(path: &Path, caption: &str, output: Option<&Path>) -> i32 {
    let graph = match load(path) {
        Ok(graph) => graph,
        Err(code) => return code,
    };
    let block = match find_block(&graph, caption) {
        Ok(block) => block,
        Err(code) => return code,
    };
    let artifact = match export_function(&graph, block, &path.to_string_lossy()) {
        Ok(artifact) => artifact,
        Err(e) => {
            eprintln!("Error: export failed: {}", e);
            return exit_code_for(&e);
        }
    };

    match output {
        None => {
            print_json(&artifact);
            OK
        }
        Some(target) => match artifact
            .to_json()
            .and_then(|json| std::fs::write(target, json).map_err(StorageError::from))
        {
            Ok(()) => OK,
            Err(e) => {
                eprintln!("Error: failed to write '{}': {}", target.display(), e);
                IO_ERROR
            }
        },
    }
}
