//! effgraph CLI - inspect and evaluate serialized programs
//!
//! Programs are the JSON written by `Program::to_json`. Evaluation uses the
//! standard plugins plus the `store` plugin over an in-memory store.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use effgraph::plugins::store::{self, MemoryStore};
use effgraph::{EvalConfig, MockHandler, PluginSet, Program, Value};
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "effgraph")]
#[command(about = "Inspect and evaluate effgraph programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a program's hash, plugins, nodes and statements
    Inspect {
        /// Program JSON file
        program: PathBuf,
    },

    /// Evaluate a program
    Run {
        /// Program JSON file
        program: PathBuf,

        /// Input value as JSON
        #[arg(long, default_value = "null")]
        input: String,

        /// Evaluation config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seed rows for the in-memory store: `{"table": [row, ...]}`
        #[arg(long)]
        tables: Option<PathBuf>,

        /// Canned effect responses: `{"tag": value}`
        #[arg(long)]
        effects: Option<PathBuf>,

        /// Print cache statistics after the result
        #[arg(long)]
        stats: bool,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { program } => {
            let program = load_program(&program)?;
            println!("hash:       {}", program.hash);
            println!("plugins:    {}", program.plugins.join(", "));
            println!("nodes:      {}", program.len());
            println!("statements: {}", program.statements.len());
            for id in &program.statements {
                if let Some(node) = program.node(*id) {
                    println!("  {} {}", id, node.kind);
                }
            }
            println!("kinds:");
            for (kind, count) in program.kind_histogram() {
                println!("  {:<20} {}", kind, count);
            }
        }

        Commands::Run {
            program,
            input,
            config,
            tables,
            effects,
            stats,
        } => {
            let program = load_program(&program)?;
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input is not valid JSON")?;
            let config = match config {
                Some(path) => EvalConfig::load(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                None => EvalConfig::default(),
            };

            let mut memory = MemoryStore::new();
            if let Some(path) = tables {
                for (table, rows) in read_json_object(&path)? {
                    let rows = match Value::from(rows) {
                        Value::List(rows) => rows,
                        _ => bail!("table '{}' in {} is not a list", table, path.display()),
                    };
                    memory = memory.with_rows(&table, rows);
                }
            }
            let mut handler = MockHandler::new();
            if let Some(path) = effects {
                for (tag, response) in read_json_object(&path)? {
                    handler = handler.respond(&tag, Value::from(response));
                }
            }

            let plugins = PluginSet::standard()?.with(store::plugin(Rc::new(memory)))?;
            let known = plugins.names();
            for name in &program.plugins {
                if !known.contains(&name.as_str()) {
                    tracing::warn!(
                        plugin = %name,
                        "program uses a plugin this CLI does not provide"
                    );
                }
            }

            let interpreter = plugins
                .interpreter()?
                .with_config(config)
                .with_handler(Rc::new(handler));
            let report = interpreter.evaluate(&program, Value::from(input));
            if stats {
                eprintln!(
                    "visits: {}  hits: {}  tainted: {}",
                    report.stats.visits, report.stats.hits, report.stats.tainted
                );
            }
            match report.outcome {
                Ok(value) => {
                    let json = serde_json::Value::from(value);
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                Err(fault) => bail!("evaluation failed: {}", fault),
            }
        }
    }

    Ok(())
}

fn load_program(path: &Path) -> Result<Program> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Program::from_json(&text).with_context(|| format!("{} is not a program", path.display()))
}

fn read_json_object(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str(&text)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("{} must contain a JSON object", path.display()),
    }
}
