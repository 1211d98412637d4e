//! PowerStream CLI: inspect how event queries parse and compile.
//!
//! # Commands
//! ```text
//! powerstream parse <query>
//! powerstream sql   <query> [--max-value-text <N>]
//! powerstream eval  <query> --attrs <file.json | ->
//! powerstream info
//! ```

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use powerstream_core::query::CompiledQuery;
use powerstream_core::relational::{RelationalOptions, DEFAULT_MAX_VALUE_TEXT};
use powerstream_service::{init_tracing, ServiceConfig};

mod cmd_eval;

#[derive(Parser)]
#[command(
    name = "powerstream",
    about = "PowerStream CLI: event query tooling",
    long_about = "
PowerStream CLI: parse event queries, show the SQL filter they compile to,
and evaluate them against attribute maps.

ENVIRONMENT VARIABLES (info):
  POSTGRES_HOST, POSTGRES_PORT, POSTGRES_DATABASE, POSTGRES_USER
  POWERSTREAM_SEARCH_BATCH_SIZE, POWERSTREAM_LOG
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query and print its AST as JSON
    Parse {
        query: String,
    },

    /// Compile a query to the archive's SQL filter
    Sql {
        query: String,
        /// Equality literals longer than this are compared by digest
        #[arg(long, default_value_t = DEFAULT_MAX_VALUE_TEXT)]
        max_value_text: usize,
    },

    /// Evaluate a query against an attribute map
    Eval {
        query: String,
        /// JSON object of path → value or [values]; `-` reads stdin
        #[arg(long)]
        attrs: String,
    },

    /// Show the effective service configuration
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&ServiceConfig::from_env().unwrap_or_default().log);

    match cli.command {
        Commands::Parse { query } => cmd_parse(&query),
        Commands::Sql {
            query,
            max_value_text,
        } => cmd_sql(&query, max_value_text),
        Commands::Eval { query, attrs } => cmd_eval::run(&query, &attrs),
        Commands::Info => cmd_info(),
    }
}

/// Parse `query`, rendering a caret diagnostic on failure.
pub(crate) fn compile(query: &str) -> Result<CompiledQuery> {
    CompiledQuery::parse(query).map_err(|e| anyhow!(e.render(query)))
}

// ─── Command implementations ─────────────────────────────────────────────────

fn cmd_parse(query: &str) -> Result<()> {
    let compiled = compile(query)?;
    println!("{}", serde_json::to_string_pretty(&compiled.export())?);
    Ok(())
}

fn cmd_sql(query: &str, max_value_text: usize) -> Result<()> {
    let compiled = compile(query)?;
    let filter = compiled.relational(RelationalOptions { max_value_text })?;
    println!("{}", filter.sql);
    println!();
    for (i, param) in filter.params.iter().enumerate() {
        println!("  ${:<3} {}", i + 1, serde_json::to_string(param)?);
    }
    Ok(())
}

fn cmd_info() -> Result<()> {
    let config = ServiceConfig::from_env()?;
    config.validate()?;
    println!("PowerStream v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
