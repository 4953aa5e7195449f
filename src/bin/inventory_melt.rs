//! inventory-melt: Flatten a resource inventory into per-type sheets
//!
//! Usage:
//!   # Read a query result from a file, output tagged records to stdout
//!   inventory-melt resources.json
//!
//!   # Read from stdin
//!   az graph query -q "resources" -o json | inventory-melt
//!
//!   # Process NDJSON, write one file per sheet
//!   inventory-melt --ndjson resources.jsonl --output-dir ./inventory
//!
//!   # Take flatten/export settings from a config file
//!   inventory-melt --config inventory.toml resources.json

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use inventory_melt::melt::{SheetWriter, StreamWriter};
use inventory_melt::{melt_records, parse_records, InventoryConfig};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "inventory-melt")]
#[command(about = "Flatten nested resource records into per-type sheets", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Process newline-delimited JSON (one record per line)
    #[arg(long)]
    ndjson: bool,

    /// Output directory for one .jsonl file per sheet
    /// If omitted, writes to stdout as a single stream tagged with the sheet label
    #[arg(long, short = 'o')]
    output_dir: Option<PathBuf>,

    /// TOML config file with [flatten] and [export] sections
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Maximum nesting depth below the record root (default: 64)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Separator for flattened key paths (default: "_")
    #[arg(long)]
    separator: Option<String>,

    /// Log debug diagnostics
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        format!("warn,{}=debug", env!("CARGO_CRATE_NAME"))
    } else {
        String::from("warn")
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Build config
    let mut config = match &args.config {
        Some(path) => InventoryConfig::load(path)?,
        None => InventoryConfig::default(),
    };
    if let Some(depth) = args.max_depth {
        config.flatten.max_depth = depth;
    }
    if let Some(sep) = args.separator {
        config.flatten.separator = sep;
    }
    config.validate()?;

    let content = read_input(args.input.as_ref())?;
    let records = parse_records(content, args.ndjson)?;
    let outcome = melt_records(&records, &config.flatten)?;

    // Output directory from the command line wins over the config file
    let output_dir = args
        .output_dir
        .or_else(|| args.config.as_ref().map(|_| config.export.output_dir.clone()));

    let written = match output_dir {
        Some(dir) => {
            let mut writer = SheetWriter::new(&dir)?;
            let paths = writer.write_sheets(&outcome.sheets)?;
            for path in &paths {
                tracing::debug!(path = %path.display(), "sheet written");
            }
            paths.len()
        }
        None => {
            let mut writer = StreamWriter::new(std::io::stdout().lock());
            writer.write_sheets(&outcome.sheets)?;
            writer.flush()?;
            outcome.sheets.len()
        }
    };

    eprintln!(
        "{} records read, {} flattened, {} malformed, {} without type, {} sheets",
        outcome.read, outcome.flattened, outcome.malformed, outcome.untyped, written
    );

    Ok(())
}

fn read_input(input: Option<&PathBuf>) -> Result<Vec<u8>> {
    let reader = if let Some(file_path) = input {
        let file = File::open(file_path)
            .context(format!("Failed to open input: {}", file_path.display()))?;
        Box::new(BufReader::new(file)) as Box<dyn Read>
    } else {
        Box::new(std::io::stdin()) as Box<dyn Read>
    };

    let mut content = Vec::new();
    BufReader::new(reader)
        .read_to_end(&mut content)
        .context("Failed to read input")?;
    Ok(content)
}
