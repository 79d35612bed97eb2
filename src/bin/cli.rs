//! A thin command-line front end over the dataflow core, for debugging
//! formulas and CSV pipelines from a terminal — ambient developer
//! tooling, not a product surface, grounded on the teacher's
//! `main.rs`/`cli.rs`.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use itertools::Itertools;

use tabular_core::concurrency::Job;
use tabular_core::value::{OrderedSet, Row};
use tabular_core::{mutable, parse_formula, Dataset};

#[derive(Parser)]
#[clap(name = "tabular-cli", about = "Debug formulas and dataset pipelines", version)]
enum Cli {
    /// Parses and evaluates a formula with no row context, e.g. `=Sum(1,2,3)`.
    Eval {
        formula: String,
        /// Argument separator used inside `Name(...)` calls.
        #[arg(long, default_value = ",")]
        separator: String,
        /// Print the parsed expression tree as JSON instead of evaluating it.
        #[arg(long)]
        json: bool,
    },
    /// Loads a CSV file and prints its column list and row count.
    Describe { path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp(None).init();
    let cli = Cli::parse();

    if let Err(error) = run(cli) {
        eprintln!("{error}");
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli {
        Cli::Eval { formula, separator, json } => {
            let separator = separator.chars().next().unwrap_or(',');
            let expr = parse_formula(&formula, separator)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&expr)?);
            } else {
                let row = Row::new(Arc::new(OrderedSet::new()), Vec::new());
                println!("{}", expr.apply(&row, None, None));
            }
        }
        Cli::Describe { path } => {
            let file = File::open(&path)?;
            let dataset = mutable::csv_source(file)?;
            let job = Job::root();
            let summary = dataset.describe(&job)?;
            println!("columns: {}", summary.columns.iter().map(|c| c.as_str()).join(", "));
            println!("rows: {}", summary.row_count);
        }
    }
    Ok(())
}
