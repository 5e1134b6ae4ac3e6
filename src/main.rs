//! Production Planner
//!
//! Command-line front end for the production chain resolver.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use tracing_subscriber::EnvFilter;

use production_planner::db::{self, SqliteCatalog};
use production_planner::{
    CancelToken, Catalog, PlanLine, ResolveOptions, RetryingCatalog, extract, report, resolve_plan,
    resolve_with, sample,
};

#[derive(Parser)]
#[command(name = "production-planner")]
#[command(about = "Production chain planner for factory games")]
struct Cli {
    /// Path to the SQLite catalog database
    #[arg(short, long, env = "PLANNER_DATABASE", default_value = "planner.db")]
    database: PathBuf,

    /// Attempts per catalog lookup before giving up on a busy database
    #[arg(long, default_value = "3")]
    retries: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ResolveArgs {
    /// Print the resolved tree as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Abort the calculation after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Resolve recipe inputs one after another instead of in parallel
    #[arg(long)]
    sequential: bool,
}

impl ResolveArgs {
    fn options(&self) -> ResolveOptions {
        let mut cancel = CancelToken::new();
        if let Some(ms) = self.timeout_ms {
            cancel = cancel.with_timeout(Duration::from_millis(ms));
        }
        ResolveOptions {
            parallel: !self.sequential,
            cancel,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Extract catalog data from the game's Docs.json dataset
    Extract {
        /// Dataset file, or directory to search for datasets
        source: PathBuf,

        /// Replace existing data instead of merging into it
        #[arg(long)]
        clear: bool,
    },

    /// Calculate the production chain for a target item
    Calc {
        /// Target item id (e.g. "IronPlate")
        item: String,

        /// Target production rate per minute
        #[arg(short, long, default_value = "1.0")]
        rate: f64,

        /// Show the full production tree
        #[arg(short, long)]
        verbose: bool,

        #[command(flatten)]
        resolve: ResolveArgs,
    },

    /// Calculate several targets at once, one tree per ITEM=RATE line
    Plan {
        #[arg(required = true, value_parser = parse_plan_line)]
        lines: Vec<PlanLine>,

        #[command(flatten)]
        resolve: ResolveArgs,
    },

    /// List all producible items
    Items,

    /// List all machines
    Machines,

    /// Show the standard recipe for an item
    Recipe {
        /// Item id
        item: String,
    },

    /// Initialize empty database with schema
    Init,

    /// Load sample data for testing (without a game dataset)
    LoadSample,
}

fn parse_plan_line(s: &str) -> Result<PlanLine, String> {
    let (item, rate) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ITEM=RATE, got '{s}'"))?;
    let rate = rate
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid rate in '{s}': {e}"))?;
    Ok(PlanLine {
        item_id: item.trim().to_string(),
        rate,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let conn = Connection::open(&cli.database)
        .with_context(|| format!("Failed to open {}", cli.database.display()))?;
    db::init_schema(&conn)?;

    match cli.command {
        Commands::Extract { source, clear } => {
            if clear {
                println!("Replacing existing data...");
            }

            let stats = extract::extract_to_database(&conn, &source, clear)?;
            println!("{}", stats);
        }

        Commands::Calc {
            item,
            rate,
            verbose,
            resolve,
        } => {
            let options = resolve.options();
            let catalog = RetryingCatalog::new(SqliteCatalog::new(conn), cli.retries)
                .with_cancel(options.cancel.clone());
            let tree = resolve_with(&item, rate, &catalog, &options)?;

            if resolve.json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                if verbose {
                    println!("Production chain:\n");
                    println!("{}", report::format_production_chain(&tree, 0));
                }
                println!("{}", report::summarize_chain(std::slice::from_ref(&tree)));
            }
        }

        Commands::Plan { lines, resolve } => {
            let options = resolve.options();
            let catalog = RetryingCatalog::new(SqliteCatalog::new(conn), cli.retries)
                .with_cancel(options.cancel.clone());
            let trees = resolve_plan(&lines, &catalog, &options)?;

            if resolve.json {
                println!("{}", serde_json::to_string_pretty(&trees)?);
            } else {
                for tree in &trees {
                    println!("{}", report::format_production_chain(tree, 0));
                }
                println!("{}", report::summarize_chain(&trees));
            }
        }

        Commands::Items => {
            let items = db::list_producible_items(&conn)?;
            if items.is_empty() {
                println!("No items in database. Run 'extract' or 'load-sample' first.");
            } else {
                println!("{:<20} {:<28} {}", "Category", "Item", "Id");
                println!("{}", "-".repeat(72));
                for item in items {
                    println!("{:<20} {:<28} {}", item.category, item.display_name, item.id);
                }
            }
        }

        Commands::Machines => {
            let machines = db::list_machines(&conn)?;
            if machines.is_empty() {
                println!("No machines in database. Run 'extract' or 'load-sample' first.");
            } else {
                for machine in machines {
                    println!("{:<28} {}", machine.display_name, machine.id);
                }
            }
        }

        Commands::Recipe { item } => {
            let catalog = SqliteCatalog::new(conn);
            let Some(recipe) = catalog.standard_recipe(&item)? else {
                bail!("No standard recipe for '{}'", item);
            };

            println!("Recipe: {} ({})", recipe.display_name, recipe.id);
            println!("  Produced in: {}", recipe.produced_in);
            println!("  Outputs:");
            for output in &recipe.outputs {
                let marker = if output.is_standard_recipe { " (standard)" } else { "" };
                println!("    {} @ {}/min{}", output.item_id, output.amount, marker);
            }
            if !recipe.inputs.is_empty() {
                println!("  Inputs:");
                for input in &recipe.inputs {
                    println!("    {} @ {}/min", input.item_id, input.amount);
                }
            }
        }

        Commands::Init => {
            println!("Database initialized at: {}", cli.database.display());
        }

        Commands::LoadSample => {
            let recipes = sample::load_sample_data(&conn)?;
            println!("Loaded {} sample recipes", recipes);
        }
    }

    Ok(())
}
