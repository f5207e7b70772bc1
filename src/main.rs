//! Settings Store - command line front end
//!
//! Reads and edits a persisted settings tree through the reactive store, so
//! every write goes through the same notification path an embedding
//! application would use.
//!
//! # Execution Flow
//!
//! 1. Load `store.yaml` (plus `SETTINGS_STORE__*` overrides) from the data directory
//! 2. Initialize logging → `<log dir>/settings-store.<date>`
//! 3. Load `settings.json` into a [`SettingsStore`]
//! 4. Attach an [`AutoSaver`] so writes are persisted
//! 5. Run the requested command and print the result as JSON

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use settings_store::services::{AutoSaver, load_store};
use settings_store::{APP_NAME, ConfigManager, SettingsStore, VERSION};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "settings-store")]
#[command(version, about = "Read and edit a reactive settings store")]
struct Cli {
    /// Directory holding store.yaml and settings.json
    #[arg(short, long, default_value = "settings-data")]
    config_dir: String,

    /// Also log to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value at a dot-path
    Get { path: String },

    /// Assign a JSON value (bare words are taken as strings) to a dot-path
    Set { path: String, value: String },

    /// Remove the value at a dot-path
    Delete { path: String },

    /// Print the whole settings tree
    Dump,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let mut store_config = config_manager.load_store_config()?;
    store_config.log.console |= cli.verbose;

    let _guard = settings_store::logging::setup_logging(&store_config.log)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let backend = Arc::new(config_manager.settings_backend());
    let empty = Value::Object(Map::new());
    let store = load_store(backend.as_ref(), &empty, store_config.to_options())?;
    let saver = AutoSaver::attach(&store, backend);

    let result = run(&store, cli.command);

    saver.detach();
    store.metrics().log_summary();
    result
}

fn run(store: &SettingsStore, command: Commands) -> Result<()> {
    match command {
        Commands::Get { path } => match store.get_value(&path) {
            Some(value) => print_json(&value)?,
            None => bail!("No value at '{}'", path),
        },
        Commands::Set { path, value } => {
            let value = parse_value(&value);
            let changed = store
                .set(&path, value)
                .with_context(|| format!("Failed to set '{}'", path))?;
            if !changed {
                tracing::info!("'{}' already had that value", path);
            }
        }
        Commands::Delete { path } => {
            let removed = store
                .delete(&path)
                .with_context(|| format!("Failed to delete '{}'", path))?;
            if !removed {
                bail!("No value at '{}'", path);
            }
        }
        Commands::Dump => print_json(&store.plain())?,
    }
    Ok(())
}

/// JSON if it parses, otherwise the raw text as a string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_json(value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to format value")?;
    println!("{}", text);
    Ok(())
}
