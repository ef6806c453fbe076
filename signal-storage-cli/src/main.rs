/*!
Signal storage CLI - inspect and edit persisted signal store state.

Works on the same storage a desktop host uses: the file-backed local store in
a directory, or the in-process session store.
*/

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use signal_storage_core::{
    environment::is_noop, observability, provide, resolve, ConfigOverrides, DesktopContext,
    Environment, KeyValueStore, SharedStore, SignalStore, StorageBinder, StorageKind,
};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing::{error, info};

/// Key the counter demo binds its state to
const COUNTER_KEY: &str = "state";

#[derive(Parser)]
#[command(name = "signal-storage")]
#[command(about = "CLI for persisted signal store state")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Storage to operate on
    #[arg(short, long, global = true, value_enum, default_value = "local")]
    storage: StorageType,

    /// Directory holding the local storage document
    #[arg(
        short,
        long,
        global = true,
        env = "SIGNAL_STORAGE_DIR",
        default_value = "./.signal-storage"
    )]
    dir: PathBuf,

    /// Behave like a server render: nothing is read or written
    #[arg(long, global = true, env = "SIGNAL_STORAGE_SERVER")]
    server: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StorageType {
    Local,
    Session,
}

impl From<StorageType> for StorageKind {
    fn from(value: StorageType) -> Self {
        match value {
            StorageType::Local => StorageKind::Local,
            StorageType::Session => StorageKind::Session,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List all stored keys
    List,
    /// Print the record stored under a key
    Show {
        key: String,
        /// Print the raw record instead of pretty JSON
        #[arg(long)]
        raw: bool,
    },
    /// Store a JSON record under a key
    Set { key: String, value: String },
    /// Remove the record stored under a key
    Remove { key: String },
    /// Remove every record
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Increment the demo counter store, persisted under "state"
    Counter {
        #[arg(short, long, default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },
}

#[derive(Tabled)]
struct RecordInfo {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Fields")]
    fields: String,
    #[tabled(rename = "Size")]
    size: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json_logs);

    let environment = create_environment(&cli)?;
    let storage = resolve(cli.storage.into(), &environment);

    match cli.command {
        Commands::List => list_records(&storage),
        Commands::Show { key, raw } => show_record(&storage, &key, raw),
        Commands::Set { key, value } => set_record(&storage, &key, &value),
        Commands::Remove { key } => remove_record(&storage, &key),
        Commands::Clear { force } => clear_records(&storage, force),
        Commands::Counter { by } => run_counter(storage, environment, by),
    }
}

fn init_logging(verbose: bool, json: bool) {
    if let Err(e) = observability::init_observability(json, log_filter(verbose)) {
        eprintln!("Failed to initialize logging: {e}");
    }
}

/// Filter used when `RUST_LOG` is not set
fn log_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

fn create_environment(cli: &Cli) -> Result<Environment, anyhow::Error> {
    if cli.server {
        info!("server mode, storage is inert");
    }

    Environment::detect(cli.server, || DesktopContext::open(&cli.dir))
        .with_context(|| format!("failed to open storage in {}", cli.dir.display()))
}

fn list_records(storage: &SharedStore) -> Result<(), anyhow::Error> {
    if is_noop(storage.as_ref()) {
        println!("No storage available");
        return Ok(());
    }

    let mut records = Vec::new();
    for index in 0..storage.length().max(0) as usize {
        let Some(key) = storage.key(index) else {
            continue;
        };
        let raw = storage.get(&key)?.unwrap_or_default();
        let fields = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map.keys().cloned().collect::<Vec<_>>().join(", "),
            _ => "-".to_string(),
        };
        records.push(RecordInfo {
            key,
            fields,
            size: format_size(raw.len() as u64),
        });
    }

    if records.is_empty() {
        println!("No records found");
    } else {
        println!("{}", Table::new(records));
    }

    Ok(())
}

fn show_record(storage: &SharedStore, key: &str, raw: bool) -> Result<(), anyhow::Error> {
    let Some(record) = storage.get(key)? else {
        error!("No record stored under '{}'", key);
        return Err(anyhow::anyhow!("no record stored under '{key}'"));
    };

    if raw {
        println!("{record}");
        return Ok(());
    }

    match serde_json::from_str::<Value>(&record) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{record}"),
    }
    Ok(())
}

fn set_record(storage: &SharedStore, key: &str, value: &str) -> Result<(), anyhow::Error> {
    let parsed: Value = serde_json::from_str(value).context("value must be valid JSON")?;
    storage.set(key, &serde_json::to_string(&parsed)?)?;
    println!("✓ Stored '{key}'");
    Ok(())
}

fn remove_record(storage: &SharedStore, key: &str) -> Result<(), anyhow::Error> {
    storage.remove(key)?;
    println!("✓ Removed '{key}'");
    Ok(())
}

fn clear_records(storage: &SharedStore, force: bool) -> Result<(), anyhow::Error> {
    if !force {
        print!("Are you sure you want to remove every record? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Clear cancelled");
            return Ok(());
        }
    }

    storage.clear()?;
    println!("✓ Storage cleared");
    Ok(())
}

fn counter_store() -> Result<SignalStore, anyhow::Error> {
    Ok(SignalStore::new(&json!({
        "count": 10,
        "count2": 100,
        "nested": { "myval": 500 }
    }))?)
}

fn run_counter(
    storage: SharedStore,
    environment: Environment,
    by: i64,
) -> Result<(), anyhow::Error> {
    let store = counter_store()?;
    let binding = StorageBinder::new(COUNTER_KEY, provide(storage))
        .config(ConfigOverrides::new().error(|err| error!(error = %err, "counter storage failure")))
        .environment(environment)
        .bind(&store)?;

    if binding.hydrated() {
        info!(fields = ?binding.restored, "counter restored");
    }

    store.update(|state| {
        let count = state["count"].as_i64().unwrap_or_default();
        state["count"] = json!(count + by);
    });

    println!("count = {}", store.field("count").unwrap_or(Value::Null));
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
