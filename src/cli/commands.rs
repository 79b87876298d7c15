//! CLI command implementations
//!
//! Each invocation opens the store, runs one command and shuts the store
//! down, which flushes whatever the command committed. A command that
//! commits fails if that flush fails.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::adapter::{FlushOutcome, IMAGE_FILE_NAME};
use crate::config::StoreConfig;
use crate::intervention::{self, InterventionDraft, Traces};
use crate::store::Store;

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Main CLI entry point
///
/// Parses arguments, runs the command and prints its JSON response to
/// stdout. This is the only function main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command, &mut io::stdout())
}

/// Run one command and write its response to `out`
pub fn run_command<W: Write>(cmd: Command, out: &mut W) -> CliResult<()> {
    match execute(cmd) {
        Ok(data) => write_response(out, data),
        Err(e) => {
            write_error(out, e.code_str(), e.message())?;
            Err(e)
        }
    }
}

/// Run one command and return its response payload
pub fn execute(cmd: Command) -> CliResult<Value> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Record {
            config,
            station,
            consumption,
            traces,
            notes,
        } => {
            let mut draft = InterventionDraft::new(station)
                .consumption(consumption)
                .traces(Traces::parse(&traces)?);
            if let Some(notes) = notes {
                draft = draft.notes(notes);
            }
            record(&config, &draft)
        }
        Command::List { config, station } => list(&config, station.as_deref()),
        Command::Show { config, id } => show(&config, &id),
        Command::Delete { config, id } => delete(&config, &id),
        Command::Flush { config } => flush(&config),
        Command::Inspect { config } => inspect(&config),
    }
}

fn image_path(config: &StoreConfig) -> PathBuf {
    config.data_dir.join("data").join(IMAGE_FILE_NAME)
}

fn is_initialized(config: &StoreConfig) -> bool {
    image_path(config).exists()
}

/// Load the configuration and open an initialized store
fn open(config_path: &Path) -> CliResult<(StoreConfig, Store)> {
    let config = StoreConfig::load(config_path)?;
    if !is_initialized(&config) {
        return Err(CliError::not_initialized());
    }
    let store = Store::open(&config, intervention::registry()?)?;
    Ok((config, store))
}

/// Create the data directory and the first, empty image
pub fn init(config_path: &Path) -> CliResult<Value> {
    let config = StoreConfig::load(config_path)?;
    if is_initialized(&config) {
        return Err(CliError::already_initialized());
    }

    let store = Store::open(&config, intervention::registry()?)?;
    let app_version = store.working_set().app_version;
    store.shutdown()?;

    Ok(json!({
        "data_dir": config.data_dir.display().to_string(),
        "image": image_path(&config).display().to_string(),
        "app_version": app_version,
    }))
}

pub fn record(config_path: &Path, draft: &InterventionDraft) -> CliResult<Value> {
    let (_, store) = open(config_path)?;
    let saved = intervention::record(&store, draft)?;
    store.shutdown()?;
    Ok(serde_json::to_value(saved)?)
}

pub fn list(config_path: &Path, station: Option<&str>) -> CliResult<Value> {
    let (_, store) = open(config_path)?;
    let found = match station {
        Some(station) => intervention::for_station(&store, station)?,
        None => intervention::all(&store)?,
    };
    Ok(json!({
        "count": found.len(),
        "interventions": serde_json::to_value(found)?,
    }))
}

pub fn show(config_path: &Path, id: &str) -> CliResult<Value> {
    let (_, store) = open(config_path)?;
    Ok(serde_json::to_value(intervention::find(&store, id)?)?)
}

pub fn delete(config_path: &Path, id: &str) -> CliResult<Value> {
    let (_, store) = open(config_path)?;
    intervention::delete(&store, id)?;
    store.shutdown()?;
    Ok(json!({ "deleted": id }))
}

pub fn flush(config_path: &Path) -> CliResult<Value> {
    let (_, store) = open(config_path)?;
    let outcome = store.flush()?;
    Ok(match outcome {
        FlushOutcome::Clean => json!({ "outcome": "clean" }),
        FlushOutcome::Written {
            generation,
            bytes,
            attempts,
        } => json!({
            "outcome": "written",
            "generation": generation,
            "bytes": bytes,
            "attempts": attempts,
        }),
    })
}

/// Summarize the image: versions, per-table row and tombstone counts
pub fn inspect(config_path: &Path) -> CliResult<Value> {
    let (config, store) = open(config_path)?;
    let working_set = store.working_set();

    let mut tables = Map::new();
    for (name, rows) in &working_set.tables {
        tables.insert(
            name.clone(),
            json!({
                "version": rows.version,
                "rows": rows.rows.len(),
                "tombstones": rows.tombstones.len(),
            }),
        );
    }

    let image = image_path(&config);
    let bytes = fs::metadata(&image)
        .map_err(|e| CliError::io_error(format!("cannot stat {}: {}", image.display(), e)))?
        .len();

    Ok(json!({
        "image": image.display().to_string(),
        "image_bytes": bytes,
        "app_version": working_set.app_version,
        "last_commit_ts": working_set.last_commit_ts,
        "tables": Value::Object(tables),
    }))
}
