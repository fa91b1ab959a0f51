mod cli;
mod config;
mod storage;

use clap::Parser;
use color_eyre::Result;
use safestore_core::KeyMaterialStore;
use safestore_storage::SafeStore;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    let mechanism = cli
        .mechanism
        .or(config.mechanism)
        .unwrap_or_default();

    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Health => {
            let store = storage::store_from_config(&config, mechanism)?;
            run_store_health(&store).await?;
            println!("Storage ({mechanism}): ok");
        }
        Command::Set { key, value } => {
            let store = storage::store_from_config(&config, mechanism)?;
            store.set_item(&key, &parse_value(&value)).await?;
            println!("Stored `{key}`.");
        }
        Command::Get { key } => {
            let store = storage::store_from_config(&config, mechanism)?;
            match store.get_item::<Value>(&key).await? {
                Some(value) => println!("{value}"),
                None => println!("No value stored for `{key}`."),
            }
        }
        Command::Remove { key } => {
            let store = storage::store_from_config(&config, mechanism)?;
            store.remove_item(&key).await?;
            println!("Removed `{key}`.");
        }
        Command::Clear => {
            let store = storage::store_from_config(&config, mechanism)?;
            store.clear()?;
            println!("Cleared {mechanism} storage.");
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("safestore {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

/// Treat the argument as JSON when it parses, otherwise as a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run_store_health<K: KeyMaterialStore>(store: &SafeStore<K>) -> Result<()> {
    let probe_key = "health/probe";
    let payload = Value::from("ok");
    store.set_item(probe_key, &payload).await?;
    let round_trip = store.get_item::<Value>(probe_key).await?;
    store.remove_item(probe_key).await?;

    if round_trip.as_ref() != Some(&payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    if store.get_item::<Value>(probe_key).await?.is_some() {
        color_eyre::eyre::bail!("probe survived removal");
    }
    Ok(())
}
