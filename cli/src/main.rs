//! Pagewise command-line client
//!
//! Reads transport settings from a JSON file, lets flags override them and
//! runs one call against the data service.
//!
//! Usage:
//!   pagewise --base-url http://localhost:8080/odata get Items(1)
//!   pagewise query Items --filter "Price gt 10" --top 50
//!   pagewise config set transport.backend raw

use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use pagewise_loader::{EntityLoader, QueryOption};
use pagewise_transport::settings::keys;
use pagewise_transport::{
    DataTransport, JsonFileSettings, MemorySettings, SettingsStore, Transport, TransportFactory,
};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const KNOWN_KEYS: [&str; 5] = [
    keys::BACKEND,
    keys::BASE_URL,
    keys::MESSAGE_FORMAT,
    keys::NAMESPACE,
    keys::TIMEOUT_SECS,
];

#[derive(Parser, Debug)]
#[command(name = "pagewise")]
#[command(about = "Query a paginated data service")]
struct Args {
    /// Path to the settings file
    #[arg(short, long, default_value = "pagewise.json")]
    settings: PathBuf,

    /// Backend to use: buffered, native, legacy or raw
    #[arg(short, long)]
    backend: Option<String>,

    /// Service base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Message format: json or xml
    #[arg(short, long)]
    format: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// GET a path and print the decoded body
    Get {
        path: String,
        /// Decode the body as a sequence
        #[arg(long)]
        list: bool,
    },
    /// Walk every page of a query
    Query {
        entity_set: String,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        order_by: Option<String>,
        #[arg(long)]
        top: Option<u64>,
        /// Stop after this many pages
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Print the server-side count of a query
    Count {
        entity_set: String,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Read or write stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print one setting, or all known settings
    Get { key: Option<String> },
    /// Store a setting
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let store = JsonFileSettings::open(&args.settings)
        .with_context(|| format!("Failed to open settings {}", args.settings.display()))?;

    match &args.command {
        Command::Config { action } => run_config(&store, action),
        Command::Get { path, list } => {
            let transport = build_transport(&args, &store)?;
            let body = if *list {
                Value::Array(
                    transport
                        .get_list::<Value>(path)
                        .await
                        .with_context(|| format!("GET {path} failed"))?,
                )
            } else {
                transport
                    .get_single::<Value>(path)
                    .await
                    .with_context(|| format!("GET {path} failed"))?
            };
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Command::Query {
            entity_set,
            filter,
            order_by,
            top,
            max_pages,
        } => {
            let loader = EntityLoader::new(Arc::new(build_transport(&args, &store)?));
            let mut options = Vec::new();
            if let Some(filter) = filter {
                options.push(QueryOption::filter(filter.as_str()));
            }
            if let Some(order_by) = order_by {
                options.push(QueryOption::order_by(order_by.as_str()));
            }
            if let Some(top) = top {
                options.push(QueryOption::top(*top));
            }
            run_query(&loader, entity_set, &options, *max_pages).await
        }
        Command::Count { entity_set, filter } => {
            let loader = EntityLoader::new(Arc::new(build_transport(&args, &store)?));
            let base = match filter {
                Some(filter) => pagewise_loader::compose(entity_set, &[QueryOption::filter(filter.as_str())]),
                None => entity_set.clone(),
            };
            let count = loader
                .get_total_records_count(&base)
                .await
                .with_context(|| format!("Counting {entity_set} failed"))?;
            println!("{count}");
            Ok(())
        }
    }
}

/// Builds the transport from stored settings overlaid with command-line flags.
fn build_transport(args: &Args, store: &JsonFileSettings) -> Result<Transport> {
    let mut values: Vec<(String, String)> = KNOWN_KEYS
        .iter()
        .filter_map(|key| store.get(key).map(|value| (key.to_string(), value)))
        .collect();
    let overrides = [
        (keys::BACKEND, &args.backend),
        (keys::BASE_URL, &args.base_url),
        (keys::MESSAGE_FORMAT, &args.format),
    ];
    for (key, value) in overrides {
        if let Some(value) = value {
            debug!("Overriding {} from the command line", key);
            values.retain(|(k, _)| k != key);
            values.push((key.to_string(), value.clone()));
        }
    }

    let merged = MemorySettings::from_pairs(values);
    let transport = TransportFactory::from_settings(&merged).context("Failed to create transport")?;
    info!(
        "Using {} transport for {}",
        transport.backend_name(),
        transport.config().base_url
    );
    Ok(transport)
}

async fn run_query(
    loader: &EntityLoader,
    entity_set: &str,
    options: &[QueryOption],
    max_pages: Option<usize>,
) -> Result<()> {
    let mut pages = pin!(loader.execute_query::<Value>(entity_set, options));
    let mut page_count = 0usize;
    let mut item_count = 0usize;

    while let Some(page) = pages.next().await {
        let page = page.with_context(|| format!("Query of {entity_set} failed on page {}", page_count + 1))?;
        page_count += 1;
        item_count += page.items.len();
        for item in &page.items {
            println!("{}", serde_json::to_string(item)?);
        }
        if max_pages.is_some_and(|max| page_count >= max) {
            if page.continuation_token.is_some() {
                info!("Stopping after {} pages; more are available", page_count);
            }
            break;
        }
    }

    info!("Read {} items in {} pages", item_count, page_count);
    Ok(())
}

fn run_config(store: &JsonFileSettings, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key: Some(key) } => match store.get(key) {
            Some(value) => println!("{value}"),
            None => bail!("{key} is not set in {}", store.path().display()),
        },
        ConfigAction::Get { key: None } => {
            for key in KNOWN_KEYS {
                if let Some(value) = store.get(key) {
                    println!("{key} = {value}");
                }
            }
        }
        ConfigAction::Set { key, value } => {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                bail!("Unknown setting {key}; expected one of {}", KNOWN_KEYS.join(", "));
            }
            store
                .set(key, value)
                .with_context(|| format!("Failed to write {}", store.path().display()))?;
            info!("Set {} in {}", key, store.path().display());
        }
    }
    Ok(())
}
