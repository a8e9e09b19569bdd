use std::{
    fs,
    path::{Path, PathBuf},
    process::exit,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{ColorChoice, ValueEnum};
use converge_core::{
    feature_membership::FEATURE_MEMBERSHIP,
    wire::{from_wire, to_wire, unknown_fields, WireMap},
    Client, ClientConfig, MemoryStore, Node, RemoteStore,
};
use converge_store_local::LocalStore;
use tracing::debug;

/// Create the single-threaded tokio runtime used by the CLI.
///
/// Panics if the runtime cannot be created.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to initialize tokio runtime")
}

/// Handle a Result, printing the error and exiting with code 1 on failure.
pub fn handle_result(r: Result<()>) {
    match r {
        Ok(()) => {}
        Err(e) => {
            eprintln!("converge error: {:#}", e);
            exit(1);
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Objects persist in the state file
    Local,
    /// Objects live only as long as the command; useful to preview a create
    Memory,
}

#[derive(clap::Parser, Debug, Clone)]
pub struct Options {
    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Where objects are kept
    #[arg(long, global = true, value_enum, default_value = "local")]
    pub store: StoreKind,

    /// The state file of the local store
    #[arg(long, global = true, default_value = "converge-state.json")]
    pub state: PathBuf,

    /// Client configuration (JSON): timeout and conflict retry policy
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Give up after this many seconds, retries included
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

fn read_config(options: &Options) -> Result<ClientConfig> {
    let mut config = match &options.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => ClientConfig::default(),
    };
    if let Some(timeout) = options.timeout {
        config.timeout_secs = Some(timeout);
    }
    debug!(?config, "Client configuration");
    Ok(config)
}

pub fn client(options: &Options) -> Result<Client> {
    let store: Arc<dyn RemoteStore> = match options.store {
        StoreKind::Local => Arc::new(LocalStore::open(&options.state)?),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(Client::new(store, read_config(options)?))
}

/// Read a FeatureMembership in its JSON wire form, identity fields included.
pub fn read_resource(path: &Path) -> Result<Node> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading resource file {}", path.display()))?;
    parse_resource(&text).with_context(|| format!("in resource file {}", path.display()))
}

fn parse_resource(text: &str) -> Result<Node> {
    let json: serde_json::Value = serde_json::from_str(text)?;
    let Some(map) = json.as_object() else {
        bail!("expected a JSON object");
    };
    let unknown = unknown_fields(FEATURE_MEMBERSHIP.root, map);
    if !unknown.is_empty() {
        let unknown: Vec<String> = unknown.iter().map(ToString::to_string).collect();
        bail!("unknown fields: {}", unknown.join(", "));
    }
    Ok(from_wire(FEATURE_MEMBERSHIP.root, map)?)
}

pub fn print_resource(node: &Node) -> Result<()> {
    let wire: WireMap = to_wire(FEATURE_MEMBERSHIP.root, node);
    println!("{}", serde_json::to_string_pretty(&wire)?);
    Ok(())
}
