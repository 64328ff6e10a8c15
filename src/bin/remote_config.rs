//! Remote Config CLI
//!
//! Create, update, read and roll back versioned configs in a local store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use remote_config::{
    parse_payload, AppConfig, CancelToken, ConfigService, ErrorKind, SchemaRegistry,
    ServiceError, SqliteVersionStore,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "remote-config")]
#[command(about = "Versioned configuration store with schema validation and rollback")]
#[command(version)]
struct Cli {
    /// Configuration file (layered over remote-config.toml and REMOTE_CONFIG__* variables)
    #[arg(short, long)]
    config: Option<String>,

    /// Path to the SQLite store, overriding configuration
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Give up on the operation after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PayloadArgs {
    /// Payload as inline JSON
    #[arg(short, long, conflicts_with = "data_file")]
    data: Option<String>,

    /// Read the payload from a file ("-" for stdin)
    #[arg(long)]
    data_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create version 1 of a new config
    Create {
        /// Config type (schema name)
        #[arg(short = 't', long = "type")]
        config_type: String,
        name: String,
        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Append a new version to an existing config
    Update {
        name: String,
        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Show the latest or a specific version
    Get {
        name: String,
        #[arg(short, long)]
        version: Option<i64>,
    },

    /// List every version of a config, oldest first
    List { name: String },

    /// Replay an earlier version's payload as a new version
    Rollback {
        name: String,
        /// Version whose payload is restored
        #[arg(long)]
        to: i64,
    },

    /// List registered config types
    Types,

    /// Validate a payload against a type without storing it
    Validate {
        #[arg(short = 't', long = "type")]
        config_type: String,
        #[command(flatten)]
        payload: PayloadArgs,
    },
}

#[derive(Serialize)]
struct VersionList<T> {
    versions: Vec<T>,
}

fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_ansi(config.logging.ansi)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli, config) {
        eprintln!("Error: {}", e);
        let code = match e.downcast_ref::<ServiceError>().map(ServiceError::kind) {
            Some(ErrorKind::InvalidInput) => 2,
            Some(ErrorKind::NotFound) => 3,
            Some(ErrorKind::AlreadyExists) => 4,
            Some(ErrorKind::Internal) | None => 1,
        };
        std::process::exit(code);
    }
}

fn run(cli: Cli, mut config: AppConfig) -> anyhow::Result<()> {
    if let Some(path) = cli.store {
        config.store.path = path;
    }
    config.store.path = config.store_path();

    let cancel = match cli.timeout_ms {
        Some(ms) => CancelToken::with_timeout(Duration::from_millis(ms)),
        None => CancelToken::new(),
    };

    let registry = Arc::new(SchemaRegistry::builtin().context("loading built-in schemas")?);
    let store = SqliteVersionStore::open(&config.store)
        .with_context(|| format!("opening store at {}", config.store.path.display()))?;
    let service = ConfigService::new(Arc::new(store), registry);

    match cli.command {
        Commands::Create {
            config_type,
            name,
            payload,
        } => {
            let payload = read_payload(&payload)?;
            print_json(&service.create(&cancel, &config_type, &name, &payload)?)
        }

        Commands::Update { name, payload } => {
            let payload = read_payload(&payload)?;
            print_json(&service.update(&cancel, &name, &payload)?)
        }

        Commands::Get { name, version } => {
            let found = service.get(&cancel, &name, version)?;
            let mut output = serde_json::to_value(&found)?;
            output["etag"] = serde_json::Value::String(found.etag());
            print_json(&output)
        }

        Commands::List { name } => {
            let versions = service.list_versions(&cancel, &name)?;
            print_json(&VersionList { versions })
        }

        Commands::Rollback { name, to } => print_json(&service.rollback(&cancel, &name, to)?),

        Commands::Types => {
            for config_type in service.types() {
                println!("{}", config_type);
            }
            Ok(())
        }

        Commands::Validate {
            config_type,
            payload,
        } => {
            let payload = read_payload(&payload)?;
            service.validate(&config_type, &payload)?;
            println!("✅ payload is a valid {}", config_type);
            Ok(())
        }
    }
}

fn read_payload(args: &PayloadArgs) -> anyhow::Result<serde_json::Value> {
    let raw = match (&args.data, &args.data_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) if path.as_os_str() == "-" => {
            std::io::read_to_string(std::io::stdin()).context("reading payload from stdin")?
        }
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading payload from {:?}", path))?,
        (None, None) => {
            return Err(ServiceError::InvalidInput(
                "a payload is required: pass --data or --data-file".to_string(),
            )
            .into())
        }
    };
    Ok(parse_payload(&raw)?)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
