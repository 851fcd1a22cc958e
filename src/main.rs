#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level as TraceLevel, info};
use tracing_subscriber::FmtSubscriber;

use hawkeye::session::Backends;
use hawkeye::state::{PersistentStore, StoreOptions};
use hawkeye::{ExecutionContext, HawkeyeConfig, VisibilityGate};

#[derive(Parser, Debug)]
#[command(name = "hawkeye", about = "Inspect overlay gating and stored overlay state")]
struct Cli {
    /// Config file (defaults to <config dir>/hawkeye/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate the visibility gate for a page URL (exit status 1 when denied)
    Check {
        #[arg(long)]
        url: String,
    },
    /// Inspect or reset the stored overlay state of a page
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Print the stored toolbar placement
    Toolbar,
}

#[derive(Subcommand, Debug)]
enum StateAction {
    Show {
        #[arg(long)]
        url: String,
    },
    Clear {
        #[arg(long)]
        url: String,
    },
}

fn init_tracing() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to install tracing subscriber")
}

fn load_config(path: Option<&PathBuf>) -> Result<HawkeyeConfig> {
    match path {
        Some(path) => HawkeyeConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => HawkeyeConfig::load().context("Failed to load default config"),
    }
}

fn open_store(config: &HawkeyeConfig, context: &ExecutionContext) -> PersistentStore {
    let backends = Backends::filesystem(&config.storage);
    PersistentStore::new(
        StoreOptions::from_config(config, context),
        backends.primary,
        backends.fallback,
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    init_tracing()?;
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Check { url } => {
            let context = ExecutionContext::from_url(&url)
                .with_context(|| format!("Invalid page url: {url}"))?;
            let decision = VisibilityGate::new(&config.gating, &context).evaluate();
            println!("{}", serde_json::to_string_pretty(&decision)?);
            Ok(if decision.allowed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::State { action: StateAction::Show { url } } => {
            let context = ExecutionContext::from_url(&url)
                .with_context(|| format!("Invalid page url: {url}"))?;
            let store = open_store(&config, &context);
            match store.get().await {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("no state stored for {}", store.key()),
            }
            store.destroy().await;
            Ok(ExitCode::SUCCESS)
        }
        Command::State { action: StateAction::Clear { url } } => {
            let context = ExecutionContext::from_url(&url)
                .with_context(|| format!("Invalid page url: {url}"))?;
            let store = open_store(&config, &context);
            store
                .clear()
                .await
                .with_context(|| format!("Failed to clear state for {}", store.key()))?;
            info!(key = %store.key(), "State cleared");
            store.destroy().await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Toolbar => {
            let context = ExecutionContext::new("localhost", "/", None);
            let store = open_store(&config, &context);
            match store.get_toolbar_state() {
                Some(toolbar) => println!("{}", serde_json::to_string_pretty(&toolbar)?),
                None => println!("no toolbar state stored"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
