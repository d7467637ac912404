//! Offshoot - branching LLM conversations
//!
//! `serve` runs the REST API, `chat` a terminal client, `config` edits
//! stored settings.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use offshoot::cli::{self, ChatOptions};
use offshoot::config::{AppConfig, ConfigOverrides, Settings};
use offshoot::db::{Database, Store};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Offshoot - fork any part of an answer into its own conversation
#[derive(Parser, Debug)]
#[command(name = "offshoot")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (equivalent to RUST_LOG=debug)
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    /// Enable verbose logging (equivalent to RUST_LOG=trace)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Database file [default: <data dir>/offshoot/offshoot.db]
    #[arg(long, global = true, env = "OFFSHOOT_DB")]
    db: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the REST server
    Serve {
        /// Address to listen on [default: 127.0.0.1:3000]
        #[arg(long)]
        bind: Option<String>,
    },

    /// Chat in the terminal
    Chat {
        /// Identity whose threads are used
        #[arg(long, env = "OFFSHOOT_OWNER", default_value = "local")]
        owner: String,

        /// Thread to open instead of starting a new one
        #[arg(long)]
        thread: Option<String>,

        /// Model to generate with
        #[arg(short, long)]
        model: Option<String>,

        /// Use a running `offshoot serve` at this URL instead of the local store
        #[arg(long)]
        server: Option<String>,
    },

    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// List stored settings
    List,
    /// Print one setting
    Get { key: String },
    /// Store a setting
    Set { key: String, value: String },
    /// Remove a setting
    Unset { key: String },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        let default_filter = if args.verbose {
            "trace"
        } else if args.debug {
            "debug"
        } else {
            "warn"
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();

        if args.debug || args.verbose {
            tracing::info!("Debug logging enabled");
        }

        let db = match args.db {
            Some(path) => Database::open_at(path)?,
            None => Database::open()?,
        };
        db.migrate()?;

        match args.command {
            Commands::Serve { bind } => {
                let overrides = ConfigOverrides { bind, model: None };
                let config = AppConfig::resolve(&Settings::new(&db), &overrides)?;
                cli::run_serve(Store::new(db), config).await
            }
            Commands::Chat {
                owner,
                thread,
                model,
                server,
            } => {
                let overrides = ConfigOverrides { bind: None, model };
                let config = AppConfig::resolve(&Settings::new(&db), &overrides)?;
                let options = ChatOptions {
                    owner,
                    thread,
                    server,
                };
                cli::run_chat(Store::new(db), config, options).await
            }
            Commands::Config { action } => {
                run_config(&Settings::new(&db), action.unwrap_or(ConfigAction::List))
            }
        }
    })
}

fn run_config(settings: &Settings<'_>, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::List => {
            for (key, value) in settings.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Get { key } => match settings.get(&key)? {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("{} is not set", key),
        },
        ConfigAction::Set { key, value } => {
            let previous = settings.get(&key)?;
            settings.set(&key, &value)?;
            // Reject values the server would refuse to start with.
            if let Err(e) = AppConfig::resolve(settings, &ConfigOverrides::default()) {
                match previous {
                    Some(old) => settings.set(&key, &old)?,
                    None => settings.delete(&key)?,
                }
                return Err(e.context(format!("Invalid value for {}", key)));
            }
        }
        ConfigAction::Unset { key } => settings.delete(&key)?,
    }
    Ok(())
}
