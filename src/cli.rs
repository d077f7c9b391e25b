//! Command-line interface for lingotutor

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::auth::AuthRegistry;
use crate::config::{self, Config};
use crate::engine::SessionEngine;
use crate::learner::system_stats;
use crate::oracle::OracleClient;
use crate::secrets::{self, SecretStore};
use crate::server::{self, ServerState};
use crate::store::{Database, ProficiencyStore, StateStore};
use crate::telegram::TelegramClient;

#[derive(Parser)]
#[command(name = "lingotutor")]
#[command(about = "Webhook-driven Telegram bot for adaptive language practice", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the config file (default: the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Reset every authorized user and send them the task-type menu
    SendDaily,
    /// Manage the authorized-user list
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Show usage statistics across all users
    Stats,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// List authorized chat ids
    List,
    /// Authorize a chat id
    Add {
        /// Numeric Telegram chat id
        chat_id: String,
    },
    /// Revoke a chat id
    Remove {
        /// Numeric Telegram chat id
        chat_id: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { host, port } => {
            let config = Arc::new(Config::load(config_path)?);
            serve(config, host, port).await
        }
        Commands::SendDaily => {
            let config = Arc::new(Config::load(config_path)?);
            send_daily(config).await
        }
        Commands::Users { command } => {
            let config = Config::load(config_path)?;
            users(&config, command)
        }
        Commands::Stats => {
            let config = Config::load(config_path)?;
            stats(&config).await
        }
        Commands::InitConfig { force } => init_config(config_path, force),
    }
}

/// The engine plus the pieces the server needs alongside it.
struct Runtime {
    engine: Arc<SessionEngine>,
    secrets: Arc<SecretStore>,
}

async fn build_runtime(config: &Arc<Config>) -> Result<Runtime> {
    let db = Database::open(config.storage.db_path()?).await?;
    let secrets = Arc::new(SecretStore::from_config(&config.secrets));
    let auth = AuthRegistry::new(secrets.clone());

    let bot_token = secrets.get(secrets::BOT_TOKEN)?;
    let channel = Arc::new(TelegramClient::new(config.telegram.clone(), bot_token)?);
    let oracle = Arc::new(OracleClient::from_secrets(config.oracle.clone(), &secrets)?);

    let engine = SessionEngine::new(config.clone(), db, auth, oracle.clone(), oracle, channel);
    Ok(Runtime { engine: Arc::new(engine), secrets })
}

async fn serve(config: Arc<Config>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(host) = host {
        server_config.host = host;
    }
    if let Some(port) = port {
        server_config.port = port;
    }

    let runtime = build_runtime(&config).await?;
    let state = ServerState { engine: runtime.engine, secrets: runtime.secrets };
    server::start(state, &server_config).await
}

async fn send_daily(config: Arc<Config>) -> Result<()> {
    let runtime = build_runtime(&config).await?;
    let outcome = runtime.engine.broadcast_daily_choice().await;
    println!("Daily prompt delivered to {}/{} users", outcome.delivered, outcome.attempted);
    if outcome.attempted > 0 && outcome.delivered == 0 {
        bail!("no daily prompt could be delivered");
    }
    Ok(())
}

fn users(config: &Config, command: UserCommands) -> Result<()> {
    let secrets = Arc::new(SecretStore::from_config(&config.secrets));
    let auth = AuthRegistry::new(secrets);
    match command {
        UserCommands::List => {
            let users = auth.authorized_users();
            if users.is_empty() {
                println!("No authorized users.");
            } else {
                for user in users {
                    println!("{user}");
                }
            }
        }
        UserCommands::Add { chat_id } => {
            if auth.add_user(&chat_id)? {
                println!("Authorized {chat_id}.");
            } else {
                println!("{chat_id} is already authorized.");
            }
        }
        UserCommands::Remove { chat_id } => {
            if auth.remove_user(&chat_id)? {
                println!("Revoked {chat_id}.");
            } else {
                println!("{chat_id} was not on the list.");
            }
        }
    }
    Ok(())
}

async fn stats(config: &Config) -> Result<()> {
    let db = Database::open(config.storage.db_path()?).await?;
    let states = StateStore::new(db.clone()).all_users().await?;
    let records = ProficiencyStore::new(db).all_users().await?;
    let stats = system_stats(&states, &records, Utc::now());
    println!("{stats}");
    Ok(())
}

fn init_config(explicit: Option<&Path>, force: bool) -> Result<()> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config::config_path()?,
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
