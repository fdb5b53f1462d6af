//! `peercall` command-line tool

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::AppConfig;
use peercall_infra::{log_welcome, setup_logging};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "peercall", version, about = "PeerCall identities, contacts and presence")]
struct Cli {
    /// Configuration file (falls back to $PEERCALL_CONFIG, then the per-user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Session token, overriding [directory].token
    #[arg(long, env = "PEERCALL_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Log level, overriding [logging].level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the identity the token was issued for
    Whoami,
    /// Manage the contact list
    #[command(subcommand)]
    Contacts(ContactsCommand),
    /// Watch which contacts are online
    Presence,
}

#[derive(Subcommand, Debug)]
enum ContactsCommand {
    /// List contacts
    List,
    /// Add a contact by their share id
    Add { share_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?.with_token(cli.token);
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    // Already-installed subscriber is fine
    let _ = setup_logging(&config.logging);
    log_welcome(&config.logging.app_name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Whoami => commands::whoami(&config),
        Command::Contacts(ContactsCommand::List) => commands::list_contacts(&config).await,
        Command::Contacts(ContactsCommand::Add { share_id }) => commands::add_contact(&config, &share_id).await,
        Command::Presence => commands::presence(&config).await,
    }
}
