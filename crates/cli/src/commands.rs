//! Subcommand handlers

use crate::config::AppConfig;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use colored::Colorize;
use peercall_core::relay::{EventKind, RelayEvent};
use peercall_core::{ConnectionStatus, PresenceTracker, RelayClient, UserId};
use peercall_directory::{Contact, DirectoryClient, TokenClaims};
use peercall_relay_ws::WsConnector;
use std::sync::Arc;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Tabled)]
struct ContactRow {
    #[tabled(rename = "Username")]
    username: String,
    #[tabled(rename = "User id")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl ContactRow {
    fn new(contact: &Contact, status: String) -> Self {
        Self {
            username: contact.username.clone(),
            id: contact.id.to_string(),
            status,
        }
    }
}

pub fn whoami(config: &AppConfig) -> Result<()> {
    if config.directory.token.trim().is_empty() {
        bail!("no token configured; set [directory].token or pass --token");
    }
    let claims = TokenClaims::decode(&config.directory.token)?;
    let identity = claims.identity();

    println!("{} {}", "User id: ".bold(), identity.user_id);
    println!("{} {}", "Share id:".bold(), identity.share_id);
    match claims.expires_at() {
        Some(expires) if claims.is_expired_at(Utc::now()) => {
            println!("{} {} {}", "Expires: ".bold(), expires, "(expired)".red());
        }
        Some(expires) => println!("{} {}", "Expires: ".bold(), expires),
        None => {}
    }
    Ok(())
}

pub async fn list_contacts(config: &AppConfig) -> Result<()> {
    let client = DirectoryClient::new(config.directory.clone())?;
    let contacts = client.list_contacts().await.context("listing contacts")?;
    if contacts.is_empty() {
        println!("No contacts yet. Add one with `peercall contacts add <share-id>`.");
        return Ok(());
    }

    let rows: Vec<ContactRow> = contacts
        .iter()
        .map(|c| ContactRow::new(c, "-".to_string()))
        .collect();
    println!("{}", render(rows));
    Ok(())
}

pub async fn add_contact(config: &AppConfig, share_id: &str) -> Result<()> {
    let client = DirectoryClient::new(config.directory.clone())?;
    client
        .add_contact(share_id)
        .await
        .with_context(|| format!("adding contact {}", share_id))?;
    println!("{} {}", "Added".green(), share_id);
    Ok(())
}

/// Connect to the relay as the token's user and print the contact list with
/// online status on every roster change, until Ctrl-C
pub async fn presence(config: &AppConfig) -> Result<()> {
    let directory = DirectoryClient::new(config.directory.clone())?;
    let identity = directory.identity()?;
    let contacts = directory.list_contacts().await.context("listing contacts")?;

    config.relay.validate()?;
    let connector = WsConnector::from_config(&config.relay)?;
    let relay = RelayClient::new(Arc::new(connector), config.relay.clone());
    let presence = PresenceTracker::new();

    // Redraw requests from the bus, which dispatches synchronously
    let (redraw_tx, mut redraw_rx) = mpsc::unbounded_channel::<Option<ConnectionStatus>>();

    let tracker = presence.clone();
    let roster_tx = redraw_tx.clone();
    relay.subscribe(EventKind::RosterUpdate, move |event| {
        if let RelayEvent::RosterUpdate(records) = event {
            tracker.apply_roster(records);
            let _ = roster_tx.send(None);
        }
    });
    let tracker = presence.clone();
    relay.subscribe(EventKind::ConnectionStatus, move |event| {
        if let RelayEvent::ConnectionStatus(status) = event {
            if !status.is_connected() {
                tracker.clear();
            }
            let _ = redraw_tx.send(Some(status.clone()));
        }
    });

    relay.register(identity.user_id.clone());
    relay.start();
    info!("Watching presence as {}", identity.user_id);
    println!("Connecting to {} as {} (Ctrl-C to stop)", config.relay.url, identity.user_id);

    loop {
        tokio::select! {
            redraw = redraw_rx.recv() => match redraw {
                Some(Some(status)) => {
                    debug!("Relay status: {}", status);
                    println!("{} {}", "relay:".dimmed(), status);
                }
                Some(None) => print_presence(&contacts, &presence, &identity.user_id),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    relay.shutdown().await;
    Ok(())
}

fn print_presence(contacts: &[Contact], presence: &PresenceTracker, me: &UserId) {
    let rows: Vec<ContactRow> = contacts
        .iter()
        .filter(|c| &c.id != me)
        .map(|c| {
            let status = if presence.is_online(&c.id) {
                "online".green().to_string()
            } else {
                "offline".dimmed().to_string()
            };
            ContactRow::new(c, status)
        })
        .collect();

    println!(
        "{} online ({} contacts)",
        presence.len().to_string().bold(),
        rows.len()
    );
    if !rows.is_empty() {
        println!("{}", render(rows));
    }
}

fn render(rows: Vec<ContactRow>) -> Table {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table
}
