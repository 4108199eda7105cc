//! Command line: `serve` plus local management of the store document.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::auth::{self, TokenKind};
use crate::config::AppConfig;
use crate::server::{self, AppState};
use crate::store::{EntryKind, Store, Upserted};
use crate::target;

#[derive(Debug, Parser)]
#[command(name = "redirect-helper", version, about = "Token-gated short-name and domain redirects")]
pub struct Cli {
    /// TOML configuration file (optional).
    #[arg(
        long,
        global = true,
        env = "REDIRECT_HELPER_CONFIG",
        default_value = "redirect-helper.toml"
    )]
    pub config: String,

    /// Path of the JSON store document.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the HTTP server, creating the store document on first run.
    Serve {
        /// Listen port; defaults to the port saved in the store document.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print path redirects.
    List,
    /// Print domain redirects.
    ListDomains,
    /// Create or update a path redirect.
    Update {
        name: String,
        #[arg(long)]
        target: String,
    },
    /// Create or update a domain redirect.
    UpdateDomain {
        domain: String,
        #[arg(long)]
        target: String,
    },
    /// Delete a path redirect.
    Remove { name: String },
    /// Delete a domain redirect.
    RemoveDomain { domain: String },
    /// Replace a token with a freshly generated one.
    ResetToken { kind: TokenKind },
    /// Print the server settings.
    Settings {
        /// Show tokens in full.
        #[arg(long)]
        reveal: bool,
    },
    /// Store a new listen port.
    SetPort {
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },
}

impl Command {
    /// Port given on the command line, if this command takes one.
    pub fn port_override(&self) -> Option<u16> {
        match self {
            Command::Serve { port } => *port,
            _ => None,
        }
    }
}

/// Execute `command` against the configured store.
pub async fn run(command: Command, config: AppConfig) -> anyhow::Result<()> {
    if let Command::Serve { .. } = command {
        return serve(config).await;
    }

    let store = Store::open(&config.store.path).with_context(|| {
        format!(
            "cannot open {}; run `redirect-helper serve` once to create it",
            config.store.path.display()
        )
    })?;
    let stdout = std::io::stdout();
    manage(&store, command, &mut stdout.lock()).await
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let (store, created) = Store::open_or_init(&config.store.path)
        .await
        .with_context(|| format!("cannot open {}", config.store.path.display()))?;

    let settings = store.settings().await;
    if created {
        println!("Created {}", config.store.path.display());
        println!("  admin token:    {}", settings.admin_token);
        println!("  redirect token: {}", settings.redirect_token);
        println!("  domain token:   {}", settings.domain_token);
    }

    let listen_addr = config.server.listen_address(settings.port);
    tracing::info!(
        store = %config.store.path.display(),
        listen_address = %listen_addr,
        forwardings = store.count(EntryKind::Path).await,
        domains = store.count(EntryKind::Domain).await,
        "Starting redirect-helper"
    );

    server::run(AppState { store }, &listen_addr).await
}

/// Every command except `serve`. Output goes to `out`.
async fn manage(store: &Store, command: Command, out: &mut impl Write) -> anyhow::Result<()> {
    match command {
        Command::Serve { .. } => bail!("serve is not a management command"),
        Command::List => print_entries(store, EntryKind::Path, out).await?,
        Command::ListDomains => print_entries(store, EntryKind::Domain, out).await?,
        Command::Update { name, target } => {
            save(store, EntryKind::Path, &name, &target, out).await?
        }
        Command::UpdateDomain { domain, target } => {
            save(store, EntryKind::Domain, &domain, &target, out).await?
        }
        Command::Remove { name } => {
            store.remove(EntryKind::Path, &name).await?;
            writeln!(out, "Removed {name}")?;
        }
        Command::RemoveDomain { domain } => {
            store.remove(EntryKind::Domain, &domain).await?;
            writeln!(out, "Removed {domain}")?;
        }
        Command::ResetToken { kind } => {
            let token = auth::generate_token();
            store.set_token(kind, &token).await?;
            tracing::info!(kind = %kind, token = %auth::mask(&token), "Token reset");
            writeln!(out, "New {kind} token: {token}")?;
        }
        Command::Settings { reveal } => print_settings(store, reveal, out).await?,
        Command::SetPort { port } => {
            store.set_port(port).await?;
            writeln!(out, "Port set to {port}; restart the server to apply")?;
        }
    }
    Ok(())
}

async fn save(
    store: &Store,
    kind: EntryKind,
    key: &str,
    target: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if !target::is_valid(target) {
        bail!("invalid target '{target}': expected a URL or host:port");
    }
    let verb = match store.upsert(kind, key, target).await? {
        Upserted::Created => "Created",
        Upserted::Updated => "Updated",
    };
    writeln!(out, "{verb} {key} -> {target}")?;
    Ok(())
}

async fn print_entries(store: &Store, kind: EntryKind, out: &mut impl Write) -> anyhow::Result<()> {
    let entries = store.list(kind).await;
    if entries.is_empty() {
        writeln!(out, "No {kind} redirects")?;
        return Ok(());
    }
    for (key, entry) in entries {
        writeln!(
            out,
            "{key} -> {}  (updated {})",
            entry.target,
            entry.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
    }
    Ok(())
}

async fn print_settings(store: &Store, reveal: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let settings = store.settings().await;
    let show = |token: &str| match (token.is_empty(), reveal) {
        (true, _) => "(not set)".to_string(),
        (false, true) => token.to_string(),
        (false, false) => auth::mask(token),
    };

    if let Some(path) = store.path() {
        writeln!(out, "store:          {}", path.display())?;
    }
    writeln!(out, "port:           {}", settings.port)?;
    writeln!(out, "admin token:    {}", show(&settings.admin_token))?;
    writeln!(out, "redirect token: {}", show(&settings.redirect_token))?;
    writeln!(out, "domain token:   {}", show(&settings.domain_token))?;
    writeln!(
        out,
        "redirects:      {}/{}",
        store.count(EntryKind::Path).await,
        settings.max_redirect_count
    )?;
    writeln!(
        out,
        "domains:        {}/{}",
        store.count(EntryKind::Domain).await,
        settings.max_domain_count
    )?;
    Ok(())
}
