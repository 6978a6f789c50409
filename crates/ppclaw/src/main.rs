#![forbid(unsafe_code)]

use ppclaw::agent::HttpAgent;
use ppclaw::backoff::ExponentialBackoff;
use ppclaw::binder::{CredentialBinder, Credentials};
use ppclaw::config::{
    load_config, resolve_config_path, Cli, Commands, ConfigFile, ConnectorConfig, NotesAction,
};
use ppclaw::directory::RelayDirectory;
use ppclaw::notes::{FileNotesStore, GroupId, NotesStore};
use ppclaw::router::MessageRouter;
use ppclaw::supervisor::ConnectionSupervisor;

use clap::Parser;
use std::io::{IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ── ANSI style helpers ──────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

fn tty() -> bool {
    std::io::stdout().is_terminal()
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };

    if let Some(ref path) = cli.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("failed to open log file {path:?}: {e}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

fn effective_config(cli: &Cli, path: &Path) -> anyhow::Result<ConnectorConfig> {
    let mut config = load_config(path)?;
    if let Some(ref url) = cli.discovery_url {
        config.discovery_url = url.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    Ok(config)
}

fn open_notes(config: &ConnectorConfig) -> anyhow::Result<FileNotesStore> {
    FileNotesStore::new(&config.resolved_data_dir(), &config.instance)
        .map_err(|e| anyhow::anyhow!("notes store: {e}"))
}

// ── Daemon ──────────────────────────────────────────────────────────

async fn run_daemon(cli: &Cli) -> anyhow::Result<()> {
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = effective_config(cli, &config_path)?;

    let credentials = Credentials::resolve(config.api_key.as_deref(), config.bind_token.as_deref())?;

    let notes: Arc<dyn NotesStore> = Arc::new(open_notes(&config)?);
    let agent = Arc::new(HttpAgent::new(&config.agent)?);
    let router = MessageRouter::new(agent, notes);
    let directory = Arc::new(RelayDirectory::new(config.discovery_url.clone())?);
    let binder = CredentialBinder::new(Arc::new(ConfigFile::new(config_path.clone())))?;

    if std::io::stderr().is_terminal() {
        let v = env!("CARGO_PKG_VERSION");
        let auth = match credentials {
            Credentials::ApiKey(_) => "api key",
            Credentials::BindToken(_) => "bind token (first start)",
        };
        eprintln!();
        eprintln!("  {BOLD}◈ ppclaw{RESET} {DIM}v{v}{RESET}");
        eprintln!("  {DIM}Instance{RESET}   {CYAN}{}{RESET}", config.instance);
        eprintln!("  {DIM}Discovery{RESET}  {}", config.discovery_url);
        eprintln!("  {DIM}Agent{RESET}      {}", config.agent.url);
        eprintln!("  {DIM}Auth{RESET}       {auth}");
        eprintln!();
    }

    let backoff = ExponentialBackoff::new(
        Duration::from_millis(config.reconnect.initial_delay_ms),
        Duration::from_millis(config.reconnect.max_delay_ms),
        config.reconnect.backoff_factor,
    )
    .with_jitter(config.reconnect.jitter);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = ConnectionSupervisor::new(directory, binder, credentials, router, shutdown_rx)
        .with_backoff(backoff)
        .with_keepalive(Duration::from_secs(config.keepalive.interval_s));

    let mut states = supervisor.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!(?state, "connection state changed");
        }
    });

    info!(instance = %config.instance, "starting ppclaw connector");
    let mut handle = tokio::spawn(supervisor.run());

    let result = tokio::select! {
        res = &mut handle => res,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            shutdown_tx.send_replace(true);
            handle.await
        }
    };

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(anyhow::anyhow!("connector task failed: {e}")),
    }
}

// ── Relays ──────────────────────────────────────────────────────────

async fn show_relays(cli: &Cli) -> anyhow::Result<()> {
    let config = effective_config(cli, &resolve_config_path(cli.config.as_deref()))?;
    let directory = RelayDirectory::new(config.discovery_url.clone())?;

    let relays = match directory.refresh().await {
        Ok(relays) => relays,
        Err(e) => {
            if tty() {
                eprintln!();
                eprintln!("  {RED}✗{RESET} Could not fetch relay list");
                eprintln!("    {DIM}{e}{RESET}");
                eprintln!();
            } else {
                eprintln!("Failed to fetch relay list: {e}");
            }
            std::process::exit(1);
        }
    };

    if !tty() {
        println!("{}", serde_json::to_string_pretty(&*relays)?);
        return Ok(());
    }

    println!();
    if relays.is_empty() {
        println!("  {DIM}No relays{RESET}");
        println!();
        return Ok(());
    }

    let total: f64 = relays.iter().map(|r| r.weight).sum();
    let id_w = relays.iter().map(|r| r.id.len()).max().unwrap_or(2).max(2);
    let ws_w = relays.iter().map(|r| r.ws.len()).max().unwrap_or(3).max(3);

    println!(
        "  {BOLD}{:<id_w$}{RESET}   {BOLD}{:<ws_w$}{RESET}   {BOLD}WEIGHT   SHARE{RESET}",
        "ID", "URL"
    );
    for r in relays.iter() {
        let share = r.weight / total * 100.0;
        println!(
            "  {:<id_w$}   {CYAN}{:<ws_w$}{RESET}   {:>6}   {share:>4.1}%",
            r.id, r.ws, r.weight
        );
    }
    println!();
    println!("  {DIM}{} relays │ {}{RESET}", relays.len(), directory.url());
    println!();

    Ok(())
}

// ── Notes ───────────────────────────────────────────────────────────

fn notes_cmd(cli: &Cli, action: &NotesAction) -> anyhow::Result<()> {
    let config = effective_config(cli, &resolve_config_path(cli.config.as_deref()))?;
    let store = open_notes(&config)?;

    let raw = match action {
        NotesAction::Show { group_id }
        | NotesAction::Set { group_id, .. }
        | NotesAction::Clear { group_id } => group_id,
    };
    let group = GroupId::parse(raw)?;

    match action {
        NotesAction::Show { .. } => {
            let notes = store.read(&group)?;
            if notes.is_empty() && tty() {
                println!("  {DIM}No notes for {group}{RESET}");
            } else {
                print!("{notes}");
                if tty() && !notes.ends_with('\n') {
                    println!();
                }
            }
        }
        NotesAction::Set { content, .. } => {
            let content = match content {
                Some(c) => c.clone(),
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            store.write(&group, &content)?;
            println!("  {GREEN}✓{RESET} Saved notes for {BOLD}{group}{RESET} {DIM}({} bytes){RESET}", content.len());
        }
        NotesAction::Clear { .. } => {
            store.clear(&group)?;
            println!("  {GREEN}✓{RESET} Cleared notes for {BOLD}{group}{RESET}");
        }
    }

    Ok(())
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider - may already be installed or unsupported platform");
    }

    let cli = Cli::parse();

    init_tracing(&cli)?;

    let result = match &cli.command {
        Commands::Start => run_daemon(&cli).await,
        Commands::Relays => show_relays(&cli).await,
        Commands::Notes { action } => notes_cmd(&cli, action),
    };

    if let Err(ref e) = result {
        error!(error = %e, "ppclaw exited with an error");
    }
    result
}
