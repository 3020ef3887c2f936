//! WolSkill Agent - Entry Point
//!
//! CLI for running the agent and managing its local setup.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use wolskill_agent::config::Config;
use wolskill_agent::identity::{IdentitySource, SystemIdentity};
use wolskill_agent::metrics::{init_metrics, start_api_server, StatusSource};
use wolskill_agent::power::SystemPower;
use wolskill_agent::protocol::{identity_report, HandlerSettings, ProtocolHandler};
use wolskill_agent::transport::{Connector, Session, WsConnector};
use wolskill_agent::util::{init_tracing, Autostart, InstanceLock};
use wolskill_agent::{
    ConnectionManager, ConnectionManagerConfig, CredentialStore, Credentials, VERSION,
};

/// WolSkill Agent - remote power-off over a cloud WebSocket channel
#[derive(Parser)]
#[command(name = "wolskill-agent")]
#[command(version = VERSION)]
#[command(about = "Background agent that powers the machine off on remote command")]
struct Cli {
    /// Path to configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    Run,
    /// Store the identity id and license token
    Configure {
        #[arg(long)]
        identity_id: String,
        #[arg(long)]
        license: String,
    },
    /// List the interfaces and tokens identifying this host
    Interfaces,
    /// Open one session to the endpoint and close it again
    TestConnection,
    /// Manage running at sign-in
    Autostart {
        #[arg(value_enum)]
        action: AutostartAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AutostartAction {
    Enable,
    Disable,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Ring crypto provider for rustls; ignore a provider installed earlier
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Run => run_agent(config_path).await,
        Commands::Configure {
            identity_id,
            license,
        } => configure(config_path, Credentials::new(identity_id, license)),
        Commands::Interfaces => list_interfaces(),
        Commands::TestConnection => test_connection(config_path).await,
        Commands::Autostart { action } => autostart(action),
    }
}

fn load_config(config_path: &Path) -> Result<Config> {
    Config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))
}

async fn run_agent(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        "Starting WolSkill Agent"
    );

    let lock_path = InstanceLock::default_path();
    let Some(_instance) = InstanceLock::acquire(&lock_path)
        .with_context(|| format!("Failed to open instance lock {:?}", lock_path))?
    else {
        bail!("another agent is already running (lock held: {:?})", lock_path);
    };

    if config.metrics.enabled {
        init_metrics(&config.metrics)?;
        info!(bind_addr = %config.metrics.bind_addr, "Metrics endpoint started");
    }

    let connector = WsConnector::new(
        config.endpoint.insecure,
        config.endpoint.connect_timeout(),
        config.protocol.max_message_bytes,
    )
    .context("Failed to build TLS configuration")?;

    let manager = ConnectionManager::new(
        Arc::new(connector),
        config.endpoint.endpoint()?,
        ConnectionManagerConfig {
            backoff: config.reconnect.backoff(),
            max_message_bytes: config.protocol.max_message_bytes,
        },
    );

    if !SystemIdentity::is_supported() {
        warn!("Interface enumeration unsupported here; shutdown commands cannot match");
    }

    let handler = ProtocolHandler::new(
        HandlerSettings::from(&config.protocol),
        manager.clone(),
        Arc::new(SystemIdentity),
        Arc::new(SystemPower::new(&config.power)),
    )
    .spawn();
    manager.add_observer(handler.observer());

    if let Some(addr) = config.metrics.api_bind {
        start_api_server(
            addr,
            StatusSource {
                manager: manager.clone(),
                indicator: handler.indicator(),
            },
        )
        .with_context(|| format!("Failed to bind status API on {}", addr))?;
    }

    let store = CredentialStore::from_config(&config.credentials)?;
    apply_credentials(&manager, &store).await;

    let mut reload = ReloadSignal::new()?;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            _ = reload.recv() => {
                info!(path = ?store.path(), "Reloading credentials");
                apply_credentials(&manager, &store).await;
            }
        }
    }

    manager.disconnect().await;
    handler.shutdown().await;

    info!("Agent stopped");
    Ok(())
}

/// (Re)connect with the stored credentials, or stay idle without them
async fn apply_credentials(manager: &ConnectionManager, store: &CredentialStore) {
    match store.load() {
        Some(credentials) => manager.connect(credentials).await,
        None => {
            manager.disconnect().await;
            warn!(
                path = ?store.path(),
                "No usable credentials; run `wolskill-agent configure` and send SIGHUP"
            );
        }
    }
}

fn configure(config_path: PathBuf, credentials: Credentials) -> Result<()> {
    if !credentials.is_valid() {
        bail!("identity id and license must both be non-empty");
    }

    let config = load_config(&config_path)?;
    let store = CredentialStore::from_config(&config.credentials)?;
    store.save(&credentials)?;

    println!("Credentials saved to {}", store.path().display());
    println!("Send SIGHUP to a running agent to reconnect with them.");
    Ok(())
}

fn list_interfaces() -> Result<()> {
    let interfaces = SystemIdentity.interfaces();
    if interfaces.is_empty() {
        println!("No interfaces with a hardware address found");
        return Ok(());
    }

    println!("{}", identity_report(&interfaces));
    for iface in &interfaces {
        println!("{:<16} {}", iface.name, iface.token());
    }
    Ok(())
}

async fn test_connection(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let store = CredentialStore::from_config(&config.credentials)?;
    let credentials = store
        .load()
        .ok_or_else(|| anyhow!("no usable credentials at {:?}", store.path()))?;

    let endpoint = config.endpoint.endpoint()?;
    info!(%endpoint, "Testing connection to endpoint");

    let connector = WsConnector::new(
        config.endpoint.insecure,
        config.endpoint.connect_timeout(),
        config.protocol.max_message_bytes,
    )?;

    match connector.open(&endpoint, &credentials).await {
        Ok(channel) => {
            Session::new(channel, config.protocol.max_message_bytes)
                .close()
                .await;
            info!("Connection test successful!");
            Ok(())
        }
        Err(e) => {
            error!(reason = e.reason(), "Connection test failed");
            Err(e.into())
        }
    }
}

fn autostart(action: AutostartAction) -> Result<()> {
    let autostart =
        Autostart::user_default().ok_or_else(|| anyhow!("no user configuration directory"))?;
    let exe = std::env::current_exe().context("Failed to resolve executable path")?;

    match action {
        AutostartAction::Enable => {
            autostart.set(true, &exe)?;
            println!("Autostart enabled ({})", autostart.entry_path().display());
        }
        AutostartAction::Disable => {
            autostart.set(false, &exe)?;
            println!("Autostart disabled");
        }
        AutostartAction::Status => {
            let state = if autostart.is_enabled(&exe)? {
                "enabled"
            } else {
                "disabled"
            };
            println!("Autostart {}", state);
        }
    }
    Ok(())
}

/// SIGHUP on unix; never fires elsewhere
struct ReloadSignal {
    #[cfg(unix)]
    inner: signal::unix::Signal,
}

impl ReloadSignal {
    fn new() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            inner: signal::unix::signal(signal::unix::SignalKind::hangup())
                .context("Failed to install SIGHUP handler")?,
        })
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if self.inner.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
