//! `rendezvous` command line: run the broker, expose or reach a TCP service
//! through it, and inspect its state.

pub mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use rendezvous_client::{BrokerClient, TunnelClient, TunnelHost};
use rendezvous_config::{Config, LogFormat};
use rendezvous_core::Broker;

#[derive(Debug, Parser)]
#[command(
    name = "rendezvous",
    version,
    about = "HTTP polling rendezvous broker and TCP tunnel"
)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the broker
    Serve {
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Host a channel and forward its streams to a local TCP service
    Expose {
        /// Service to expose, as host:port
        target: String,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Attach to a channel and accept local connections for it
    Connect {
        /// Channel id printed by `expose`
        channel: String,

        /// Local address to listen on (defaults to 127.0.0.1 and the host's port)
        #[arg(short, long)]
        listen: Option<String>,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Print the broker's channel listing
    List {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct RemoteArgs {
    /// Broker base URL
    #[arg(short, long)]
    pub broker: Option<String>,

    /// Address to present to the broker instead of our own
    #[arg(long)]
    pub identity: Option<String>,
}

impl Cli {
    /// Fold command line overrides into the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        match &self.command {
            Command::Serve { bind, port } => {
                if let Some(bind) = bind {
                    config.server.bind = bind.clone();
                }
                if let Some(port) = port {
                    config.server.port = *port;
                }
            }
            Command::Expose { remote, .. }
            | Command::Connect { remote, .. }
            | Command::List { remote } => {
                if let Some(url) = &remote.broker {
                    config.client.broker_url = url.clone();
                }
            }
            Command::Config => {}
        }
        if let Some(format) = self.log_format {
            config.logging.format = format.into();
        }
    }
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<()> {
    execute(Cli::parse()).await
}

/// Load the configuration file and environment, then apply `cli`.
pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    logging::init_with(logging::resolve_format(
        cli.log_format.map(Into::into),
        config.logging.format,
    ));

    match cli.command {
        Command::Serve { .. } => serve(&config).await,
        Command::Expose { target, remote } => expose(&config, &target, &remote).await,
        Command::Connect {
            channel,
            listen,
            remote,
        } => connect(&config, &channel, listen, &remote).await,
        Command::List { remote } => {
            let listing = broker_client(&config, &remote)
                .list()
                .await
                .context("Failed to list channels")?;
            print!("{listing}");
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received interrupt, shutting down");
}

fn broker_client(config: &Config, remote: &RemoteArgs) -> BrokerClient {
    let client = BrokerClient::new(config.client.broker_url.as_str());
    match &remote.identity {
        Some(identity) => client.with_identity(identity.as_str()),
        None => client,
    }
}

async fn serve(config: &Config) -> Result<()> {
    rendezvous_server::run(config, Broker::in_memory(), shutdown_signal())
        .await
        .context("Broker stopped with an error")
}

/// Port advertised to the connecting side: the target's port.
pub fn target_port(target: &str) -> Result<u16> {
    let Some((_, port)) = target.rsplit_once(':') else {
        bail!("Target must be host:port, got {target:?}");
    };
    port.parse()
        .with_context(|| format!("Invalid port in target {target:?}"))
}

async fn expose(config: &Config, target: &str, remote: &RemoteArgs) -> Result<()> {
    let port = target_port(target)?;
    let handle = broker_client(config, remote)
        .create(port)
        .await
        .with_context(|| format!("Failed to create channel on {}", config.client.broker_url))?;

    // The id is the only thing the other side needs.
    println!("{}", handle.id());

    let closer = handle.clone();
    let result = TunnelHost::new(handle, target, config.client.clone())
        .run(shutdown_signal())
        .await;

    if let Err(e) = closer.close().await {
        tracing::warn!(channel = %closer.id(), error = %e, "Failed to close channel");
    }
    result.context("Tunnel host stopped with an error")
}

/// Listen address for `connect`: explicit, else loopback on the host's port.
pub fn listen_addr(explicit: Option<String>, advertised: Option<u16>) -> Result<String> {
    match (explicit, advertised) {
        (Some(addr), _) => Ok(addr),
        (None, Some(port)) => Ok(format!("127.0.0.1:{port}")),
        (None, None) => bail!("Channel has no usable port; pass --listen"),
    }
}

async fn connect(
    config: &Config,
    channel: &str,
    listen: Option<String>,
    remote: &RemoteArgs,
) -> Result<()> {
    let handle = broker_client(config, remote)
        .attach(channel)
        .await
        .with_context(|| format!("Failed to attach to channel {channel}"))?;
    let addr = listen_addr(listen, handle.port())?;

    TunnelClient::new(handle, config.client.clone())
        .run(&addr, shutdown_signal())
        .await
        .context("Tunnel client stopped with an error")
}
