use std::io::{self, IsTerminal, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug, info, warn};
use tokio::net::TcpListener;

use hookrelay::agent::Dispatcher;
use hookrelay::config::{
    AgentOptions, AgentSettings, DEFAULT_HUB_PORT, FileConfig, config_file_path,
};
use hookrelay::credentials::token_from_env;
use hookrelay::github::GithubClient;
use hookrelay::hub::{self, Hub};
use hookrelay::lifecycle::{
    EndReason, Session, SessionError, SessionSettings, shutdown_signal,
};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    match cli.command {
        Command::Serve(cmd) => run_serve(cmd),
        Command::Listen(cmd) => run_listen(cli.common, cmd),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Receive GitHub webhooks on a machine without a public address.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the public relay hub
    Serve(ServeCommand),
    /// Register a webhook and stream its deliveries to this machine
    Listen(ListenCommand),
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Address to bind
    #[arg(long, env = "HOOKRELAY_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_HUB_PORT)]
    port: u16,
}

#[derive(Debug, Clone, Args)]
struct ListenCommand {
    /// Repository as owner/repo (default: read from the git remote)
    #[arg(long, value_name = "OWNER/REPO")]
    repo: Option<String>,
    /// Git remote to read the repository from
    #[arg(long, value_name = "NAME")]
    remote: Option<String>,
    /// Only handle these events (comma separated or repeated)
    #[arg(long, value_name = "EVENT", value_delimiter = ',')]
    only: Vec<String>,
    /// Pretty-print received deliveries
    #[arg(long)]
    pretty: bool,
    /// Save each delivery to a file
    #[arg(long)]
    save: bool,
    /// Directory for saved deliveries (implies --save)
    #[arg(long, value_name = "DIR")]
    save_dir: Option<PathBuf>,
    /// Hub base URL
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,
    /// Re-post each delivery's payload to this URL
    #[arg(long, value_name = "URL")]
    forward: Option<String>,
    /// GitHub API root
    #[arg(long, value_name = "URL")]
    github_api: Option<String>,
    /// Seconds between keepalive pings
    #[arg(long, value_name = "SECS")]
    ping_interval: Option<u64>,
    /// Seconds to wait for the hub to accept the socket
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,
}

impl From<ListenCommand> for AgentOptions {
    fn from(cmd: ListenCommand) -> Self {
        Self {
            repo: cmd.repo,
            remote: cmd.remote,
            only: cmd.only,
            pretty: cmd.pretty,
            save: cmd.save,
            save_dir: cmd.save_dir,
            endpoint: cmd.endpoint,
            forward: cmd.forward,
            github_api: cmd.github_api,
            ping_interval_secs: cmd.ping_interval,
            connect_timeout_secs: cmd.connect_timeout,
        }
    }
}

fn init_logging(common: &CommonOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if common.quiet {
        log::set_max_level(LevelFilter::Off);
        return;
    }

    let level = match effective_log_level(common) {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hookrelay={level},tower_http={level}")));

    // Logs go to stderr; stdout carries the deliveries.
    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .ok();
    } else {
        let disable_color = std::env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(!disable_color),
            )
            .try_init()
            .ok();
    }
}

fn effective_log_level(common: &CommonOpts) -> LevelFilter {
    if common.trace {
        LevelFilter::Trace
    } else if common.debug {
        LevelFilter::Debug
    } else {
        match common.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[tokio::main]
async fn run_serve(cmd: ServeCommand) -> Result<()> {
    let addr = SocketAddr::new(cmd.bind, cmd.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding hub to {addr}"))?;
    info!("Hub listening on {}", addr);

    hub::serve(listener, Arc::new(Hub::new()), shutdown_signal())
        .await
        .context("hub server failed")?;

    info!("Hub stopped");
    Ok(())
}

#[tokio::main]
async fn run_listen(common: CommonOpts, cmd: ListenCommand) -> Result<()> {
    let config_path = config_file_path(common.config)?;
    debug!("Reading configuration from {}", config_path.display());
    let file = FileConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let settings = AgentSettings::merge(cmd.into(), file);

    let token = token_from_env()?;
    let repo = settings.resolve_repo().await?;
    info!("Relaying webhooks for {}", repo);

    let client = GithubClient::new(&settings.github_api, token, repo)
        .context("building GitHub client")?;
    let dispatcher = Dispatcher::stdout(settings.dispatch.clone())?;

    let mut session_settings = SessionSettings::new(&settings.endpoint);
    session_settings.ping_interval = settings.ping_interval;
    session_settings.connect_timeout = settings.connect_timeout;

    let report = match Session::new(Arc::new(client), session_settings, dispatcher)
        .run(shutdown_signal())
        .await
    {
        Ok(report) => report,
        Err(SessionError::Interrupted(during)) => {
            info!("Stopped while {}; no webhook was left behind", during);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if let EndReason::Transport(outcome) = &report.ended_by {
        warn!("Hub connection ended: {:?}", outcome);
    }
    for step in &report.teardown_failures {
        warn!("Cleanup step failed: {}", step);
    }
    info!("Session for hook {} finished", report.hook_id);

    Ok(())
}
