//! kanrisha binary.
//!
//! Runs the service manager daemon, or acts as a client of a running one.

use clap::{Parser, Subcommand, ValueEnum};
use ichirou_config::load_system_config;
use kanrisha::{ChannelClient, Daemon, Request, Response, ServiceStatus};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "kanrisha",
    about = "kanrisha - service manager for the ichirou init system",
    version
)]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Command channel socket, overriding the configuration
    #[arg(short, long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service manager daemon
    Daemon,

    /// List services
    List {
        /// Which services to list (all available ones by default)
        #[arg(value_enum)]
        which: Option<ListKind>,
    },

    /// Print the log of a service
    Log {
        /// Service name
        name: String,
    },

    /// Show service status
    Status {
        /// Service name
        name: String,
        /// Print the raw JSON status
        #[arg(long)]
        json: bool,
    },

    /// Start a service at boot
    Enable {
        /// Service name
        name: String,
    },

    /// Stop starting a service at boot
    Disable {
        /// Service name
        name: String,
    },

    /// Start a service, or every enabled service
    Start {
        /// Service name
        name: Option<String>,
    },

    /// Stop a service, or every running service
    Stop {
        /// Service name
        name: Option<String>,
    },

    /// Restart a service
    Restart {
        /// Service name
        name: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListKind {
    Enabled,
    Running,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = load_system_config(cli.config.as_deref())?.daemon;
    if let Some(socket) = cli.socket {
        config.channel_path = socket;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let request = match cli.command {
        Commands::Daemon => {
            info!(services = %config.services_dir.display(), "Starting service manager");
            return runtime.block_on(Daemon::new(config).run()).map_err(Into::into);
        }
        Commands::List { which } => match which {
            None => Request::ListAvailable,
            Some(ListKind::Enabled) => Request::ListEnabled,
            Some(ListKind::Running) => Request::ListRunning,
        },
        Commands::Log { name } => Request::ShowLog(name),
        Commands::Status { name, json } => {
            let response = runtime.block_on(send(&config.channel_path, Request::Status(name)))?;
            if response.is_success() && !json {
                let status: ServiceStatus = serde_json::from_str(&response.body)?;
                print!("{}", status.render());
            } else {
                finish(&response);
            }
            exit_with(&response);
        }
        Commands::Enable { name } => Request::Enable(name),
        Commands::Disable { name } => Request::Disable(name),
        Commands::Start { name } => name.map_or(Request::StartAll, Request::StartOne),
        Commands::Stop { name } => name.map_or(Request::StopAll, Request::StopOne),
        Commands::Restart { name } => Request::RestartOne(name),
    };

    let response = runtime.block_on(send(&config.channel_path, request))?;
    finish(&response);
    exit_with(&response);
}

async fn send(path: &std::path::Path, request: Request) -> kanrisha::Result<Response> {
    ChannelClient::new(path).send(&request).await
}

/// Print the response body, to stderr when the command failed.
fn finish(response: &Response) {
    if response.is_success() {
        print!("{}", response.body);
    } else {
        eprint!("{}", response.body);
    }
}

fn exit_with(response: &Response) -> ! {
    std::process::exit(if response.is_success() { 0 } else { 1 })
}
