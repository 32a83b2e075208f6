//! mcplink - session broker for OAuth-protected MCP tool servers.
//!
//! `serve` runs the session service. The other commands drive a running
//! service through the client runtime.

mod client;

use clap::{Parser, Subcommand};
use mcplink_core::{
    Config, HttpClientFactory, IdentityChain, ServerTarget, SessionService, SessionStore,
};
use mcplink_mcp::TransportKind;
use mcplink_server::AppState;
use mcplink_storage::JsonStorage;
use mcplink_util::{LogConfig, LogLevel};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "mcplink")]
#[command(
    author,
    version,
    about = "Session broker for OAuth-protected MCP tool servers",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the session service
    Serve {
        /// Address to bind to (overrides configuration)
        #[arg(short, long)]
        address: Option<String>,
    },
    /// Connect to a tool server
    Connect {
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Finish connecting after authorizing in the browser
    Resume {
        #[command(flatten)]
        server: ServerArgs,
        /// Session id printed by `connect`
        #[arg(long)]
        session: String,
    },
    /// Call a tool on a server
    Call {
        /// Server name
        server: String,
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// List the sessions the service holds for you
    Sessions {
        /// Print output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show cached connection records
    Status {
        /// Print output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Disconnect a session
    Disconnect {
        /// Session id
        session_id: String,
    },
    /// Show configuration
    Config,
    /// Print version information
    Version,
}

/// How to reach one tool server.
#[derive(clap::Args, Clone)]
struct ServerArgs {
    /// Stable server id
    #[arg(long)]
    id: String,
    /// Server name
    #[arg(long)]
    name: String,
    /// Server URL
    #[arg(long)]
    url: String,
    /// Transport (streamable_http or sse)
    #[arg(long, default_value = "streamable_http")]
    transport: TransportKind,
}

impl ServerArgs {
    fn target(self) -> ServerTarget {
        ServerTarget {
            server_id: self.id,
            server_name: self.name,
            server_url: self.url,
            transport: self.transport,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;
    let (config, sources) = Config::load(Some(&cwd)).await?;

    init_logging(&cli, &config);
    for source in &sources {
        debug!(path = %source.display(), "Loaded config");
    }

    match cli.command {
        Commands::Serve { address } => run_server(&config, address).await,
        Commands::Connect { server } => client::connect(&config, server.target()).await,
        Commands::Resume { server, session } => {
            client::resume(&config, server.target(), session).await
        }
        Commands::Call { server, tool, args } => client::call(&config, server, tool, &args).await,
        Commands::Sessions { json } => client::sessions(&config, json).await,
        Commands::Status { json } => client::status(&config, json).await,
        Commands::Disconnect { session_id } => client::disconnect(&config, &session_id).await,
        Commands::Config => {
            show_config(&config, &sources);
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// The server logs at info by default; client commands only warn so their
/// output stays readable.
fn init_logging(cli: &Cli, config: &Config) {
    let serving = matches!(cli.command, Commands::Serve { .. });
    let fallback = if serving {
        LogLevel::Info
    } else {
        LogLevel::Warn
    };
    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        config.log_level().unwrap_or(fallback)
    };

    mcplink_util::log::init(if serving {
        LogConfig::server(level)
    } else {
        LogConfig::command(level)
    });
}

async fn run_server(config: &Config, address: Option<String>) -> anyhow::Result<()> {
    let storage = JsonStorage::default_location()
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    info!(path = %storage.base_path().display(), "Using session storage");

    let store = Arc::new(SessionStore::new(Arc::new(storage)));
    let service = SessionService::new(store, Arc::new(HttpClientFactory::from_config(config)));
    let identity = IdentityChain::from_config(&config.identity.clone().unwrap_or_default());
    let state = AppState::new(service, Arc::new(identity), config.app_redirect_url());

    let address = address.unwrap_or_else(|| config.server_address());
    mcplink_server::serve(state, &address).await?;
    Ok(())
}

fn show_config(config: &Config, sources: &[PathBuf]) {
    println!("Config sources:");
    if sources.is_empty() {
        println!("  (none)");
    }
    for source in sources {
        println!("  {}", source.display());
    }
    println!();
    println!("Server address:   {}", config.server_address());
    println!("Public URL:       {}", config.public_url());
    println!("App redirect:     {}", config.app_redirect_url());
    println!("Request timeout:  {}s", config.request_timeout().as_secs());
    println!("Record retention: {}h", config.retention().as_secs() / 3600);
}

fn print_version() {
    println!("mcplink {}", env!("CARGO_PKG_VERSION"));
}
