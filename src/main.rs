//! PeerSync - Host/client object graph synchronization
//!
//! Demo binary: a host publishes a lobby, clients join it with a player and
//! update their score while everyone sees the changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use peersync::config::{self, Config, DispatchMode};
use peersync::dispatch::{EventData, WorkerMarshaller};
use peersync::network::{Network, TcpTransport};
use peersync::protocol::{CoreCode, DEFAULT_PORT, PROTOCOL_VERSION};
use peersync::registry::Role;
use peersync::serialize::{downcast, NetworkList, NetworkObject, Record, RecordSchema, Value, NETWORK_ID};

const LOBBY_TYPE: &str = "demo.Lobby";
const PLAYER_TYPE: &str = "demo.Player";

/// PeerSync - Host/client object graph synchronization
#[derive(Parser)]
#[command(name = "peersync")]
#[command(author = "PeerSync Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Keep an object graph in sync between a host and its clients", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as host (owns the lobby and assigns network ids)
    Host {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Lobby title
        #[arg(short, long, default_value = "PeerSync lobby")]
        title: String,
    },

    /// Run as client (join a host's lobby)
    Client {
        /// Host address to connect to
        #[arg(short, long, default_value = "127.0.0.1")]
        server: String,

        /// Host port
        #[arg(short, long)]
        port: Option<u16>,

        /// Player name (defaults to the configured name)
        #[arg(short, long)]
        name: Option<String>,

        /// Number of score updates to send
        #[arg(long, default_value_t = 10)]
        ticks: u32,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    init_logging(cli.verbose || config.general.verbose, config.general.log_file.as_deref())?;

    match cli.command {
        Commands::Host { port, title } => {
            run_host(config, port, title).await?;
        }
        Commands::Client {
            server,
            port,
            name,
            ticks,
        } => {
            run_client(config, server, port, name, ticks).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_info(&config);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(file_layer)
        .with(filter)
        .init();
    Ok(())
}

fn lobby_schema() -> Arc<RecordSchema> {
    Arc::new(
        RecordSchema::new(LOBBY_TYPE)
            .registrable()
            .value("Title", "")
            .observable("Players"),
    )
}

fn player_schema() -> Arc<RecordSchema> {
    Arc::new(
        RecordSchema::new(PLAYER_TYPE)
            .registrable()
            .value("Name", "")
            .value("Score", 0i32),
    )
}

/// Network with the demo types, handlers and dispatch mode installed
fn build_network(config: &Config, role: Role) -> anyhow::Result<Arc<Network>> {
    let network = Network::new(role, config.network_options())?;
    let types = network.registry().types();
    types.register_schema(&lobby_schema());
    types.register_schema(&player_schema());

    match config.dispatch.mode {
        DispatchMode::Worker => {
            let marshaller = WorkerMarshaller::new("peersync-dispatch")?;
            network.set_marshaller(Arc::new(marshaller));
        }
        DispatchMode::Direct => network.allow_direct_dispatch(true),
    }

    network.on(CoreCode::PropertyUpdated, |_, event| {
        if let (Some(id), Some(property)) = (&event.target_id, &event.property) {
            println!("~ {}.{} = {:?}", id, property, event.value().unwrap_or(&Value::Null));
        }
        Ok(())
    });
    network.on(CoreCode::CollectionChanged, |_, event| {
        if let (Some(id), EventData::Collection(change)) = (&event.target_id, &event.data) {
            println!("~ {} {:?} ({} items)", id, change.action, change.items.len());
        }
        Ok(())
    });
    network.on(CoreCode::Disconnected, |_, event| {
        if let Some(peer) = event.source() {
            println!("- {} disconnected: {:?}", peer, event.value().unwrap_or(&Value::Null));
        }
        Ok(())
    });

    network.diagnostics().set_warning_handler(|message| println!("! {}", message));
    Ok(network)
}

/// Run the host
async fn run_host(config: Config, port: Option<u16>, title: String) -> anyhow::Result<()> {
    let network = build_network(&config, Role::Host)?;
    let transport = TcpTransport::for_network(&network);

    let lobby = Arc::new(Record::new(lobby_schema()));
    lobby.set_value("Title", title.as_str())?;
    network.register_recursive(&(lobby.clone() as Arc<dyn NetworkObject>))?;

    let mut net_config = config.network.clone();
    if let Some(port) = port {
        net_config.port = port;
    }
    let local_addr = transport.listen(&net_config.listen_address()).await?;

    println!("\n========================================");
    println!("  PeerSync Host Running");
    println!("========================================");
    println!("  Name: {}", config.general.name);
    println!("  Listening: {}", local_addr);
    println!("  Lobby: {}", title);
    println!("========================================");
    println!("\nWaiting for clients to connect...");
    println!("Press Ctrl+C to stop.\n");

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    network.shutdown();
    transport.shutdown();
    tracing::info!("Host stopped");

    Ok(())
}

/// Run a client
async fn run_client(
    config: Config,
    server: String,
    port: Option<u16>,
    name: Option<String>,
    ticks: u32,
) -> anyhow::Result<()> {
    let network = build_network(&config, Role::Client)?;
    let transport = TcpTransport::for_network(&network);

    let port = port.unwrap_or(config.network.port);
    println!("Connecting to {}:{}...", server, port);
    transport
        .connect(&server, port, config.network.connect_timeout())
        .await?;

    let name = name.unwrap_or_else(|| config.general.name.clone());
    let session = network.clone();
    let mut play = tokio::task::spawn_blocking(move || join_and_play(&session, &name, ticks));

    tokio::select! {
        result = &mut play => {
            result??;
            println!("Done.");
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nDisconnecting...");
        }
    }

    network.shutdown();
    transport.shutdown();
    tracing::info!("Client disconnected");

    Ok(())
}

/// Blocking part of the client demo
fn join_and_play(network: &Network, name: &str, ticks: u32) -> anyhow::Result<()> {
    let lobby = network
        .request_first_of_type(LOBBY_TYPE)?
        .and_then(downcast::<Record>)
        .ok_or_else(|| anyhow::anyhow!("The host has no lobby"))?;
    println!(
        "Joined lobby '{}' ({})",
        lobby.get_str("Title").unwrap_or_default(),
        lobby.get_str(NETWORK_ID).unwrap_or_default()
    );

    let player = Arc::new(Record::new(player_schema()));
    player.set_value("Name", name)?;
    let player_ref: Arc<dyn NetworkObject> = player.clone();
    network.register(player_ref.clone())?;
    println!("Registered as {}", player.get_str(NETWORK_ID).unwrap_or_default());

    let players = lobby
        .get_object("Players")
        .ok_or_else(|| anyhow::anyhow!("Lobby has no player list"))?;
    if let Some(list) = players.as_list() {
        list.push(Value::Object(player_ref))?;
    }

    for score in 1..=ticks {
        std::thread::sleep(Duration::from_secs(1));
        player.set_value("Score", score as i32)?;
    }
    Ok(())
}

/// Print protocol information
fn print_info(config: &Config) {
    let options = config.network_options();

    println!("PeerSync Information");
    println!("====================\n");

    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Protocol version: {}", PROTOCOL_VERSION);
    println!("Default port: {}", DEFAULT_PORT);
    println!("Frame size: {} bytes", options.buffer_size);
    println!("Header block: {} bytes", options.header_size);
    match options.max_clients {
        Some(max) => println!("Client limit: {}", max),
        None => println!("Client limit: none"),
    }
    println!("Dispatch: {:?}", config.dispatch.mode);

    if let Some(dir) = dirs::config_dir() {
        println!("\nConfig file: {}", dir.join("peersync/config.toml").display());
    }
}
