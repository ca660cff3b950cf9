#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod commands;

use clap::{Parser, Subcommand};
use hrd_core::PeerAddress;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "hrd")]
#[command(about = "Herald CLI for publishing, subscribing and cluster inspection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a value to a topic
    Publish {
        #[arg(short, long, default_value = "127.0.0.1:7000", help = "Broker address")]
        server: String,
        #[arg(short, long, help = "Topic name")]
        topic: String,
        #[arg(short, long, help = "Value to publish")]
        message: String,
    },
    /// Print the current value of a topic
    Fetch {
        #[arg(short, long, default_value = "127.0.0.1:7000", help = "Broker address")]
        server: String,
        #[arg(short, long, help = "Topic name")]
        topic: String,
    },
    /// Follow a topic, printing every update
    Subscribe {
        #[arg(short, long, default_value = "127.0.0.1:7000", help = "Broker address")]
        server: String,
        #[arg(short, long, help = "Topic name")]
        topic: String,
        #[arg(short = 'n', long, help = "Exit after this many updates")]
        count: Option<usize>,
    },
    /// Add a peer to a broker's peer set
    AddPeer {
        #[arg(short, long, default_value = "127.0.0.1:7000", help = "Broker address")]
        server: String,
        #[arg(short, long, help = "Peer address (host:port)")]
        peer: PeerAddress,
    },
    /// Show role, coordinator and peer liveness of a broker
    Status {
        #[arg(short, long, default_value = "127.0.0.1:7000", help = "Broker address")]
        server: String,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Publish {
            server,
            topic,
            message,
        } => commands::publish(&server, &topic, &message).await,
        Commands::Fetch { server, topic } => commands::fetch(&server, &topic).await,
        Commands::Subscribe {
            server,
            topic,
            count,
        } => commands::subscribe(&server, &topic, count).await,
        Commands::AddPeer { server, peer } => commands::add_peer(&server, &peer).await,
        Commands::Status { server } => commands::status(&server).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
