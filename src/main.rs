use clap::Parser;
use tracing_subscriber::EnvFilter;

use raftkv::server::{Config, Server};
use raftkv::types::ReplicaId;

/// One replica of the key/value store.
#[derive(Parser)]
struct Args {
    /// UDP port of the local control-plane router.
    port: u16,

    /// This replica's id.
    id: String,

    /// Ids of the other replicas in the cluster.
    #[arg(required = true)]
    peers: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    Server::start(Config {
        port: args.port,
        id: ReplicaId::new(args.id),
        peers: args.peers.into_iter().map(ReplicaId::new).collect(),
    })?
    .run()?;

    Ok(())
}
