use clap::Parser;
use ledger_common::{ChaincodeId, LedgerError};
use ledger_node::{DevNetwork, DevNetworkConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command line arguments for the development network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to listen on; every service picks a free port
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,

    /// Number of endorsing peers
    #[arg(short, long, default_value_t = 2)]
    peers: usize,

    /// Genesis state as key=value pairs
    #[arg(short, long, value_delimiter = ',', default_value = "a=500,b=200")]
    init: Vec<String>,

    /// Seed the peer identities are derived from (32 bytes in hex format)
    #[arg(short, long)]
    seed: Option<String>,

    /// Name of the installed chaincode
    #[arg(long, default_value = "example_cc")]
    chaincode: String,
}

fn parse_genesis(pairs: &[String]) -> Result<Vec<(String, String)>, LedgerError> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(LedgerError::ConfigError(format!(
                "Genesis entry '{}' is not key=value",
                pair
            ))),
        })
        .collect()
}

fn parse_seed(seed: Option<&str>) -> Result<[u8; 32], LedgerError> {
    match seed {
        Some(seed) => hex::decode(seed)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to parse seed: {}", e)))?
            .try_into()
            .map_err(|_| {
                LedgerError::ConfigError("Seed must be 32 bytes (64 hex characters)".to_string())
            }),
        None => Ok(rand::random()),
    }
}

async fn run(args: Args) -> Result<(), LedgerError> {
    let config = DevNetworkConfig {
        host: args.address,
        peers: args.peers,
        genesis: parse_genesis(&args.init)?,
        seed: parse_seed(args.seed.as_deref())?,
        chaincode: ChaincodeId {
            name: args.chaincode,
            version: "1".to_string(),
        },
    };
    let network = DevNetwork::start(config).await?;
    for (name, url) in &network.peer_urls {
        info!("Peer {} at {}", name, url);
    }
    info!("Orderer at {}", network.orderer_url);
    info!("Event hub at {}", network.event_hub_url);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| LedgerError::NetworkError(e.to_string()))?;
    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(args).await {
        error!("Node failed: {}", e);
        std::process::exit(1);
    }
}
