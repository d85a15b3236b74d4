use clap::Parser;
use ledger_client::{
    ClientConfig, Endpoint, EndpointOptions, InvokeRequest, LedgerClient, NetworkEndpoints,
};
use ledger_common::{ChaincodeId, Crypto, LedgerError, SeekPosition, TransientMap};
use ledger_node::{DevNetwork, DevNetworkConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Boots a development network and runs a transfer through the full pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of endorsing peers
    #[arg(short, long, default_value_t = 2)]
    peers: usize,

    /// Amount moved from a to b
    #[arg(short, long, default_value_t = 100)]
    amount: u64,

    /// Seconds to wait for the commit event
    #[arg(short, long, default_value_t = 30)]
    wait_time_secs: u64,
}

fn chaincode() -> ChaincodeId {
    ChaincodeId {
        name: "example_cc".to_string(),
        version: "1".to_string(),
    }
}

async fn run(args: Args) -> Result<(), LedgerError> {
    let network = DevNetwork::start(DevNetworkConfig {
        host: "127.0.0.1".to_string(),
        peers: args.peers,
        genesis: vec![
            ("a".to_string(), "500".to_string()),
            ("b".to_string(), "200".to_string()),
        ],
        seed: rand::random(),
        chaincode: chaincode(),
    })
    .await?;

    let options = EndpointOptions::default;
    let endpoints = NetworkEndpoints {
        peers: network
            .peer_urls
            .iter()
            .map(|(name, url)| Endpoint::new(name.as_str(), url.as_str(), options()))
            .collect::<Result<_, _>>()?,
        orderer: Endpoint::new("orderer0", network.orderer_url.as_str(), options())?,
        event_hub: Endpoint::new("eventhub0", network.event_hub_url.as_str(), options())?,
    };
    let config = ClientConfig {
        chaincode: chaincode(),
        proposal_timeout: Duration::from_secs(10),
        commit_timeout: Duration::from_secs(args.wait_time_secs),
    };
    let client = LedgerClient::connect(Arc::new(Crypto::generate()), config, endpoints).await?;

    let outcome = transfer(&client, args.amount).await;
    client.shutdown(false).await;
    outcome
}

async fn transfer(client: &LedgerClient, amount: u64) -> Result<(), LedgerError> {
    let mut transient = TransientMap::new();
    transient.insert("result".to_string(), b":)".to_vec());
    info!("Sending transaction proposal move(a,b,{}) to all peers", amount);
    let result = client
        .invoke(InvokeRequest {
            function: "invoke".to_string(),
            args: vec!["move".into(), "a".into(), "b".into(), amount.to_string()],
            transient,
            timeout_ms: None,
        })
        .await?;
    info!(
        "Finished transaction {} in block {}",
        result.tx_id, result.block_number
    );

    let b = client.query("invoke", vec!["query".into(), "b".into()]).await?;
    info!("Query of b returned {}", String::from_utf8_lossy(&b));
    let blocks = client
        .deliver_blocks(SeekPosition::Oldest, SeekPosition::Newest)
        .await?;
    info!("Ledger height is {}", blocks.len());
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        error!("Run failed: {}", e);
        std::process::exit(1);
    }
}
