use axum::{routing::get, routing::post, Router};
use clap::Parser;
use ledger_client::client::{ClientConfig, LedgerClient, NetworkEndpoints};
use ledger_client::endpoint::{Endpoint, EndpointOptions};
use ledger_client::rest_api::*;
use ledger_common::{ChaincodeId, Crypto, LedgerError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: String,

    /// Address the REST API listens on
    #[arg(short, long, default_value = "127.0.0.1:3001")]
    listen: SocketAddr,

    /// Hex encoded 32 byte signing seed; a random identity is used when absent
    #[arg(short, long)]
    seed: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct EndpointEntry {
    name: String,
    url: String,
}

fn default_wait_time_secs() -> u64 {
    30
}

fn default_proposal_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

// The top-level config structure.
#[derive(Debug, serde::Deserialize)]
struct Config {
    peers: Vec<EndpointEntry>,
    orderer: EndpointEntry,
    event_hub: EndpointEntry,
    chaincode: ChaincodeId,
    #[serde(default = "default_wait_time_secs")]
    wait_time_secs: u64,
    #[serde(default = "default_proposal_timeout_secs")]
    proposal_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    max_message_size: Option<usize>,
}

impl Config {
    fn load(path: &str) -> Result<Self, LedgerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to read {}: {}", path, e)))?;
        serde_yaml::from_str(&content)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to parse {}: {}", path, e)))
    }

    fn endpoints(&self) -> Result<NetworkEndpoints, LedgerError> {
        let options = EndpointOptions {
            max_message_size: self
                .max_message_size
                .or(EndpointOptions::default().max_message_size),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..EndpointOptions::default()
        };
        let endpoint = |entry: &EndpointEntry| {
            Endpoint::new(entry.name.as_str(), entry.url.as_str(), options.clone())
        };
        if self.peers.is_empty() {
            return Err(LedgerError::ConfigError("At least one peer is required".to_string()));
        }
        Ok(NetworkEndpoints {
            peers: self.peers.iter().map(endpoint).collect::<Result<_, _>>()?,
            orderer: endpoint(&self.orderer)?,
            event_hub: endpoint(&self.event_hub)?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), LedgerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let endpoints = config.endpoints()?;
    let crypto = match &args.seed {
        Some(seed) => Crypto::from_hex_seed(seed)?,
        None => Crypto::generate(),
    };

    let client_config = ClientConfig {
        chaincode: config.chaincode.clone(),
        proposal_timeout: Duration::from_secs(config.proposal_timeout_secs),
        commit_timeout: Duration::from_secs(config.wait_time_secs),
    };
    let client =
        Arc::new(LedgerClient::connect(Arc::new(crypto), client_config, endpoints).await?);

    // Setup REST API endpoints.
    let app = Router::new()
        .route("/invoke", post(invoke))
        .route("/query", post(query))
        .route("/metrics", get(metrics))
        .with_state(Arc::clone(&client));

    info!("Starting REST API on {}", args.listen);
    let listener = TcpListener::bind(args.listen)
        .await
        .map_err(|e| LedgerError::NetworkError(e.to_string()))?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| LedgerError::NetworkError(e.to_string()));

    client.shutdown(false).await;
    served
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
peers:
  - name: peer0
    url: ws://127.0.0.1:7051
  - name: peer1
    url: ws://127.0.0.1:7056
orderer:
  name: orderer0
  url: ws://127.0.0.1:7050
event_hub:
  name: eventhub0
  url: ws://127.0.0.1:7053
chaincode:
  name: example_cc
  version: "1"
max_message_size: 1048576
request_timeout_secs: 5
"#;

    #[test]
    fn yaml_config_builds_validated_endpoints() {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();
        assert_eq!(config.wait_time_secs, 30);
        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints.peers.len(), 2);
        assert_eq!(endpoints.peers[1].name(), "peer1");
        assert_eq!(endpoints.orderer.options().max_message_size, Some(1048576));
        assert_eq!(endpoints.peers[0].options().request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_url_in_config_is_rejected() {
        let yaml = CONFIG.replace("ws://127.0.0.1:7050", "http://orderer");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(matches!(
            config.endpoints(),
            Err(LedgerError::InvalidEndpoint { .. })
        ));
    }
}
