use ledger_common::LedgerError;
use serde::Deserialize;
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::Uri;

/// Transport options applied to every channel built for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointOptions {
    /// Upper bound for a single encoded message in either direction.
    pub max_message_size: Option<usize>,
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Bound on a whole exchange, from sending the request to the last reply.
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// How long a graceful shutdown waits for the remote close handshake.
    #[serde(with = "millis")]
    pub close_timeout: Duration,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        EndpointOptions {
            max_message_size: Some(4 * 1024 * 1024),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// A validated network address of a peer, orderer or event hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    url: String,
    tls: bool,
    options: EndpointOptions,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        options: EndpointOptions,
    ) -> Result<Self, LedgerError> {
        let name = name.into();
        let url = url.into();
        let invalid = |reason: &str| LedgerError::InvalidEndpoint {
            url: url.clone(),
            reason: reason.to_string(),
        };

        if name.trim().is_empty() {
            return Err(invalid("endpoint name must not be empty"));
        }
        let uri: Uri = url.parse().map_err(|_| invalid("not a valid URL"))?;
        let tls = match uri.scheme_str() {
            Some("ws") => false,
            Some("wss") if cfg!(feature = "tls") => true,
            Some("wss") => return Err(invalid("TLS support is not enabled in this build")),
            Some(_) => return Err(invalid("scheme must be ws or wss")),
            None => return Err(invalid("missing scheme")),
        };
        if uri.host().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }
        if uri.port_u16().is_none() {
            return Err(invalid("missing port"));
        }
        if options.request_timeout.is_zero() {
            return Err(invalid("request_timeout must be positive"));
        }
        if options.max_message_size == Some(0) {
            return Err(invalid("max_message_size must be positive"));
        }

        Ok(Endpoint {
            name,
            url,
            tls,
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(result: Result<Endpoint, LedgerError>) -> String {
        match result {
            Err(LedgerError::InvalidEndpoint { reason, .. }) => reason,
            other => panic!("expected InvalidEndpoint, got {:?}", other),
        }
    }

    #[test]
    fn accepts_websocket_url_with_port() {
        let endpoint =
            Endpoint::new("orderer0", "ws://127.0.0.1:7050", EndpointOptions::default()).unwrap();
        assert_eq!(endpoint.name(), "orderer0");
        assert_eq!(endpoint.url(), "ws://127.0.0.1:7050");
        assert!(!endpoint.is_tls());
    }

    #[test]
    fn rejects_malformed_addresses_before_any_io() {
        let cases = [
            ("", "ws://localhost:7050", "endpoint name must not be empty"),
            ("o", "grpc://localhost:7050", "scheme must be ws or wss"),
            ("o", "ws://localhost", "missing port"),
            ("o", "localhost:7050", "missing scheme"),
            ("o", "not a url", "not a valid URL"),
        ];
        for (name, url, expected) in cases {
            let result = Endpoint::new(name, url, EndpointOptions::default());
            assert_eq!(reason(result), expected, "{}", url);
        }
    }

    #[test]
    fn rejects_zero_request_timeout() {
        let opts = EndpointOptions {
            request_timeout: Duration::ZERO,
            ..EndpointOptions::default()
        };
        assert_eq!(
            reason(Endpoint::new("o", "ws://localhost:7050", opts)),
            "request_timeout must be positive"
        );
    }

    #[test]
    fn rejects_zero_message_size() {
        let opts = EndpointOptions {
            max_message_size: Some(0),
            ..EndpointOptions::default()
        };
        assert_eq!(
            reason(Endpoint::new("o", "ws://localhost:7050", opts)),
            "max_message_size must be positive"
        );
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: EndpointOptions = serde_yaml::from_str("connect_timeout: 250").unwrap();
        assert_eq!(opts.connect_timeout, Duration::from_millis(250));
        assert_eq!(opts.close_timeout, Duration::from_secs(5));
        assert_eq!(opts.request_timeout, Duration::from_secs(30));
        assert_eq!(opts.max_message_size, Some(4 * 1024 * 1024));
    }
}
