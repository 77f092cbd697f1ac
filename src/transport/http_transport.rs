use std::sync::Once;
use std::time::Duration;

use crate::config::{RelayConfig, ServerConfig};
use crate::error::RelayError;

use super::outbound::OutboundRequest;

static RUSTLS_PROVIDER_INIT: Once = Once::new();

fn build_reqwest_client(
    server: &ServerConfig,
    relay: &RelayConfig,
) -> Result<reqwest::Client, RelayError> {
    let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
    };

    // No overall timeout: a streaming body may legitimately outlive it. The header
    // phase is bounded in `send`, stalls after that by the stream watchdog.
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(server.http_pool_max_idle_per_host.max(1))
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(server.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(relay.accept_invalid_certs);

    if !server.http_use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| RelayError::Internal(format!("Failed to build HTTP client: {err}")))
}

/// HTTP transport client for sending requests to upstream targets.
pub struct HttpTransport {
    client: reqwest::Client,
    header_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with connection pooling and timeouts from config.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Internal`] when the underlying client cannot be built.
    pub fn new(server: &ServerConfig, relay: &RelayConfig) -> Result<Self, RelayError> {
        RUSTLS_PROVIDER_INIT.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });

        if relay.accept_invalid_certs {
            tracing::warn!("upstream TLS certificate validation is disabled");
        }

        Ok(Self {
            client: build_reqwest_client(server, relay)?,
            header_timeout: relay.upstream_timeout(),
        })
    }

    /// Send one upstream request and wait for its response headers.
    ///
    /// The body is left unread. Never retried.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UpstreamFetch`] on connect or transport failure, or
    /// when headers do not arrive within the configured upstream timeout.
    pub async fn send(&self, request: OutboundRequest) -> Result<reqwest::Response, RelayError> {
        let request = request.into_reqwest();
        match tokio::time::timeout(self.header_timeout, self.client.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(RelayError::UpstreamFetch(describe_reqwest_error(&err))),
            Err(_) => Err(RelayError::UpstreamFetch(format!(
                "upstream did not respond within {}s",
                self.header_timeout.as_secs()
            ))),
        }
    }
}

/// Flatten a reqwest error and its source chain into one line.
fn describe_reqwest_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
