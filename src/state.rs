mod request_id;

use crate::config::AppConfig;
use crate::lifecycle::StreamGate;
use crate::routing::ServiceTable;
use crate::stream::StreamSettings;
use crate::transport::HttpTransport;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    services: ServiceTable,
    stream_settings: StreamSettings,
    stream_gate: StreamGate,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport) -> Self {
        Self::with_stream_gate(config, transport, StreamGate::new())
    }

    /// Build state around an existing gate so the caller keeps a handle for shutdown.
    #[must_use]
    pub fn with_stream_gate(
        config: AppConfig,
        transport: HttpTransport,
        stream_gate: StreamGate,
    ) -> Self {
        let services = ServiceTable::from_config(&config);
        let stream_settings = StreamSettings::from_relay(&config.relay);
        Self {
            config,
            transport,
            services,
            stream_settings,
            stream_gate,
            request_ids: RequestIdGenerator::new(),
        }
    }

    #[must_use]
    pub fn services(&self) -> &ServiceTable {
        &self.services
    }

    #[must_use]
    pub fn stream_settings(&self) -> &StreamSettings {
        &self.stream_settings
    }

    #[must_use]
    pub fn stream_gate(&self) -> &StreamGate {
        &self.stream_gate
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_ids.next_seq()
    }

    #[must_use]
    pub fn request_id(&self, request_seq: u64) -> String {
        self.request_ids.request_id(request_seq)
    }
}
