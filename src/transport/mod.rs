mod http_transport;
pub mod outbound;

pub use http_transport::HttpTransport;
pub use outbound::{build_upstream_headers, method_carries_body, OutboundRequest};
