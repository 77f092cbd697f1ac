use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::Method;

use crate::config::RelayConfig;
use crate::routing::ResolvedTarget;

/// Headers that describe the edge hop and must not reach the upstream.
const EDGE_HEADERS: [&str; 2] = ["cf-ray", "cf-connecting-ip"];

/// Per-connection headers; the transport recomputes framing for the new hop.
const HOP_BY_HOP_HEADERS: [HeaderName; 7] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHORIZATION,
];

const KEEP_ALIVE: &str = "keep-alive";
const PROXY_CONNECTION: &str = "proxy-connection";

/// Fully prepared upstream request.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: url::Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    /// Assemble the outbound request. GET and HEAD never carry a body.
    #[must_use]
    pub fn new(
        method: Method,
        target: &ResolvedTarget,
        inbound_headers: &HeaderMap,
        body: Bytes,
        relay: &RelayConfig,
    ) -> Self {
        let headers = build_upstream_headers(inbound_headers, target, relay);
        let body = method_carries_body(&method).then_some(body);
        Self {
            method,
            url: target.url().clone(),
            headers,
            body,
        }
    }

    pub(crate) fn into_reqwest(self) -> reqwest::Request {
        let mut request = reqwest::Request::new(self.method, self.url);
        *request.headers_mut() = self.headers;
        if let Some(body) = self.body {
            *request.body_mut() = Some(reqwest::Body::from(body));
        }
        request
    }
}

#[must_use]
pub fn method_carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

/// Derive outbound headers from the inbound set.
///
/// Copies everything, then rewrites `Host`, drops edge and hop-by-hop headers,
/// optionally drops `accept-encoding`, and fills `User-Agent`/`Accept` when absent.
#[must_use]
pub fn build_upstream_headers(
    inbound: &HeaderMap,
    target: &ResolvedTarget,
    relay: &RelayConfig,
) -> HeaderMap {
    let mut headers = inbound.clone();

    for name in connection_listed_headers(inbound) {
        headers.remove(name);
    }
    for name in &HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
    headers.remove(KEEP_ALIVE);
    headers.remove(PROXY_CONNECTION);
    for name in EDGE_HEADERS {
        headers.remove(name);
    }
    if relay.strip_accept_encoding {
        headers.remove(header::ACCEPT_ENCODING);
    }

    match HeaderValue::from_str(&target.host_header()) {
        Ok(host) => {
            headers.insert(header::HOST, host);
        }
        Err(_) => {
            headers.remove(header::HOST);
        }
    }

    insert_default(&mut headers, header::USER_AGENT, &relay.default_user_agent);
    insert_default(&mut headers, header::ACCEPT, &relay.default_accept);
    headers
}

/// Names listed in the inbound `Connection` header are hop-by-hop too.
fn connection_listed_headers(inbound: &HeaderMap) -> Vec<HeaderName> {
    inbound
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect()
}

fn insert_default(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if headers.contains_key(&name) {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{resolve_target, ServiceTable};

    fn target(path: &str) -> ResolvedTarget {
        resolve_target(&ServiceTable::default(), path, None).unwrap()
    }

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local:3002"));
        headers.insert("cf-ray", HeaderValue::from_static("abc"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("1.2.3.4"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer k"));
        headers.insert(
            header::CONNECTION,
            HeaderValue::from_static("keep-alive, x-hop"),
        );
        headers.insert("x-hop", HeaderValue::from_static("1"));
        headers.insert(
            header::PROXY_AUTHORIZATION,
            HeaderValue::from_static("Basic cHJveHk6cHc="),
        );
        headers
    }

    #[test]
    fn test_host_rewritten_and_edge_headers_removed() {
        let headers = build_upstream_headers(
            &inbound(),
            &target("/http://127.0.0.1:5001/v1"),
            &RelayConfig::default(),
        );
        assert_eq!(headers.get(header::HOST).unwrap(), "127.0.0.1:5001");
        assert!(headers.get("cf-ray").is_none());
        assert!(headers.get("cf-connecting-ip").is_none());
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-hop").is_none());
        assert!(headers.get(header::PROXY_AUTHORIZATION).is_none());
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer k");
    }

    #[test]
    fn test_accept_encoding_stripping_is_configurable() {
        let mut relay = RelayConfig::default();
        let headers = build_upstream_headers(&inbound(), &target("/example.com"), &relay);
        assert!(headers.get(header::ACCEPT_ENCODING).is_none());

        relay.strip_accept_encoding = false;
        let headers = build_upstream_headers(&inbound(), &target("/example.com"), &relay);
        assert_eq!(headers.get(header::ACCEPT_ENCODING).unwrap(), "gzip");
    }

    #[test]
    fn test_defaults_only_when_absent() {
        let relay = RelayConfig::default();
        let headers = build_upstream_headers(&HeaderMap::new(), &target("/example.com"), &relay);
        assert_eq!(
            headers.get(header::USER_AGENT).unwrap(),
            relay.default_user_agent.as_str()
        );
        assert_eq!(headers.get(header::ACCEPT).unwrap(), "*/*");

        let mut custom = HeaderMap::new();
        custom.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        custom.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let headers = build_upstream_headers(&custom, &target("/example.com"), &relay);
        assert_eq!(headers.get(header::USER_AGENT).unwrap(), "curl/8");
        assert_eq!(headers.get(header::ACCEPT).unwrap(), "text/event-stream");
    }

    #[test]
    fn test_body_dropped_for_get_and_head() {
        let relay = RelayConfig::default();
        let target = target("/example.com/v1");
        let body = Bytes::from_static(b"{\"a\":1}");
        for method in [Method::GET, Method::HEAD] {
            let request =
                OutboundRequest::new(method, &target, &HeaderMap::new(), body.clone(), &relay);
            assert!(request.body.is_none());
        }
        let request = OutboundRequest::new(Method::POST, &target, &HeaderMap::new(), body, &relay);
        assert_eq!(request.body.as_deref(), Some(&b"{\"a\":1}"[..]));
        assert_eq!(request.url.as_str(), "https://example.com/v1");
    }
}
