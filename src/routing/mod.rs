pub mod dispatch;

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::config::AppConfig;
use crate::error::RelayError;

const SERVICE_PREFIX: &str = "service/";

/// Read-only alias table built once from `services:` in the config.
#[derive(Debug, Clone, Default)]
pub struct ServiceTable {
    /// Alias -> base URL with any trailing `/` removed.
    bases: FxHashMap<Box<str>, Arc<str>>,
}

impl ServiceTable {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::from_entries(
            config
                .services
                .iter()
                .map(|(alias, base)| (alias.as_str(), base.as_str())),
        )
    }

    #[must_use]
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let bases = entries
            .into_iter()
            .map(|(alias, base)| (Box::from(alias), Arc::from(base.trim_end_matches('/'))))
            .collect();
        Self { bases }
    }

    #[must_use]
    pub fn lookup(&self, alias: &str) -> Option<&str> {
        self.bases.get(alias).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

/// Where a resolved target came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOrigin {
    Alias(Arc<str>),
    External,
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOrigin::Alias(alias) => write!(f, "service:{alias}"),
            TargetOrigin::External => write!(f, "external"),
        }
    }
}

/// Absolute upstream URL for one request. Derived once, never mutated.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    url: url::Url,
    origin: TargetOrigin,
}

impl ResolvedTarget {
    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    #[must_use]
    pub fn origin(&self) -> &TargetOrigin {
        &self.origin
    }

    /// Value for the outbound `Host` header: host plus any non-default port.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

/// Resolve an inbound path (base path already removed) and query into an upstream URL.
///
/// `service/<alias>[/<rest>]` routes through the service table; anything else is
/// treated as an external URL with `https://` assumed when no scheme is given.
///
/// # Errors
///
/// [`RelayError::MissingTarget`] for an empty path, [`RelayError::UnknownService`]
/// for an alias miss, [`RelayError::InvalidTarget`] when the result is not an
/// absolute URL with a host.
pub fn resolve_target(
    services: &ServiceTable,
    path: &str,
    query: Option<&str>,
) -> Result<ResolvedTarget, RelayError> {
    let raw = path.strip_prefix('/').unwrap_or(path);
    if raw.is_empty() {
        return Err(RelayError::MissingTarget);
    }

    if let Some(alias_path) = raw.strip_prefix(SERVICE_PREFIX) {
        let (alias, rest) = match alias_path.find('/') {
            Some(idx) => alias_path.split_at(idx),
            None => (alias_path, ""),
        };
        let base = services
            .lookup(alias)
            .ok_or_else(|| RelayError::UnknownService(alias.to_string()))?;
        let url = parse_absolute(&with_query(format!("{base}{rest}"), query))?;
        return Ok(ResolvedTarget {
            url,
            origin: TargetOrigin::Alias(Arc::from(alias)),
        });
    }

    let absolute = if has_http_scheme(raw) {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = parse_absolute(&with_query(absolute, query))?;
    Ok(ResolvedTarget {
        url,
        origin: TargetOrigin::External,
    })
}

/// `http:` / `https:` prefix, case-insensitive. A collapsed `https:/host` still
/// counts; the URL parser restores the missing slash.
fn has_http_scheme(raw: &str) -> bool {
    let lower = raw.get(..6).unwrap_or(raw).to_ascii_lowercase();
    lower.starts_with("http:") || lower.starts_with("https:")
}

fn with_query(mut target: String, query: Option<&str>) -> String {
    if let Some(query) = query {
        target.push('?');
        target.push_str(query);
    }
    target
}

fn parse_absolute(raw: &str) -> Result<url::Url, RelayError> {
    let url =
        url::Url::parse(raw).map_err(|err| RelayError::InvalidTarget(format!("{raw}: {err}")))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(RelayError::InvalidTarget(format!("{raw}: missing host")));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ServiceTable {
        ServiceTable::from_entries([
            ("deepseek", "http://127.0.0.1:5001"),
            ("qwen", "http://127.0.0.1:3000/"),
        ])
    }

    #[test]
    fn test_empty_path_is_missing_target() {
        assert!(matches!(
            resolve_target(&table(), "/", None),
            Err(RelayError::MissingTarget)
        ));
        assert!(matches!(
            resolve_target(&table(), "", Some("a=1")),
            Err(RelayError::MissingTarget)
        ));
    }

    #[test]
    fn test_alias_with_rest_and_query() {
        let target = resolve_target(
            &table(),
            "/service/deepseek/v1/chat/completions",
            Some("stream=true"),
        )
        .unwrap();
        assert_eq!(
            target.as_str(),
            "http://127.0.0.1:5001/v1/chat/completions?stream=true"
        );
        assert_eq!(target.origin(), &TargetOrigin::Alias(Arc::from("deepseek")));
        assert_eq!(target.host_header(), "127.0.0.1:5001");
    }

    #[test]
    fn test_alias_base_trailing_slash_trimmed() {
        let target = resolve_target(&table(), "/service/qwen/v1/models", None).unwrap();
        assert_eq!(target.as_str(), "http://127.0.0.1:3000/v1/models");
    }

    #[test]
    fn test_alias_without_rest() {
        let target = resolve_target(&table(), "/service/deepseek", None).unwrap();
        assert_eq!(target.as_str(), "http://127.0.0.1:5001/");
    }

    #[test]
    fn test_unknown_alias() {
        let err = resolve_target(&table(), "/service/nope/v1", None).unwrap_err();
        assert!(matches!(err, RelayError::UnknownService(ref alias) if alias == "nope"));
    }

    #[test]
    fn test_external_without_scheme_defaults_to_https() {
        let target =
            resolve_target(&table(), "/api.openai.com/v1/chat/completions", Some("x=1")).unwrap();
        assert_eq!(
            target.as_str(),
            "https://api.openai.com/v1/chat/completions?x=1"
        );
        assert_eq!(target.origin(), &TargetOrigin::External);
        assert_eq!(target.host_header(), "api.openai.com");
    }

    #[test]
    fn test_external_host_starting_with_http_gets_scheme() {
        let target = resolve_target(&table(), "/httpbin.org/get", None).unwrap();
        assert_eq!(target.as_str(), "https://httpbin.org/get");
    }

    #[test]
    fn test_external_with_explicit_scheme() {
        let target = resolve_target(&table(), "/http://127.0.0.1:9000/v1", None).unwrap();
        assert_eq!(target.as_str(), "http://127.0.0.1:9000/v1");
        assert_eq!(target.host_header(), "127.0.0.1:9000");
    }

    #[test]
    fn test_external_collapsed_scheme_slashes() {
        let target = resolve_target(&table(), "/https:/example.com/a", None).unwrap();
        assert_eq!(target.as_str(), "https://example.com/a");
    }

    #[test]
    fn test_default_port_not_in_host_header() {
        let target = resolve_target(&table(), "/https://example.com:443/a", None).unwrap();
        assert_eq!(target.host_header(), "example.com");
    }

    #[test]
    fn test_unparseable_target() {
        let err = resolve_target(&table(), "/https://", None).unwrap_err();
        assert!(matches!(err, RelayError::InvalidTarget(_)));
    }
}
