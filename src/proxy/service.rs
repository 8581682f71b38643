//! Resolved services and connect targets.
//!
//! # Responsibilities
//! - Turn each `ServiceConfig` into parsed connect targets and lookup tables
//! - Select the service whose accept prefix is the longest match for a path
//! - Rotate through a service's connect targets round-robin
//! - Map accept-side request URIs onto the chosen target's path

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use super::ProxyError;
use crate::cache_control::CacheControlTable;
use crate::config::{ForwardedPolicy, ServiceConfig};

/// One backend endpoint of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    uri: String,
    authority: String,
    path: String,
}

impl ConnectTarget {
    /// Parse an `http://host[:port][/path]` connect URI. The port defaults
    /// to 80.
    pub fn parse(raw: &str) -> Result<Self, ProxyError> {
        let invalid = |reason: String| ProxyError::InvalidTarget {
            uri: raw.to_string(),
            reason,
        };
        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let port = url.port_or_known_default().unwrap_or(80);
        // `host_str` keeps the brackets around IPv6 literals.
        let authority = format!("{host}:{port}");
        Ok(Self {
            uri: raw.trim_end_matches('/').to_string(),
            authority,
            path: url.path().to_string(),
        })
    }

    /// A bare `host:port`, as used for TLS passthrough.
    pub fn from_authority(authority: impl Into<String>) -> Self {
        let authority = authority.into();
        Self {
            uri: format!("tcp://{authority}"),
            authority,
            path: "/".to_string(),
        }
    }

    /// The configured URI without a trailing slash.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// `host:port` to dial; also sent as `Host`.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Path prefix requests are mapped onto.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri)
    }
}

#[derive(Debug)]
pub struct Service {
    name: Arc<str>,
    accept_prefix: String,
    targets: Vec<ConnectTarget>,
    next: AtomicUsize,
    forwarded: ForwardedPolicy,
    hop_by_hop: Vec<String>,
    location_rewrites: Vec<(String, String)>,
    cookie_domain_rewrites: Vec<(String, String)>,
    cookie_path_rewrites: Vec<(String, String)>,
    cache_control: CacheControlTable,
    keep_alive: bool,
    gzip: bool,
    sse_padding: bool,
}

impl Service {
    /// Build a service from its config section.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ProxyError> {
        let targets = config
            .connect
            .iter()
            .map(|raw| ConnectTarget::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;
        if targets.is_empty() {
            return Err(ProxyError::InvalidTarget {
                uri: String::new(),
                reason: format!("service {:?} has no connect targets", config.name),
            });
        }
        Ok(Self {
            name: Arc::from(config.name.as_str()),
            accept_prefix: config.accept_prefix.clone(),
            targets,
            next: AtomicUsize::new(0),
            forwarded: config.forwarded,
            hop_by_hop: config.hop_by_hop.clone(),
            location_rewrites: longest_first(&config.location_rewrites),
            cookie_domain_rewrites: longest_first(&config.cookie_domain_rewrites),
            cookie_path_rewrites: longest_first(&config.cookie_path_rewrites),
            cache_control: CacheControlTable::from_config(&config.cache_control),
            keep_alive: config.keep_alive,
            gzip: config.gzip,
            sse_padding: config.sse_padding,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path prefix that selects this service.
    pub fn accept_prefix(&self) -> &str {
        &self.accept_prefix
    }

    pub fn targets(&self) -> &[ConnectTarget] {
        &self.targets
    }

    /// Next connect target in rotation.
    pub fn next_target(&self) -> &ConnectTarget {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.targets.len();
        &self.targets[index]
    }

    /// How the `Forwarded` header is treated.
    pub fn forwarded(&self) -> ForwardedPolicy {
        self.forwarded
    }

    /// Extra header names stripped as hop-by-hop.
    pub fn hop_by_hop(&self) -> &[String] {
        &self.hop_by_hop
    }

    /// Connect-side prefix → accept-side prefix, longest first.
    pub fn location_rewrites(&self) -> &[(String, String)] {
        &self.location_rewrites
    }

    pub fn cookie_domain_rewrites(&self) -> &[(String, String)] {
        &self.cookie_domain_rewrites
    }

    pub fn cookie_path_rewrites(&self) -> &[(String, String)] {
        &self.cookie_path_rewrites
    }

    /// Cache-Control directives by request path.
    pub fn cache_control(&self) -> &CacheControlTable {
        &self.cache_control
    }

    /// Whether connect sessions are reused between requests.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Compress responses for clients that accept gzip.
    pub fn gzip(&self) -> bool {
        self.gzip
    }

    /// Event streams open with the padding record.
    pub fn sse_padding(&self) -> bool {
        self.sse_padding
    }

    /// `path` falls under the accept prefix on a segment boundary.
    pub fn accepts(&self, path: &str) -> bool {
        under_prefix(path, &self.accept_prefix)
    }

    /// Replace the accept prefix of `request_uri` with the target's path.
    pub fn connect_uri(&self, request_uri: &str, target: &ConnectTarget) -> String {
        let rest = request_uri
            .strip_prefix(self.accept_prefix.trim_end_matches('/'))
            .unwrap_or(request_uri);
        join_path(target.path(), rest)
    }

    /// Serializable view for the admin API.
    pub fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            name: self.name.to_string(),
            accept_prefix: self.accept_prefix.clone(),
            connect: self.targets.iter().map(|t| t.uri.clone()).collect(),
            forwarded: self.forwarded,
            keep_alive: self.keep_alive,
            gzip: self.gzip,
            cache_rules: self.cache_control.rules().len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub accept_prefix: String,
    pub connect: Vec<String>,
    pub forwarded: ForwardedPolicy,
    pub keep_alive: bool,
    pub gzip: bool,
    pub cache_rules: usize,
}

/// All services, ordered by accept prefix length, longest first.
#[derive(Debug, Default)]
pub struct ServiceTable {
    services: Vec<Arc<Service>>,
}

impl ServiceTable {
    /// Build every configured service. Equal-length prefixes keep config
    /// order.
    pub fn from_config(configs: &[ServiceConfig]) -> Result<Self, ProxyError> {
        let mut services = configs
            .iter()
            .map(|config| Service::from_config(config).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        services.sort_by(|a, b| b.accept_prefix.len().cmp(&a.accept_prefix.len()));
        Ok(Self { services })
    }

    /// Service with the longest accept prefix matching `path`.
    pub fn select(&self, path: &str) -> Option<Arc<Service>> {
        self.services.iter().find(|s| s.accepts(path)).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// `path` equals `prefix` or continues it at a segment boundary.
pub fn under_prefix(path: &str, prefix: &str) -> bool {
    let Some(rest) = path.strip_prefix(prefix) else {
        return false;
    };
    rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/')
}

fn join_path(base: &str, rest: &str) -> String {
    if rest.is_empty() {
        return base.to_string();
    }
    if rest.starts_with('?') {
        return format!("{base}{rest}");
    }
    match (base.ends_with('/'), rest.starts_with('/')) {
        (true, true) => format!("{base}{}", &rest[1..]),
        (false, false) => format!("{base}/{rest}"),
        _ => format!("{base}{rest}"),
    }
}

fn longest_first(map: &std::collections::BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> =
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str, prefix: &str, connect: &[&str]) -> ServiceConfig {
        toml::from_str(&format!(
            "name = {name:?}\naccept_prefix = {prefix:?}\nconnect = {connect:?}\n"
        ))
        .unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let table = ServiceTable::from_config(&[
            config("root", "/", &["http://127.0.0.1:1/"]),
            config("events", "/events", &["http://127.0.0.1:2/sse"]),
        ])
        .unwrap();
        assert_eq!(table.select("/events/a").unwrap().name(), "events");
        assert_eq!(table.select("/events").unwrap().name(), "events");
        assert_eq!(table.select("/eventsx").unwrap().name(), "root");
    }

    #[test]
    fn no_match_without_root_service() {
        let table =
            ServiceTable::from_config(&[config("events", "/events", &["http://h/sse"])]).unwrap();
        assert!(table.select("/other").is_none());
    }

    #[test]
    fn targets_rotate() {
        let service = Service::from_config(&config(
            "s",
            "/",
            &["http://127.0.0.1:1/", "http://127.0.0.1:2/"],
        ))
        .unwrap();
        let picked: Vec<&str> = (0..4).map(|_| service.next_target().authority()).collect();
        assert_eq!(
            picked,
            ["127.0.0.1:1", "127.0.0.1:2", "127.0.0.1:1", "127.0.0.1:2"]
        );
    }

    #[test]
    fn request_uri_maps_onto_target_path() {
        let service = Service::from_config(&config("s", "/events", &["http://h:3000/sse"])).unwrap();
        let target = &service.targets()[0];
        assert_eq!(service.connect_uri("/events/a?b=1", target), "/sse/a?b=1");
        assert_eq!(service.connect_uri("/events", target), "/sse");
        assert_eq!(service.connect_uri("/events?x", target), "/sse?x");

        let root = Service::from_config(&config("r", "/", &["http://h/"])).unwrap();
        assert_eq!(root.connect_uri("/a/b", &root.targets()[0]), "/a/b");
    }

    #[test]
    fn target_defaults_port_by_scheme() {
        let target = ConnectTarget::parse("ws://example.com/chat").unwrap();
        assert_eq!(target.authority(), "example.com:80");
        assert_eq!(target.path(), "/chat");
        assert!(ConnectTarget::parse("nope").is_err());
    }
}
