//! Header policy applied while forwarding.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers, derived from the `Connection` tokens
//! - Restore `Connection`/`Upgrade` on upgrade exchanges
//! - Apply the forwarded-header policy
//! - Stamp and detect this instance's `Via` token
//! - Stamp `X-Request-Id`, add `Cache-Control` where configured
//!
//! # Design Decisions
//! - The hop-by-hop set is computed per message: whatever `Connection`
//!   names, `Connection` itself, and the service's configured extras.
//! - `Transfer-Encoding` and `Content-Length` are never in that set. They
//!   describe the body as it was decoded, and the encoder re-derives them
//!   from the decoded content.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http::Version;

use crate::config::ForwardedPolicy;
use crate::http::{HeaderTable, X_REQUEST_ID};

const X_FORWARDED_PREFIX: &str = "x-forwarded-";

const FRAMING_HEADERS: [&str; 2] = ["Transfer-Encoding", "Content-Length"];

fn is_framing(name: &str) -> bool {
    FRAMING_HEADERS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

/// Names removed before a message crosses the gateway.
pub fn hop_by_hop_names(headers: &HeaderTable, extra: &[String]) -> Vec<String> {
    let mut names: Vec<String> = headers
        .tokens("Connection")
        .into_iter()
        .filter(|name| !is_framing(name))
        .map(str::to_string)
        .collect();
    names.push("Connection".to_string());
    names.extend(extra.iter().filter(|name| !is_framing(name)).cloned());
    names
}

/// Remove hop-by-hop headers; returns how many header names were dropped.
pub fn strip_hop_by_hop(headers: &mut HeaderTable, extra: &[String]) -> usize {
    let names = hop_by_hop_names(headers, extra);
    let before = headers.len();
    headers.retain(|name| !names.iter().any(|n| n.eq_ignore_ascii_case(name)));
    before - headers.len()
}

/// Re-add the upgrade pair stripped as hop-by-hop.
pub fn restore_upgrade(headers: &mut HeaderTable, protocol: &str) {
    headers.set("Connection", "Upgrade");
    headers.set("Upgrade", protocol);
}

/// The sender asked for the connection to end after this message.
pub fn wants_close(headers: &HeaderTable, version: Version) -> bool {
    if headers.has_token("Connection", "close") {
        return true;
    }
    version == Version::HTTP_10 && !headers.has_token("Connection", "keep-alive")
}

/// The client side of one forwarded hop.
#[derive(Debug, Clone, Copy)]
pub struct ForwardedHop<'a> {
    pub client: SocketAddr,
    pub host: Option<&'a str>,
    pub proto: &'a str,
}

/// Apply `policy` to the forwarding headers, adding `hop` on inject.
pub fn apply_forwarded(headers: &mut HeaderTable, policy: ForwardedPolicy, hop: ForwardedHop<'_>) {
    match policy {
        ForwardedPolicy::Ignore => {}
        ForwardedPolicy::Exclude => {
            headers.retain(|name| {
                !name.eq_ignore_ascii_case("Forwarded")
                    && !name.to_ascii_lowercase().starts_with(X_FORWARDED_PREFIX)
            });
        }
        ForwardedPolicy::Inject => {
            let ip = hop.client.ip();
            let mut element = format!("for={};proto={}", forwarded_node(ip), hop.proto);
            if let Some(host) = hop.host {
                element.push_str(";host=");
                element.push_str(host);
            }
            headers.add("Forwarded", element);

            let chain = headers.get_all("X-Forwarded-For").join(", ");
            if chain.is_empty() {
                headers.set("X-Forwarded-For", ip.to_string());
            } else {
                headers.set("X-Forwarded-For", format!("{chain}, {ip}"));
            }
            if !headers.contains("X-Forwarded-Proto") {
                headers.set("X-Forwarded-Proto", hop.proto);
            }
            if let Some(host) = hop.host {
                if !headers.contains("X-Forwarded-Host") {
                    headers.set("X-Forwarded-Host", host);
                }
            }
        }
    }
}

fn forwarded_node(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("\"[{v6}]\""),
    }
}

/// This instance's `Via` entry.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    token: Arc<str>,
}

impl LoopDetector {
    /// Guard whose `Via` token names `instance`.
    pub fn new(instance: &str) -> Self {
        Self {
            token: Arc::from(format!("1.1 {instance}")),
        }
    }

    /// A detector with a fresh random instance name.
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::new(&format!("stream-gateway-{}", &id[..12]))
    }

    /// The `Via` entry this gateway adds.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The message already passed through this instance.
    pub fn is_loop(&self, headers: &HeaderTable) -> bool {
        headers
            .get_all("Via")
            .iter()
            .flat_map(|value| value.split(','))
            .any(|entry| entry.trim() == &*self.token)
    }

    /// Append this gateway to `Via`.
    pub fn stamp(&self, headers: &mut HeaderTable) {
        headers.add("Via", self.token.to_string());
    }
}

/// Reuse the client's request id or mint one; returns the id.
pub fn ensure_request_id(headers: &mut HeaderTable) -> String {
    if let Some(id) = headers.get(X_REQUEST_ID).filter(|id| !id.trim().is_empty()) {
        return id.to_string();
    }
    let id = uuid::Uuid::new_v4().to_string();
    headers.set(X_REQUEST_ID, id.clone());
    id
}

/// Set `Cache-Control` when the response has none. Returns whether it was
/// added.
pub fn apply_cache_control(headers: &mut HeaderTable, directive: Option<&str>) -> bool {
    match directive {
        Some(directive) if !headers.contains("Cache-Control") => {
            headers.set("Cache-Control", directive);
            true
        }
        _ => false,
    }
}
