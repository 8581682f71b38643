//! Protocol upgrade detection.
//!
//! # Design Decisions
//! - An upgrade is recognised from `Connection: Upgrade` plus an `Upgrade`
//!   header; the gateway never interprets the upgraded protocol, it only
//!   forwards bytes once the backend answers `101`.

use super::message::HttpStartMessage;
use super::request::HttpRequestMessage;

/// Protocol named in the `Upgrade` header of an upgrade request.
pub fn upgrade_protocol(request: &HttpRequestMessage) -> Option<&str> {
    if !request.headers().has_token("Connection", "upgrade") {
        return None;
    }
    request.header("Upgrade").filter(|p| !p.trim().is_empty())
}

pub fn is_upgrade_request(request: &HttpRequestMessage) -> bool {
    upgrade_protocol(request).is_some()
}

pub fn is_websocket_upgrade(request: &HttpRequestMessage) -> bool {
    upgrade_protocol(request).is_some_and(|p| p.eq_ignore_ascii_case("websocket"))
}
