//! HTTP request head.
//!
//! # Design Decisions
//! - Query parameters are decoded from the request URI on first access and
//!   re-encoded into it only when the URI is next read after a change.
//! - Equality compares the canonical form, so a request with pending
//!   parameter edits equals one built directly from the resulting URI.
//! - Headers default to reverse case-insensitive ordering.

use std::borrow::Cow;
use std::collections::BTreeMap;

use http::Method;
use url::form_urlencoded;

use super::cookie::HttpCookie;
use super::headers::HeaderOrdering;
use super::message::{HttpStartMessage, StartParts};

/// Decoded query parameters, in name order.
pub type QueryParameters = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryPending {
    /// URI and parameters agree.
    None,
    /// Parameters must be decoded from the URI before use.
    Decode,
    /// URI must be rebuilt from the parameters before use.
    Encode,
}

#[derive(Debug, Clone)]
pub struct HttpRequestMessage {
    method: Method,
    request_uri: String,
    parameters: QueryParameters,
    pending: QueryPending,
    start: StartParts,
}

impl HttpRequestMessage {
    pub fn new(method: Method, request_uri: impl Into<String>) -> Self {
        Self {
            method,
            request_uri: request_uri.into(),
            parameters: QueryParameters::new(),
            pending: QueryPending::Decode,
            start: StartParts::new(HeaderOrdering::ReverseCaseInsensitive),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// The request URI with any parameter edits applied.
    pub fn request_uri(&mut self) -> &str {
        if self.pending == QueryPending::Encode {
            self.request_uri = self.canonical_uri().into_owned();
            self.pending = QueryPending::None;
        }
        &self.request_uri
    }

    /// Replace the URI; parameters are decoded from it on next access.
    pub fn set_request_uri(&mut self, request_uri: impl Into<String>) {
        self.request_uri = request_uri.into();
        self.parameters.clear();
        self.pending = QueryPending::Decode;
    }

    /// Path portion of the URI. Parameter edits never change it.
    pub fn path(&self) -> &str {
        split_query(&self.request_uri).0
    }

    pub fn parameters(&mut self) -> &QueryParameters {
        self.resolve_parameters();
        &self.parameters
    }

    pub fn parameter(&mut self, name: &str) -> Option<&str> {
        self.resolve_parameters();
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.resolve_parameters();
        self.parameters.insert(name.into(), vec![value.into()]);
        self.pending = QueryPending::Encode;
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.resolve_parameters();
        self.parameters.entry(name.into()).or_default().push(value.into());
        self.pending = QueryPending::Encode;
    }

    pub fn remove_parameter(&mut self, name: &str) -> Option<Vec<String>> {
        self.resolve_parameters();
        let removed = self.parameters.remove(name);
        if removed.is_some() {
            self.pending = QueryPending::Encode;
        }
        removed
    }

    fn resolve_parameters(&mut self) {
        if self.pending == QueryPending::Decode {
            self.parameters = decode_query(split_query(&self.request_uri).1);
            self.pending = QueryPending::None;
        }
    }

    /// Cookies sent by the client, in wire order. The `Cookie` header itself
    /// stays in the header table and is forwarded as received; cookies in
    /// the cookie set are added by the gateway.
    pub fn request_cookies(&self) -> Vec<HttpCookie> {
        self.headers()
            .get_all("Cookie")
            .iter()
            .flat_map(|value| HttpCookie::parse_cookie_header(value))
            .collect()
    }

    /// URI as it would be after resolving pending edits, without mutating.
    pub fn canonical_uri(&self) -> Cow<'_, str> {
        if self.pending != QueryPending::Encode {
            return Cow::Borrowed(&self.request_uri);
        }
        let path = split_query(&self.request_uri).0;
        if self.parameters.is_empty() {
            return Cow::Owned(path.to_string());
        }
        Cow::Owned(format!("{path}?{}", encode_query(&self.parameters)))
    }
}

impl HttpStartMessage for HttpRequestMessage {
    fn start(&self) -> &StartParts {
        &self.start
    }

    fn start_mut(&mut self) -> &mut StartParts {
        &mut self.start
    }
}

impl PartialEq for HttpRequestMessage {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.canonical_uri() == other.canonical_uri()
            && self.start == other.start
    }
}

fn split_query(uri: &str) -> (&str, Option<&str>) {
    match uri.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (uri, None),
    }
}

fn decode_query(query: Option<&str>) -> QueryParameters {
    let mut parameters = QueryParameters::new();
    if let Some(query) = query {
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            parameters
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }
    parameters
}

fn encode_query(parameters: &QueryParameters) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, values) in parameters {
        for value in values {
            serializer.append_pair(name, value);
        }
    }
    serializer.finish()
}
