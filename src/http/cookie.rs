//! HTTP cookies.
//!
//! A cookie's identity is `(name, path, domain)`: two cookies with the same
//! identity compare equal regardless of value, so a cookie set keeps one
//! entry per identity and a later insert replaces the earlier one.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct HttpCookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
    max_age: Option<i64>,
    expires: Option<String>,
    secure: bool,
    http_only: bool,
    same_site: Option<String>,
    /// Attributes without a field here (`Partitioned`, `Priority=High`),
    /// kept as written.
    extensions: Vec<String>,
}

impl HttpCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Parse a `Set-Cookie` value. Unknown attributes are kept verbatim and
    /// written back after the known ones.
    pub fn parse_set_cookie(raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (name, value) = split_pair(parts.next()?)?;
        let mut cookie = HttpCookie::new(name, value);
        for attribute in parts {
            let attribute = attribute.trim();
            let (key, value) = match attribute.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (attribute, None),
            };
            match key.to_ascii_lowercase().as_str() {
                "domain" => cookie.domain = value.map(str::to_string),
                "path" => cookie.path = value.map(str::to_string),
                "max-age" => cookie.max_age = value.and_then(|v| v.parse().ok()),
                "expires" => cookie.expires = value.map(str::to_string),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = value.map(str::to_string),
                "" => {}
                _ => cookie.extensions.push(attribute.to_string()),
            }
        }
        Some(cookie)
    }

    /// Parse a request `Cookie` header: `a=1; b=2`. Pairs keep their order
    /// and values keep their quotes.
    pub fn parse_cookie_header(raw: &str) -> Vec<Self> {
        raw.split(';')
            .filter_map(split_pair)
            .map(|(name, value)| HttpCookie::new(name, value))
            .collect()
    }

    /// Format as a `Set-Cookie` value.
    pub fn to_set_cookie(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(expires) = &self.expires {
            out.push_str("; Expires=");
            out.push_str(expires);
        }
        if let Some(same_site) = &self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site);
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        for extension in &self.extensions {
            out.push_str("; ");
            out.push_str(extension);
        }
        out
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn max_age(&self) -> Option<i64> {
        self.max_age
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_http_only(&self) -> bool {
        self.http_only
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_max_age(mut self, max_age: i64) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn set_domain(&mut self, domain: Option<String>) {
        self.domain = domain;
    }

    pub fn set_path(&mut self, path: Option<String>) {
        self.path = path;
    }

    fn identity(&self) -> (&str, Option<&str>, Option<&str>) {
        (&self.name, self.path.as_deref(), self.domain.as_deref())
    }
}

fn split_pair(raw: &str) -> Option<(&str, &str)> {
    let (name, value) = raw.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

impl PartialEq for HttpCookie {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for HttpCookie {}

impl PartialOrd for HttpCookie {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HttpCookie {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl fmt::Display for HttpCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn parses_set_cookie_attributes() {
        let cookie = HttpCookie::parse_set_cookie(
            "sid=abc123; Domain=backend.local; Path=/app; Max-Age=60; Secure; HttpOnly",
        )
        .unwrap();
        assert_eq!(cookie.name(), "sid");
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.domain(), Some("backend.local"));
        assert_eq!(cookie.path(), Some("/app"));
        assert_eq!(cookie.max_age(), Some(60));
        assert!(cookie.is_secure());
        assert!(cookie.is_http_only());
        assert_eq!(
            cookie.to_set_cookie(),
            "sid=abc123; Domain=backend.local; Path=/app; Max-Age=60; Secure; HttpOnly"
        );
    }

    #[test]
    fn rejects_nameless_cookie() {
        assert!(HttpCookie::parse_set_cookie("=value").is_none());
        assert!(HttpCookie::parse_set_cookie("novalue").is_none());
    }

    #[test]
    fn request_header_yields_pairs() {
        let cookies = HttpCookie::parse_cookie_header("a=1; b=\"two\";;c=3");
        let names: Vec<_> = cookies.iter().map(|c| (c.name(), c.value())).collect();
        assert_eq!(names, vec![("a", "1"), ("b", "\"two\""), ("c", "3")]);
    }

    #[test]
    fn unknown_attributes_survive_a_rewrite() {
        let raw = "__Host-sid=\"q v\"; Path=/; SameSite=None; Secure; HttpOnly; Partitioned; Priority=High";
        let mut cookie = HttpCookie::parse_set_cookie(raw).unwrap();
        assert_eq!(cookie.value(), "\"q v\"");
        assert_eq!(cookie.extensions(), ["Partitioned", "Priority=High"]);
        assert_eq!(cookie.to_set_cookie(), raw);

        cookie.set_path(Some("/app".to_string()));
        assert!(cookie.to_set_cookie().ends_with("; HttpOnly; Partitioned; Priority=High"));
    }

    #[test]
    fn set_keeps_one_cookie_per_identity() {
        let mut set = BTreeSet::new();
        set.insert(HttpCookie::new("sid", "old").with_path("/"));
        set.replace(HttpCookie::new("sid", "new").with_path("/"));
        set.insert(HttpCookie::new("sid", "other").with_path("/x"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.first().map(HttpCookie::value), Some("new"));
    }
}
