//! Response rewrites from connect-side to accept-side addressing.
//!
//! `Location` uses the longest configured mapping first, then falls back to
//! substituting a connect URI (or its path) with the accept prefix.
//! `Set-Cookie` domains are mapped exactly, paths by longest prefix.

use std::collections::BTreeSet;

use super::service::{under_prefix, Service};
use crate::http::HttpCookie;

/// New `Location` value, or `None` when nothing applies.
pub fn rewrite_location(location: &str, service: &Service, accept_host: Option<&str>) -> Option<String> {
    for (from, to) in service.location_rewrites() {
        if let Some(rest) = strip_at_boundary(location, from) {
            return Some(join(to, rest));
        }
    }

    for target in service.targets() {
        if let Some(rest) = strip_at_boundary(location, target.uri()) {
            let base = match accept_host {
                Some(host) => format!("http://{host}{}", service.accept_prefix()),
                None => service.accept_prefix().to_string(),
            };
            return Some(join(&base, rest));
        }
    }

    if location.starts_with('/') {
        for target in service.targets() {
            let path = target.path();
            if path != "/" && under_prefix(location, path) {
                return Some(join(service.accept_prefix(), &location[path.len()..]));
            }
        }
    }
    None
}

/// Apply domain and path mappings; returns how many cookies changed.
pub fn rewrite_cookies(cookies: &mut BTreeSet<HttpCookie>, service: &Service) -> usize {
    if service.cookie_domain_rewrites().is_empty() && service.cookie_path_rewrites().is_empty() {
        return 0;
    }
    let mut changed = 0;
    // Domain and path are part of cookie identity, so every cookie is
    // re-inserted after editing.
    let originals = std::mem::take(cookies);
    for mut cookie in originals {
        let mut touched = false;
        if let Some(domain) = cookie.domain() {
            let mapped = service
                .cookie_domain_rewrites()
                .iter()
                .find(|(from, _)| from.eq_ignore_ascii_case(domain))
                .map(|(_, to)| to.clone());
            if let Some(to) = mapped {
                cookie.set_domain(Some(to));
                touched = true;
            }
        }
        if let Some(path) = cookie.path() {
            let mapped = service
                .cookie_path_rewrites()
                .iter()
                .find_map(|(from, to)| {
                    strip_at_boundary(path, from.trim_end_matches('/')).map(|rest| join(to, rest))
                });
            if let Some(to) = mapped {
                cookie.set_path(Some(to));
                touched = true;
            }
        }
        if touched {
            changed += 1;
        }
        cookies.replace(cookie);
    }
    changed
}

fn strip_at_boundary<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = value.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with(['/', '?', '#']) || prefix.ends_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn join(base: &str, rest: &str) -> String {
    match (base.ends_with('/'), rest.starts_with('/')) {
        (true, true) => format!("{base}{}", &rest[1..]),
        _ => format!("{base}{rest}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;

    fn service(extra: &str) -> Service {
        let text = format!(
            "name = \"events\"\naccept_prefix = \"/events\"\nconnect = [\"http://10.0.0.1:3000/sse\"]\n{extra}"
        );
        let config: ServiceConfig = toml::from_str(&text).unwrap();
        Service::from_config(&config).unwrap()
    }

    #[test]
    fn configured_mapping_wins_longest_first() {
        let service = service(
            "[location_rewrites]\n\"http://backend\" = \"/a\"\n\"http://backend/deep\" = \"/b\"\n",
        );
        assert_eq!(
            rewrite_location("http://backend/deep/x", &service, None).as_deref(),
            Some("/b/x")
        );
        assert_eq!(
            rewrite_location("http://backend/other", &service, None).as_deref(),
            Some("/a/other")
        );
        assert_eq!(rewrite_location("http://backendx/", &service, None), None);
    }

    #[test]
    fn falls_back_to_connect_uri_substitution() {
        let service = service("");
        assert_eq!(
            rewrite_location("http://10.0.0.1:3000/sse/next?x=1", &service, Some("gw:8080"))
                .as_deref(),
            Some("http://gw:8080/events/next?x=1")
        );
        assert_eq!(
            rewrite_location("/sse/next", &service, None).as_deref(),
            Some("/events/next")
        );
        assert_eq!(rewrite_location("http://elsewhere/", &service, None), None);
    }

    #[test]
    fn cookies_follow_domain_and_path_maps() {
        let service = service(
            "[cookie_domain_rewrites]\n\"backend.internal\" = \"example.com\"\n\
             [cookie_path_rewrites]\n\"/sse\" = \"/events\"\n",
        );
        let mut cookies = BTreeSet::new();
        cookies.insert(
            HttpCookie::new("sid", "1")
                .with_domain("backend.internal")
                .with_path("/sse/app"),
        );
        cookies.insert(HttpCookie::new("plain", "2"));

        assert_eq!(rewrite_cookies(&mut cookies, &service), 1);
        let sid = cookies.iter().find(|c| c.name() == "sid").unwrap();
        assert_eq!(sid.domain(), Some("example.com"));
        assert_eq!(sid.path(), Some("/events/app"));
        assert_eq!(cookies.len(), 2);
    }
}
