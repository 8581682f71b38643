//! Cache-Control directives by URL pattern.
//!
//! # Responsibilities
//! - Hold the per-service table of (pattern, directive) rules
//! - Resolve a request path to the directive of the most specific match
//! - Memoize resolutions per path
//!
//! # Design Decisions
//! - Rules are sorted once by wildcard count; ties keep configuration order.
//! - The table is immutable after construction; only the memo changes, and
//!   it is a concurrent map so lookups from many sessions never lock the
//!   whole table.
//! - The memo stops growing at a fixed size so hostile paths cannot
//!   exhaust memory.

pub mod pattern;

pub use pattern::UrlPattern;

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::CacheControlRule as RuleConfig;

const MEMO_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct CacheControlRule {
    pattern: UrlPattern,
    directive: Arc<str>,
}

impl CacheControlRule {
    pub fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }

    pub fn directive(&self) -> &str {
        &self.directive
    }
}

#[derive(Debug, Default)]
pub struct CacheControlTable {
    rules: Vec<CacheControlRule>,
    memo: DashMap<String, Option<Arc<str>>>,
}

impl CacheControlTable {
    pub fn new<P, D>(rules: impl IntoIterator<Item = (P, D)>) -> Self
    where
        P: Into<String>,
        D: AsRef<str>,
    {
        let mut rules: Vec<CacheControlRule> = rules
            .into_iter()
            .map(|(pattern, directive)| CacheControlRule {
                pattern: UrlPattern::new(pattern),
                directive: Arc::from(directive.as_ref()),
            })
            .collect();
        rules.sort_by_key(|rule| rule.pattern.wildcards());
        Self {
            rules,
            memo: DashMap::new(),
        }
    }

    pub fn from_config(rules: &[RuleConfig]) -> Self {
        Self::new(rules.iter().map(|r| (r.pattern.clone(), r.directive.as_str())))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in match order.
    pub fn rules(&self) -> &[CacheControlRule] {
        &self.rules
    }

    /// Directive for `path`, if any rule matches.
    pub fn resolve(&self, path: &str) -> Option<Arc<str>> {
        if self.rules.is_empty() {
            return None;
        }
        if let Some(hit) = self.memo.get(path) {
            return hit.clone();
        }
        let resolved = self
            .rules
            .iter()
            .find(|rule| rule.pattern.matches(path))
            .map(|rule| rule.directive.clone());
        if self.memo.len() < MEMO_CAPACITY {
            self.memo
                .entry(path.to_string())
                .or_insert_with(|| resolved.clone());
        }
        tracing::trace!(path, directive = ?resolved, "cache-control resolved");
        resolved
    }

    pub fn memoized(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn more_specific_pattern_wins() {
        let table = CacheControlTable::new([("/a/*", "max-age=60"), ("/a/b", "no-store")]);
        assert_eq!(table.resolve("/a/b").as_deref(), Some("no-store"));
        assert_eq!(table.resolve("/a/c").as_deref(), Some("max-age=60"));
        assert_eq!(table.resolve("/z").as_deref(), None);
        assert_eq!(table.rules()[0].pattern().as_str(), "/a/b");
    }

    #[test]
    fn resolutions_are_memoized() {
        let table = CacheControlTable::new([("/**", "public")]);
        assert_eq!(table.resolve("/x/y").as_deref(), Some("public"));
        assert_eq!(table.resolve("/x/y").as_deref(), Some("public"));
        assert_eq!(table.memoized(), 1);
    }

    #[test]
    fn empty_table_resolves_nothing() {
        let table = CacheControlTable::default();
        assert!(table.resolve("/a").is_none());
        assert_eq!(table.memoized(), 0);
    }
}
