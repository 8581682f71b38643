//! Ordered, case-insensitive header storage.
//!
//! # Design Decisions
//! - Lookups ignore ASCII case; the spelling of the first insertion is kept.
//! - Iteration order comes from a [`HeaderOrdering`]. Requests default to
//!   reverse case-insensitive order, which some WebSocket handshake clients
//!   depend on; responses default to case-insensitive order.

use std::cmp::Ordering;

/// Iteration order of header names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderOrdering {
    #[default]
    CaseInsensitive,
    ReverseCaseInsensitive,
    /// First-insertion order.
    Insertion,
}

impl HeaderOrdering {
    fn compare(self, a: &str, b: &str) -> Option<Ordering> {
        match self {
            HeaderOrdering::CaseInsensitive => Some(cmp_ignore_case(a, b)),
            HeaderOrdering::ReverseCaseInsensitive => Some(cmp_ignore_case(a, b).reverse()),
            HeaderOrdering::Insertion => None,
        }
    }
}

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|c| c.to_ascii_lowercase())
        .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

/// Multimap of header name to values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderTable {
    ordering: HeaderOrdering,
    entries: Vec<HeaderEntry>,
}

impl HeaderTable {
    pub fn new(ordering: HeaderOrdering) -> Self {
        Self {
            ordering,
            entries: Vec::new(),
        }
    }

    pub fn ordering(&self) -> HeaderOrdering {
        self.ordering
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, name: &str) -> Result<usize, usize> {
        match self.ordering.compare(name, name) {
            Some(_) => self
                .entries
                .binary_search_by(|e| self.ordering.compare(&e.name, name).unwrap_or(Ordering::Equal)),
            None => self
                .entries
                .iter()
                .position(|e| e.name.eq_ignore_ascii_case(name))
                .ok_or(self.entries.len()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_ok()
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        match self.find(name) {
            Ok(index) => &self.entries[index].values,
            Err(_) => &[],
        }
    }

    /// Append a value, keeping existing ones.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.find(&name) {
            Ok(index) => self.entries[index].values.push(value.into()),
            Err(index) => self.entries.insert(
                index,
                HeaderEntry {
                    name,
                    values: vec![value.into()],
                },
            ),
        }
    }

    /// Replace all values of `name`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.find(&name) {
            Ok(index) => self.entries[index].values = vec![value.into()],
            Err(index) => self.entries.insert(
                index,
                HeaderEntry {
                    name,
                    values: vec![value.into()],
                },
            ),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.find(name)
            .ok()
            .map(|index| self.entries.remove(index).values)
    }

    /// Keep only names for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|e| keep(&e.name));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Every `(name, value)` pair in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|e| e.values.iter().map(move |v| (e.name.as_str(), v.as_str())))
    }

    /// Comma-separated tokens across all values of `name`.
    pub fn tokens(&self, name: &str) -> Vec<&str> {
        self.get_all(name)
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// True when any token of `name` equals `token`, ignoring case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.tokens(name).iter().any(|t| t.eq_ignore_ascii_case(token))
    }
}
