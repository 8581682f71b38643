//! URL glob patterns.
//!
//! `*` matches within one path segment, `**` matches across segments.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    raw: String,
    wildcards: usize,
}

impl UrlPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let wildcards = raw.replace("**", "*").matches('*').count();
        Self { raw, wildcards }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Wildcards in the pattern; fewer means more specific.
    pub fn wildcards(&self) -> usize {
        self.wildcards
    }

    pub fn matches(&self, path: &str) -> bool {
        glob_match(self.raw.as_bytes(), path.as_bytes())
    }
}

#[derive(Debug, Clone, Copy)]
enum Token {
    Byte(u8),
    Star,
    DoubleStar,
}

fn tokenize(pattern: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut i = 0;
    while i < pattern.len() {
        match &pattern[i..] {
            [b'*', b'*', ..] => {
                tokens.push(Token::DoubleStar);
                i += 2;
            }
            [b'*', ..] => {
                tokens.push(Token::Star);
                i += 1;
            }
            [c, ..] => {
                tokens.push(Token::Byte(*c));
                i += 1;
            }
            [] => break,
        }
    }
    tokens
}

/// `reached[j]`: the tokens seen so far can consume exactly `text[..j]`.
/// Runs in `tokens × text` steps.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let mut reached = vec![false; text.len() + 1];
    reached[0] = true;
    let mut next = vec![false; text.len() + 1];
    for token in tokenize(pattern) {
        match token {
            Token::Byte(c) => {
                next[0] = false;
                for j in 0..text.len() {
                    next[j + 1] = reached[j] && text[j] == c;
                }
            }
            Token::Star => {
                next[0] = reached[0];
                for j in 1..=text.len() {
                    next[j] = reached[j] || (next[j - 1] && text[j - 1] != b'/');
                }
            }
            Token::DoubleStar => {
                next[0] = reached[0];
                for j in 1..=text.len() {
                    next[j] = reached[j] || next[j - 1];
                }
            }
        }
        std::mem::swap(&mut reached, &mut next);
        if !reached.contains(&true) {
            return false;
        }
    }
    reached[text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_star_stays_in_segment() {
        let pattern = UrlPattern::new("/a/*");
        assert!(pattern.matches("/a/b"));
        assert!(pattern.matches("/a/"));
        assert!(!pattern.matches("/a/b/c"));
        assert_eq!(pattern.wildcards(), 1);
    }

    #[test]
    fn double_star_crosses_segments() {
        let pattern = UrlPattern::new("/static/**.js");
        assert!(pattern.matches("/static/app.js"));
        assert!(pattern.matches("/static/v2/lib/app.js"));
        assert!(!pattern.matches("/static/app.css"));
        assert_eq!(pattern.wildcards(), 1);
    }

    #[test]
    fn literal_pattern_is_exact() {
        let pattern = UrlPattern::new("/a/b");
        assert!(pattern.matches("/a/b"));
        assert!(!pattern.matches("/a/bc"));
        assert_eq!(pattern.wildcards(), 0);
    }

    #[test]
    fn star_and_double_star_combine() {
        let pattern = UrlPattern::new("/api/*/items/**");
        assert!(pattern.matches("/api/v1/items/"));
        assert!(pattern.matches("/api/v1/items/a/b"));
        assert!(!pattern.matches("/api/v1/v2/items/a"));
        assert!(UrlPattern::new("**").matches(""));
        assert!(UrlPattern::new("*").matches("segment"));
        assert!(!UrlPattern::new("*").matches("a/b"));
    }

    #[test]
    fn many_wildcards_against_a_long_miss_finish_quickly() {
        let pattern = UrlPattern::new(format!("/{}x", "**a".repeat(24)));
        let path = format!("/{}", "a".repeat(4096));
        let started = std::time::Instant::now();
        assert!(!pattern.matches(&path));
        assert!(pattern.matches(&format!("{path}x")));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }
}
