//! Minimal cookie jar.
//!
//! The remote is a single site, so the jar is a flat name → value map with
//! no domain or path scoping.

use std::collections::BTreeMap;

/// Name → value cookie store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    /// Create an empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a jar from `Set-Cookie` header values.
    pub fn from_set_cookies<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut jar = Self::new();
        jar.merge(headers);
        jar
    }

    /// Apply `Set-Cookie` header values. Expired cookies are removed.
    pub fn merge<'a>(&mut self, headers: impl IntoIterator<Item = &'a str>) {
        for header in headers {
            let Some((name, value, expired)) = parse_set_cookie(header) else {
                continue;
            };
            if expired {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }
    }

    /// Drop every cookie.
    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Value for a `Cookie` request header, or `None` when empty.
    pub fn header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        Some(pairs.join("; "))
    }
}

/// Split a `Set-Cookie` value into name, value and whether it deletes the cookie.
fn parse_set_cookie(header: &str) -> Option<(&str, &str, bool)> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');

    let expired = parts.any(|attr| {
        let attr = attr.trim();
        match attr.split_once('=') {
            Some((key, val)) if key.trim().eq_ignore_ascii_case("max-age") => {
                val.trim().parse::<i64>().map(|age| age <= 0).unwrap_or(false)
            }
            _ => false,
        }
    });
    Some((name, value, expired || value == "deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_header() {
        let mut jar = CookieJar::new();
        assert!(jar.header().is_none());

        jar.merge(["sid=abc; Path=/; HttpOnly", "lang=fr"]);
        assert_eq!(jar.len(), 2);
        assert_eq!(jar.get("sid"), Some("abc"));
        assert_eq!(jar.header().unwrap(), "lang=fr; sid=abc");
    }

    #[test]
    fn test_later_value_wins() {
        let jar = CookieJar::from_set_cookies(["sid=1", "sid=2"]);
        assert_eq!(jar.get("sid"), Some("2"));
    }

    #[test]
    fn test_expired_cookie_removed() {
        let mut jar = CookieJar::from_set_cookies(["sid=abc", "keep=1"]);
        jar.merge(["sid=x; Max-Age=0"]);
        assert!(jar.get("sid").is_none());
        jar.merge(["keep=deleted"]);
        assert!(jar.is_empty());
    }

    #[test]
    fn test_malformed_ignored() {
        let jar = CookieJar::from_set_cookies(["novalue", "=empty", "ok=1"]);
        assert_eq!(jar.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut jar = CookieJar::from_set_cookies(["a=1"]);
        jar.clear();
        assert!(jar.is_empty());
    }
}
