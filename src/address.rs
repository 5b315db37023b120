//! URL-addressed endpoint parsing (C1).
//!
//! An [`Address`] is the parsed form of one side of a relay (`tcp://host:port`,
//! `exec:?cmd=cat`, `-` for stdio, ...). Parsing happens in two steps: a
//! lexical "fixup" pass that rewrites a couple of shell-ergonomic spellings
//! into real URLs, then [`url::Url::parse`] on the result.

use std::collections::HashMap;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{Error, Result};

/// The three URL positions that double as option names. An option lookup
/// for one of these keys consults the URL structure before the query string.
const STRUCTURAL_KEYS: [&str; 3] = ["Hostname", "Port", "Path"];

/// A parsed endpoint address: scheme, host, port, path, and query parameters.
///
/// Immutable after construction. Safe to share across threads (`Send + Sync`
/// by virtue of containing only owned, non-interior-mutable data).
#[derive(Debug, Clone)]
pub struct Address {
    raw: String,
    url: Url,
}

impl Address {
    /// Parse a raw endpoint string, applying the `-`/`exec:` fixups first.
    pub fn parse(raw: &str) -> Result<Self> {
        let fixed = fixup(raw);
        let url = Url::parse(&fixed)
            .map_err(|e| Error::InvalidAddress(format!("{raw}: {e}")))?;
        if url.scheme().is_empty() {
            return Err(Error::InvalidAddress(format!("{raw}: empty scheme")));
        }
        Ok(Address {
            raw: raw.to_string(),
            url,
        })
    }

    /// The scheme token, e.g. `tcp-listen`.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// The original, pre-fixup string this address was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// `Path` is returned exactly as `url::Url::path()` gives it (leading
    /// slash included, e.g. `/tmp/sock`, `/chat`) - callers that need a
    /// slash-stripped value (the `tun` transport's netmask-as-path
    /// convention) strip it themselves rather than this shared lookup
    /// mangling every scheme's path for one transport's benefit.
    fn structural(&self, key: &str) -> Option<String> {
        match key {
            "Hostname" => self.url.host_str().map(str::to_string),
            "Port" => self.url.port().map(|p| p.to_string()),
            "Path" => {
                let p = self.url.path();
                if p.is_empty() || p == "/" {
                    None
                } else {
                    Some(p.to_string())
                }
            }
            _ => None,
        }
    }

    fn first_query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// `key`'s value, falling back from URL structure to query string to
    /// `fallback`. See module docs for the resolution order.
    pub fn get_string(&self, key: &str, fallback: &str) -> String {
        if STRUCTURAL_KEYS.contains(&key) {
            if let Some(v) = self.structural(key) {
                if !v.is_empty() {
                    return v;
                }
            }
            return fallback.to_string();
        }
        self.first_query(key).unwrap_or_else(|| fallback.to_string())
    }

    /// Same resolution order as [`Address::get_string`], parsed as a bool.
    pub fn get_bool(&self, key: &str, fallback: bool) -> Result<bool> {
        let raw = if STRUCTURAL_KEYS.contains(&key) {
            self.structural(key)
        } else {
            self.first_query(key)
        };
        match raw {
            None => Ok(fallback),
            Some(v) => parse_bool(&v)
                .ok_or_else(|| Error::InvalidOption(format!("{key}={v}: not a bool"))),
        }
    }

    /// Same resolution order as [`Address::get_string`], parsed as an integer
    /// in the given radix.
    pub fn get_int(&self, key: &str, radix: u32, fallback: i64) -> Result<i64> {
        let raw = if STRUCTURAL_KEYS.contains(&key) {
            self.structural(key)
        } else {
            self.first_query(key)
        };
        match raw {
            None => Ok(fallback),
            Some(v) => {
                let v = v.strip_prefix("0x").unwrap_or(&v);
                i64::from_str_radix(v, radix)
                    .map_err(|e| Error::InvalidOption(format!("{key}={v}: {e}")))
            }
        }
    }

    /// All query parameters as a multimap, first-value-wins on lookup. Used
    /// by transports that need to enumerate options rather than look one up.
    pub fn query_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for (k, v) in self.url.query_pairs() {
            map.entry(k.into_owned()).or_insert_with(|| v.into_owned());
        }
        map
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Rewrite the two shell ergonomics the CLI accepts before real URL parsing:
///
/// 1. the literal string `-` becomes `stdio:`.
/// 2. `exec:<cmd with spaces>` (no `?` present) becomes
///    `exec:?cmd=<percent-encoded cmd>`.
fn fixup(raw: &str) -> String {
    if raw == "-" {
        return "stdio:".to_string();
    }
    if let Some(rest) = raw.strip_prefix("exec:") {
        if !rest.contains('?') {
            let encoded = utf8_percent_encode(rest, NON_ALPHANUMERIC).to_string();
            return format!("exec:?cmd={encoded}");
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stdio_fixup() {
        let a = Address::parse("-").unwrap();
        assert_eq!(a.scheme(), "stdio");
    }

    #[test]
    fn exec_fixup_percent_encodes_cmd() {
        let a = Address::parse("exec:cat /etc/hosts").unwrap();
        assert_eq!(a.scheme(), "exec");
        assert_eq!(a.get_string("cmd", ""), "cat /etc/hosts");
    }

    #[test]
    fn exec_with_explicit_query_is_untouched() {
        let a = Address::parse("exec:?cmd=cat%20%2Fetc%2Fhosts").unwrap();
        assert_eq!(a.get_string("cmd", ""), "cat /etc/hosts");
    }

    #[test]
    fn structural_keys_prefer_url_fields() {
        let a = Address::parse("tcp://127.0.0.1:9000/somepath?Hostname=ignored").unwrap();
        assert_eq!(a.get_string("Hostname", "fallback"), "127.0.0.1");
        assert_eq!(a.get_string("Port", "fallback"), "9000");
        assert_eq!(a.get_string("Path", "fallback"), "/somepath");
    }

    #[test]
    fn structural_keys_fall_back_to_default_when_absent() {
        let a = Address::parse("unix:?Path=/tmp/sock").unwrap();
        // unix: has no authority, so Path is not set in the URL structure;
        // but Path is a structural key, so it does NOT fall through to the
        // query string - it goes straight to the fallback.
        assert_eq!(a.get_string("Path", "fallback"), "fallback");
    }

    #[test]
    fn query_fallback_for_non_structural_keys() {
        let a = Address::parse("tls://example.com:443?fingerprint=abcd").unwrap();
        assert_eq!(a.get_string("fingerprint", ""), "abcd");
        assert_eq!(a.get_string("missing", "def"), "def");
    }

    #[test]
    fn bool_and_int_parsing() {
        let a = Address::parse("quic://h:1?enable_datagrams=true&keepalive_period=30").unwrap();
        assert!(a.get_bool("enable_datagrams", false).unwrap());
        assert_eq!(a.get_int("keepalive_period", 10, 0).unwrap(), 30);
        assert!(!a.get_bool("missing", false).unwrap());
    }

    #[test]
    fn invalid_bool_is_an_error() {
        let a = Address::parse("tcp://h:1?skip_verify=maybe").unwrap();
        assert!(a.get_bool("skip_verify", false).is_err());
    }

    #[test]
    fn unknown_scheme_still_parses() {
        let a = Address::parse("florp://x").unwrap();
        assert_eq!(a.scheme(), "florp");
    }

    #[test]
    fn garbage_is_invalid_address() {
        assert!(Address::parse("::::not a url").is_err());
    }
}
