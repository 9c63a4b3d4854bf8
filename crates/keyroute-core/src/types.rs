//! Domain types shared by the registry, resolver, and router.
//!
//! A registration lives at `{namespace_root}/{key_segment}` in the
//! coordination store, where the segment is the JSON encoding of the key
//! with `%` and `/` escaped so every key maps to exactly one path.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, KeyEncodingError};

/// Bound for key types usable with the registry and router.
///
/// Keys must be serializable (they become store paths and query
/// arguments) and totally ordered.
pub trait RegistryKey:
    Serialize + DeserializeOwned + Ord + Clone + fmt::Debug + Send + Sync + 'static
{
}

impl<T> RegistryKey for T where
    T: Serialize + DeserializeOwned + Ord + Clone + fmt::Debug + Send + Sync + 'static
{
}

// ── Namespace root ─────────────────────────────────────────────────

/// Path prefix scoping all registrations of one routing domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceRoot(String);

impl NamespaceRoot {
    /// Validate and wrap a namespace root such as `/test` or `/apps/windows`.
    pub fn new(root: impl Into<String>) -> Result<Self, ConfigError> {
        let root = root.into();
        let valid = root.starts_with('/')
            && (root == "/" || !root.ends_with('/'))
            && !root.contains("//");
        if valid {
            Ok(Self(root))
        } else {
            Err(ConfigError::InvalidNamespace(root))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store path of the registration entry for `key`.
    pub fn entry_path<K: Serialize>(&self, key: &K) -> Result<String, KeyEncodingError> {
        let segment = key_segment(key)?;
        if self.0 == "/" {
            Ok(format!("/{segment}"))
        } else {
            Ok(format!("{}/{segment}", self.0))
        }
    }

    /// Whether `path` is a direct child of this root.
    pub fn contains(&self, path: &str) -> bool {
        let rest = if self.0 == "/" {
            path.strip_prefix('/')
        } else {
            path.strip_prefix(self.0.as_str())
                .and_then(|r| r.strip_prefix('/'))
        };
        matches!(rest, Some(segment) if !segment.is_empty() && !segment.contains('/'))
    }
}

impl TryFrom<String> for NamespaceRoot {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NamespaceRoot> for String {
    fn from(root: NamespaceRoot) -> Self {
        root.0
    }
}

impl fmt::Display for NamespaceRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Location ───────────────────────────────────────────────────────

/// Address of the worker currently serving a key's state.
///
/// Opaque to the registry and router; only the query transport gives it
/// meaning (for HTTP, a `host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Location {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Value persisted in a registration entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub location: Location,
    /// Unix timestamp (milliseconds) of the registration.
    pub registered_at_ms: u64,
}

impl LocationRecord {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            registered_at_ms: epoch_millis(),
        }
    }
}

// ── Key encoding ───────────────────────────────────────────────────

/// Bytes escaped in a store path segment; `/` would split the path.
const PATH_SEGMENT_SET: &AsciiSet = &CONTROLS.add(b'/').add(b'%');

/// Bytes escaped in a URL path segment (RFC 3986 unreserved stay as is).
const URL_SEGMENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn key_json<K: Serialize>(key: &K) -> Result<String, KeyEncodingError> {
    serde_json::to_string(key).map_err(|e| KeyEncodingError(e.to_string()))
}

/// Store path segment for a key: its JSON form with `%` and `/` escaped.
pub fn key_segment<K: Serialize>(key: &K) -> Result<String, KeyEncodingError> {
    Ok(utf8_percent_encode(&key_json(key)?, PATH_SEGMENT_SET).to_string())
}

/// Percent-encode a key's JSON form for use as a URL path segment.
pub fn url_segment<K: Serialize>(key: &K) -> Result<String, KeyEncodingError> {
    Ok(utf8_percent_encode(&key_json(key)?, URL_SEGMENT_SET).to_string())
}

/// Decode a key from its (already percent-decoded) URL segment.
///
/// Accepts the JSON form; text that is not valid JSON is tried as a bare
/// string so `/v1/query/abc` works for string keys.
pub fn decode_key<K: DeserializeOwned>(segment: &str) -> Result<K, KeyEncodingError> {
    match serde_json::from_str(segment) {
        Ok(key) => Ok(key),
        Err(json_err) => serde_json::from_value(serde_json::Value::String(segment.to_string()))
            .map_err(|_| KeyEncodingError(json_err.to_string())),
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_root_validation() {
        assert!(NamespaceRoot::new("/test").is_ok());
        assert!(NamespaceRoot::new("/apps/windows").is_ok());
        assert!(NamespaceRoot::new("/").is_ok());
        assert!(NamespaceRoot::new("test").is_err());
        assert!(NamespaceRoot::new("/test/").is_err());
        assert!(NamespaceRoot::new("/a//b").is_err());
        assert!(NamespaceRoot::new("").is_err());
    }

    #[test]
    fn entry_path_for_numeric_key() {
        let root = NamespaceRoot::new("/test").unwrap();
        assert_eq!(root.entry_path(&5i64).unwrap(), "/test/5");
    }

    #[test]
    fn entry_path_escapes_slashes() {
        let root = NamespaceRoot::new("/test").unwrap();
        let path = root.entry_path(&"a/b%c".to_string()).unwrap();
        assert_eq!(path, "/test/\"a%2Fb%25c\"");
        assert!(root.contains(&path));
    }

    #[test]
    fn entry_path_under_slash_root() {
        let root = NamespaceRoot::new("/").unwrap();
        assert_eq!(root.entry_path(&7u32).unwrap(), "/7");
        assert!(root.contains("/7"));
    }

    #[test]
    fn distinct_keys_get_distinct_paths() {
        let root = NamespaceRoot::new("/test").unwrap();
        let a = root.entry_path(&"1".to_string()).unwrap();
        let b = root.entry_path(&1i64).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn contains_only_direct_children() {
        let root = NamespaceRoot::new("/test").unwrap();
        assert!(root.contains("/test/5"));
        assert!(!root.contains("/test"));
        assert!(!root.contains("/test/"));
        assert!(!root.contains("/testing/5"));
        assert!(!root.contains("/test/5/6"));
        assert!(!root.contains("/other/5"));
    }

    #[test]
    fn namespace_root_deserialize_validates() {
        let ok: Result<NamespaceRoot, _> = serde_json::from_str("\"/test\"");
        assert!(ok.is_ok());
        let bad: Result<NamespaceRoot, _> = serde_json::from_str("\"relative\"");
        assert!(bad.is_err());
    }

    #[test]
    fn url_segment_percent_encodes() {
        assert_eq!(url_segment(&42i64).unwrap(), "42");
        assert_eq!(url_segment(&"a b".to_string()).unwrap(), "%22a%20b%22");
        assert_eq!(url_segment(&"x/y~z".to_string()).unwrap(), "%22x%2Fy~z%22");
        assert_eq!(url_segment(&-3i64).unwrap(), "-3");
    }

    #[test]
    fn entry_path_escapes_non_ascii() {
        let root = NamespaceRoot::new("/test").unwrap();
        let path = root.entry_path(&"\u{e9}/x".to_string()).unwrap();
        assert_eq!(path, "/test/\"%C3%A9%2Fx\"");
        assert!(root.contains(&path));
    }

    #[test]
    fn decode_key_accepts_json_and_bare_strings() {
        let n: i64 = decode_key("42").unwrap();
        assert_eq!(n, 42);
        let s: String = decode_key("\"abc\"").unwrap();
        assert_eq!(s, "abc");
        let bare: String = decode_key("abc").unwrap();
        assert_eq!(bare, "abc");
        assert!(decode_key::<i64>("abc").is_err());
    }

    #[test]
    fn location_record_serializes_location_as_string() {
        let record = LocationRecord {
            location: Location::new("10.0.0.1:7800"),
            registered_at_ms: 1000,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"location":"10.0.0.1:7800","registered_at_ms":1000}"#);
    }
}
