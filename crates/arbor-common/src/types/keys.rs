//! Segment and key types for Arbor.
//!
//! A [`StoreKey`] is an ordered list of raw byte-string [`Segment`]s. Its
//! textual form joins the escaped segments with `/`:
//!
//! ```text
//!   raw segment bytes        escaped text
//!   ----------------------   ------------
//!   a/b                      a\sb
//!   a\b                      a\Sb
//!   0x00 0x41                \x00A
//!   0xFF (not UTF-8)         \xFF
//! ```
//!
//! The root key has no segments and renders as `/`.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::config::StoreConfig;
use crate::constants::{ESCAPE_CHAR, PATH_DELIMITER};
use crate::error::{ArborError, ArborResult};

/// One path component, stored as raw bytes.
///
/// # Example
///
/// ```rust
/// use arbor_common::types::Segment;
///
/// let seg = Segment::from("a/b");
/// assert_eq!(seg.escape(), "a\\sb");
/// assert_eq!(Segment::unescape("a\\sb").unwrap(), seg);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Segment(Bytes);

impl Segment {
    /// Creates a segment from raw bytes.
    #[inline]
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Creates a segment by copying a byte slice.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }

    /// Returns the segment as a byte slice.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns a reference to the underlying `Bytes`.
    #[inline]
    #[must_use]
    pub fn as_raw(&self) -> &Bytes {
        &self.0
    }

    /// Returns the underlying `Bytes`.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Returns the segment as UTF-8 text if it is valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Renders the segment in escaped text form.
    #[must_use]
    pub fn escape(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        self.escape_into(&mut out);
        out
    }

    fn escape_into(&self, out: &mut String) {
        match std::str::from_utf8(&self.0) {
            Ok(text) => {
                for ch in text.chars() {
                    if ch.is_ascii() {
                        escape_ascii(ch as u8, out);
                    } else {
                        out.push(ch);
                    }
                }
            }
            Err(_) => {
                for &byte in self.0.iter() {
                    if byte.is_ascii() {
                        escape_ascii(byte, out);
                    } else {
                        push_hex(byte, out);
                    }
                }
            }
        }
    }

    /// Decodes one escaped segment. The text must not contain a raw `/`.
    pub fn unescape(text: &str) -> ArborResult<Self> {
        let bytes = text.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            let byte = bytes[i];
            if byte == PATH_DELIMITER {
                return Err(ArborError::invalid_key(text, "unescaped '/' in segment"));
            }
            if byte != ESCAPE_CHAR {
                out.push(byte);
                i += 1;
                continue;
            }
            match bytes.get(i + 1) {
                Some(b's') => {
                    out.push(PATH_DELIMITER);
                    i += 2;
                }
                Some(b'S') => {
                    out.push(ESCAPE_CHAR);
                    i += 2;
                }
                Some(b'x') => {
                    let hex = bytes
                        .get(i + 2..i + 4)
                        .ok_or_else(|| ArborError::invalid_key(text, "truncated \\x escape"))?;
                    let value = std::str::from_utf8(hex)
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| ArborError::invalid_key(text, "invalid \\x escape"))?;
                    out.push(value);
                    i += 4;
                }
                Some(other) => {
                    return Err(ArborError::invalid_key(
                        text,
                        format!("unknown escape '\\{}'", char::from(*other)),
                    ));
                }
                None => return Err(ArborError::invalid_key(text, "dangling escape")),
            }
        }
        Ok(Self(Bytes::from(out)))
    }
}

fn escape_ascii(byte: u8, out: &mut String) {
    match byte {
        PATH_DELIMITER => out.push_str("\\s"),
        ESCAPE_CHAR => out.push_str("\\S"),
        b if b.is_ascii_control() => push_hex(b, out),
        b => out.push(char::from(b)),
    }
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn push_hex(byte: u8, out: &mut String) {
    out.push_str("\\x");
    out.push(char::from(HEX[usize::from(byte >> 4)]));
    out.push(char::from(HEX[usize::from(byte & 0x0F)]));
}

impl Deref for Segment {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Segment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<&[u8]> for Segment {
    fn from(b: &[u8]) -> Self {
        Self::from_bytes(b)
    }
}

impl From<Vec<u8>> for Segment {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl From<Bytes> for Segment {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment({})", self.escape())
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.escape())
    }
}

/// A path in the key tree.
///
/// Carries the decoded segments plus the cached escaped path string used as
/// the registry key. Equality, hashing and ordering follow the segments.
///
/// # Example
///
/// ```rust
/// use arbor_common::types::StoreKey;
///
/// let key = StoreKey::parse("/records/1").unwrap();
/// assert_eq!(key.len(), 2);
/// assert_eq!(key.parent().unwrap().path(), "/records");
/// assert_eq!(key.child("user").path(), "/records/1/user");
/// ```
#[derive(Clone)]
pub struct StoreKey {
    segments: Vec<Segment>,
    path: String,
}

impl StoreKey {
    /// Returns the root key.
    #[must_use]
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
            path: "/".to_string(),
        }
    }

    /// Parses the escaped textual form. A leading `/` is optional; `""` and
    /// `"/"` both denote the root.
    pub fn parse(text: &str) -> ArborResult<Self> {
        let body = text.strip_prefix('/').unwrap_or(text);
        if body.is_empty() {
            return Ok(Self::root());
        }
        let segments = body
            .split('/')
            .map(Segment::unescape)
            .collect::<ArborResult<Vec<_>>>()?;
        Ok(Self::from_segments(segments))
    }

    /// Builds a key from decoded segments.
    #[must_use]
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Segment>,
    {
        let segments: Vec<Segment> = segments.into_iter().map(Into::into).collect();
        let path = render(&segments);
        Self { segments, path }
    }

    /// Returns the decoded segments.
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the escaped path with its leading `/`.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the number of segments.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true for the root key.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns true for the root key.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the last segment, or `None` for the root.
    #[must_use]
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Returns the parent key, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, head) = self.segments.split_last()?;
        Some(Self::from_segments(head.iter().cloned()))
    }

    /// Returns the key with the first `depth` segments.
    #[must_use]
    pub fn prefix(&self, depth: usize) -> Self {
        let depth = depth.min(self.segments.len());
        Self::from_segments(self.segments[..depth].iter().cloned())
    }

    /// Returns this key extended by one segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<Segment>) -> Self {
        let segment = segment.into();
        let mut path = if self.is_root() {
            String::with_capacity(segment.len() + 1)
        } else {
            self.path.clone()
        };
        path.push('/');
        segment.escape_into(&mut path);
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend_from_slice(&self.segments);
        segments.push(segment);
        Self { segments, path }
    }

    /// Returns this key extended by all segments of `other`.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        Self::from_segments(self.segments.iter().chain(other.segments.iter()).cloned())
    }

    /// Returns true if `prefix` is an ancestor of, or equal to, this key.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Returns the segments after `prefix`, if `prefix` is a prefix.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Self) -> Option<&[Segment]> {
        self.segments.strip_prefix(prefix.segments.as_slice())
    }

    /// Checks the key against the configured limits.
    pub fn validate(&self, config: &StoreConfig) -> ArborResult<()> {
        if self.segments.len() > config.max_key_depth {
            return Err(ArborError::KeyTooDeep {
                depth: self.segments.len(),
                max_depth: config.max_key_depth,
            });
        }
        if let Some(seg) = self
            .segments
            .iter()
            .find(|s| s.len() > config.max_segment_size)
        {
            return Err(ArborError::SegmentTooLarge {
                size: seg.len(),
                max_size: config.max_segment_size,
            });
        }
        Ok(())
    }
}

fn render(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut path = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum());
    for seg in segments {
        path.push('/');
        seg.escape_into(&mut path);
    }
    path
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for StoreKey {}

impl std::hash::Hash for StoreKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl PartialOrd for StoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StoreKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl Default for StoreKey {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({})", self.path)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl FromStr for StoreKey {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for StoreKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.path)
    }
}

impl<'de> Deserialize<'de> for StoreKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_escape() {
        assert_eq!(Segment::from("plain").escape(), "plain");
        assert_eq!(Segment::from("a/b").escape(), "a\\sb");
        assert_eq!(Segment::from("a\\b").escape(), "a\\Sb");
        assert_eq!(Segment::from_bytes(&[0x00, b'A', 0x7F]).escape(), "\\x00A\\x7F");
        assert_eq!(Segment::from("héllo").escape(), "héllo");
        assert_eq!(Segment::from_bytes(&[b'a', 0xFF]).escape(), "a\\xFF");
    }

    #[test]
    fn test_segment_escape_hex_digits() {
        for byte in [0x01u8, 0x0A, 0x1F, 0x80, 0xAB, 0xFF] {
            let escaped = Segment::from_bytes(&[byte, 0xFE]).escape();
            let expected = format!("\\x{byte:02X}\\xFE");
            assert_eq!(escaped, expected);
            assert_eq!(
                Segment::unescape(&escaped).unwrap().as_bytes(),
                &[byte, 0xFE]
            );
        }
    }

    #[test]
    fn test_segment_unescape() {
        assert_eq!(Segment::unescape("a\\sb").unwrap(), Segment::from("a/b"));
        assert_eq!(Segment::unescape("a\\Sb").unwrap(), Segment::from("a\\b"));
        assert_eq!(
            Segment::unescape("\\xff\\x00").unwrap().as_bytes(),
            &[0xFF, 0x00]
        );
        assert_eq!(Segment::unescape("").unwrap(), Segment::default());
    }

    #[test]
    fn test_segment_unescape_errors() {
        assert!(Segment::unescape("a\\").is_err());
        assert!(Segment::unescape("a\\q").is_err());
        assert!(Segment::unescape("\\x1").is_err());
        assert!(Segment::unescape("\\xZZ").is_err());
        assert!(Segment::unescape("a/b").is_err());
    }

    #[test]
    fn test_segment_escape_roundtrip_binary() {
        let raw: Vec<u8> = (0u8..=255).collect();
        let seg = Segment::from(raw.clone());
        assert_eq!(Segment::unescape(&seg.escape()).unwrap().as_bytes(), &raw[..]);
    }

    #[test]
    fn test_key_parse() {
        let key = StoreKey::parse("records/1/user").unwrap();
        assert_eq!(key.len(), 3);
        assert_eq!(key.path(), "/records/1/user");
        assert_eq!(key, StoreKey::parse("/records/1/user").unwrap());
        assert!(StoreKey::parse("/").unwrap().is_root());
        assert!(StoreKey::parse("").unwrap().is_root());
        assert_eq!(StoreKey::root().to_string(), "/");
    }

    #[test]
    fn test_key_parse_escapes() {
        let key = StoreKey::parse("/a\\sb/c").unwrap();
        assert_eq!(key.len(), 2);
        assert_eq!(key.segments()[0].as_bytes(), b"a/b");
        assert_eq!(key.path(), "/a\\sb/c");
        assert!(StoreKey::parse("/a/\\q").is_err());
    }

    #[test]
    fn test_key_navigation() {
        let key = StoreKey::from_segments(["a", "b", "c"]);
        assert_eq!(key.parent().unwrap(), StoreKey::from_segments(["a", "b"]));
        assert_eq!(key.prefix(1).path(), "/a");
        assert_eq!(key.prefix(10), key);
        assert_eq!(key.last().unwrap(), &Segment::from("c"));
        assert!(StoreKey::root().parent().is_none());

        let child = StoreKey::root().child("x/y");
        assert_eq!(child.path(), "/x\\sy");
        assert_eq!(child.len(), 1);
    }

    #[test]
    fn test_key_prefix_ops() {
        let base = StoreKey::from_segments(["records", "1"]);
        let key = base.join(&StoreKey::from_segments(["user", "Joe"]));
        assert_eq!(key.path(), "/records/1/user/Joe");
        assert!(key.starts_with(&base));
        assert!(!base.starts_with(&key));
        assert_eq!(key.strip_prefix(&base).unwrap().len(), 2);
    }

    #[test]
    fn test_key_validate() {
        let config = StoreConfig::default().with_max_key_depth(2).with_max_segment_size(4);
        assert!(StoreKey::from_segments(["a", "b"]).validate(&config).is_ok());
        assert!(matches!(
            StoreKey::from_segments(["a", "b", "c"]).validate(&config),
            Err(ArborError::KeyTooDeep { depth: 3, .. })
        ));
        assert!(matches!(
            StoreKey::from_segments(["abcde"]).validate(&config),
            Err(ArborError::SegmentTooLarge { size: 5, .. })
        ));
    }

    #[test]
    fn test_key_ordering() {
        let a = StoreKey::from_segments(["a"]);
        let ab = StoreKey::from_segments(["a", "b"]);
        let b = StoreKey::from_segments(["b"]);
        assert!(a < ab);
        assert!(ab < b);
    }

    #[test]
    fn test_key_serde() {
        let key = StoreKey::from_segments(["a/b", "c"]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"/a\\\\sb/c\"");
        let back: StoreKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
