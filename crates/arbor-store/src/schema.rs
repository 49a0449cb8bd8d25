//! Secondary index definitions stored on record parents.
//!
//! An [`IndexDefinition`] names the root of a derived index subtree and the
//! record fields whose values make up each index key. Each field is a
//! [`FieldPath`] walked from the record node:
//!
//! ```text
//!   records/1/user/Joe          field "user"    -> values ["Joe"]
//!   records/1/tags/a, tags/b    field "tags"    -> values ["a", "b"]
//!   records/1/addr/home/zip/9   field "addr/*/zip" -> values ["9"]
//!   records/1                   field ""        -> values ["1"] (record id)
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use arbor_common::constants::WILDCARD_SEGMENT;
use arbor_common::error::{ArborError, ArborResult};
use arbor_common::types::{Segment, StoreKey};

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldSegment {
    /// Descend into the child with exactly this segment.
    Literal(Segment),
    /// Descend into every child.
    Wildcard,
}

/// Path from a record to the node whose children are the field values.
///
/// The empty path stands for the record id itself.
///
/// # Example
///
/// ```rust
/// use arbor_store::FieldPath;
///
/// let path = FieldPath::parse("addr/*/zip").unwrap();
/// assert_eq!(path.depth(), 3);
/// assert!(path.has_wildcard());
/// assert!(FieldPath::parse("").unwrap().is_record_id());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath {
    segments: Vec<FieldSegment>,
}

impl FieldPath {
    /// The field path that selects the record id.
    #[must_use]
    pub fn record_id() -> Self {
        Self::default()
    }

    /// Parses the textual form: escaped segments separated by `/`, with `*`
    /// as the wildcard. A leading `/` is ignored.
    pub fn parse(text: &str) -> ArborResult<Self> {
        let body = text.strip_prefix('/').unwrap_or(text);
        if body.is_empty() {
            return Ok(Self::record_id());
        }
        let mut segments = Vec::new();
        for part in body.split('/') {
            if part.is_empty() {
                return Err(ArborError::InvalidFieldPath {
                    path: text.to_string(),
                    reason: "empty segment".to_string(),
                });
            }
            if part == WILDCARD_SEGMENT {
                segments.push(FieldSegment::Wildcard);
                continue;
            }
            let segment = Segment::unescape(part).map_err(|e| ArborError::InvalidFieldPath {
                path: text.to_string(),
                reason: e.to_string(),
            })?;
            segments.push(FieldSegment::Literal(segment));
        }
        Ok(Self { segments })
    }

    /// Builds a path from literal segments only.
    #[must_use]
    pub fn literal<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Segment>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(|s| FieldSegment::Literal(s.into()))
                .collect(),
        }
    }

    /// Returns the steps of the path.
    #[must_use]
    pub fn segments(&self) -> &[FieldSegment] {
        &self.segments
    }

    /// Number of steps below the record. The record-id path has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns true for the record-id path, which selects the record's own
    /// segment instead of walking below it.
    #[must_use]
    pub fn is_record_id(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns true if any step is a wildcard.
    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, FieldSegment::Wildcard))
    }

    /// Returns true if a node at `relative` (segments below the record)
    /// lies on this field: on the walked path, at a value node, or below
    /// one.
    #[must_use]
    pub fn touches(&self, relative: &[Segment]) -> bool {
        self.segments
            .iter()
            .zip(relative.iter())
            .all(|(step, seg)| match step {
                FieldSegment::Wildcard => true,
                FieldSegment::Literal(lit) => lit == seg,
            })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match seg {
                FieldSegment::Wildcard => f.write_str(WILDCARD_SEGMENT)?,
                FieldSegment::Literal(s) => write!(f, "{s}")?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// A secondary index attached to a record parent.
///
/// Every record directly below the parent contributes one entry per
/// combination of its field values, at `index_root/v1/v2/...`, whose
/// relationship slot 0 points back at the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Root of the derived index subtree.
    pub index_root: StoreKey,
    /// Fields, in index-key order.
    pub fields: Vec<FieldPath>,
}

impl IndexDefinition {
    /// Creates a definition.
    #[must_use]
    pub fn new(index_root: StoreKey, fields: Vec<FieldPath>) -> Self {
        Self { index_root, fields }
    }

    /// Parses field paths from text and creates a definition.
    pub fn parse(index_root: &str, fields: &[&str]) -> ArborResult<Self> {
        let index_root = StoreKey::parse(index_root)?;
        let fields = fields
            .iter()
            .map(|f| FieldPath::parse(f))
            .collect::<ArborResult<Vec<_>>>()?;
        Ok(Self { index_root, fields })
    }

    /// Checks that the definition can produce index keys.
    pub fn validate(&self) -> ArborResult<()> {
        if self.index_root.is_root() {
            return Err(ArborError::invalid_argument("index root must not be the root key"));
        }
        if self.fields.is_empty() {
            return Err(ArborError::invalid_argument("index needs at least one field"));
        }
        Ok(())
    }
}
