use crate::hexbytes::Bytes;
use rand::{rngs::OsRng, RngCore};
use serde::{de, ser, Serializer};
use std::fmt;

/// Unique identifier of a segment or subsegment, 16 hex characters drawn
/// from 8 cryptographically random bytes. No ordering is implied by value.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum SegmentId {
    #[doc(hidden)]
    New([u8; 8]),
    #[doc(hidden)]
    Rendered(String),
}

impl SegmentId {
    /// Generates a new segment id.
    pub fn new() -> Self {
        let mut buf = [0; 8];
        OsRng.fill_bytes(&mut buf);
        SegmentId::New(buf)
    }

    /// Adopts a segment id string carried in an inherited context.
    pub fn rendered<S: Into<String>>(value: S) -> Self {
        SegmentId::Rendered(value.into())
    }
}

impl fmt::Display for SegmentId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            SegmentId::New(bytes) => write!(f, "{:x}", Bytes(bytes)),
            SegmentId::Rendered(value) => write!(f, "{}", value),
        }
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        SegmentId::new()
    }
}

struct SegmentIdVisitor;

impl<'de> de::Visitor<'de> for SegmentIdVisitor {
    type Value = SegmentId;

    fn expecting(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        formatter.write_str("a string value")
    }

    fn visit_str<E>(
        self,
        value: &str,
    ) -> Result<SegmentId, E>
    where
        E: de::Error,
    {
        Ok(SegmentId::Rendered(value.into()))
    }
}

impl ser::Serialize for SegmentId {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}", self))
    }
}

impl<'de> de::Deserialize<'de> for SegmentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_str(SegmentIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn new_is_sixteen_hex_chars() {
        let re = Regex::new("^[0-9a-f]{16}$").unwrap();
        assert!(re.is_match(&format!("{}", SegmentId::new())));
    }

    #[test]
    fn distinct_ids_are_not_equal() {
        assert_ne!(SegmentId::new(), SegmentId::new());
    }
}
