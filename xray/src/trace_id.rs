use crate::{epoch::Seconds, hexbytes::Bytes};
use rand::{rngs::OsRng, RngCore};
use serde::{de, ser, Serializer};
use std::fmt;

/// Correlates every segment and subsegment that originated from a single
/// client request, across every process that handled it.
///
/// Printed as `1-<8 hex seconds of creation>-<24 hex random>`, chosen so a
/// downstream system can recover the trace's creation time without a
/// separate field.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TraceId {
    #[doc(hidden)]
    New(u64, [u8; 12]),
    #[doc(hidden)]
    Rendered(String),
}

impl TraceId {
    /// Generates a new trace id seeded from the current time and 12 bytes
    /// drawn from the OS's cryptographic random source. A non-cryptographic
    /// PRNG is not acceptable here: downstream dedup keys on the raw id.
    pub fn new() -> Self {
        let mut buf = [0; 12];
        OsRng.fill_bytes(&mut buf);
        TraceId::New(Seconds::now().trunc(), buf)
    }

    /// Generates a new trace id as of `start`, rather than the current time.
    pub(crate) fn new_at(start: Seconds) -> Self {
        let mut buf = [0; 12];
        OsRng.fill_bytes(&mut buf);
        TraceId::New(start.trunc(), buf)
    }

    /// Adopts a trace id string carried in an inherited context, without
    /// validating its shape: an upstream system may use a different format.
    pub fn rendered<S: Into<String>>(value: S) -> Self {
        TraceId::Rendered(value.into())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        TraceId::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            TraceId::New(seconds, bytes) => write!(f, "1-{:08x}-{:x}", seconds, Bytes(bytes)),
            TraceId::Rendered(value) => write!(f, "{}", value),
        }
    }
}

struct TraceIdVisitor;

impl<'de> de::Visitor<'de> for TraceIdVisitor {
    type Value = TraceId;

    fn expecting(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        formatter.write_str("a string value")
    }

    fn visit_str<E>(
        self,
        value: &str,
    ) -> Result<TraceId, E>
    where
        E: de::Error,
    {
        Ok(TraceId::Rendered(value.into()))
    }
}

impl ser::Serialize for TraceId {
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

impl<'de> de::Deserialize<'de> for TraceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_str(TraceIdVisitor)
    }
}
