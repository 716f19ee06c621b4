use serde::{de, ser, Serializer};
use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Fractional seconds since the Unix epoch, the timestamp representation
/// used throughout segment and subsegment documents.
///
/// This is the single source of "now" permitted in the crate; every
/// `start_time`/`end_time` field is produced by [`Seconds::now`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Seconds(pub(crate) f64);

impl Seconds {
    /// Returns the current wall-clock time as fractional seconds since the
    /// epoch, derived from nanosecond system-clock resolution.
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .into()
    }

    /// Returns this instant truncated to whole seconds, the resolution used
    /// to derive a trace id's creation timestamp.
    pub fn trunc(self) -> u64 {
        self.0.trunc() as u64
    }
}

impl From<Duration> for Seconds {
    fn from(d: Duration) -> Self {
        Seconds(d.as_secs() as f64 + (f64::from(d.subsec_nanos()) / 1.0e9))
    }
}

#[allow(clippy::from_over_into)]
impl Into<Duration> for Seconds {
    fn into(self) -> Duration {
        let Seconds(secs) = self;
        Duration::new(secs.trunc() as u64, (secs.fract() * 1.0e9) as u32)
    }
}

impl fmt::Display for Seconds {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SecondsVisitor;

impl<'de> de::Visitor<'de> for SecondsVisitor {
    type Value = Seconds;

    fn expecting(
        &self,
        formatter: &mut fmt::Formatter,
    ) -> fmt::Result {
        formatter.write_str("a floating point number of seconds")
    }

    fn visit_f64<E>(
        self,
        value: f64,
    ) -> Result<Seconds, E>
    where
        E: de::Error,
    {
        Ok(Seconds(value))
    }

    fn visit_u64<E>(
        self,
        value: u64,
    ) -> Result<Seconds, E>
    where
        E: de::Error,
    {
        Ok(Seconds(value as f64))
    }

    fn visit_i64<E>(
        self,
        value: i64,
    ) -> Result<Seconds, E>
    where
        E: de::Error,
    {
        Ok(Seconds(value as f64))
    }
}

impl ser::Serialize for Seconds {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> de::Deserialize<'de> for Seconds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_f64(SecondsVisitor)
    }
}
