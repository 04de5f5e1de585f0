//! Consensus timestamps.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const NANOS_DIGITS: usize = 9;

/// The time the remote source assigned to a message.
///
/// Wire form is a decimal string, `"<seconds>.<nanoseconds>"`. Ordering is
/// numeric, so `"9.5"` sorts before `"10.0"` even though the strings do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConsensusTimestamp {
    /// Whole seconds.
    pub seconds: u64,
    /// Nanoseconds within the second (`0..1_000_000_000`).
    pub nanos: u32,
}

impl ConsensusTimestamp {
    /// Creates a timestamp, carrying overflowing nanoseconds into seconds.
    pub fn new(seconds: u64, nanos: u32) -> Self {
        Self {
            seconds: seconds + u64::from(nanos / 1_000_000_000),
            nanos: nanos % 1_000_000_000,
        }
    }

    /// Creates a timestamp with whole seconds only.
    pub fn from_seconds(seconds: u64) -> Self {
        Self { seconds, nanos: 0 }
    }

    /// Parses the wire form.
    pub fn parse(s: &str) -> ProtocolResult<Self> {
        let invalid = || ProtocolError::InvalidTimestamp(s.to_string());
        let (secs, frac) = match s.split_once('.') {
            Some((secs, frac)) => (secs, Some(frac)),
            None => (s, None),
        };

        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let seconds: u64 = secs.parse().map_err(|_| invalid())?;

        let nanos = match frac {
            None => 0,
            Some(frac) => {
                if frac.is_empty()
                    || frac.len() > NANOS_DIGITS
                    || !frac.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(invalid());
                }
                let padded = format!("{:0<width$}", frac, width = NANOS_DIGITS);
                padded.parse().map_err(|_| invalid())?
            }
        };

        Ok(Self { seconds, nanos })
    }
}

impl fmt::Display for ConsensusTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

impl FromStr for ConsensusTimestamp {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for ConsensusTimestamp {
    fn from(seconds: u64) -> Self {
        Self::from_seconds(seconds)
    }
}

impl Serialize for ConsensusTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConsensusTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
