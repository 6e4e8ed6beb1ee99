use rand::random;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// An id string was not hex, empty, or longer than the id's bit width allows.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed hex id")]
pub struct InvalidId;

/// A 64- or 128-bit trace id.
///
/// The width is part of the identity: a 64-bit id renders as 16 lower-case
/// hex characters and a 128-bit id as 32, with zero padding. The fixed width
/// is part of the wire contract for both JSON encodings.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId {
    hi: Option<u64>,
    lo: u64,
}

impl TraceId {
    /// Construct a 64-bit trace id.
    pub const fn from_u64(lo: u64) -> Self {
        TraceId { hi: None, lo }
    }

    /// Construct a 128-bit trace id.
    pub const fn from_u128(value: u128) -> Self {
        TraceId {
            hi: Some((value >> 64) as u64),
            lo: value as u64,
        }
    }

    /// Generate a random 64-bit trace id.
    pub fn random() -> Self {
        TraceId::from_u64(random())
    }

    /// Generate a random 128-bit trace id.
    ///
    /// The upper 32 bits are the current time in epoch seconds and the lower
    /// 96 bits are random, which allows AWS X-Ray interop.
    pub fn random_128() -> Self {
        let epoch_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        TraceId {
            hi: Some((epoch_seconds << 32) | u64::from(random::<u32>())),
            lo: random(),
        }
    }

    /// Whether this is a 128-bit id.
    pub fn is_wide(&self) -> bool {
        self.hi.is_some()
    }

    /// The low 64 bits, used by the sampling decision and the legacy binary
    /// encoding.
    pub fn low_u64(&self) -> u64 {
        self.lo
    }

    /// The high 64 bits of a 128-bit id.
    pub fn high_u64(&self) -> Option<u64> {
        self.hi
    }

    /// Big-endian byte-string form: 8 bytes for 64-bit ids, 16 for 128-bit.
    pub fn to_bytes(self) -> Vec<u8> {
        match self.hi {
            Some(hi) => {
                let mut bytes = hi.to_be_bytes().to_vec();
                bytes.extend_from_slice(&self.lo.to_be_bytes());
                bytes
            }
            None => self.lo.to_be_bytes().to_vec(),
        }
    }

    /// Parse a big-endian byte-string id of 8 or 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidId> {
        match bytes.len() {
            8 => Ok(TraceId::from_u64(u64::from_be_bytes(
                bytes.try_into().map_err(|_| InvalidId)?,
            ))),
            16 => Ok(TraceId {
                hi: Some(u64::from_be_bytes(
                    bytes[..8].try_into().map_err(|_| InvalidId)?,
                )),
                lo: u64::from_be_bytes(bytes[8..].try_into().map_err(|_| InvalidId)?),
            }),
            _ => Err(InvalidId),
        }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hi {
            Some(hi) => write!(f, "{:016x}{:016x}", hi, self.lo),
            None => write!(f, "{:016x}", self.lo),
        }
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({self})")
    }
}

impl FromStr for TraceId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            1..=16 => Ok(TraceId::from_u64(parse_hex(s)?)),
            17..=32 => {
                let (hi, lo) = s.split_at(s.len() - 16);
                Ok(TraceId {
                    hi: Some(parse_hex(hi)?),
                    lo: parse_hex(lo)?,
                })
            }
            _ => Err(InvalidId),
        }
    }
}

/// A 64-bit span id, rendered as 16 lower-case hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Construct a span id from its numeric value.
    pub const fn from_u64(id: u64) -> Self {
        SpanId(id)
    }

    /// Generate a random span id.
    pub fn random() -> Self {
        SpanId(random())
    }

    /// The numeric value.
    pub fn to_u64(self) -> u64 {
        self.0
    }

    /// Big-endian 8-byte form.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Parse a big-endian 8-byte id.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidId> {
        Ok(SpanId(u64::from_be_bytes(
            bytes.try_into().map_err(|_| InvalidId)?,
        )))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({self})")
    }
}

impl FromStr for SpanId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 16 {
            return Err(InvalidId);
        }
        Ok(SpanId(parse_hex(s)?))
    }
}

fn parse_hex(s: &str) -> Result<u64, InvalidId> {
    u64::from_str_radix(s, 16).map_err(|_| InvalidId)
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| de::Error::custom(format!("invalid trace id {s:?}")))
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|_| de::Error::custom(format!("invalid span id {s:?}")))
    }
}
