//! Byte-shift transform applied to every framed message.
//!
//! `encode` shifts each byte up by one and `decode` shifts it back down,
//! both wrapping at the edges of the byte range, so
//! `decode(encode(m)) == m` holds for any input.

use std::fmt;
use std::str::FromStr;

/// Direction of the shift, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Encode,
    Decode,
}

impl Transform {
    /// Apply this transform to a message body.
    pub fn apply(&self, input: &[u8]) -> Vec<u8> {
        match self {
            Transform::Encode => encode(input),
            Transform::Decode => decode(input),
        }
    }

    /// The transform that undoes this one.
    pub fn inverse(&self) -> Transform {
        match self {
            Transform::Encode => Transform::Decode,
            Transform::Decode => Transform::Encode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transform::Encode => "encode",
            Transform::Decode => "decode",
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a mode string that names no transform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transform provided: {0} (expected: encode, decode)")]
pub struct UnknownTransform(pub String);

impl FromStr for Transform {
    type Err = UnknownTransform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encode" => Ok(Transform::Encode),
            "decode" => Ok(Transform::Decode),
            other => Err(UnknownTransform(other.to_string())),
        }
    }
}

/// Shift every byte up by one.
pub fn encode(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b.wrapping_add(1)).collect()
}

/// Shift every byte down by one.
pub fn decode(input: &[u8]) -> Vec<u8> {
    input.iter().map(|b| b.wrapping_sub(1)).collect()
}
