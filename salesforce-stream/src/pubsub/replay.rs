use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::str::FromStr;

/// Opaque position in a topic's event stream.
///
/// Replay ids are raw bytes on the wire and rendered as base64 for humans.
/// A decimal integer is also accepted on input and encoded as 8 big-endian
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ReplayId(Vec<u8>);

impl ReplayId {
    /// Wraps raw replay id bytes as received from the server.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ReplayId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ReplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(&self.0))
    }
}

/// Replay id text is neither a decimal integer nor base64.
#[derive(thiserror::Error, Debug)]
#[error("Could not parse replay id {input:?}: {source}")]
pub struct ParseReplayIdError {
    input: String,
    #[source]
    source: base64::DecodeError,
}

impl FromStr for ReplayId {
    type Err = ParseReplayIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<i64>() {
            return Ok(Self(n.to_be_bytes().to_vec()));
        }
        STANDARD
            .decode(s)
            .map(Self)
            .map_err(|source| ParseReplayIdError {
                input: s.to_string(),
                source,
            })
    }
}
