//! Serialization protocol for stored checkpoints

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};

/// Encodes and decodes checkpoint documents for byte-oriented backends.
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;

    /// File extension used by file-backed stores
    fn extension(&self) -> &'static str;
}

/// Human-readable JSON (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        if self.pretty {
            Ok(serde_json::to_vec_pretty(value)?)
        } else {
            Ok(serde_json::to_vec(value)?)
        }
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

const ENVELOPE_MAGIC: u32 = 0x5347_4350; // "SGCP"

#[derive(Serialize, Deserialize)]
struct Envelope {
    magic: u32,
    payload: Vec<u8>,
}

/// Compact binary framing with bincode.
///
/// Session state is an open JSON map, which bincode cannot decode directly, so the
/// payload is the JSON encoding wrapped in a tagged bincode envelope.
#[derive(Debug, Clone, Default)]
pub struct BincodeSerializer;

impl BincodeSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for BincodeSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let envelope = Envelope {
            magic: ENVELOPE_MAGIC,
            payload: serde_json::to_vec(value)?,
        };
        Ok(bincode::serialize(&envelope)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        let envelope: Envelope = bincode::deserialize(data)?;
        if envelope.magic != ENVELOPE_MAGIC {
            return Err(CheckpointError::invalid("binary checkpoint has a bad header"));
        }
        Ok(serde_json::from_slice(&envelope.payload)?)
    }

    fn extension(&self) -> &'static str {
        "bin"
    }
}
