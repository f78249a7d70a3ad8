//! Beacon records and their on-disk encodings.
//!
//! Stores are keyed by the round number as 8 big-endian bytes, so the
//! lexicographic key order of the store is the numeric round order.
//!
//! Two value encodings exist:
//!
//! - **legacy**: a JSON object with hex-encoded byte strings,
//!   `{"PreviousSig": "..", "Round": 5, "Signature": ".."}`
//! - **raw**: the signature bytes alone. The previous signature is not
//!   stored, it is the value of the preceding key.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of a round key in bytes.
pub const KEY_LEN: usize = 8;

/// One entry of the randomness beacon chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconRecord {
    /// Signature of the previous round. Empty when absent.
    #[serde(
        rename = "PreviousSig",
        alias = "previous_sig",
        alias = "previousSig",
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "hex_bytes"
    )]
    pub previous_signature: Vec<u8>,
    /// Round number, the record key.
    #[serde(rename = "Round", alias = "round")]
    pub round: u64,
    /// Beacon signature for this round.
    #[serde(rename = "Signature", alias = "signature", with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl BeaconRecord {
    /// Creates a record without a previous signature.
    #[must_use]
    pub fn new(round: u64, signature: impl Into<Vec<u8>>) -> Self {
        Self {
            previous_signature: Vec::new(),
            round,
            signature: signature.into(),
        }
    }

    /// Decodes a value stored under the legacy JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when `value` is not a legacy record.
    pub fn decode_legacy(value: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(value)
    }

    /// Encodes the record under the legacy JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns the JSON error from the serializer.
    pub fn encode_legacy(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Rebuilds a record from a raw key/value pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceIo`] if the key is not a round key.
    pub fn from_raw(key: &[u8], value: &[u8]) -> Result<Self> {
        Ok(Self::new(round_from_key(key)?, value))
    }

    /// Decodes a stored pair, falling back to the raw encoding when the
    /// value is not a legacy record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceIo`] if the fallback cannot parse the key.
    pub fn decode(key: &[u8], value: &[u8]) -> Result<Self> {
        match Self::decode_legacy(value) {
            Ok(record) => Ok(record),
            Err(_) => Self::from_raw(key, value),
        }
    }

    /// Store key for this record.
    #[must_use]
    pub fn key(&self) -> [u8; KEY_LEN] {
        round_key(self.round)
    }
}

/// Encodes a round as a store key.
#[must_use]
pub fn round_key(round: u64) -> [u8; KEY_LEN] {
    round.to_be_bytes()
}

/// Decodes a store key into its round.
///
/// # Errors
///
/// Returns [`Error::SourceIo`] if the key is not exactly [`KEY_LEN`] bytes.
pub fn round_from_key(key: &[u8]) -> Result<u64> {
    let bytes: [u8; KEY_LEN] = key.try_into().map_err(|_| {
        Error::SourceIo(format!(
            "invalid round key of {} bytes, expected {}",
            key.len(),
            KEY_LEN
        ))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => hex::decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
#[path = "beacon_tests.rs"]
mod tests;
