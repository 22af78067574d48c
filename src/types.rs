//! Core identifier types shared across the sync client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Digest algorithm tag carried alongside content digests.
///
/// The replication peer content-addresses blobs with SHA3-256; transaction
/// ids are derived locally with BLAKE3. Keeping the algorithm on the digest
/// lets blob links serialize as `ref:<algo>:<hex>` without the patch layer
/// hard-coding either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    Sha3,
    Blake3,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha3 => "sha3",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content digest of a blob: equal bytes always yield an equal digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    pub algorithm: DigestAlgorithm,
    pub bytes: [u8; 32],
}

impl ContentDigest {
    pub fn new(algorithm: DigestAlgorithm, bytes: [u8; 32]) -> Self {
        Self { algorithm, bytes }
    }

    /// Compute a BLAKE3 digest over the given bytes.
    pub fn blake3(data: &[u8]) -> Self {
        Self {
            algorithm: DigestAlgorithm::Blake3,
            bytes: *blake3::hash(data).as_bytes(),
        }
    }

    /// Parse a digest from its hex representation, tagging it with `algorithm`.
    pub fn from_hex(algorithm: DigestAlgorithm, hex_str: &str) -> Option<Self> {
        let decoded = hex::decode(hex_str).ok()?;
        let bytes: [u8; 32] = decoded.try_into().ok()?;
        Some(Self { algorithm, bytes })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

/// Transaction identifier: 32 bytes, hex on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    /// The distinguished genesis id: the parent of the first transaction on
    /// a fresh state tree. All zeroes by convention.
    pub const GENESIS: TxId = TxId([0u8; 32]);

    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }

    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let decoded = hex::decode(hex_str).ok()?;
        let bytes: [u8; 32] = decoded.try_into().ok()?;
        Some(TxId(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// State tree URI a session publishes into, e.g. `p2pair.local/video`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateUri(pub String);

impl StateUri {
    pub fn new(uri: impl Into<String>) -> Self {
        StateUri(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_digest_deterministic() {
        let a = ContentDigest::blake3(b"segment bytes");
        let b = ContentDigest::blake3(b"segment bytes");
        assert_eq!(a, b);
        assert_ne!(a, ContentDigest::blake3(b"other bytes"));
    }

    #[test]
    fn test_digest_hex_round_trip() {
        let digest = ContentDigest::blake3(b"abc");
        let parsed = ContentDigest::from_hex(DigestAlgorithm::Blake3, &digest.to_hex()).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn test_digest_display_includes_algorithm() {
        let digest = ContentDigest::new(DigestAlgorithm::Sha3, [0xab; 32]);
        let rendered = digest.to_string();
        assert!(rendered.starts_with("sha3:"));
        assert!(rendered.ends_with(&"ab".repeat(32)));
    }

    #[test]
    fn test_genesis_tx_id() {
        assert!(TxId::GENESIS.is_genesis());
        assert!(!TxId([1u8; 32]).is_genesis());
        assert_eq!(TxId::GENESIS.to_hex(), "00".repeat(32));
    }

    #[test]
    fn test_tx_id_hex_round_trip() {
        let id = TxId([7u8; 32]);
        assert_eq!(TxId::from_hex(&id.to_hex()), Some(id));
        assert_eq!(TxId::from_hex("zz"), None);
    }
}
