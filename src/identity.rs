//! Publisher identity and signing.
//!
//! The replication peer requires a challenge/response authorization and a
//! signature header on every transaction. The identity also supplies the
//! address under which this publisher's stream entries live in the state
//! tree (`streams.<address>`).

use crate::error::SyncError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Length of the hex address derived from the public key.
const ADDRESS_BYTES: usize = 20;

/// A publisher identity: an ed25519 keypair plus its derived address.
pub struct Identity {
    signing_key: SigningKey,
    address: String,
}

impl Identity {
    /// Construct an identity from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let address = derive_address(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// Construct an identity from a hex-encoded 32-byte seed.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, SyncError> {
        let decoded = hex::decode(seed_hex.trim())
            .map_err(|e| SyncError::Config(format!("Invalid identity seed hex: {}", e)))?;
        let seed: [u8; 32] = decoded
            .try_into()
            .map_err(|_| SyncError::Config("Identity seed must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(seed))
    }

    /// The address under which this identity publishes, e.g. the `<address>`
    /// in `streams.<address>["segment0.ts"]`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign a message, returning the detached signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Sign a message and return the signature as hex, as the peer expects
    /// in `Signature` and challenge-response headers.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.sign(message).to_bytes())
    }
}

/// Derive the publisher address from a verifying key.
///
/// Address = hex of the first 20 bytes of BLAKE3(public key bytes).
fn derive_address(key: &VerifyingKey) -> String {
    let digest = blake3::hash(key.as_bytes());
    hex::encode(&digest.as_bytes()[..ADDRESS_BYTES])
}

/// Verify a hex signature against a verifying key. Used by tests and by
/// any embedding peer that checks our handshake responses locally.
pub fn verify_hex(
    key: &VerifyingKey,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), SyncError> {
    let bytes = hex::decode(signature_hex)
        .map_err(|e| SyncError::Validation(format!("Invalid signature hex: {}", e)))?;
    let sig_bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| SyncError::Validation("Signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&sig_bytes);
    key.verify(message, &signature)
        .map_err(|e| SyncError::Validation(format!("Signature verification failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_stable_for_seed() {
        let a = Identity::from_seed([3u8; 32]);
        let b = Identity::from_seed([3u8; 32]);
        assert_eq!(a.address(), b.address());
        assert_eq!(a.address().len(), ADDRESS_BYTES * 2);
    }

    #[test]
    fn test_different_seeds_different_addresses() {
        let a = Identity::from_seed([1u8; 32]);
        let b = Identity::from_seed([2u8; 32]);
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn test_sign_and_verify_round_trip() {
        let identity = Identity::from_seed([9u8; 32]);
        let sig = identity.sign_hex(b"challenge bytes");
        verify_hex(&identity.verifying_key(), b"challenge bytes", &sig).unwrap();
        assert!(verify_hex(&identity.verifying_key(), b"other bytes", &sig).is_err());
    }

    #[test]
    fn test_from_seed_hex_rejects_bad_input() {
        assert!(Identity::from_seed_hex("not hex").is_err());
        assert!(Identity::from_seed_hex("abcd").is_err());
        assert!(Identity::from_seed_hex(&"11".repeat(32)).is_ok());
    }
}
