//! Property tests for content addressing and transaction id determinism.

use proptest::prelude::*;
use segsync::builder::stream_patch;
use segsync::commit::Transaction;
use segsync::types::{ContentDigest, DigestAlgorithm, StateUri, TxId};

proptest! {
    /// Equal bytes always yield an equal digest.
    #[test]
    fn prop_content_digest_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let first = ContentDigest::blake3(&bytes);
        let second = ContentDigest::blake3(&bytes);
        prop_assert_eq!(first, second);
    }

    /// Digest hex survives a round trip.
    #[test]
    fn prop_digest_hex_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let digest = ContentDigest::blake3(&bytes);
        let parsed = ContentDigest::from_hex(DigestAlgorithm::Blake3, &digest.to_hex()).unwrap();
        prop_assert_eq!(digest, parsed);
    }

    /// Identical content produces identical transaction ids; a different
    /// parent produces a different id.
    #[test]
    fn prop_tx_id_deterministic(
        filename in "[a-z0-9]{1,12}\\.ts",
        digest_byte in any::<u8>(),
        parent_byte in 1u8..,
    ) {
        let uri = StateUri::new("demo.local/video");
        let patch = stream_patch(
            "addr0",
            &filename,
            ContentDigest::new(DigestAlgorithm::Sha3, [digest_byte; 32]),
        );

        let a = Transaction::new(uri.clone(), vec![TxId::GENESIS], vec![patch.clone()]);
        let b = Transaction::new(uri.clone(), vec![TxId::GENESIS], vec![patch.clone()]);
        prop_assert_eq!(a.id, b.id);

        let c = Transaction::new(uri, vec![TxId([parent_byte; 32])], vec![patch]);
        prop_assert_ne!(a.id, c.id);
    }
}
