//! Transaction builder.
//!
//! Turns a filename→digest mapping into the ordered patch sequence for one
//! commit. Pure and deterministic: identical input yields identical output,
//! so re-submitting a batch after a failed commit is semantically safe.

use crate::error::SyncError;
use crate::patch::{Patch, PatchPath, PatchValue};
use crate::types::ContentDigest;
use std::collections::BTreeMap;

/// Root segment under which all publishers' stream entries live.
const STREAMS_SEGMENT: &str = "streams";

/// Build one blob-link patch per uploaded file at
/// `streams.<address>["<filename>"]`.
///
/// The input is an ordered map, so patch order is deterministic. Every
/// produced patch is validated; a malformed filename fails the whole batch
/// rather than producing a partially valid transaction.
pub fn build_stream_patches(
    address: &str,
    uploads: &BTreeMap<String, ContentDigest>,
) -> Result<Vec<Patch>, SyncError> {
    let mut patches = Vec::with_capacity(uploads.len());
    for (filename, digest) in uploads {
        let patch = stream_patch(address, filename, *digest);
        patch.validate()?;
        patches.push(patch);
    }
    Ok(patches)
}

/// Build the patch for a single uploaded file.
pub fn stream_patch(address: &str, filename: &str, digest: ContentDigest) -> Patch {
    Patch::new(
        PatchPath::new(
            vec![STREAMS_SEGMENT.to_string(), address.to_string()],
            filename,
        ),
        PatchValue::BlobLink(digest),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DigestAlgorithm;

    fn digest(byte: u8) -> ContentDigest {
        ContentDigest::new(DigestAlgorithm::Sha3, [byte; 32])
    }

    #[test]
    fn test_one_patch_per_upload_in_key_order() {
        let mut uploads = BTreeMap::new();
        uploads.insert("segment1.ts".to_string(), digest(1));
        uploads.insert("index.m3u8".to_string(), digest(2));

        let patches = build_stream_patches("addr0", &uploads).unwrap();
        assert_eq!(patches.len(), 2);
        // BTreeMap iteration order: index.m3u8 sorts before segment1.ts.
        assert_eq!(patches[0].path.key, "index.m3u8");
        assert_eq!(patches[1].path.key, "segment1.ts");
        assert_eq!(
            patches[1].path.to_string(),
            ".streams.addr0[\"segment1.ts\"]"
        );
    }

    #[test]
    fn test_deterministic_across_calls() {
        let mut uploads = BTreeMap::new();
        uploads.insert("a.ts".to_string(), digest(7));
        uploads.insert("b.ts".to_string(), digest(8));

        let first = build_stream_patches("addr0", &uploads).unwrap();
        let second = build_stream_patches("addr0", &uploads).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_filename_fails_batch() {
        let mut uploads = BTreeMap::new();
        uploads.insert("ok.ts".to_string(), digest(1));
        uploads.insert("bad\"name.ts".to_string(), digest(2));

        assert!(build_stream_patches("addr0", &uploads).is_err());
    }

    #[test]
    fn test_empty_input_builds_no_patches() {
        let uploads = BTreeMap::new();
        let patches = build_stream_patches("addr0", &uploads).unwrap();
        assert!(patches.is_empty());
    }
}
