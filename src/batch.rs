//! Batch Identity
//!
//! batch_id = "b_" + sha256(canonical(pack) + canonical(sorted triples))[..12]
//!
//! Identical pack descriptor plus identical processed bytes always yields
//! the same id; any tag, metadata or pixel change yields a new one.

use serde::{Deserialize, Serialize};

use crate::hashing::{canonical_json, sha256_hex, CanonicalError};

pub const BATCH_ID_PREFIX: &str = "b_";
pub const BATCH_ID_HEX_LEN: usize = 12;

/// One variant's content hash, attributed to its sticker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashTriple {
    pub sticker_id: String,
    pub variant_key: String,
    pub sha256: String,
}

impl HashTriple {
    pub fn new(sticker_id: &str, variant_key: &str, sha256: &str) -> Self {
        Self {
            sticker_id: sticker_id.to_string(),
            variant_key: variant_key.to_string(),
            sha256: sha256.to_string(),
        }
    }
}

/// Derive the batch id from the authored pack document and every variant hash.
///
/// `triples` may arrive in any order; they are sorted before hashing.
pub fn compute_batch_id<P: Serialize + ?Sized>(
    pack: &P,
    triples: &[HashTriple],
) -> Result<String, CanonicalError> {
    let mut sorted = triples.to_vec();
    sorted.sort();

    let combined = format!("{}{}", canonical_json(pack)?, canonical_json(&sorted)?);
    let digest = sha256_hex(combined.as_bytes());
    Ok(format!("{}{}", BATCH_ID_PREFIX, &digest[..BATCH_ID_HEX_LEN]))
}

/// Shape check for ids arriving from the command line or old manifests.
pub fn is_batch_id(s: &str) -> bool {
    s.strip_prefix(BATCH_ID_PREFIX).map_or(false, |hex| {
        hex.len() == BATCH_ID_HEX_LEN && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn triples() -> Vec<HashTriple> {
        vec![
            HashTriple::new("cat", "thumb", "aa"),
            HashTriple::new("cat", "full", "bb"),
            HashTriple::new("dog", "thumb", "cc"),
        ]
    }

    #[test]
    fn test_batch_id_shape() {
        let id = compute_batch_id(&json!({"pack": {"packId": "p"}}), &triples()).unwrap();
        assert!(is_batch_id(&id), "{id}");
        assert_eq!(id.len(), 14);
    }

    #[test]
    fn test_batch_id_ignores_triple_order() {
        let pack = json!({"pack": {"packId": "p"}});
        let mut reversed = triples();
        reversed.reverse();
        assert_eq!(
            compute_batch_id(&pack, &triples()).unwrap(),
            compute_batch_id(&pack, &reversed).unwrap()
        );
    }

    #[test]
    fn test_batch_id_ignores_pack_key_order() {
        let a = json!({"schemaVersion": 1, "pack": {"name": "n", "packId": "p"}});
        let b = json!({"pack": {"packId": "p", "name": "n"}, "schemaVersion": 1});
        assert_eq!(
            compute_batch_id(&a, &triples()).unwrap(),
            compute_batch_id(&b, &triples()).unwrap()
        );
    }

    #[test]
    fn test_batch_id_sensitive_to_tags_and_hashes() {
        let pack = json!({"stickers": [{"stickerId": "cat", "tags": ["a"]}]});
        let base = compute_batch_id(&pack, &triples()).unwrap();

        let retagged = json!({"stickers": [{"stickerId": "cat", "tags": ["b"]}]});
        assert_ne!(base, compute_batch_id(&retagged, &triples()).unwrap());

        let mut changed = triples();
        changed[1].sha256 = "bc".into();
        assert_ne!(base, compute_batch_id(&pack, &changed).unwrap());
    }

    #[test]
    fn test_is_batch_id_rejects_garbage() {
        assert!(!is_batch_id("b_123"));
        assert!(!is_batch_id("x_0123456789ab"));
        assert!(!is_batch_id("b_0123456789AB"));
    }
}
