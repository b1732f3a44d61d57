//! Content hashing for idempotence checks and plan caching.
//!
//! Hashes are SHA-256 digests over canonical serializations, hex encoded.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::normalize::NormalizedWorkflow;

/// Fixed-width content digest of a normalized workflow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

/// Key identifying one compare input set in the plan cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

/// Hasher for normalized workflows and plan inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentHasher;

impl ContentHash {
    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 8 characters for display purposes.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl CacheKey {
    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ContentHasher {
    /// Creates a new content hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the content hash of a normalized workflow.
    ///
    /// Two workflows differing only in UI metadata hash equal.
    #[must_use]
    pub fn hash_workflow(&self, workflow: &NormalizedWorkflow) -> ContentHash {
        ContentHash(hex::encode(Sha256::digest(workflow.canonical().as_bytes())))
    }

    /// Computes the cache key of a compare call.
    ///
    /// Hash lists are `(workflow_id, hash)` pairs; absent workflows are
    /// passed as `None`. Order of the pairs does not matter.
    #[must_use]
    pub fn plan_cache_key(
        &self,
        pipeline_id: &str,
        stage_id: &str,
        source_env_id: &str,
        target_env_id: &str,
        source_hashes: &[(String, Option<ContentHash>)],
        target_hashes: &[(String, Option<ContentHash>)],
    ) -> CacheKey {
        let mut hasher = Sha256::new();

        // Length-prefixed fields so that ("ab", "c") and ("a", "bc") differ
        for field in [pipeline_id, stage_id, source_env_id, target_env_id] {
            update_field(&mut hasher, field);
        }

        for side in [source_hashes, target_hashes] {
            let mut entries: Vec<_> = side.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            hasher.update(entries.len().to_be_bytes());
            for (workflow_id, hash) in entries {
                update_field(&mut hasher, workflow_id);
                update_field(&mut hasher, hash.as_ref().map_or("-", ContentHash::as_str));
            }
        }

        CacheKey(hex::encode(hasher.finalize()))
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &ContentHash, hash2: &ContentHash) -> bool {
        let (a, b) = (hash1.as_str(), hash2.as_str());
        if a.len() != b.len() {
            return false;
        }

        a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
    }
}

fn update_field(hasher: &mut Sha256, field: &str) {
    hasher.update(field.len().to_be_bytes());
    hasher.update(field.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Normalizer, WorkflowGraph};
    use serde_json::json;

    fn normalized(url: &str, x: i64) -> NormalizedWorkflow {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "id": "wf-1",
            "nodes": [{
                "name": "Fetch", "type": "n8n-nodes-base.httpRequest",
                "position": [x, 0], "parameters": {"url": url}
            }]
        }))
        .unwrap();
        Normalizer::default().normalize(&graph).unwrap()
    }

    #[test]
    fn test_workflow_hash_deterministic() {
        let hasher = ContentHasher::new();
        let hash1 = hasher.hash_workflow(&normalized("https://api.foo/v1", 0));
        let hash2 = hasher.hash_workflow(&normalized("https://api.foo/v1", 480));

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.as_str().len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let hasher = ContentHasher::new();
        let hash1 = hasher.hash_workflow(&normalized("https://api.foo/v1", 0));
        let hash2 = hasher.hash_workflow(&normalized("https://api.bar/v2", 0));

        assert_ne!(hash1, hash2);
        assert!(!ContentHasher::hashes_match(&hash1, &hash2));
    }

    #[test]
    fn test_short_hash() {
        let hash = ContentHash(String::from("abcdef1234567890abcdef1234567890"));
        assert_eq!(hash.short(), "abcdef12");
    }

    #[test]
    fn test_cache_key_ignores_pair_order() {
        let hasher = ContentHasher::new();
        let h = |s: &str| Some(ContentHash(s.to_string()));
        let forward = vec![(String::from("a"), h("1")), (String::from("b"), None)];
        let reversed = vec![(String::from("b"), None), (String::from("a"), h("1"))];

        let key1 = hasher.plan_cache_key("p", "s", "dev", "prod", &forward, &[]);
        let key2 = hasher.plan_cache_key("p", "s", "dev", "prod", &reversed, &[]);
        assert_eq!(key1, key2);

        let key3 = hasher.plan_cache_key("p", "s", "dev", "prod", &[], &forward);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_cache_key_fields_are_delimited() {
        let hasher = ContentHasher::new();
        let key1 = hasher.plan_cache_key("ab", "c", "dev", "prod", &[], &[]);
        let key2 = hasher.plan_cache_key("a", "bc", "dev", "prod", &[], &[]);
        assert_ne!(key1, key2);
    }
}
