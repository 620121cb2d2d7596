//! Content-addressed fingerprints.
//!
//! Every cache layer in the pipeline keys its entries by these ids, so the
//! only property that matters is that identical `(text, scope, params)` input
//! always produces the identical id.

use sha2::{Digest, Sha256};

use crate::error::{CommonError, Result};

/// Name recorded on indexed documents for the hashing scheme.
pub const HASHER_MODEL: &str = "sha256";

/// Separates the fields of a composite hash input.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Deterministic SHA-256 fingerprinting of text content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    /// Create a new hasher.
    pub fn new() -> Self {
        Self
    }

    /// Name of the hashing scheme.
    pub fn model(&self) -> &'static str {
        HASHER_MODEL
    }

    /// Hash a single piece of text.
    pub fn hash(&self, text: &str) -> Result<String> {
        if text.is_empty() {
            return Err(CommonError::InvalidInput(
                "cannot hash empty text".to_string(),
            ));
        }
        Ok(sha256_hex(text.as_bytes()))
    }

    /// Hash a list of texts: hash each element, concatenate the digests,
    /// then hash the concatenation. Order-sensitive.
    pub fn hash_list<S: AsRef<str>>(&self, texts: &[S]) -> Result<String> {
        if texts.is_empty() {
            return Err(CommonError::InvalidInput(
                "cannot hash an empty list".to_string(),
            ));
        }

        let mut digests = String::with_capacity(texts.len() * 64);
        for text in texts {
            digests.push_str(&self.hash(text.as_ref())?);
        }
        Ok(sha256_hex(digests.as_bytes()))
    }

    /// Id of a whole document: the list hash of its texts qualified by the
    /// embedding scope and the splitting parameters, in caller order.
    pub fn document_id<S: AsRef<str>>(
        &self,
        texts: &[S],
        scope: &str,
        params: &[(&str, String)],
    ) -> Result<String> {
        let mut input = self.hash_list(texts)?;
        input.push(FIELD_SEPARATOR);
        input.push_str(scope);
        for (key, value) in params {
            input.push(FIELD_SEPARATOR);
            input.push_str(key);
            input.push('=');
            input.push_str(value);
        }
        Ok(sha256_hex(input.as_bytes()))
    }

    /// Id of a single fragment within an embedding scope.
    pub fn chunk_id(&self, text: &str, scope: &str) -> Result<String> {
        if text.is_empty() {
            return Err(CommonError::InvalidInput(
                "cannot hash empty fragment".to_string(),
            ));
        }
        let mut input = String::with_capacity(scope.len() + text.len() + 1);
        input.push_str(scope);
        input.push(FIELD_SEPARATOR);
        input.push_str(text);
        Ok(sha256_hex(input.as_bytes()))
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = ContentHasher::new();
        let a = hasher.hash("the quick brown fox").unwrap();
        let b = hasher.hash("the quick brown fox").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hasher.hash("the quick brown fox.").unwrap());
    }

    #[test]
    fn test_known_digest() {
        let hasher = ContentHasher::new();
        assert_eq!(
            hasher.hash("abc").unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_list_is_order_sensitive() {
        let hasher = ContentHasher::new();
        let ab = hasher.hash_list(&["a", "b"]).unwrap();
        let ba = hasher.hash_list(&["b", "a"]).unwrap();
        assert_ne!(ab, ba);
        assert_eq!(ab, hasher.hash_list(&["a".to_string(), "b".to_string()]).unwrap());
    }

    #[test]
    fn test_hash_list_hashes_concatenated_digests() {
        let hasher = ContentHasher::new();
        let expected = {
            let joined = format!("{}{}", hasher.hash("a").unwrap(), hasher.hash("b").unwrap());
            hasher.hash(&joined).unwrap()
        };
        assert_eq!(hasher.hash_list(&["a", "b"]).unwrap(), expected);
    }

    #[test]
    fn test_empty_input_rejected() {
        let hasher = ContentHasher::new();
        assert!(matches!(hasher.hash(""), Err(CommonError::InvalidInput(_))));
        let empty: [&str; 0] = [];
        assert!(hasher.hash_list(&empty).is_err());
        assert!(hasher.hash_list(&["ok", ""]).is_err());
        assert!(hasher.chunk_id("", "scope").is_err());
    }

    #[test]
    fn test_document_id_depends_on_scope_and_params() {
        let hasher = ContentHasher::new();
        let params = [("chunk_size", "100".to_string()), ("chunk_overlap", "10".to_string())];
        let id = hasher.document_id(&["chapter"], "model-a", &params).unwrap();

        assert_eq!(id, hasher.document_id(&["chapter"], "model-a", &params).unwrap());
        assert_ne!(id, hasher.document_id(&["chapter"], "model-b", &params).unwrap());

        let other = [("chunk_size", "200".to_string()), ("chunk_overlap", "10".to_string())];
        assert_ne!(id, hasher.document_id(&["chapter"], "model-a", &other).unwrap());
    }

    #[test]
    fn test_chunk_id_is_scope_qualified() {
        let hasher = ContentHasher::new();
        let a = hasher.chunk_id("fragment", "embedder-1").unwrap();
        assert_eq!(a, hasher.chunk_id("fragment", "embedder-1").unwrap());
        assert_ne!(a, hasher.chunk_id("fragment", "embedder-2").unwrap());
        assert_ne!(a, hasher.hash("fragment").unwrap());
    }
}
