//! Cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

use super::pipeline::TransformPipeline;

/// Identifier of one cached artifact.
///
/// Derived from a source key (the caller's custom key or the locator) and
/// the identity of the transform pipeline applied to it. The encoded form
/// length-prefixes the source key, so distinct `(source, identity)` pairs
/// always produce distinct keys regardless of their contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    encoded: String,
    source_len: usize,
    prefix_len: usize,
}

impl CacheKey {
    /// Derives the key of `source` processed by `pipeline`.
    #[must_use]
    pub fn derive(source: &str, pipeline: &TransformPipeline) -> Self {
        Self::from_parts(source, &pipeline.identifier())
    }

    /// Builds the key from a source key and a pipeline identifier.
    #[must_use]
    pub fn from_parts(source: &str, identity: &str) -> Self {
        let prefix = format!("{}:", source.len());
        let mut encoded = String::with_capacity(prefix.len() + source.len() + identity.len() + 1);
        encoded.push_str(&prefix);
        encoded.push_str(source);
        if !identity.is_empty() {
            encoded.push('@');
            encoded.push_str(identity);
        }
        Self {
            encoded,
            source_len: source.len(),
            prefix_len: prefix.len(),
        }
    }

    /// Returns the source key component.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.encoded[self.prefix_len..self.prefix_len + self.source_len]
    }

    /// Returns the pipeline identifier component (empty when unprocessed).
    #[must_use]
    pub fn identity(&self) -> &str {
        let rest = &self.encoded[self.prefix_len + self.source_len..];
        rest.strip_prefix('@').unwrap_or(rest)
    }

    /// Returns true when the key names an unprocessed image.
    #[must_use]
    pub fn is_original(&self) -> bool {
        self.identity().is_empty()
    }

    /// Returns the key of the same source without any processing.
    #[must_use]
    pub fn original(&self) -> Self {
        Self::from_parts(self.source(), "")
    }

    /// Returns the full encoded key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Returns a filesystem-safe digest of the key.
    #[must_use]
    pub fn file_stem(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.encoded.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}
