//! Fingerprint generation for dedup.
//!
//! A fingerprint is a fixed-width SHA-256 prefix of the canonical form of an
//! item key. URL keys are canonicalized (scheme and host case, default port,
//! fragment, query order, optional parameter filtering) so that equivalent
//! URLs collapse to one fingerprint. Keys that do not parse as URLs are only
//! trimmed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Error, Result};

/// Fixed-width hash of a canonical key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Fingerprint {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Computes fingerprints for item keys.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    size: usize,
    /// When set, only these query parameters take part in the fingerprint.
    include_params: Option<BTreeSet<String>>,
    /// Query parameters that never take part in the fingerprint.
    exclude_params: BTreeSet<String>,
}

impl Fingerprinter {
    pub const DEFAULT_SIZE: usize = 16;
    pub const MAX_SIZE: usize = 32;

    /// Create a fingerprinter producing `size`-byte fingerprints.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 || size > Self::MAX_SIZE {
            return Err(Error::InvalidFingerprintSize(size));
        }
        Ok(Self {
            size,
            include_params: None,
            exclude_params: BTreeSet::new(),
        })
    }

    pub fn include_params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_params = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude_params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_params = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn keeps_param(&self, name: &str) -> bool {
        if self.exclude_params.contains(name) {
            return false;
        }
        match &self.include_params {
            Some(include) => include.contains(name),
            None => true,
        }
    }

    /// Canonical form of `key`.
    pub fn canonicalize(&self, key: &str) -> String {
        let trimmed = key.trim();
        let Ok(mut url) = Url::parse(trimmed) else {
            return trimmed.to_string();
        };
        if url.cannot_be_a_base() {
            return url.to_string();
        }

        url.set_fragment(None);

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| self.keeps_param(name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        pairs.sort();

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs.iter());
        }

        url.to_string()
    }

    /// Fingerprint of `key`.
    pub fn fingerprint(&self, key: &str) -> Fingerprint {
        let digest = Sha256::digest(self.canonicalize(key).as_bytes());
        Fingerprint(digest[..self.size].to_vec())
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self {
            size: Self::DEFAULT_SIZE,
            include_params: None,
            exclude_params: BTreeSet::new(),
        }
    }
}
