use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::ResultCache;
use crate::error::GuardError;
use crate::types::RunMode;

/// Canonical form of contract text: lowercased, whitespace runs collapsed to a
/// single space, trimmed.
pub fn normalize(raw_text: &str) -> String {
    raw_text
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 of the normalized text.
pub fn fingerprint(raw_text: &str) -> String {
    hex::encode(Sha256::digest(normalize(raw_text).as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunPlan {
    Cached { key: String },
    Live { fingerprint: String },
}

/// Decides whether a submission is served from the demo cache or run live.
pub struct FingerprintResolver {
    cache: Arc<ResultCache>,
}

impl FingerprintResolver {
    pub fn new(cache: Arc<ResultCache>) -> Self {
        Self { cache }
    }

    /// Demo mode never falls through to a live run: a cache miss is an
    /// `UnknownSample` error.
    pub fn resolve(&self, raw_text: &str, mode: RunMode) -> Result<RunPlan, GuardError> {
        let key = fingerprint(raw_text);
        match mode {
            RunMode::Demo if self.cache.contains(&key) => {
                debug!(fingerprint = %key, "demo cache hit");
                Ok(RunPlan::Cached { key })
            }
            RunMode::Demo => Err(GuardError::UnknownSample { fingerprint: key }),
            RunMode::Live => Ok(RunPlan::Live { fingerprint: key }),
        }
    }
}
