//! Graph configuration.
//!
//! Every field has a default, so partial JSON files are accepted:
//!
//! ```json
//! { "max_inline_value_bytes": 4096, "name_substitution": "interning" }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::names::{IdentitySubstitution, InterningSubstitution, NameSubstitution};
use crate::error::{Error, Result};
use crate::rocksdb::BlockCacheConfig;

/// Name substitution strategy for qualifier tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameSubstitutionKind {
    Identity,
    #[default]
    Interning,
}

impl NameSubstitutionKind {
    pub fn build(self) -> Arc<dyn NameSubstitution> {
        match self {
            NameSubstitutionKind::Identity => Arc::new(IdentitySubstitution),
            NameSubstitutionKind::Interning => Arc::new(InterningSubstitution::new()),
        }
    }
}

/// Bounded exponential backoff for backend writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first. Default: 3
    pub max_attempts: u32,

    /// Delay before the first retry; doubles each retry. Default: 10ms
    pub initial_backoff: Duration,

    /// Upper bound for a single delay. Default: 500ms
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// String and byte values larger than this go to the large-object store. Default: 64KB
    pub max_inline_value_bytes: usize,

    pub name_substitution: NameSubstitutionKind,

    pub write_retry: RetryConfig,

    pub block_cache: BlockCacheConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_inline_value_bytes: 64 * 1024,
            name_substitution: NameSubstitutionKind::default(),
            write_retry: RetryConfig::default(),
            block_cache: BlockCacheConfig::default(),
        }
    }
}

impl GraphConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid(format!("graph config: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid(format!("reading graph config {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn with_max_inline_value_bytes(mut self, bytes: usize) -> Self {
        self.max_inline_value_bytes = bytes;
        self
    }

    pub fn with_name_substitution(mut self, kind: NameSubstitutionKind) -> Self {
        self.name_substitution = kind;
        self
    }

    pub fn with_write_retry(mut self, retry: RetryConfig) -> Self {
        self.write_retry = retry;
        self
    }
}
